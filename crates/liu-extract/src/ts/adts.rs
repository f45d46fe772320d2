//! ADTS (Audio Data Transport Stream) 基本流读取器.
//!
//! ADTS 是 AAC 音频的自同步封装: 每帧以 12 位同步字 `0xFFF` 开头,
//! 头部 7 字节 (带 CRC 时 9 字节) 携带编码参数与帧长.
//!
//! 帧可以跨越 PES 边界, 读取器维护一个跨 PES 的持久缓冲区: 帧数据不足
//! 时回退到同步字并丢弃已消费前缀, 待下一个 PES 补齐后以上次计算的
//! 时间戳补发.
//!
//! 帧时间戳: `pes_pts + i * 10^6 * 1024 / sample_rate` (帧 i 从 0 起).

use liu_core::time::UNKNOWN_TIME_US;
use liu_core::{BitBuffer, LiuError, LiuResult};
use log::debug;

use super::TrackSink;
use crate::media_format::{MediaFormat, AUDIO_AAC, NO_VALUE};
use crate::sample::{SampleFlags, SamplePool};

/// AAC 采样率索引表 (ISO 14496-3)
const AAC_SAMPLE_RATES: [i32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    0,
];

/// 每个 AAC 帧的采样数
const SAMPLES_PER_FRAME: i64 = 1024;

/// ADTS 基本流读取器
pub(crate) struct AdtsReader {
    pub(crate) sink: TrackSink,
    /// 跨 PES 的持久帧缓冲
    buffer: BitBuffer,
    /// 最近一次计算的帧时间戳 (遗留半帧补发时使用)
    time_us: i64,
}

impl AdtsReader {
    pub fn new() -> Self {
        Self {
            sink: TrackSink::new(),
            buffer: BitBuffer::new(),
            time_us: 0,
        }
    }

    /// 消费一个 PES 的负载
    pub fn consume(
        &mut self,
        pes: &mut BitBuffer,
        payload_size: usize,
        pes_time_us: i64,
        pool: &mut SamplePool,
    ) -> LiuResult<()> {
        let has_leftovers = !self.buffer.is_empty();
        let length = payload_size.min(pes.bytes_left());
        self.buffer.append(pes, length)?;

        // 上一个 PES 遗留的半帧用上次的时间戳补发; 仍不完整则继续等
        if has_leftovers && !self.read_one_aac_frame(self.time_us, pool)? {
            return Ok(());
        }

        let mut frame_index: i64 = 0;
        loop {
            // 格式未知时帧时长记 0; 第 0 帧的时间戳恰为 pes_time_us
            let frame_duration = match &self.sink.media_format {
                Some(format) => 1_000_000 * SAMPLES_PER_FRAME / i64::from(format.sample_rate),
                None => 0,
            };
            self.time_us = pes_time_us + frame_index * frame_duration;
            frame_index += 1;
            if !self.read_one_aac_frame(self.time_us, pool)? {
                break;
            }
        }
        Ok(())
    }

    /// 尝试从缓冲区切出一个完整 ADTS 帧
    ///
    /// 返回 `false` 表示数据不足; 缓冲区回退到同步字处并丢弃已消费
    /// 前缀, 等待下一个 PES.
    fn read_one_aac_frame(&mut self, time_us: i64, pool: &mut SamplePool) -> LiuResult<bool> {
        let offset_to_sync = self.buffer.find_next_adts_sync_word();
        self.buffer.skip_bytes(offset_to_sync)?;
        let frame_start = self.buffer.byte_offset();

        if self.buffer.bytes_left() < 7 {
            self.buffer.set_byte_offset(frame_start);
            self.buffer.clear_read_data();
            return Ok(false);
        }

        self.buffer.skip_bits(15)?; // 同步字(12) + ID(1) + layer(2)
        let protection_absent = self.buffer.read_bit()? == 1;

        if self.sink.media_format.is_none() {
            let audio_object_type = self.buffer.read_bits(2)? as u8 + 1;
            let sample_rate_index = self.buffer.read_bits(4)? as u8;
            self.buffer.skip_bits(1)?; // private_bit
            let channel_config = self.buffer.read_bits(3)? as u8;

            let asc = build_audio_specific_config(audio_object_type, sample_rate_index, channel_config);
            let (sample_rate, channel_count) = parse_audio_specific_config(&asc)?;
            debug!("ADTS: AOT={audio_object_type} 采样率={sample_rate} 声道={channel_count}");
            self.sink.media_format = Some(MediaFormat::audio(
                AUDIO_AAC,
                NO_VALUE,
                UNKNOWN_TIME_US,
                channel_count,
                sample_rate,
                vec![asc],
            ));
        } else {
            self.buffer.skip_bits(10)?;
        }

        self.buffer.skip_bits(4)?; // copyright 标志等
        let frame_length = self.buffer.read_bits(13)? as usize;
        self.buffer.skip_bits(13)?; // buffer_fullness(11) + raw_data_blocks(2)

        // 帧长包含头部: 无 CRC 时减 7, 带 CRC 时跳过 2 字节 CRC 再减 9
        let frame_size = if protection_absent {
            frame_length.checked_sub(7)
        } else {
            self.buffer.skip_bytes(2)?;
            frame_length.checked_sub(9)
        }
        .ok_or_else(|| {
            LiuError::InvalidData(format!("ADTS: 帧长 {frame_length} 小于头部大小"))
        })?;

        if frame_size > self.buffer.bytes_left() {
            self.buffer.set_byte_offset(frame_start);
            self.buffer.clear_read_data();
            return Ok(false);
        }

        let mut sample = pool.obtain();
        sample.flags = SampleFlags::SYNC;
        sample.time_us = time_us;
        sample.append(self.buffer.read_slice(frame_size)?);
        self.sink.samples.push_back(sample);
        Ok(true)
    }

    pub fn clear(&mut self, pool: &mut SamplePool) {
        self.sink.clear(pool);
        self.buffer.reset();
    }
}

/// 构造 2 字节 AudioSpecificConfig (ISO 14496-3)
///
/// 布局: audioObjectType(5) + samplingFrequencyIndex(4) +
/// channelConfiguration(4) + 填充(3).
pub(crate) fn build_audio_specific_config(
    audio_object_type: u8,
    sample_rate_index: u8,
    channel_config: u8,
) -> Vec<u8> {
    vec![
        (audio_object_type << 3) | (sample_rate_index >> 1),
        ((sample_rate_index & 0x01) << 7) | (channel_config << 3),
    ]
}

/// 从 AudioSpecificConfig 解出 (采样率, 声道数)
pub(crate) fn parse_audio_specific_config(asc: &[u8]) -> LiuResult<(i32, i32)> {
    if asc.len() < 2 {
        return Err(LiuError::InvalidData("AudioSpecificConfig 太短".into()));
    }
    let sample_rate_index = ((asc[0] & 0x07) << 1) | (asc[1] >> 7);
    let channel_config = (asc[1] >> 3) & 0x0F;
    let sample_rate = AAC_SAMPLE_RATES
        .get(sample_rate_index as usize)
        .copied()
        .filter(|&sr| sr > 0)
        .ok_or_else(|| {
            LiuError::InvalidData(format!("不支持的采样率索引 {sample_rate_index}"))
        })?;
    Ok((sample_rate, i32::from(channel_config)))
}
