//! WebM/Matroska 提取器.
//!
//! 基于 EBML (Extensible Binary Meta Language) 编码, WebM 是 Matroska
//! 定义的元素子集.
//!
//! # 结构概览
//! ```text
//! EBML Header        文件头 (DocType: "webm" 或 "matroska")
//! Segment            根容器
//! ├── SeekHead       顶层元素索引 (→ Cues 位置)
//! ├── Info           段信息 (时间刻度, 时长)
//! ├── Tracks         轨道定义 (编解码器, 参数, 加密)
//! ├── Cluster        数据簇
//! │   ├── Timecode   簇基准时间戳
//! │   └── SimpleBlock / BlockGroup  采样数据块 (可带 lacing)
//! └── Cues           时间索引
//! ```
//!
//! 提取器消费 [`EbmlReader`](ebml::EbmlReader) 的事件流: 从 `Tracks`
//! 构建轨道描述 (各保留第一条受支持的音频与视频轨道), 把 `Cues` 累积成
//! seek 索引, 解析 `Cluster` 中的块与 lacing 并写出采样. 若在索引建成
//! 之前遇到 `Cluster` 而 `SeekHead` 已给出 Cues 位置, 则先请求 seek 去
//! 解析 Cues, 建成后回跳继续 (至多各一次).

pub mod ebml;
pub mod varint;

mod codec_private;

use liu_core::time::{ns_to_us, UNKNOWN_TIME_US};
use liu_core::{LiuError, LiuResult};
use log::debug;

use crate::chunk_index::ChunkIndex;
use crate::input::{ExtractorInput, PositionHolder};
use crate::media_format::{
    MediaFormat, AUDIO_AAC, AUDIO_AC3, AUDIO_OPUS, AUDIO_VORBIS, NO_VALUE, VIDEO_H264, VIDEO_VP8,
    VIDEO_VP9, VIDEO_WEBM,
};
use crate::output::{ExtractorOutput, TrackOutput};
use crate::sample::SampleFlags;

use self::codec_private::{
    opus_initialization_data, parse_h264_codec_private, parse_vorbis_codec_private,
    NAL_START_CODE,
};
use self::ebml::{EbmlReader, EbmlSink, ElementType};
use self::varint::VarintReader;

const DOC_TYPE_WEBM: &str = "webm";
const DOC_TYPE_MATROSKA: &str = "matroska";

const CODEC_ID_VP8: &str = "V_VP8";
const CODEC_ID_VP9: &str = "V_VP9";
const CODEC_ID_H264: &str = "V_MPEG4/ISO/AVC";
const CODEC_ID_VORBIS: &str = "A_VORBIS";
const CODEC_ID_OPUS: &str = "A_OPUS";
const CODEC_ID_AAC: &str = "A_AAC";
const CODEC_ID_AC3: &str = "A_AC3";

/// Vorbis 采样的输入缓冲上限
const VORBIS_MAX_INPUT_SIZE: i32 = 8192;
/// Opus 采样的输入缓冲上限
const OPUS_MAX_INPUT_SIZE: i32 = 5760;
/// 加密采样的 IV 大小 (字节)
const ENCRYPTION_IV_SIZE: u8 = 8;

const TRACK_TYPE_AUDIO: i32 = 2;
const TRACK_TYPE_VIDEO: i32 = 1;

/// lacing 方式
const LACING_NONE: u8 = 0;
const LACING_XIPH: u8 = 1;
const LACING_FIXED_SIZE: u8 = 2;
const LACING_EBML: u8 = 3;

/// Vorbis 采样尾部的"页内采样数"填充值 (-1, 解码器忽略)
const VORBIS_NUM_PAGE_SAMPLES: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

/// `read` 的返回结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadResult {
    /// 正常前进, 继续调用
    Continue,
    /// 请求定位: 调用方按 `PositionHolder` 重新定位输入后继续
    Seek,
    /// 到达输入末尾
    EndOfInput,
}

/// Cues 索引构建状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CuesState {
    NotBuilt,
    Building,
    Built,
}

/// Block 解析状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    /// 等待轨道号
    Start,
    /// 等待时间戳/标志/lacing 头部
    Header,
    /// 写出各 laced 采样
    Data,
}

/// TrackEntry 解析期间的轨道描述暂存
struct TrackFormat {
    codec_id: String,
    number: Option<i32>,
    track_type: Option<i32>,
    default_sample_duration_ns: i64,
    has_content_encryption: bool,
    encryption_key_id: Option<Vec<u8>>,
    codec_private: Option<Vec<u8>>,
    pixel_width: i32,
    pixel_height: i32,
    channel_count: i32,
    sample_rate: i32,
    codec_delay_ns: u64,
    seek_preroll_ns: u64,
}

impl TrackFormat {
    fn new() -> Self {
        Self {
            codec_id: String::new(),
            number: None,
            track_type: None,
            default_sample_duration_ns: 0,
            has_content_encryption: false,
            encryption_key_id: None,
            codec_private: None,
            pixel_width: NO_VALUE,
            pixel_height: NO_VALUE,
            channel_count: NO_VALUE,
            sample_rate: NO_VALUE,
            codec_delay_ns: 0,
            seek_preroll_ns: 0,
        }
    }

    /// 构建媒体格式与写采样时所需的编解码信息
    fn build_media_format(&self, duration_us: i64) -> LiuResult<(MediaFormat, TrackCodec)> {
        let format_and_codec = match self.codec_id.as_str() {
            CODEC_ID_VP8 => (
                MediaFormat::video(
                    VIDEO_VP8,
                    NO_VALUE,
                    duration_us,
                    self.pixel_width,
                    self.pixel_height,
                    Vec::new(),
                ),
                TrackCodec::Other,
            ),
            CODEC_ID_VP9 => (
                MediaFormat::video(
                    VIDEO_VP9,
                    NO_VALUE,
                    duration_us,
                    self.pixel_width,
                    self.pixel_height,
                    Vec::new(),
                ),
                TrackCodec::Other,
            ),
            CODEC_ID_H264 => {
                let codec_private = self.codec_private.as_deref().ok_or_else(|| {
                    LiuError::InvalidData("H.264: 缺少 CodecPrivate".into())
                })?;
                let (initialization_data, nal_length_field) =
                    parse_h264_codec_private(codec_private)?;
                (
                    MediaFormat::video(
                        VIDEO_H264,
                        NO_VALUE,
                        duration_us,
                        self.pixel_width,
                        self.pixel_height,
                        initialization_data,
                    ),
                    TrackCodec::H264 { nal_length_field },
                )
            }
            CODEC_ID_VORBIS => {
                let codec_private = self.codec_private.as_deref().ok_or_else(|| {
                    LiuError::InvalidData("Vorbis: 缺少 CodecPrivate".into())
                })?;
                (
                    MediaFormat::audio(
                        AUDIO_VORBIS,
                        VORBIS_MAX_INPUT_SIZE,
                        duration_us,
                        self.channel_count,
                        self.sample_rate,
                        parse_vorbis_codec_private(codec_private)?,
                    ),
                    TrackCodec::Vorbis,
                )
            }
            CODEC_ID_OPUS => (
                MediaFormat::audio(
                    AUDIO_OPUS,
                    OPUS_MAX_INPUT_SIZE,
                    duration_us,
                    self.channel_count,
                    self.sample_rate,
                    opus_initialization_data(
                        self.codec_private.as_deref().unwrap_or_default(),
                        self.codec_delay_ns,
                        self.seek_preroll_ns,
                    ),
                ),
                TrackCodec::Other,
            ),
            CODEC_ID_AAC => (
                MediaFormat::audio(
                    AUDIO_AAC,
                    NO_VALUE,
                    duration_us,
                    self.channel_count,
                    self.sample_rate,
                    vec![self.codec_private.clone().unwrap_or_default()],
                ),
                TrackCodec::Other,
            ),
            CODEC_ID_AC3 => (
                MediaFormat::audio(
                    AUDIO_AC3,
                    NO_VALUE,
                    duration_us,
                    self.channel_count,
                    self.sample_rate,
                    Vec::new(),
                ),
                TrackCodec::Other,
            ),
            other => {
                return Err(LiuError::InvalidData(format!(
                    "无法识别的编解码器标识: {other}"
                )))
            }
        };
        Ok(format_and_codec)
    }
}

/// 是否为受支持的编解码器
fn is_codec_supported(codec_id: &str) -> bool {
    matches!(
        codec_id,
        CODEC_ID_VP8
            | CODEC_ID_VP9
            | CODEC_ID_H264
            | CODEC_ID_VORBIS
            | CODEC_ID_OPUS
            | CODEC_ID_AAC
            | CODEC_ID_AC3
    )
}

/// 写采样路径所需的编解码信息
#[derive(Debug, Clone, PartialEq, Eq)]
enum TrackCodec {
    /// NAL 单元为长度前缀, 需改写为起始码
    H264 { nal_length_field: usize },
    /// 采样尾部追加"页内采样数"
    Vorbis,
    /// 负载原样直通
    Other,
}

/// 已保留的轨道
#[derive(Clone)]
struct Track {
    number: i32,
    codec: TrackCodec,
    default_sample_duration_ns: i64,
    has_content_encryption: bool,
    encryption_key_id: Option<Vec<u8>>,
}

/// WebM/Matroska 提取器
///
/// 使用流程:
/// 1. `new(output)` 绑定输出
/// 2. 循环调用 [`read`](Self::read); 返回 `Seek` 时按 `PositionHolder`
///    重新定位输入再继续
/// 3. [`seek`](Self::seek) 复位后可针对新位置复用实例
pub struct WebmExtractor<O: ExtractorOutput> {
    reader: EbmlReader,
    segment: SegmentParser<O>,
}

impl<O: ExtractorOutput> WebmExtractor<O> {
    /// 创建提取器并绑定输出
    pub fn new(output: O) -> Self {
        Self {
            reader: EbmlReader::new(),
            segment: SegmentParser::new(output),
        }
    }

    /// 输出的引用
    pub fn output(&self) -> &O {
        &self.segment.output
    }

    /// 输出的可变引用
    pub fn output_mut(&mut self) -> &mut O {
        &mut self.segment.output
    }

    /// 消耗提取器, 取回输出
    pub fn into_output(self) -> O {
        self.segment.output
    }

    /// 复位解析状态 (用户 seek 后调用)
    pub fn seek(&mut self) {
        self.reader.reset();
        self.segment.reset_parse_state();
    }

    /// 推进解析
    ///
    /// 读取在以下任一情况发生时结束:
    /// - 读出一个采样或到达事件边界 → `Continue`
    /// - 需要定位 (构建 Cues 或建成后回跳) → `Seek`, 位置写入 `seek_position`
    /// - 输入结束 → `EndOfInput`
    ///
    /// 输入不足时返回 `Err(NeedMoreData)`, 补充数据后重试.
    pub fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        seek_position: &mut PositionHolder,
    ) -> LiuResult<ReadResult> {
        self.segment.sample_read = false;
        let mut continue_reading = true;
        while continue_reading && !self.segment.sample_read {
            continue_reading = self.reader.read(input, &mut self.segment)?;
            if continue_reading && self.segment.maybe_seek_for_cues(seek_position, input.position())
            {
                return Ok(ReadResult::Seek);
            }
        }
        Ok(if continue_reading {
            ReadResult::Continue
        } else {
            ReadResult::EndOfInput
        })
    }
}

/// Segment 解释器: 消费 EBML 事件, 维护轨道/索引/块状态
struct SegmentParser<O: ExtractorOutput> {
    output: O,
    /// 块轨道号读取器 (独立于 EbmlReader 内部的那一个)
    varint: VarintReader,
    /// 块头部/lacing 的累积缓冲
    scratch: Vec<u8>,
    /// NAL 长度前缀读取缓冲
    nal_length: [u8; 4],

    segment_content_position: Option<u64>,
    segment_content_size: u64,
    /// 时间刻度 (纳秒/tick, 默认 1_000_000 即 1ms)
    timecode_scale: i64,
    duration_us: i64,

    /// 正在解析的 TrackEntry
    track_format: Option<TrackFormat>,
    audio_track: Option<Track>,
    video_track: Option<Track>,
    sent_drm_init_data: bool,

    // SeekHead 条目状态
    seek_entry_id: Option<u32>,
    seek_entry_position: Option<u64>,

    // Cues 状态
    seek_for_cues: bool,
    cues_content_position: Option<u64>,
    seek_position_after_building_cues: Option<u64>,
    cues_state: CuesState,
    cue_times_us: Vec<i64>,
    cue_cluster_positions: Vec<u64>,
    seen_cluster_position_for_cue_point: bool,

    cluster_timecode_us: i64,

    // 块读取状态
    block_state: BlockState,
    block_time_us: i64,
    block_lacing_sample_index: usize,
    block_lacing_sample_count: usize,
    block_lacing_sample_sizes: Vec<i32>,
    block_track_number: i32,
    block_track_number_length: usize,
    block_flags: SampleFlags,
    block_encryption_key_id: Option<Vec<u8>>,

    // 采样写出状态
    sample_bytes_read: usize,
    sample_encryption_data_read: bool,
    sample_current_nal_bytes_remaining: usize,
    sample_bytes_written: usize,
    sample_read: bool,
    sample_seen_reference_block: bool,
}

impl<O: ExtractorOutput> SegmentParser<O> {
    fn new(output: O) -> Self {
        Self {
            output,
            varint: VarintReader::new(),
            scratch: Vec::with_capacity(8),
            nal_length: [0; 4],
            segment_content_position: None,
            segment_content_size: 0,
            timecode_scale: 1_000_000,
            duration_us: UNKNOWN_TIME_US,
            track_format: None,
            audio_track: None,
            video_track: None,
            sent_drm_init_data: false,
            seek_entry_id: None,
            seek_entry_position: None,
            seek_for_cues: false,
            cues_content_position: None,
            seek_position_after_building_cues: None,
            cues_state: CuesState::NotBuilt,
            cue_times_us: Vec::new(),
            cue_cluster_positions: Vec::new(),
            seen_cluster_position_for_cue_point: false,
            cluster_timecode_us: UNKNOWN_TIME_US,
            block_state: BlockState::Start,
            block_time_us: 0,
            block_lacing_sample_index: 0,
            block_lacing_sample_count: 0,
            block_lacing_sample_sizes: Vec::new(),
            block_track_number: 0,
            block_track_number_length: 0,
            block_flags: SampleFlags::empty(),
            block_encryption_key_id: None,
            sample_bytes_read: 0,
            sample_encryption_data_read: false,
            sample_current_nal_bytes_remaining: 0,
            sample_bytes_written: 0,
            sample_read: false,
            sample_seen_reference_block: false,
        }
    }

    /// seek 后复位逐块解析状态 (轨道与索引保留)
    fn reset_parse_state(&mut self) {
        self.cluster_timecode_us = UNKNOWN_TIME_US;
        self.block_state = BlockState::Start;
        self.varint.reset();
        self.scratch.clear();
        self.sample_current_nal_bytes_remaining = 0;
        self.sample_bytes_read = 0;
        self.sample_bytes_written = 0;
        self.sample_encryption_data_read = false;
    }

    fn scale_timecode_to_us(&self, unscaled: i64) -> i64 {
        ns_to_us(unscaled * self.timecode_scale)
    }

    fn track_format_mut(&mut self) -> LiuResult<&mut TrackFormat> {
        self.track_format
            .as_mut()
            .ok_or_else(|| LiuError::InvalidData("轨道元素出现在 TrackEntry 之外".into()))
    }

    /// 请求/完成 Cues 定位
    ///
    /// 首次遇到 Cluster 且 Cues 未建时定位到 Cues; 建成后回跳到之前的
    /// 位置, 且只回跳一次.
    fn maybe_seek_for_cues(
        &mut self,
        seek_position: &mut PositionHolder,
        current_position: u64,
    ) -> bool {
        if self.seek_for_cues {
            self.seek_position_after_building_cues = Some(current_position);
            seek_position.position = self
                .cues_content_position
                .expect("seek_for_cues 仅在位置已知时置位");
            self.cues_state = CuesState::Building;
            self.seek_for_cues = false;
            return true;
        }
        if self.cues_state == CuesState::Built {
            if let Some(position) = self.seek_position_after_building_cues.take() {
                seek_position.position = position;
                return true;
            }
        }
        false
    }

    /// 用累积的 Cues 信息构建块索引
    fn build_cues(&mut self) -> LiuResult<ChunkIndex> {
        let segment_content_position = self
            .segment_content_position
            .ok_or_else(|| LiuError::InvalidData("Segment 起始位置未知".into()))?;
        if self.duration_us == UNKNOWN_TIME_US {
            return Err(LiuError::InvalidData("时长未知, 无法构建索引".into()));
        }
        let count = self.cue_times_us.len();
        if count == 0 || count != self.cue_cluster_positions.len() {
            return Err(LiuError::InvalidData("Cue 点缺失或数量不一致".into()));
        }

        let times_us = std::mem::take(&mut self.cue_times_us);
        let cue_cluster_positions = std::mem::take(&mut self.cue_cluster_positions);

        let offsets: Vec<u64> = cue_cluster_positions
            .iter()
            .map(|&position| segment_content_position + position)
            .collect();
        let mut sizes = Vec::with_capacity(count);
        let mut durations_us = Vec::with_capacity(count);
        for i in 0..count - 1 {
            sizes.push((offsets[i + 1] - offsets[i]) as u32);
            durations_us.push(times_us[i + 1] - times_us[i]);
        }
        sizes.push(
            (segment_content_position + self.segment_content_size - offsets[count - 1]) as u32,
        );
        durations_us.push(self.duration_us - times_us[count - 1]);

        Ok(ChunkIndex {
            sizes,
            offsets,
            durations_us,
            times_us,
        })
    }

    /// 保证 scratch 中有至少 `required` 字节, 必要时从输入补读
    ///
    /// 输入不足时挂起, scratch 维持原状.
    fn read_scratch(&mut self, input: &mut dyn ExtractorInput, required: usize) -> LiuResult<()> {
        let limit = self.scratch.len();
        if limit >= required {
            return Ok(());
        }
        self.scratch.resize(required, 0);
        match input.read_fully(&mut self.scratch[limit..required]) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.scratch.truncate(limit);
                Err(e)
            }
        }
    }

    /// 提交当前采样的元信息并复位写出状态
    fn output_sample_metadata(&mut self, track_number: i32, time_us: i64) {
        let Self {
            output,
            block_flags,
            block_encryption_key_id,
            sample_bytes_written,
            ..
        } = self;
        output.track(track_number).sample_metadata(
            time_us,
            *block_flags,
            *sample_bytes_written,
            0,
            block_encryption_key_id.as_deref(),
        );
        self.sample_read = true;
        self.sample_bytes_read = 0;
        self.sample_bytes_written = 0;
        self.sample_encryption_data_read = false;
    }

    /// 解析 SimpleBlock / Block (含 lacing), 写出采样负载
    fn read_block(
        &mut self,
        id: u32,
        content_size: usize,
        input: &mut dyn ExtractorInput,
    ) -> LiuResult<()> {
        if self.block_state == BlockState::Start {
            let track_number = self
                .varint
                .read_unsigned_varint(input, false, true, 8)?
                .expect("轨道号读取不以流末尾结束");
            self.block_track_number = track_number as i32;
            self.block_track_number_length = self.varint.last_length();
            self.block_state = BlockState::Header;
            self.scratch.clear();
        }

        // 块不属于保留的音视频轨道时整体跳过
        let is_audio = self
            .audio_track
            .as_ref()
            .is_some_and(|t| t.number == self.block_track_number);
        let is_video = self
            .video_track
            .as_ref()
            .is_some_and(|t| t.number == self.block_track_number);
        if !is_audio && !is_video {
            let remaining = content_size
                .checked_sub(self.block_track_number_length)
                .ok_or_else(|| LiuError::InvalidData("块内容小于轨道号长度".into()))?;
            input.skip_fully(remaining as u64)?;
            self.block_state = BlockState::Start;
            return Ok(());
        }
        let track = if is_audio {
            self.audio_track.clone()
        } else {
            self.video_track.clone()
        }
        .expect("轨道已验证存在");

        if self.block_state == BlockState::Header {
            // 相对时间戳 (2 字节) + 标志 (1 字节)
            self.read_scratch(input, 3)?;
            if content_size < self.block_track_number_length + 3 {
                return Err(LiuError::InvalidData("块内容小于块头部".into()));
            }
            let flags = self.scratch[2];
            let lacing = (flags >> 1) & 0x03;

            if lacing == LACING_NONE {
                self.block_lacing_sample_count = 1;
                ensure_capacity(&mut self.block_lacing_sample_sizes, 1);
                self.block_lacing_sample_sizes[0] =
                    (content_size - self.block_track_number_length - 3) as i32;
            } else {
                if id != ebml::SIMPLE_BLOCK {
                    return Err(LiuError::Unsupported(
                        "lacing 仅允许出现在 SimpleBlock 中".into(),
                    ));
                }

                // 采样数 (1 字节, 存储值 + 1)
                self.read_scratch(input, 4)?;
                if content_size < self.block_track_number_length + 4 {
                    return Err(LiuError::InvalidData("块内容小于 lacing 头部".into()));
                }
                let sample_count = usize::from(self.scratch[3]) + 1;
                self.block_lacing_sample_count = sample_count;
                ensure_capacity(&mut self.block_lacing_sample_sizes, sample_count);

                match lacing {
                    LACING_FIXED_SIZE => {
                        let sample_size = (content_size
                            - self.block_track_number_length
                            - 4)
                            / sample_count;
                        self.block_lacing_sample_sizes[..sample_count]
                            .fill(sample_size as i32);
                    }
                    LACING_XIPH => {
                        let mut total_size = 0usize;
                        let mut header_size = 4usize;
                        for index in 0..sample_count - 1 {
                            self.block_lacing_sample_sizes[index] = 0;
                            loop {
                                header_size += 1;
                                self.read_scratch(input, header_size)?;
                                let byte = self.scratch[header_size - 1];
                                self.block_lacing_sample_sizes[index] += i32::from(byte);
                                if byte != 0xFF {
                                    break;
                                }
                            }
                            total_size += self.block_lacing_sample_sizes[index] as usize;
                        }
                        self.block_lacing_sample_sizes[sample_count - 1] =
                            laced_remainder(content_size, self.block_track_number_length,
                                header_size, total_size)?;
                    }
                    LACING_EBML => {
                        let mut total_size = 0usize;
                        let mut header_size = 4usize;
                        for index in 0..sample_count - 1 {
                            self.block_lacing_sample_sizes[index] = 0;
                            header_size += 1;
                            self.read_scratch(input, header_size)?;
                            let first = self.scratch[header_size - 1];
                            if first == 0 {
                                return Err(LiuError::InvalidData(
                                    "EBML lacing: 变长整数缺少长度标记位".into(),
                                ));
                            }
                            let mut read_value: i64 = 0;
                            for extra in 0..8usize {
                                let length_mask = 0x80u8 >> extra;
                                if first & length_mask != 0 {
                                    let read_position = header_size - 1;
                                    header_size += extra;
                                    self.read_scratch(input, header_size)?;
                                    read_value = i64::from(first & !length_mask);
                                    for &byte in &self.scratch[read_position + 1..header_size] {
                                        read_value = (read_value << 8) | i64::from(byte);
                                    }
                                    // 第一个值是首采样大小, 之后是相对前一个的有符号偏移
                                    if index > 0 {
                                        read_value -= (1i64 << (6 + extra * 7)) - 1;
                                    }
                                    break;
                                }
                            }
                            if read_value < i64::from(i32::MIN) || read_value > i64::from(i32::MAX)
                            {
                                return Err(LiuError::InvalidData(
                                    "EBML lacing: 采样大小越界".into(),
                                ));
                            }
                            let value = read_value as i32;
                            self.block_lacing_sample_sizes[index] = if index == 0 {
                                value
                            } else {
                                self.block_lacing_sample_sizes[index - 1] + value
                            };
                            if self.block_lacing_sample_sizes[index] < 0 {
                                return Err(LiuError::InvalidData(
                                    "EBML lacing: 采样大小为负".into(),
                                ));
                            }
                            total_size += self.block_lacing_sample_sizes[index] as usize;
                        }
                        self.block_lacing_sample_sizes[sample_count - 1] =
                            laced_remainder(content_size, self.block_track_number_length,
                                header_size, total_size)?;
                    }
                    _ => unreachable!("lacing 值域为 0-3"),
                }
            }

            let timecode = i16::from_be_bytes([self.scratch[0], self.scratch[1]]);
            self.block_time_us =
                self.cluster_timecode_us + self.scale_timecode_to_us(i64::from(timecode));
            let is_invisible = flags & 0x08 != 0;
            let is_keyframe = id == ebml::SIMPLE_BLOCK && flags & 0x80 != 0;
            self.block_flags = SampleFlags::empty();
            if is_keyframe {
                self.block_flags |= SampleFlags::SYNC;
            }
            if is_invisible {
                self.block_flags |= SampleFlags::DECODE_ONLY;
            }
            self.block_encryption_key_id = track.encryption_key_id.clone();
            self.block_state = BlockState::Data;
            self.block_lacing_sample_index = 0;
        }

        if id == ebml::SIMPLE_BLOCK {
            // SimpleBlock 的采样元信息就地提交
            while self.block_lacing_sample_index < self.block_lacing_sample_count {
                let size = self.block_lacing_sample_sizes[self.block_lacing_sample_index] as usize;
                self.write_sample_data(input, &track, size)?;
                let sample_time_us = self.block_time_us
                    + (self.block_lacing_sample_index as i64 * track.default_sample_duration_ns)
                        / 1000;
                self.output_sample_metadata(track.number, sample_time_us);
                self.block_lacing_sample_index += 1;
            }
            self.block_state = BlockState::Start;
        } else {
            // Block 的元信息推迟到 BlockGroup 结束时提交, 届时才知道
            // 有没有 ReferenceBlock (决定 SYNC)
            let size = self.block_lacing_sample_sizes[0] as usize;
            self.write_sample_data(input, &track, size)?;
        }

        Ok(())
    }

    /// 写出一个采样的负载
    fn write_sample_data(
        &mut self,
        input: &mut dyn ExtractorInput,
        track: &Track,
        size: usize,
    ) -> LiuResult<()> {
        // 加密信号字节: 扩展位非法; 加密位置位时改写为 IV 大小转发
        if track.has_content_encryption && !self.sample_encryption_data_read {
            self.block_flags.remove(SampleFlags::ENCRYPTED);
            let mut signal_byte = [0u8; 1];
            input.read_fully(&mut signal_byte)?;
            self.sample_bytes_read += 1;
            if signal_byte[0] & 0x80 == 0x80 {
                return Err(LiuError::InvalidData("信号字节的扩展位被置位".into()));
            }
            self.sample_encryption_data_read = true;
            if signal_byte[0] & 0x01 == 0x01 {
                self.output
                    .track(track.number)
                    .sample_data(&[ENCRYPTION_IV_SIZE]);
                self.sample_bytes_written += 1;
                self.block_flags.insert(SampleFlags::ENCRYPTED);
            }
        }

        if let TrackCodec::H264 { nal_length_field } = track.codec {
            // NAL 单元为长度前缀, 解码器要求起始码分隔: 逐个读出长度
            // 字段, 向下游改写为 4 字节起始码
            let field_offset = 4 - nal_length_field;
            while self.sample_bytes_read < size {
                if self.sample_current_nal_bytes_remaining == 0 {
                    self.nal_length = [0; 4];
                    input.read_fully(&mut self.nal_length[field_offset..])?;
                    self.sample_current_nal_bytes_remaining =
                        u32::from_be_bytes(self.nal_length) as usize;
                    self.output.track(track.number).sample_data(&NAL_START_CODE);
                    self.sample_bytes_read += nal_length_field;
                    self.sample_bytes_written += 4;
                } else {
                    let written = self
                        .output
                        .track(track.number)
                        .sample_data_from_input(input, self.sample_current_nal_bytes_remaining)?;
                    self.sample_current_nal_bytes_remaining -= written;
                    self.sample_bytes_read += written;
                    self.sample_bytes_written += written;
                }
            }
        } else {
            while self.sample_bytes_read < size {
                let written = self
                    .output
                    .track(track.number)
                    .sample_data_from_input(input, size - self.sample_bytes_read)?;
                self.sample_bytes_read += written;
                self.sample_bytes_written += written;
            }
        }

        if track.codec == TrackCodec::Vorbis {
            // 解码器期望采样尾部 4 字节为"页内采样数", 这一约定来自
            // Ogg 封装, 对 WebM 无意义, 固定填 -1 让解码器忽略
            self.output
                .track(track.number)
                .sample_data(&VORBIS_NUM_PAGE_SAMPLES);
            self.sample_bytes_written += 4;
        }

        Ok(())
    }
}

/// 数组容量不足时扩容 (至少翻倍)
fn ensure_capacity(sizes: &mut Vec<i32>, length: usize) {
    if sizes.len() < length {
        let new_len = length.max(sizes.len() * 2);
        sizes.resize(new_len, 0);
    }
}

/// 最后一个 laced 采样的大小: 块内容减去头部与前面所有采样
fn laced_remainder(
    content_size: usize,
    track_number_length: usize,
    header_size: usize,
    total_size: usize,
) -> LiuResult<i32> {
    let remainder =
        content_size as i64 - track_number_length as i64 - header_size as i64 - total_size as i64;
    if !(0..=i64::from(i32::MAX)).contains(&remainder) {
        return Err(LiuError::InvalidData(
            "lacing 采样大小与块内容不一致".into(),
        ));
    }
    Ok(remainder as i32)
}

impl<O: ExtractorOutput> EbmlSink for SegmentParser<O> {
    fn element_type(&self, id: u32) -> ElementType {
        match id {
            ebml::EBML_HEADER
            | ebml::SEGMENT
            | ebml::SEEK_HEAD
            | ebml::SEEK
            | ebml::SEGMENT_INFO
            | ebml::CLUSTER
            | ebml::TRACKS
            | ebml::TRACK_ENTRY
            | ebml::AUDIO_SETTINGS
            | ebml::VIDEO_SETTINGS
            | ebml::CONTENT_ENCODINGS
            | ebml::CONTENT_ENCODING
            | ebml::CONTENT_ENCRYPTION
            | ebml::CONTENT_ENCRYPTION_AES_SETTINGS
            | ebml::CUES
            | ebml::CUE_POINT
            | ebml::CUE_TRACK_POSITIONS
            | ebml::BLOCK_GROUP => ElementType::Master,
            ebml::EBML_READ_VERSION
            | ebml::DOC_TYPE_READ_VERSION
            | ebml::SEEK_POSITION
            | ebml::TIMECODE_SCALE
            | ebml::TIME_CODE
            | ebml::PIXEL_WIDTH
            | ebml::PIXEL_HEIGHT
            | ebml::TRACK_NUMBER
            | ebml::TRACK_TYPE
            | ebml::DEFAULT_DURATION
            | ebml::CODEC_DELAY
            | ebml::SEEK_PRE_ROLL
            | ebml::CHANNELS
            | ebml::CONTENT_ENCODING_ORDER
            | ebml::CONTENT_ENCODING_SCOPE
            | ebml::CONTENT_ENCODING_TYPE
            | ebml::CONTENT_ENCRYPTION_ALGORITHM
            | ebml::AES_SETTINGS_CIPHER_MODE
            | ebml::CUE_TIME
            | ebml::CUE_CLUSTER_POSITION
            | ebml::REFERENCE_BLOCK => ElementType::UnsignedInt,
            ebml::DOC_TYPE | ebml::CODEC_ID => ElementType::String,
            ebml::SEEK_ID
            | ebml::CONTENT_ENCRYPTION_KEY_ID
            | ebml::SIMPLE_BLOCK
            | ebml::BLOCK
            | ebml::CODEC_PRIVATE => ElementType::Binary,
            ebml::DURATION | ebml::SAMPLING_FREQUENCY => ElementType::Float,
            _ => ElementType::Unknown,
        }
    }

    fn start_master(
        &mut self,
        id: u32,
        content_position: u64,
        content_size: u64,
    ) -> LiuResult<()> {
        match id {
            ebml::SEGMENT => {
                if self.segment_content_position.is_some() {
                    return Err(LiuError::Unsupported("不支持多个 Segment 元素".into()));
                }
                self.segment_content_position = Some(content_position);
                self.segment_content_size = content_size;
            }
            ebml::SEEK => {
                self.seek_entry_id = None;
                self.seek_entry_position = None;
            }
            ebml::CUES => {
                self.cue_times_us = Vec::new();
                self.cue_cluster_positions = Vec::new();
            }
            ebml::CUE_POINT => {
                self.seen_cluster_position_for_cue_point = false;
            }
            ebml::CLUSTER => {
                // 索引未建而 Cues 位置已知: 先去构建索引再回来解析簇
                if self.cues_state == CuesState::NotBuilt && self.cues_content_position.is_some() {
                    self.seek_for_cues = true;
                }
            }
            ebml::BLOCK_GROUP => {
                self.sample_seen_reference_block = false;
            }
            ebml::CONTENT_ENCRYPTION => {
                self.track_format_mut()?.has_content_encryption = true;
            }
            ebml::TRACK_ENTRY => {
                self.track_format = Some(TrackFormat::new());
            }
            _ => {}
        }
        Ok(())
    }

    fn end_master(&mut self, id: u32) -> LiuResult<()> {
        match id {
            ebml::SEEK => {
                let (Some(seek_id), Some(position)) =
                    (self.seek_entry_id, self.seek_entry_position)
                else {
                    return Err(LiuError::InvalidData(
                        "必需元素 SeekID 或 SeekPosition 缺失".into(),
                    ));
                };
                if seek_id == ebml::CUES {
                    self.cues_content_position = Some(position);
                }
            }
            ebml::CUES => {
                if self.cues_state != CuesState::Built {
                    let chunk_index = self.build_cues()?;
                    self.output.seek_map(chunk_index);
                    self.cues_state = CuesState::Built;
                }
                // 已建成则忽略重复的 Cues
            }
            ebml::BLOCK_GROUP => {
                if self.block_state != BlockState::Data {
                    // 块因轨道号不匹配被跳过
                    return Ok(());
                }
                // 没有 ReferenceBlock 的 Block 是关键帧
                if !self.sample_seen_reference_block {
                    self.block_flags |= SampleFlags::SYNC;
                }
                self.output_sample_metadata(self.block_track_number, self.block_time_us);
                self.block_state = BlockState::Start;
            }
            ebml::CONTENT_ENCODING => {
                let track_format = self.track_format_mut()?;
                if !track_format.has_content_encryption {
                    return Err(LiuError::Unsupported(
                        "发现加密之外的 ContentEncoding".into(),
                    ));
                }
                let Some(key_id) = track_format.encryption_key_id.clone() else {
                    return Err(LiuError::InvalidData(
                        "加密轨道缺少 ContentEncKeyID".into(),
                    ));
                };
                if !self.sent_drm_init_data {
                    self.output.drm_init_data(VIDEO_WEBM, &key_id);
                    self.sent_drm_init_data = true;
                }
            }
            ebml::TRACK_ENTRY => {
                let Some(track_format) = self.track_format.take() else {
                    return Ok(());
                };
                let (Some(number), Some(track_type)) =
                    (track_format.number, track_format.track_type)
                else {
                    return Err(LiuError::InvalidData(
                        "必需元素 TrackNumber 或 TrackType 缺失".into(),
                    ));
                };
                let is_audio_type = track_type == TRACK_TYPE_AUDIO;
                let is_video_type = track_type == TRACK_TYPE_VIDEO;
                // 音频与视频各保留第一条
                if (is_audio_type && self.audio_track.is_some())
                    || (is_video_type && self.video_track.is_some())
                {
                    return Ok(());
                }
                if (is_audio_type || is_video_type) && is_codec_supported(&track_format.codec_id)
                {
                    let (media_format, codec) =
                        track_format.build_media_format(self.duration_us)?;
                    debug!(
                        "WebM: 轨道 #{number} codec={} type={track_type}",
                        track_format.codec_id
                    );
                    let track = Track {
                        number,
                        codec,
                        default_sample_duration_ns: track_format.default_sample_duration_ns,
                        has_content_encryption: track_format.has_content_encryption,
                        encryption_key_id: track_format.encryption_key_id.clone(),
                    };
                    self.output.track(number).format(media_format);
                    if is_audio_type {
                        self.audio_track = Some(track);
                    } else {
                        self.video_track = Some(track);
                    }
                }
                // 其他轨道类型或不支持的编解码器: 忽略
            }
            ebml::TRACKS => {
                if self.audio_track.is_none() && self.video_track.is_none() {
                    return Err(LiuError::InvalidData("未找到有效轨道".into()));
                }
                self.output.end_tracks();
            }
            _ => {}
        }
        Ok(())
    }

    fn unsigned_int(&mut self, id: u32, value: u64) -> LiuResult<()> {
        match id {
            ebml::EBML_READ_VERSION => {
                // 只支持 EBMLReadVersion 1
                if value != 1 {
                    return Err(LiuError::Unsupported(format!(
                        "EBMLReadVersion {value} 不支持"
                    )));
                }
            }
            ebml::DOC_TYPE_READ_VERSION => {
                // 只支持 DocTypeReadVersion 1 与 2
                if !(1..=2).contains(&value) {
                    return Err(LiuError::Unsupported(format!(
                        "DocTypeReadVersion {value} 不支持"
                    )));
                }
            }
            ebml::SEEK_POSITION => {
                // SeekPosition 是相对 Segment 内容区起点的偏移
                let base = self.segment_content_position.ok_or_else(|| {
                    LiuError::InvalidData("SeekPosition 出现在 Segment 之外".into())
                })?;
                self.seek_entry_position = Some(base + value);
            }
            ebml::TIMECODE_SCALE => self.timecode_scale = value as i64,
            ebml::PIXEL_WIDTH => self.track_format_mut()?.pixel_width = value as i32,
            ebml::PIXEL_HEIGHT => self.track_format_mut()?.pixel_height = value as i32,
            ebml::TRACK_NUMBER => self.track_format_mut()?.number = Some(value as i32),
            ebml::TRACK_TYPE => self.track_format_mut()?.track_type = Some(value as i32),
            ebml::DEFAULT_DURATION => {
                self.track_format_mut()?.default_sample_duration_ns = value as i64
            }
            ebml::CODEC_DELAY => self.track_format_mut()?.codec_delay_ns = value,
            ebml::SEEK_PRE_ROLL => self.track_format_mut()?.seek_preroll_ns = value,
            ebml::CHANNELS => self.track_format_mut()?.channel_count = value as i32,
            ebml::REFERENCE_BLOCK => self.sample_seen_reference_block = true,
            ebml::CONTENT_ENCODING_ORDER => {
                // 只支持单个 ContentEncoding, 次序必为 0
                if value != 0 {
                    return Err(LiuError::Unsupported(format!(
                        "ContentEncodingOrder {value} 不支持"
                    )));
                }
            }
            ebml::CONTENT_ENCODING_SCOPE => {
                // 只支持对全部帧生效的作用域
                if value != 1 {
                    return Err(LiuError::Unsupported(format!(
                        "ContentEncodingScope {value} 不支持"
                    )));
                }
            }
            ebml::CONTENT_ENCODING_TYPE => {
                // 只支持加密类型
                if value != 1 {
                    return Err(LiuError::Unsupported(format!(
                        "ContentEncodingType {value} 不支持"
                    )));
                }
            }
            ebml::CONTENT_ENCRYPTION_ALGORITHM => {
                // WebM 规范只允许 5 (AES)
                if value != 5 {
                    return Err(LiuError::Unsupported(format!(
                        "ContentEncAlgo {value} 不支持"
                    )));
                }
            }
            ebml::AES_SETTINGS_CIPHER_MODE => {
                // WebM 规范只允许 1 (CTR)
                if value != 1 {
                    return Err(LiuError::Unsupported(format!(
                        "AESSettingsCipherMode {value} 不支持"
                    )));
                }
            }
            ebml::CUE_TIME => {
                let time_us = self.scale_timecode_to_us(value as i64);
                self.cue_times_us.push(time_us);
            }
            ebml::CUE_CLUSTER_POSITION => {
                // 多轨道时一个 CuePoint 可能有多个位置, 只取第一个
                if !self.seen_cluster_position_for_cue_point {
                    self.cue_cluster_positions.push(value);
                    self.seen_cluster_position_for_cue_point = true;
                }
            }
            ebml::TIME_CODE => {
                self.cluster_timecode_us = self.scale_timecode_to_us(value as i64);
            }
            _ => {}
        }
        Ok(())
    }

    fn float(&mut self, id: u32, value: f64) -> LiuResult<()> {
        match id {
            ebml::DURATION => self.duration_us = self.scale_timecode_to_us(value as i64),
            ebml::SAMPLING_FREQUENCY => self.track_format_mut()?.sample_rate = value as i32,
            _ => {}
        }
        Ok(())
    }

    fn string(&mut self, id: u32, value: String) -> LiuResult<()> {
        match id {
            ebml::DOC_TYPE => {
                if value != DOC_TYPE_WEBM && value != DOC_TYPE_MATROSKA {
                    return Err(LiuError::Unsupported(format!("DocType {value} 不支持")));
                }
            }
            ebml::CODEC_ID => self.track_format_mut()?.codec_id = value,
            _ => {}
        }
        Ok(())
    }

    fn binary(
        &mut self,
        id: u32,
        content_size: usize,
        input: &mut dyn ExtractorInput,
    ) -> LiuResult<()> {
        match id {
            ebml::SEEK_ID => {
                if content_size > 4 {
                    return Err(LiuError::InvalidData(format!(
                        "SeekID 大小异常: {content_size}"
                    )));
                }
                let mut bytes = [0u8; 4];
                input.read_fully(&mut bytes[4 - content_size..])?;
                self.seek_entry_id = Some(u32::from_be_bytes(bytes));
            }
            ebml::CODEC_PRIVATE => {
                let mut data = vec![0u8; content_size];
                input.read_fully(&mut data)?;
                self.track_format_mut()?.codec_private = Some(data);
            }
            ebml::CONTENT_ENCRYPTION_KEY_ID => {
                let mut data = vec![0u8; content_size];
                input.read_fully(&mut data)?;
                self.track_format_mut()?.encryption_key_id = Some(data);
            }
            ebml::SIMPLE_BLOCK | ebml::BLOCK => self.read_block(id, content_size, input)?,
            other => {
                return Err(LiuError::InvalidData(format!(
                    "意外的二进制元素: {other:#X}"
                )))
            }
        }
        Ok(())
    }
}
