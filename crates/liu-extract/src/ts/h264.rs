//! H.264 基本流读取器.
//!
//! 连续的 Annex-B 字节流按访问单元分界符 (AUD, NAL type 9) 切分成访问
//! 单元, 每个访问单元一个采样; 含 IDR (NAL type 5) 的采样标记为关键帧.
//!
//! 裸流在这一层不携带容器级尺寸信息, 格式先以占位尺寸发布, 使准备流程
//! 不依赖首个关键帧; 见到 SPS (NAL type 7) 后从中解析实际宽高并就地
//! 修正.

use liu_core::time::UNKNOWN_TIME_US;
use liu_core::{BitBuffer, LiuError, LiuResult};
use log::{debug, warn};

use super::TrackSink;
use crate::media_format::{MediaFormat, NO_VALUE, VIDEO_H264};
use crate::sample::{Sample, SampleFlags, SamplePool};

/// IDR 图像切片 (关键帧)
const NAL_UNIT_TYPE_IDR: u8 = 5;
/// 序列参数集
const NAL_UNIT_TYPE_SPS: u8 = 7;
/// 访问单元分界符
const NAL_UNIT_TYPE_AUD: u8 = 9;

/// H.264 基本流读取器
pub(crate) struct H264Reader {
    pub(crate) sink: TrackSink,
    /// 进行中的访问单元 (跨 PES 累积)
    current_sample: Option<Sample>,
    /// 占位尺寸是否已被 SPS 解析结果替换
    dimensions_parsed: bool,
}

impl H264Reader {
    pub fn new() -> Self {
        // 占位尺寸, 见到 SPS 后修正
        let format = MediaFormat::video(VIDEO_H264, NO_VALUE, UNKNOWN_TIME_US, 1920, 1080, vec![]);
        Self {
            sink: TrackSink::with_format(format),
            current_sample: None,
            dimensions_parsed: false,
        }
    }

    /// 消费一个 PES 的负载
    pub fn consume(
        &mut self,
        pes: &mut BitBuffer,
        payload_size: usize,
        time_us: i64,
        pool: &mut SamplePool,
    ) -> LiuResult<()> {
        let mut remaining = payload_size.min(pes.bytes_left());

        // 下一个 AUD 之前的字节是上一个访问单元的尾部
        let tail_len = pes
            .find_next_nal_unit(NAL_UNIT_TYPE_AUD, 0)
            .filter(|&o| o < remaining)
            .unwrap_or(remaining);
        if tail_len > 0 {
            if let Some(sample) = self.current_sample.as_mut() {
                Self::append_region(
                    sample,
                    pes,
                    tail_len,
                    &mut self.dimensions_parsed,
                    &mut self.sink,
                )?;
            } else {
                // 尚无进行中的访问单元, AUD 之前的数据无法归属
                pes.skip_bytes(tail_len)?;
            }
            remaining -= tail_len;
        }

        // 之后的每个 AUD 开启一个新的访问单元
        let mut new_frames = 0u32;
        while remaining > 0 {
            if let Some(sample) = self.current_sample.take() {
                self.sink.samples.push_back(sample);
            }
            let mut sample = pool.obtain();
            sample.time_us = time_us;
            new_frames += 1;

            // 向后跳过本 AUD 的起始码再找下一个分界符
            let len = pes
                .find_next_nal_unit(NAL_UNIT_TYPE_AUD, 3)
                .filter(|&o| o < remaining)
                .unwrap_or(remaining);
            Self::append_region(
                &mut sample,
                pes,
                len,
                &mut self.dimensions_parsed,
                &mut self.sink,
            )?;
            self.current_sample = Some(sample);
            remaining -= len;
        }

        // 单个 PES 预期至多携带一个新帧
        if new_frames > 1 {
            warn!("H.264: 单个 PES 包含 {new_frames} 个新帧, 超出预期");
        }
        Ok(())
    }

    /// 把一段负载追加到采样, 顺带识别 IDR 与 SPS
    fn append_region(
        sample: &mut Sample,
        pes: &mut BitBuffer,
        length: usize,
        dimensions_parsed: &mut bool,
        sink: &mut TrackSink,
    ) -> LiuResult<()> {
        if pes
            .find_next_nal_unit(NAL_UNIT_TYPE_IDR, 0)
            .is_some_and(|o| o < length)
        {
            sample.flags |= SampleFlags::SYNC;
        }

        if !*dimensions_parsed {
            if let Some(sps_offset) = pes
                .find_next_nal_unit(NAL_UNIT_TYPE_SPS, 0)
                .filter(|&o| o < length)
            {
                let region = &pes.remaining()[..length];
                // 起始码 3 字节 + NAL 头 1 字节之后是 RBSP
                let sps_start = sps_offset + 4;
                let sps_end = find_start_code(&region[sps_start..])
                    .map_or(length, |o| sps_start + o);
                match parse_sps_dimensions(&region[sps_start..sps_end]) {
                    Ok((width, height)) => {
                        debug!("H.264: SPS 尺寸 {width}x{height}");
                        if let Some(format) = sink.media_format.as_mut() {
                            format.width = width;
                            format.height = height;
                        }
                        *dimensions_parsed = true;
                    }
                    Err(e) => debug!("H.264: SPS 解析失败: {e}"),
                }
            }
        }

        let bytes = pes.read_slice(length)?;
        sample.append(bytes);
        Ok(())
    }

    pub fn clear(&mut self, pool: &mut SamplePool) {
        self.sink.clear(pool);
        if let Some(sample) = self.current_sample.take() {
            pool.recycle(sample);
        }
    }
}

/// 查找 3 字节起始码 `00 00 01`
fn find_start_code(data: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x01 {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// 去除 RBSP 中的仿真阻止字节 (`00 00 03` → `00 00`)
fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0u32;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

/// 读取无符号 Exp-Golomb 值 `ue(v)`
fn read_ue(br: &mut BitBuffer) -> LiuResult<u32> {
    let mut leading_zeros = 0u32;
    while br.read_bit()? == 0 {
        leading_zeros += 1;
        if leading_zeros > 31 {
            return Err(LiuError::InvalidData("Exp-Golomb 前导零超长".into()));
        }
    }
    if leading_zeros == 0 {
        return Ok(0);
    }
    let rest = br.read_bits(leading_zeros)?;
    Ok((1 << leading_zeros) - 1 + rest)
}

/// 读取有符号 Exp-Golomb 值 `se(v)`
fn read_se(br: &mut BitBuffer) -> LiuResult<i32> {
    let code = read_ue(br)? as i64;
    let value = (code + 1) / 2;
    Ok(if code % 2 == 0 { -value as i32 } else { value as i32 })
}

/// 跳过一组量化矩阵 (scaling_list 语法)
fn skip_scaling_list(br: &mut BitBuffer, size: u32) -> LiuResult<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = read_se(br)?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// 从 SPS RBSP 解析图像宽高 (已应用 cropping)
fn parse_sps_dimensions(rbsp: &[u8]) -> LiuResult<(i32, i32)> {
    let clean = strip_emulation_prevention(rbsp);
    let mut br = BitBuffer::from_slice(&clean);

    let profile_idc = br.read_bits(8)?;
    br.skip_bits(8)?; // constraint_set 标志 + 保留位
    br.skip_bits(8)?; // level_idc
    let _sps_id = read_ue(&mut br)?;

    let mut chroma_format_idc = 1u32; // 默认 4:2:0
    let mut separate_colour_plane = false;
    if matches!(profile_idc, 100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138) {
        chroma_format_idc = read_ue(&mut br)?;
        if chroma_format_idc == 3 {
            separate_colour_plane = br.read_bit()? == 1;
        }
        let _bit_depth_luma = read_ue(&mut br)?;
        let _bit_depth_chroma = read_ue(&mut br)?;
        br.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if br.read_bit()? == 1 {
            // seq_scaling_matrix_present_flag
            let list_count = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..list_count {
                if br.read_bit()? == 1 {
                    skip_scaling_list(&mut br, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    let _log2_max_frame_num_minus4 = read_ue(&mut br)?;
    let poc_type = read_ue(&mut br)?;
    if poc_type == 0 {
        let _log2_max_poc_lsb_minus4 = read_ue(&mut br)?;
    } else if poc_type == 1 {
        br.skip_bits(1)?; // delta_pic_order_always_zero_flag
        let _offset_for_non_ref_pic = read_se(&mut br)?;
        let _offset_for_top_to_bottom = read_se(&mut br)?;
        let num_ref_frames_in_cycle = read_ue(&mut br)?;
        for _ in 0..num_ref_frames_in_cycle {
            let _offset = read_se(&mut br)?;
        }
    }
    let _max_num_ref_frames = read_ue(&mut br)?;
    br.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = read_ue(&mut br)? + 1;
    let pic_height_in_map_units = read_ue(&mut br)? + 1;
    let frame_mbs_only = br.read_bit()? == 1;
    if !frame_mbs_only {
        br.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    br.skip_bits(1)?; // direct_8x8_inference_flag

    let mut width = pic_width_in_mbs * 16;
    let mut height = (2 - u32::from(frame_mbs_only)) * pic_height_in_map_units * 16;

    if br.read_bit()? == 1 {
        // frame_cropping_flag
        let crop_left = read_ue(&mut br)?;
        let crop_right = read_ue(&mut br)?;
        let crop_top = read_ue(&mut br)?;
        let crop_bottom = read_ue(&mut br)?;
        let (crop_unit_x, crop_unit_y) = if chroma_format_idc == 0 || separate_colour_plane {
            (1, 2 - u32::from(frame_mbs_only))
        } else {
            let sub_width = if chroma_format_idc == 3 { 1 } else { 2 };
            let sub_height = if chroma_format_idc == 1 { 2 } else { 1 };
            (sub_width, sub_height * (2 - u32::from(frame_mbs_only)))
        };
        width = width.saturating_sub((crop_left + crop_right) * crop_unit_x);
        height = height.saturating_sub((crop_top + crop_bottom) * crop_unit_y);
    }

    Ok((width as i32, height as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试用位写入器
    struct BitWriter {
        data: Vec<u8>,
        bit_pos: u8,
    }

    impl BitWriter {
        fn new() -> Self {
            Self {
                data: Vec::new(),
                bit_pos: 0,
            }
        }

        fn write_bit(&mut self, bit: u32) {
            if self.bit_pos == 0 {
                self.data.push(0);
            }
            if bit != 0 {
                let last = self.data.len() - 1;
                self.data[last] |= 1 << (7 - self.bit_pos);
            }
            self.bit_pos = (self.bit_pos + 1) % 8;
        }

        fn write_bits(&mut self, value: u32, n: u32) {
            for i in (0..n).rev() {
                self.write_bit((value >> i) & 1);
            }
        }

        fn write_ue(&mut self, value: u32) {
            let code = value + 1;
            let bits = 32 - code.leading_zeros();
            self.write_bits(0, bits - 1);
            self.write_bits(code, bits);
        }

        fn finish(mut self) -> Vec<u8> {
            while self.bit_pos != 0 {
                self.write_bit(0);
            }
            self.data
        }
    }

    /// 构造一个 Baseline profile 1280x720 的 SPS RBSP
    fn build_sps_720p() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(66, 8); // profile_idc = Baseline
        w.write_bits(0, 8); // constraint 标志
        w.write_bits(30, 8); // level_idc
        w.write_ue(0); // sps_id
        w.write_ue(0); // log2_max_frame_num_minus4
        w.write_ue(0); // poc_type
        w.write_ue(0); // log2_max_pic_order_cnt_lsb_minus4
        w.write_ue(1); // max_num_ref_frames
        w.write_bit(0); // gaps_in_frame_num_value_allowed_flag
        w.write_ue(79); // pic_width_in_mbs_minus1 (1280/16 - 1)
        w.write_ue(44); // pic_height_in_map_units_minus1 (720/16 - 1)
        w.write_bit(1); // frame_mbs_only_flag
        w.write_bit(0); // direct_8x8_inference_flag
        w.write_bit(0); // frame_cropping_flag
        w.write_bit(0); // vui_parameters_present_flag
        w.finish()
    }

    #[test]
    fn test_sps_解析_720p() {
        let sps = build_sps_720p();
        let (w, h) = parse_sps_dimensions(&sps).unwrap();
        assert_eq!((w, h), (1280, 720));
    }

    #[test]
    fn test_sps_cropping() {
        // 1920x1080: 120x68 宏块, 裁掉底部 8 行像素 (crop_bottom=4, 4:2:0)
        let mut w = BitWriter::new();
        w.write_bits(66, 8);
        w.write_bits(0, 8);
        w.write_bits(40, 8);
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(1);
        w.write_bit(0);
        w.write_ue(119); // 1920/16 - 1
        w.write_ue(67); // 1088/16 - 1
        w.write_bit(1); // frame_mbs_only
        w.write_bit(0);
        w.write_bit(1); // frame_cropping_flag
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(0);
        w.write_ue(4); // crop_bottom: 4 * 2 = 8 像素
        w.write_bit(0); // vui
        let (width, height) = parse_sps_dimensions(&w.finish()).unwrap();
        assert_eq!((width, height), (1920, 1080));
    }

    #[test]
    fn test_仿真阻止字节剥离() {
        assert_eq!(
            strip_emulation_prevention(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x03]),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x03]
        );
    }

    #[test]
    fn test_aud_切分与_idr_标记() {
        let mut reader = H264Reader::new();
        let mut pool = SamplePool::new();

        // PES 1: AUD + SPS + IDR
        let mut frame1 = vec![0x00, 0x00, 0x01, 0x09, 0xF0];
        frame1.extend_from_slice(&[0x00, 0x00, 0x01, 0x67]);
        frame1.extend_from_slice(&build_sps_720p());
        frame1.extend_from_slice(&[0x00, 0x00, 0x01, 0x65, 0xAA, 0xBB]);
        let mut pes1 = BitBuffer::from_slice(&frame1);
        let len1 = frame1.len();
        reader.consume(&mut pes1, len1, 1_000_000, &mut pool).unwrap();
        // 帧尚未结束, 还在进行中
        assert!(reader.sink.samples.is_empty());

        // PES 2: 下一个 AUD + 非关键帧
        let frame2 = vec![0x00, 0x00, 0x01, 0x09, 0xF0, 0x00, 0x00, 0x01, 0x41, 0xCC];
        let mut pes2 = BitBuffer::from_slice(&frame2);
        let len2 = frame2.len();
        reader.consume(&mut pes2, len2, 1_033_333, &mut pool).unwrap();

        // 第一个访问单元完成入队
        assert_eq!(reader.sink.samples.len(), 1);
        let sample = reader.sink.samples.pop_front().unwrap();
        assert!(sample.flags.contains(SampleFlags::SYNC));
        assert_eq!(sample.time_us, 1_000_000);
        assert_eq!(sample.data, frame1);

        // SPS 已把占位尺寸替换为 1280x720
        let format = reader.sink.media_format.as_ref().unwrap();
        assert_eq!((format.width, format.height), (1280, 720));
    }
}
