//! CodecPrivate 解析.
//!
//! Matroska 的 `CodecPrivate` 元素按编解码器携带不同布局的配置数据,
//! 这里把它们转换为解码器初始化数据列表.

use liu_core::{LiuError, LiuResult};

/// Annex-B 4 字节起始码
pub(super) const NAL_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

fn truncated() -> LiuError {
    LiuError::InvalidData("CodecPrivate 数据被截断".into())
}

/// 解析 H.264 AVCDecoderConfigurationRecord
///
/// 返回 (初始化数据列表 [SPS..., PPS...], NAL 长度字段宽度).
/// 初始化数据以 Annex-B 起始码为前缀; NAL 长度字段宽度只允许 1/2/4.
pub(crate) fn parse_h264_codec_private(data: &[u8]) -> LiuResult<(Vec<Vec<u8>>, usize)> {
    let nal_unit_length_field_length =
        (*data.get(4).ok_or_else(truncated)? & 0x03) as usize + 1;
    if nal_unit_length_field_length == 3 {
        return Err(LiuError::InvalidData(
            "AVC: NAL 长度字段宽度 3 不被允许".into(),
        ));
    }

    let mut initialization_data = Vec::new();
    let mut offset = 5;

    let sps_count = *data.get(offset).ok_or_else(truncated)? & 0x1F;
    offset += 1;
    for _ in 0..sps_count {
        offset = read_child_nal_unit(data, offset, &mut initialization_data)?;
    }
    let pps_count = *data.get(offset).ok_or_else(truncated)?;
    offset += 1;
    for _ in 0..pps_count {
        offset = read_child_nal_unit(data, offset, &mut initialization_data)?;
    }

    Ok((initialization_data, nal_unit_length_field_length))
}

/// 读取一个 2 字节大端长度前缀的子 NAL 单元, 返回新的偏移
fn read_child_nal_unit(data: &[u8], offset: usize, out: &mut Vec<Vec<u8>>) -> LiuResult<usize> {
    if offset + 2 > data.len() {
        return Err(truncated());
    }
    let length = usize::from(data[offset]) << 8 | usize::from(data[offset + 1]);
    let start = offset + 2;
    let end = start + length;
    if end > data.len() {
        return Err(truncated());
    }
    let mut nal = Vec::with_capacity(4 + length);
    nal.extend_from_slice(&NAL_START_CODE);
    nal.extend_from_slice(&data[start..end]);
    out.push(nal);
    Ok(end)
}

/// 解析 Vorbis CodecPrivate
///
/// 布局: `0x02` + 识别头长度 (0xFF 连缀) + 注释头长度 (0xFF 连缀) +
/// 识别头 (以 `0x01` 开头) + 注释头 (以 `0x03` 开头) + setup 头 (以
/// `0x05` 开头). 返回 [识别头, setup 头].
pub(crate) fn parse_vorbis_codec_private(data: &[u8]) -> LiuResult<Vec<Vec<u8>>> {
    let invalid = || LiuError::InvalidData("Vorbis CodecPrivate 解析失败".into());

    if *data.first().ok_or_else(invalid)? != 0x02 {
        return Err(invalid());
    }

    let mut offset = 1;
    let mut vorbis_info_length: usize = 0;
    while *data.get(offset).ok_or_else(invalid)? == 0xFF {
        vorbis_info_length += 0xFF;
        offset += 1;
    }
    vorbis_info_length += usize::from(*data.get(offset).ok_or_else(invalid)?);
    offset += 1;

    let mut vorbis_skip_length: usize = 0;
    while *data.get(offset).ok_or_else(invalid)? == 0xFF {
        vorbis_skip_length += 0xFF;
        offset += 1;
    }
    vorbis_skip_length += usize::from(*data.get(offset).ok_or_else(invalid)?);
    offset += 1;

    if *data.get(offset).ok_or_else(invalid)? != 0x01 {
        return Err(invalid());
    }
    let vorbis_info = data
        .get(offset..offset + vorbis_info_length)
        .ok_or_else(invalid)?
        .to_vec();
    offset += vorbis_info_length;

    if *data.get(offset).ok_or_else(invalid)? != 0x03 {
        return Err(invalid());
    }
    offset += vorbis_skip_length;
    if *data.get(offset).ok_or_else(invalid)? != 0x05 {
        return Err(invalid());
    }
    let vorbis_books = data.get(offset..).ok_or_else(invalid)?.to_vec();

    Ok(vec![vorbis_info, vorbis_books])
}

/// 组装 Opus 初始化数据
///
/// 三个数据块: CodecPrivate 原样 + codec_delay (纳秒, 8 字节大端) +
/// seek_preroll (纳秒, 8 字节大端).
pub(crate) fn opus_initialization_data(
    codec_private: &[u8],
    codec_delay_ns: u64,
    seek_preroll_ns: u64,
) -> Vec<Vec<u8>> {
    vec![
        codec_private.to_vec(),
        codec_delay_ns.to_be_bytes().to_vec(),
        seek_preroll_ns.to_be_bytes().to_vec(),
    ]
}
