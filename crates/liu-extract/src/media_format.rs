//! 媒体格式描述.
//!
//! 描述一条基本流的解码器配置: MIME 类型、视频尺寸或音频参数、以及
//! 解码器初始化数据 (SPS/PPS、AudioSpecificConfig、Vorbis 头等).

use liu_core::time::UNKNOWN_TIME_US;

/// 表示"未知"的整型字段值
pub const NO_VALUE: i32 = -1;

// ========================
// MIME 类型常量
// ========================

pub const VIDEO_H264: &str = "video/avc";
pub const VIDEO_VP8: &str = "video/x-vnd.on2.vp8";
pub const VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
pub const VIDEO_WEBM: &str = "video/webm";
pub const AUDIO_AAC: &str = "audio/mp4a-latm";
pub const AUDIO_VORBIS: &str = "audio/vorbis";
pub const AUDIO_OPUS: &str = "audio/opus";
pub const AUDIO_AC3: &str = "audio/ac3";
pub const APPLICATION_ID3: &str = "application/id3";

/// 媒体格式
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFormat {
    /// MIME 类型
    pub mime_type: String,
    /// 单个输入缓冲区的最大字节数 (`NO_VALUE` 表示未知)
    pub max_input_size: i32,
    /// 时长 (微秒, `UNKNOWN_TIME_US` 表示未知)
    pub duration_us: i64,
    /// 视频宽度 (像素, `NO_VALUE` 表示未知)
    pub width: i32,
    /// 视频高度 (像素, `NO_VALUE` 表示未知)
    pub height: i32,
    /// 音频声道数 (`NO_VALUE` 表示未知)
    pub channel_count: i32,
    /// 音频采样率 (Hz, `NO_VALUE` 表示未知)
    pub sample_rate: i32,
    /// 解码器初始化数据
    pub initialization_data: Vec<Vec<u8>>,
}

impl MediaFormat {
    /// 创建视频格式
    pub fn video(
        mime_type: &str,
        max_input_size: i32,
        duration_us: i64,
        width: i32,
        height: i32,
        initialization_data: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            max_input_size,
            duration_us,
            width,
            height,
            channel_count: NO_VALUE,
            sample_rate: NO_VALUE,
            initialization_data,
        }
    }

    /// 创建音频格式
    pub fn audio(
        mime_type: &str,
        max_input_size: i32,
        duration_us: i64,
        channel_count: i32,
        sample_rate: i32,
        initialization_data: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            max_input_size,
            duration_us,
            width: NO_VALUE,
            height: NO_VALUE,
            channel_count,
            sample_rate,
            initialization_data,
        }
    }

    /// 创建元数据格式 (ID3 等)
    pub fn metadata(mime_type: &str) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            max_input_size: NO_VALUE,
            duration_us: UNKNOWN_TIME_US,
            width: NO_VALUE,
            height: NO_VALUE,
            channel_count: NO_VALUE,
            sample_rate: NO_VALUE,
            initialization_data: Vec::new(),
        }
    }
}
