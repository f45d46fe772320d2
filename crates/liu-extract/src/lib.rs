//! # liu-extract
//!
//! Liu 流式容器提取库, 提供两条独立的解复用流水线:
//!
//! - **MPEG-2 TS** ([`ts::TsExtractor`]): 188 字节包分帧 → PID 分发 →
//!   PAT/PMT 节目表 → PES 重组 → 基本流读取器 (H.264 / ADTS-AAC / ID3),
//!   以非阻塞拉取方式输出带时间戳与关键帧标记的采样.
//! - **WebM/Matroska** ([`webm::WebmExtractor`]): EBML 变长整数与元素树
//!   事件解析 → 轨道/索引/簇解释 → Block/SimpleBlock 与 lacing → 采样
//!   负载写出 (含 H.264 长度前缀→起始码改写与加密信号字节).
//!
//! 两条流水线均为单线程协作式拉取解析器: 任何一次读取都可能因输入不足
//! 而挂起, 补充数据后重试即可无损续读.

pub mod chunk_index;
pub mod input;
pub mod media_format;
pub mod output;
pub mod sample;
pub mod ts;
pub mod webm;

// 重导出常用类型
pub use chunk_index::ChunkIndex;
pub use input::{ExtractorInput, MemoryInput, NonBlockingInput, PositionHolder};
pub use media_format::MediaFormat;
pub use output::{ExtractorOutput, TrackOutput};
pub use sample::{ReadFlags, SampleFlags, SampleHolder};
pub use ts::TsExtractor;
pub use webm::{ReadResult, WebmExtractor};
