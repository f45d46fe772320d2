//! # Liu (流)
//!
//! 纯 Rust 实现的流式容器提取框架, 提供两条解复用流水线:
//!
//! - **MPEG-2 TS**: 188 字节包分帧 → PID 分发 → PAT/PMT → PES 重组 →
//!   基本流读取器 (H.264 / ADTS-AAC / ID3), 非阻塞拉取式输出采样
//! - **WebM/Matroska**: EBML 事件解析 → 轨道/索引/簇解释 →
//!   Block/lacing → 采样负载写出
//!
//! 两条流水线都是单线程协作式拉取解析器: 任何读取都可能因输入不足而
//! 挂起, 补充数据后重试同一调用即可无损续读. 解析器不解码媒体, 只负责
//! 识别容器结构、发现解码器配置、并输出带时间戳与关键帧标记的压缩采样.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use liu::extract::{MemoryInput, SampleHolder, TsExtractor};
//!
//! let mut extractor = TsExtractor::new();
//! let mut input = MemoryInput::from_data(std::fs::read("input.ts").unwrap());
//! if extractor.prepare(&mut input).unwrap() {
//!     let mut holder = SampleHolder::new();
//!     extractor.read(&mut input, 0, Some(&mut holder)).unwrap();
//!     println!("采样: {} 字节 @ {}us", holder.size, holder.time_us);
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `liu-core` | 错误类型、位缓冲区、时间换算 |
//! | `liu-extract` | TS 与 WebM 提取流水线 |

/// 核心类型与工具
pub use liu_core as core;

/// 容器提取流水线
pub use liu_extract as extract;

/// 获取 Liu 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
