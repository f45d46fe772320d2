//! # liu-core
//!
//! Liu 流式提取框架核心库, 提供错误类型、位缓冲区和时间换算工具.
//!
//! 本 crate 为两条提取流水线 (MPEG-TS / WebM) 提供底层基础设施.

pub mod bitbuf;
pub mod error;
pub mod time;

// 重导出常用类型
pub use bitbuf::BitBuffer;
pub use error::{LiuError, LiuResult};
