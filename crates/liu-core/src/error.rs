//! 统一错误类型定义.
//!
//! 所有 Liu crate 共用的错误类型, 支持跨模块传播.
//!
//! `NeedMoreData` 是正常控制流的一部分: 解析器在输入不足时以它挂起,
//! 调用方补充数据后重试同一调用即可继续, 内部状态不会被破坏.

use thiserror::Error;

/// Liu 框架统一错误类型
#[derive(Debug, Error)]
pub enum LiuError {
    /// 数据不足, 需要更多输入 (软性结果, 挂起点)
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 已到达数据末尾 (也用于位缓冲区读取越界)
    #[error("已到达数据末尾")]
    Eof,

    /// 无效数据 (必需元素缺失、头部损坏等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 不支持的特性 (多 Segment、未知加密算法等)
    #[error("不支持的特性: {0}")]
    Unsupported(String),

    /// 调用方提供的采样缓冲区过小且不允许替换
    #[error("采样缓冲区过小且不允许替换")]
    BufferTooSmall,

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),
}

/// Liu 框架统一 Result 类型
pub type LiuResult<T> = Result<T, LiuError>;
