//! 采样缓冲与回收池.
//!
//! TS 流水线内部以 [`Sample`] 暂存已切分的访问单元, 通过 [`SamplePool`]
//! 回收缓冲区避免逐采样分配; 对外则写入调用方提供的 [`SampleHolder`].

use bitflags::bitflags;
use liu_core::{LiuError, LiuResult};

bitflags! {
    /// 采样标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SampleFlags: u32 {
        /// 关键帧 (可独立解码)
        const SYNC = 1;
        /// 负载已加密
        const ENCRYPTED = 1 << 1;
        /// 仅供解码器建立状态, 不用于显示
        const DECODE_ONLY = 1 << 2;
    }
}

bitflags! {
    /// TS 提取器 `read` 的组合返回标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReadFlags: u32 {
        /// 输入数据不足, 未能读出采样
        const NEED_MORE_DATA = 1;
        /// 成功读出一个采样
        const READ_SAMPLE = 1 << 1;
        /// 下一项是采样, 但调用方未提供 SampleHolder
        const NEED_SAMPLE_HOLDER = 1 << 2;
    }
}

/// 内部采样缓冲
///
/// 缓冲区按需扩容, 通过池回收复用.
#[derive(Debug, Default)]
pub struct Sample {
    /// 采样数据 (长度即采样大小)
    pub data: Vec<u8>,
    /// 采样标志
    pub flags: SampleFlags,
    /// 显示时间戳 (微秒)
    pub time_us: i64,
}

impl Sample {
    /// 追加一段数据
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// 采样大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 清空内容, 保留已分配容量
    pub fn reset(&mut self) {
        self.data.clear();
        self.flags = SampleFlags::empty();
        self.time_us = 0;
    }
}

/// 新建采样缓冲区的初始容量 (64 KiB)
const DEFAULT_BUFFER_SEGMENT_SIZE: usize = 64 * 1024;

/// 采样缓冲回收池
#[derive(Default)]
pub struct SamplePool {
    pool: Vec<Sample>,
}

impl SamplePool {
    /// 创建空池
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出一个空采样 (池空时新建)
    pub fn obtain(&mut self) -> Sample {
        self.pool.pop().unwrap_or_else(|| Sample {
            data: Vec::with_capacity(DEFAULT_BUFFER_SEGMENT_SIZE),
            flags: SampleFlags::empty(),
            time_us: 0,
        })
    }

    /// 回收采样缓冲区
    pub fn recycle(&mut self, mut sample: Sample) {
        sample.reset();
        self.pool.push(sample);
    }
}

/// 调用方提供的采样容器
///
/// 缓冲区容量不足时, 若允许替换则重新分配, 否则以
/// [`LiuError::BufferTooSmall`] 失败.
#[derive(Debug)]
pub struct SampleHolder {
    /// 采样数据缓冲区
    pub data: Vec<u8>,
    /// 采样大小 (字节)
    pub size: usize,
    /// 采样标志
    pub flags: SampleFlags,
    /// 显示时间戳 (微秒)
    pub time_us: i64,
    /// 容量不足时是否允许替换缓冲区
    pub allow_buffer_replacement: bool,
}

impl SampleHolder {
    /// 创建允许缓冲区替换的容器
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            size: 0,
            flags: SampleFlags::empty(),
            time_us: 0,
            allow_buffer_replacement: true,
        }
    }

    /// 创建固定容量的容器 (不允许替换)
    pub fn with_fixed_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            size: 0,
            flags: SampleFlags::empty(),
            time_us: 0,
            allow_buffer_replacement: false,
        }
    }

    /// 从内部采样拷入数据与元信息
    pub(crate) fn fill_from(&mut self, sample: &Sample) -> LiuResult<()> {
        if self.data.capacity() < sample.size() && !self.allow_buffer_replacement {
            return Err(LiuError::BufferTooSmall);
        }
        self.data.clear();
        self.data.extend_from_slice(&sample.data);
        self.size = sample.size();
        self.flags = sample.flags;
        self.time_us = sample.time_us;
        Ok(())
    }
}

impl Default for SampleHolder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_池回收复用缓冲区() {
        let mut pool = SamplePool::new();
        let mut sample = pool.obtain();
        sample.append(&[1, 2, 3]);
        sample.flags = SampleFlags::SYNC;
        let cap = sample.data.capacity();
        pool.recycle(sample);

        let reused = pool.obtain();
        assert_eq!(reused.size(), 0);
        assert_eq!(reused.flags, SampleFlags::empty());
        assert_eq!(reused.data.capacity(), cap);
    }

    #[test]
    fn test_holder_容量不足时替换或失败() {
        let mut sample = Sample::default();
        sample.append(&[0xAB; 16]);
        sample.time_us = 42;

        let mut holder = SampleHolder::new();
        holder.fill_from(&sample).unwrap();
        assert_eq!(holder.size, 16);
        assert_eq!(holder.time_us, 42);

        let mut fixed = SampleHolder::with_fixed_capacity(8);
        assert!(matches!(
            fixed.fill_from(&sample),
            Err(LiuError::BufferTooSmall)
        ));
    }
}
