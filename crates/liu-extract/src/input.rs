//! 输入抽象层.
//!
//! 两条流水线使用不同形态的输入契约:
//!
//! - TS 侧是非阻塞字节流 ([`NonBlockingInput`]): 解析器先询问可用字节数,
//!   不足 188 字节就直接挂起, 绝不阻塞.
//! - WebM 侧是"逻辑阻塞"输入 ([`ExtractorInput`]): `read_fully` /
//!   `skip_fully` 要么完整完成, 要么以 `NeedMoreData` 失败且不消费任何
//!   字节 — 调用方视其为"稍后重试". 全有或全无的语义配合解析器内部的
//!   分阶段状态机, 保证挂起点之间不丢失任何前进量.

use liu_core::{BitBuffer, LiuError, LiuResult};

/// 非阻塞输入流 (TS 流水线)
pub trait NonBlockingInput {
    /// 当前可立即读取的字节数
    fn available_byte_count(&self) -> usize;

    /// 将至多 `length` 字节追加到位缓冲区, 返回实际读取的字节数
    fn read_into(&mut self, buf: &mut BitBuffer, length: usize) -> usize;
}

/// 提取器输入 (WebM 流水线)
///
/// `read_fully`/`skip_fully` 为全有或全无: 返回 `Err(NeedMoreData)` 时
/// 未消费任何字节, 同一调用可以原样重试; 返回 `Err(Eof)` 表示数据已经
/// 真正结束.
pub trait ExtractorInput {
    /// 读满整个缓冲区
    fn read_fully(&mut self, buf: &mut [u8]) -> LiuResult<()>;

    /// 完整跳过 `length` 字节
    fn skip_fully(&mut self, length: u64) -> LiuResult<()>;

    /// 当前读取位置 (从流开头计的字节偏移)
    fn position(&self) -> u64;
}

/// Seek 位置输出参数
///
/// 提取器请求定位时写入目标位置, 调用方据此重新定位输入后继续调用
/// `read`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PositionHolder {
    /// 请求定位到的绝对字节偏移
    pub position: u64,
}

/// 内存输入
///
/// 同时实现两种输入契约, 用于测试和内存中处理. `available` 上限可以
/// 人为压低以模拟数据分段到达.
pub struct MemoryInput {
    /// 全部数据
    data: Vec<u8>,
    /// 当前读取位置
    pos: usize,
    /// 可见数据末尾 (用于模拟尚未到达的数据), `usize::MAX` 表示全部可见
    visible_end: usize,
}

impl MemoryInput {
    /// 从已有数据创建, 全部数据立即可见
    pub fn from_data(data: Vec<u8>) -> Self {
        let visible_end = data.len();
        Self {
            data,
            pos: 0,
            visible_end,
        }
    }

    /// 限制可见数据末尾 (模拟数据尚未到达)
    pub fn set_visible_end(&mut self, end: usize) {
        self.visible_end = end.min(self.data.len());
    }

    /// 使全部数据可见
    pub fn make_all_visible(&mut self) {
        self.visible_end = self.data.len();
    }

    /// 重新定位 (响应提取器的 Seek 请求)
    pub fn set_position(&mut self, position: u64) {
        self.pos = (position as usize).min(self.data.len());
    }
}

impl NonBlockingInput for MemoryInput {
    fn available_byte_count(&self) -> usize {
        self.visible_end.saturating_sub(self.pos)
    }

    fn read_into(&mut self, buf: &mut BitBuffer, length: usize) -> usize {
        let to_read = length.min(self.available_byte_count());
        buf.append_slice(&self.data[self.pos..self.pos + to_read]);
        self.pos += to_read;
        to_read
    }
}

impl ExtractorInput for MemoryInput {
    fn read_fully(&mut self, buf: &mut [u8]) -> LiuResult<()> {
        if self.pos + buf.len() > self.visible_end {
            // 真正的数据末尾与"尚未到达"加以区分
            if self.pos + buf.len() > self.data.len() {
                return Err(LiuError::Eof);
            }
            return Err(LiuError::NeedMoreData);
        }
        buf.copy_from_slice(&self.data[self.pos..self.pos + buf.len()]);
        self.pos += buf.len();
        Ok(())
    }

    fn skip_fully(&mut self, length: u64) -> LiuResult<()> {
        let length = length as usize;
        if self.pos + length > self.visible_end {
            if self.pos + length > self.data.len() {
                return Err(LiuError::Eof);
            }
            return Err(LiuError::NeedMoreData);
        }
        self.pos += length;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_非阻塞读取() {
        let mut input = MemoryInput::from_data(vec![1, 2, 3, 4, 5]);
        input.set_visible_end(3);
        assert_eq!(input.available_byte_count(), 3);

        let mut buf = BitBuffer::new();
        assert_eq!(input.read_into(&mut buf, 5), 3);
        assert_eq!(buf.remaining(), &[1, 2, 3]);

        input.make_all_visible();
        assert_eq!(input.read_into(&mut buf, 5), 2);
        assert_eq!(buf.remaining(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_read_fully_全有或全无() {
        let mut input = MemoryInput::from_data(vec![1, 2, 3, 4]);
        input.set_visible_end(2);

        let mut buf = [0u8; 3];
        assert!(matches!(
            input.read_fully(&mut buf),
            Err(LiuError::NeedMoreData)
        ));
        // 未消费任何字节
        assert_eq!(input.position(), 0);

        input.make_all_visible();
        input.read_fully(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(input.position(), 3);

        // 越过数据末尾是 Eof
        let mut buf2 = [0u8; 2];
        assert!(matches!(input.read_fully(&mut buf2), Err(LiuError::Eof)));
    }

    #[test]
    fn test_重新定位() {
        let mut input = MemoryInput::from_data(vec![1, 2, 3, 4]);
        let mut buf = [0u8; 2];
        input.read_fully(&mut buf).unwrap();
        input.set_position(0);
        input.read_fully(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
    }
}
