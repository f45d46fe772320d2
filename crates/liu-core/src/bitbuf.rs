//! 可增长的位缓冲区.
//!
//! 与只读切片上的位读取器不同, `BitBuffer` 拥有自己的存储, 支持追加数据、
//! 丢弃已消费前缀、回退读取位置 — 这是跨挂起点 (不完整头部、被打断的
//! 帧) 持续累积码流所必需的能力.
//!
//! 按大端位序读取 (MSB first), 这是多媒体编解码器中最常用的位序.

use crate::{LiuError, LiuResult};

/// 位缓冲区
///
/// 拥有一个可增长的字节缓冲区, 维护字节偏移和字节内位偏移 (0-7,
/// 0 表示最高位). 读取越界以 `Eof` 失败, 缓冲区状态不变.
///
/// # 示例
/// ```
/// use liu_core::bitbuf::BitBuffer;
///
/// let mut buf = BitBuffer::new();
/// buf.append_slice(&[0b1011_0001, 0b0101_0101]);
/// assert_eq!(buf.read_bits(4).unwrap(), 0b1011);
/// assert_eq!(buf.read_bits(4).unwrap(), 0b0001);
/// assert_eq!(buf.read_bits(8).unwrap(), 0b0101_0101);
/// ```
#[derive(Default)]
pub struct BitBuffer {
    /// 缓冲数据
    data: Vec<u8>,
    /// 当前字节偏移
    byte_offset: usize,
    /// 当前字节内的位偏移 (0-7, 0 表示最高位)
    bit_offset: u8,
}

impl BitBuffer {
    /// 创建空缓冲区
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有数据创建
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// 剩余可读字节数 (不计当前字节内已读的位)
    pub fn bytes_left(&self) -> usize {
        self.data.len() - self.byte_offset
    }

    /// 是否没有可读数据
    pub fn is_empty(&self) -> bool {
        self.bytes_left() == 0
    }

    /// 当前字节偏移
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// 回退/前进到指定字节偏移 (位偏移清零)
    pub fn set_byte_offset(&mut self, offset: usize) {
        debug_assert!(offset <= self.data.len());
        self.byte_offset = offset;
        self.bit_offset = 0;
    }

    /// 清空缓冲区 (保留已分配容量)
    pub fn reset(&mut self) {
        self.data.clear();
        self.byte_offset = 0;
        self.bit_offset = 0;
    }

    /// 丢弃已消费的前缀, 未读数据移动到缓冲区开头
    ///
    /// 仅在字节对齐时有意义; 位偏移被清零.
    pub fn clear_read_data(&mut self) {
        self.data.drain(..self.byte_offset);
        self.byte_offset = 0;
        self.bit_offset = 0;
    }

    /// 追加一段字节
    pub fn append_slice(&mut self, src: &[u8]) {
        self.data.extend_from_slice(src);
    }

    /// 从另一个缓冲区的当前读取位置拷贝 `length` 字节并追加到末尾
    ///
    /// 源缓冲区的读取位置同步前进. 要求源处于字节对齐状态.
    pub fn append(&mut self, src: &mut BitBuffer, length: usize) -> LiuResult<()> {
        let bytes = src.read_slice(length)?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// 未读数据的切片视图 (从当前字节偏移到末尾)
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.byte_offset..]
    }

    /// 读取 N 个位 (1-32), 按大端位序
    pub fn read_bits(&mut self, n: u32) -> LiuResult<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(LiuError::InvalidData(format!(
                "read_bits: n={n} 超过 32 位"
            )));
        }
        if (n as usize) > self.bits_left() {
            return Err(LiuError::Eof);
        }

        let mut result: u32 = 0;
        let mut remaining = n;
        while remaining > 0 {
            let available = 8 - u32::from(self.bit_offset);
            let to_read = remaining.min(available);

            let shift = available - to_read;
            let mask = ((1u32 << to_read) - 1) as u8;
            let bits = (self.data[self.byte_offset] >> shift) & mask;
            result = (result << to_read) | u32::from(bits);

            self.bit_offset += to_read as u8;
            if self.bit_offset >= 8 {
                self.bit_offset = 0;
                self.byte_offset += 1;
            }
            remaining -= to_read;
        }
        Ok(result)
    }

    /// 读取 1 个位
    pub fn read_bit(&mut self) -> LiuResult<u32> {
        self.read_bits(1)
    }

    /// 读取 N 个位 (1-64)
    pub fn read_bits_u64(&mut self, n: u32) -> LiuResult<u64> {
        if n <= 32 {
            return self.read_bits(n).map(u64::from);
        }
        if n > 64 {
            return Err(LiuError::InvalidData(format!(
                "read_bits_u64: n={n} 超过 64 位"
            )));
        }
        let high = u64::from(self.read_bits(n - 32)?);
        let low = u64::from(self.read_bits(32)?);
        Ok((high << 32) | low)
    }

    /// 跳过 N 个位
    pub fn skip_bits(&mut self, n: u32) -> LiuResult<()> {
        if (n as usize) > self.bits_left() {
            return Err(LiuError::Eof);
        }
        let total = u32::from(self.bit_offset) + n;
        self.byte_offset += (total / 8) as usize;
        self.bit_offset = (total % 8) as u8;
        Ok(())
    }

    /// 跳过 N 个字节 (保持位偏移不变)
    pub fn skip_bytes(&mut self, n: usize) -> LiuResult<()> {
        if self.byte_offset + n > self.data.len() {
            return Err(LiuError::Eof);
        }
        self.byte_offset += n;
        Ok(())
    }

    /// 从当前位置读取 `n` 字节的切片
    ///
    /// 仅在字节对齐时可用.
    pub fn read_slice(&mut self, n: usize) -> LiuResult<&[u8]> {
        if self.bit_offset != 0 {
            return Err(LiuError::InvalidData("read_slice 需要字节对齐".into()));
        }
        let end = self.byte_offset + n;
        if end > self.data.len() {
            return Err(LiuError::Eof);
        }
        let slice = &self.data[self.byte_offset..end];
        self.byte_offset = end;
        Ok(slice)
    }

    /// 查找下一个指定类型的 H.264 NAL 单元
    ///
    /// 从 `当前位置 + offset` 开始扫描 3 字节起始码 `00 00 01`, 且其后
    /// NAL 头部的低 5 位等于 `nal_type`. 返回起始码相对当前位置的偏移.
    pub fn find_next_nal_unit(&self, nal_type: u8, offset: usize) -> Option<usize> {
        let data = &self.data[self.byte_offset..];
        if data.len() < 4 {
            return None;
        }
        let mut i = offset;
        while i + 3 < data.len() {
            if data[i] == 0x00
                && data[i + 1] == 0x00
                && data[i + 2] == 0x01
                && (data[i + 3] & 0x1F) == nal_type
            {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// 查找下一个 ADTS 同步字 (12 位 `0xFFF`)
    ///
    /// 返回同步字相对当前位置的偏移. 末尾孤立的 `0xFF` 视为潜在的同步字
    /// 开头 (同步字可能被切分在两段负载之间), 返回它的偏移; 完全未找到
    /// 时返回剩余字节数.
    pub fn find_next_adts_sync_word(&self) -> usize {
        let data = &self.data[self.byte_offset..];
        if data.is_empty() {
            return 0;
        }
        let mut i = 0;
        while i + 1 < data.len() {
            if data[i] == 0xFF && (data[i + 1] & 0xF0) == 0xF0 {
                return i;
            }
            i += 1;
        }
        if data[data.len() - 1] == 0xFF {
            return data.len() - 1;
        }
        data.len()
    }

    /// 剩余可读位数
    fn bits_left(&self) -> usize {
        if self.byte_offset >= self.data.len() {
            return 0;
        }
        (self.data.len() - self.byte_offset) * 8 - self.bit_offset as usize
    }
}
