//! ID3-PES 元数据读取器.
//!
//! HLS 定时元数据把 ID3v2 标签封装在 PES 中传输 (stream_type 0x15).
//! 读取器校验标签头部并记录首个帧标识, 标签体不在此层进一步解析.

use liu_core::{BitBuffer, LiuResult};
use log::{debug, error};

use super::TrackSink;
use crate::media_format::{MediaFormat, APPLICATION_ID3};

/// ID3-PES 读取器
pub(crate) struct Id3Reader {
    pub(crate) sink: TrackSink,
    /// 标签累积缓冲
    buffer: BitBuffer,
}

impl Id3Reader {
    pub fn new() -> Self {
        Self {
            sink: TrackSink::with_format(MediaFormat::metadata(APPLICATION_ID3)),
            buffer: BitBuffer::new(),
        }
    }

    /// 消费一个 PES 的负载
    pub fn consume(
        &mut self,
        pes: &mut BitBuffer,
        payload_size: usize,
        _pes_time_us: i64,
    ) -> LiuResult<()> {
        let length = payload_size.min(pes.bytes_left());
        self.buffer.append(pes, length)?;

        // ID3v2 头部共 10 字节: "ID3" + 版本(2) + 标志(1) + synchsafe 大小(4)
        if self.buffer.bytes_left() < 10 {
            error!("ID3: 负载不足一个标签头部");
            self.buffer.reset();
            return Ok(());
        }

        let mut magic = [0u8; 3];
        magic.copy_from_slice(self.buffer.read_slice(3)?);
        if &magic != b"ID3" {
            error!("ID3: 头部缺少 'ID3' 魔数");
        }

        self.buffer.skip_bytes(2)?; // 版本号
        let flags = self.buffer.read_bits(8)?;
        let extended_header = flags & 0x40 != 0;
        let size = read_synchsafe_u32(&mut self.buffer)?;
        if size == 0 || size as usize > payload_size {
            error!("ID3: 标签大小异常 ({size})");
        }
        if extended_header {
            self.buffer.skip_bytes(10)?;
        }

        if self.buffer.bytes_left() >= 4 {
            let frame_id = self.buffer.read_slice(4)?;
            debug!("ID3: 帧标识 {}", String::from_utf8_lossy(frame_id));
        }

        self.buffer.reset();
        Ok(())
    }

    pub fn clear(&mut self, pool: &mut crate::sample::SamplePool) {
        self.sink.clear(pool);
        self.buffer.reset();
    }
}

/// 读取 ID3 synchsafe 整数 (4 字节, 每字节低 7 位有效)
fn read_synchsafe_u32(buf: &mut BitBuffer) -> LiuResult<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        value = (value << 7) | (buf.read_bits(8)? & 0x7F);
    }
    Ok(value)
}
