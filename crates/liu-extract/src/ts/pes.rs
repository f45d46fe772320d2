//! PES (Packetized Elementary Stream) 重组.
//!
//! 一个 PES 包可以跨越多个 TS 包. 重组器把同一 PID 的负载按序累积,
//! 在下一个 payload_unit_start 到来时把累积的完整 PES 包切出: 解析头部
//! (PTS → 微秒), 然后把负载交给基本流读取器.

use liu_core::time::pts_to_us;
use liu_core::{BitBuffer, LiuError, LiuResult};
use log::warn;

use super::EsReader;
use crate::sample::SamplePool;

/// PES 起始码前缀
const PES_START_CODE_PREFIX: u32 = 0x0000_01;

/// 单个 PID 的 PES 重组器
pub(super) struct PesReader {
    /// 跨 TS 包累积的 PES 数据
    buffer: BitBuffer,
    /// 关联的基本流读取器下标 (即轨道索引)
    es_index: usize,
}

impl PesReader {
    pub fn new(es_index: usize) -> Self {
        Self {
            buffer: BitBuffer::new(),
            es_index,
        }
    }

    /// 接收一段 TS 负载
    ///
    /// payload_unit_start 标志着新 PES 包的开始: 先把已累积的上一个
    /// PES 包切出处理, 再开始累积新包.
    pub fn consume(
        &mut self,
        ts_payload: &mut BitBuffer,
        payload_unit_start: bool,
        es_readers: &mut [EsReader],
        pool: &mut SamplePool,
    ) -> LiuResult<()> {
        if payload_unit_start && !self.buffer.is_empty() {
            self.read_pes(es_readers, pool)?;
        }
        let left = ts_payload.bytes_left();
        self.buffer.append(ts_payload, left)?;
        Ok(())
    }

    /// 解析累积完成的 PES 包
    fn read_pes(&mut self, es_readers: &mut [EsReader], pool: &mut SamplePool) -> LiuResult<()> {
        let buf = &mut self.buffer;

        let start_code_prefix = buf.read_bits(24)?;
        if start_code_prefix != PES_START_CODE_PREFIX {
            warn!("PES: 起始码前缀异常 {start_code_prefix:#08X}");
        }
        buf.skip_bits(8)?; // stream_id
        let packet_length = buf.read_bits(16)? as usize;

        buf.skip_bits(8)?; // '10' + scrambling(2) + priority + alignment + copyright + original
        let pts_flag = buf.read_bit()? == 1;
        let dts_flag = buf.read_bit()? == 1;
        buf.skip_bits(6)?; // ESCR/ES_rate/DSM_trick/additional_copy/CRC/extension 标志
        let header_data_length = buf.read_bits(8)? as usize;

        let mut time_us = 0i64;
        if pts_flag {
            buf.skip_bits(4)?; // '0010' / '0011'
            let mut pts = buf.read_bits_u64(3)? << 30;
            buf.skip_bits(1)?;
            pts |= buf.read_bits_u64(15)? << 15;
            buf.skip_bits(1)?;
            pts |= buf.read_bits_u64(15)?;
            buf.skip_bits(1)?;
            time_us = pts_to_us(pts as i64);

            // 跳过头部其余字段; 同时携带 DTS 时把 5 字节 DTS 一并消费
            let consumed = if dts_flag {
                buf.skip_bytes(5)?;
                10
            } else {
                5
            };
            let trailing = header_data_length.checked_sub(consumed).ok_or_else(|| {
                LiuError::InvalidData(format!(
                    "PES: 头部长度 {header_data_length} 与时间戳标志不一致"
                ))
            })?;
            buf.skip_bytes(trailing)?;
        } else {
            buf.skip_bytes(header_data_length)?;
        }

        // packet_length == 0 时负载延伸到缓冲区末尾
        let payload_size = if packet_length == 0 {
            buf.bytes_left()
        } else {
            packet_length
                .checked_sub(header_data_length + 3)
                .ok_or_else(|| {
                    LiuError::InvalidData(format!(
                        "PES: packet_length {packet_length} 小于头部大小"
                    ))
                })?
        };

        es_readers[self.es_index].consume(buf, payload_size, time_us, pool)?;
        self.buffer.reset();
        Ok(())
    }
}
