//! PSI (Program Specific Information) 表读取.
//!
//! PAT 把节目号映射到 PMT 的 PID; PMT 枚举节目内的基本流, 为识别出的
//! stream_type 注册 PES 重组器. 只取第一个节目; CRC_32 跳过不校验.

use std::collections::HashMap;

use liu_core::{BitBuffer, LiuResult};
use log::debug;

use super::adts::AdtsReader;
use super::h264::H264Reader;
use super::id3::Id3Reader;
use super::pes::PesReader;
use super::{EsReader, PidHandler, STREAM_TYPE_AAC, STREAM_TYPE_H264, STREAM_TYPE_ID3};

/// 读取 PAT, 为第一个节目的 PMT PID 注册处理器
pub(super) fn read_pat(
    buf: &mut BitBuffer,
    pid_handlers: &mut HashMap<u16, PidHandler>,
    payload_unit_start: bool,
) -> LiuResult<()> {
    if payload_unit_start {
        let pointer_field = buf.read_bits(8)? as usize;
        buf.skip_bytes(pointer_field)?;
    }

    // PAT 节头部: table_id(8) + 语法标志等(4) + section_length(12)
    //           + transport_stream_id(16) + 保留/版本(8) + 节号(16)
    buf.skip_bits(64)?;

    // 只读取并采用第一个节目
    buf.skip_bits(16 + 3)?; // program_number + reserved
    let pmt_pid = buf.read_bits(13)? as u16;

    if !pid_handlers.contains_key(&pmt_pid) {
        debug!("PAT: PMT PID = {pmt_pid:#06X}");
        pid_handlers.insert(pmt_pid, PidHandler::Pmt);
    }

    // 其余节目与 CRC_32 一并忽略
    Ok(())
}

/// 读取 PMT, 为识别出的基本流注册 PES 重组器
pub(super) fn read_pmt(
    buf: &mut BitBuffer,
    pid_handlers: &mut HashMap<u16, PidHandler>,
    es_readers: &mut Vec<EsReader>,
    registered_stream_types: &mut Vec<u8>,
    payload_unit_start: bool,
) -> LiuResult<()> {
    if payload_unit_start {
        let pointer_field = buf.read_bits(8)? as usize;
        buf.skip_bytes(pointer_field)?;
    }

    buf.skip_bits(12)?; // table_id(8) + 语法标志等(4)
    let section_length = buf.read_bits(12)? as usize;
    // program_number(16) + 保留/版本(8) + 节号(16) + PCR_PID(16) + 保留(4)
    buf.skip_bits(60)?;
    let program_info_length = buf.read_bits(12)? as usize;
    read_descriptors(buf, program_info_length)?;

    let mut entries_remaining =
        section_length as isize - 9 - program_info_length as isize - 4 /* CRC */;
    while entries_remaining > 0 {
        let stream_type = buf.read_bits(8)? as u8;
        buf.skip_bits(3)?;
        let elementary_pid = buf.read_bits(13)? as u16;
        buf.skip_bits(4)?;
        let es_info_length = buf.read_bits(12)? as usize;
        read_descriptors(buf, es_info_length)?;
        entries_remaining -= es_info_length as isize + 5;

        // 同一 stream_type 只取第一条
        if registered_stream_types.contains(&stream_type) {
            continue;
        }

        let reader = match stream_type {
            STREAM_TYPE_AAC => Some(EsReader::Adts(AdtsReader::new())),
            STREAM_TYPE_H264 => Some(EsReader::H264(H264Reader::new())),
            STREAM_TYPE_ID3 => Some(EsReader::Id3(Id3Reader::new())),
            other => {
                debug!("PMT: 未识别的 stream_type={other:#04X}, PID={elementary_pid:#06X}, 跳过");
                None
            }
        };

        if let Some(reader) = reader {
            debug!("PMT: stream_type={stream_type:#04X} PID={elementary_pid:#06X} → 轨道 {}",
                es_readers.len());
            registered_stream_types.push(stream_type);
            let es_index = es_readers.len();
            es_readers.push(reader);
            pid_handlers.insert(elementary_pid, PidHandler::Pes(PesReader::new(es_index)));
        }
    }

    // CRC_32 跳过不校验
    Ok(())
}

/// 走完一串描述符
///
/// 每个描述符为 tag(8) + length(8) + length 字节, 按
/// `descriptor_length + 2` 递减剩余量.
fn read_descriptors(buf: &mut BitBuffer, mut descriptors_size: usize) -> LiuResult<()> {
    while descriptors_size >= 2 {
        buf.skip_bits(8)?; // descriptor_tag
        let descriptor_length = buf.read_bits(8)? as usize;
        if descriptor_length > 0 {
            buf.skip_bytes(descriptor_length)?;
        }
        descriptors_size = descriptors_size.saturating_sub(descriptor_length + 2);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_描述符遍历走完全部() {
        // 两个描述符: tag=0x0A len=2, tag=0x05 len=1, 之后是一个哨兵字节
        let mut buf =
            BitBuffer::from_slice(&[0x0A, 0x02, 0xAA, 0xBB, 0x05, 0x01, 0xCC, 0x47]);
        read_descriptors(&mut buf, 7).unwrap();
        assert_eq!(buf.read_bits(8).unwrap(), 0x47);
    }

    #[test]
    fn test_pat_注册第一个节目() {
        let mut handlers: HashMap<u16, PidHandler> = HashMap::new();
        // pointer(0) + 8 字节节头部 + 节目: number=1, PID=0x100
        let mut section = vec![0x00];
        section.extend_from_slice(&[0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00]);
        section.extend_from_slice(&[0x00, 0x01, 0xE1, 0x00]);
        section.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // CRC
        let mut buf = BitBuffer::from_slice(&section);
        read_pat(&mut buf, &mut handlers, true).unwrap();
        assert!(matches!(handlers.get(&0x100), Some(PidHandler::Pmt)));
    }
}
