//! EBML (Extensible Binary Meta Language) 元素树事件读取.
//!
//! Matroska/WebM 文件是一棵自描述的 EBML 元素树: 每个元素由变长整数
//! 编码的 ID 与内容大小开头, master 元素嵌套子元素, 叶子元素携带类型化
//! 的值.
//!
//! [`EbmlReader`] 是事件驱动的拉取解析器: 每次 `read` 推进一个事件,
//! 通过 [`EbmlSink`] 能力集合回调给消费者. 元素 ID → 类型的映射由消费
//! 者以显式表的形式提供, 未知元素整体跳过.

use liu_core::{LiuError, LiuResult};

use super::varint::VarintReader;
use crate::input::ExtractorInput;

/// 元素 ID 的最大编码长度
const MAX_ID_BYTES: usize = 4;
/// 内容大小的最大编码长度
const MAX_SIZE_BYTES: usize = 8;

// ========================
// 已知的 Matroska/WebM 元素 ID
// ========================

// EBML 头部
pub const EBML_HEADER: u32 = 0x1A45_DFA3;
pub const EBML_READ_VERSION: u32 = 0x42F7;
pub const DOC_TYPE: u32 = 0x4282;
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;

// Segment 与 SeekHead
pub const SEGMENT: u32 = 0x1853_8067;
pub const SEEK_HEAD: u32 = 0x114D_9B74;
pub const SEEK: u32 = 0x4DBB;
pub const SEEK_ID: u32 = 0x53AB;
pub const SEEK_POSITION: u32 = 0x53AC;

// Segment Info
pub const SEGMENT_INFO: u32 = 0x1549_A966;
pub const TIMECODE_SCALE: u32 = 0x2AD7_B1;
pub const DURATION: u32 = 0x4489;

// Cluster
pub const CLUSTER: u32 = 0x1F43_B675;
pub const TIME_CODE: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;
pub const BLOCK_GROUP: u32 = 0xA0;
pub const BLOCK: u32 = 0xA1;
pub const REFERENCE_BLOCK: u32 = 0xFB;

// Tracks
pub const TRACKS: u32 = 0x1654_AE6B;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_TYPE: u32 = 0x83;
pub const DEFAULT_DURATION: u32 = 0x23E3_83;
pub const CODEC_ID: u32 = 0x86;
pub const CODEC_PRIVATE: u32 = 0x63A2;
pub const CODEC_DELAY: u32 = 0x56AA;
pub const SEEK_PRE_ROLL: u32 = 0x56BB;
pub const VIDEO_SETTINGS: u32 = 0xE0;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const AUDIO_SETTINGS: u32 = 0xE1;
pub const CHANNELS: u32 = 0x9F;
pub const SAMPLING_FREQUENCY: u32 = 0xB5;

// 内容加密
pub const CONTENT_ENCODINGS: u32 = 0x6D80;
pub const CONTENT_ENCODING: u32 = 0x6240;
pub const CONTENT_ENCODING_ORDER: u32 = 0x5031;
pub const CONTENT_ENCODING_SCOPE: u32 = 0x5032;
pub const CONTENT_ENCODING_TYPE: u32 = 0x5033;
pub const CONTENT_ENCRYPTION: u32 = 0x5035;
pub const CONTENT_ENCRYPTION_ALGORITHM: u32 = 0x47E1;
pub const CONTENT_ENCRYPTION_KEY_ID: u32 = 0x47E2;
pub const CONTENT_ENCRYPTION_AES_SETTINGS: u32 = 0x47E7;
pub const AES_SETTINGS_CIPHER_MODE: u32 = 0x47E8;

// Cues (时间索引)
pub const CUES: u32 = 0x1C53_BB6B;
pub const CUE_POINT: u32 = 0xBB;
pub const CUE_TIME: u32 = 0xB3;
pub const CUE_TRACK_POSITIONS: u32 = 0xB7;
pub const CUE_CLUSTER_POSITION: u32 = 0xF1;

/// 元素数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// 嵌套子元素的容器
    Master,
    /// 大端无符号整数 (1-8 字节)
    UnsignedInt,
    /// IEEE 浮点数 (4 或 8 字节)
    Float,
    /// UTF-8 字符串
    String,
    /// 二进制数据, 由消费者直接从输入流式读取
    Binary,
    /// 未知元素, 整体跳过
    Unknown,
}

/// EBML 事件接收器
///
/// 消费者提供的能力集合: 元素类型表 + 各类型化事件的处理.
pub trait EbmlSink {
    /// 元素 ID → 类型
    fn element_type(&self, id: u32) -> ElementType;

    /// master 元素开始 (已进入其内容区)
    fn start_master(&mut self, id: u32, content_position: u64, content_size: u64)
        -> LiuResult<()>;

    /// master 元素的内容区结束
    fn end_master(&mut self, id: u32) -> LiuResult<()>;

    /// 无符号整数叶子元素
    fn unsigned_int(&mut self, id: u32, value: u64) -> LiuResult<()>;

    /// 浮点数叶子元素
    fn float(&mut self, id: u32, value: f64) -> LiuResult<()>;

    /// 字符串叶子元素
    fn string(&mut self, id: u32, value: String) -> LiuResult<()>;

    /// 二进制叶子元素; 消费者自行从 `input` 读取 `content_size` 字节
    fn binary(
        &mut self,
        id: u32,
        content_size: usize,
        input: &mut dyn ExtractorInput,
    ) -> LiuResult<()>;
}

/// 元素解析阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementState {
    ReadId,
    ReadSize,
    ReadContent,
}

/// 事件驱动的 EBML 树读取器
///
/// 维护一个已打开 master 元素的栈 (ID 与内容结束位置). 每次 `read`
/// 产生一个事件或跳过一个未知元素; 输入不足时以 `NeedMoreData` 挂起,
/// 阶段状态保留, 重试可无损续读.
pub struct EbmlReader {
    varint: VarintReader,
    element_state: ElementState,
    element_id: u32,
    element_content_size: u64,
    /// 已打开的 master 元素: (ID, 内容结束位置)
    master_stack: Vec<(u32, u64)>,
}

impl EbmlReader {
    pub fn new() -> Self {
        Self {
            varint: VarintReader::new(),
            element_state: ElementState::ReadId,
            element_id: 0,
            element_content_size: 0,
            master_stack: Vec::new(),
        }
    }

    /// 复位到初始状态
    pub fn reset(&mut self) {
        self.varint.reset();
        self.element_state = ElementState::ReadId;
        self.master_stack.clear();
    }

    /// 推进一个事件
    ///
    /// 返回 `false` 表示到达输入末尾.
    pub fn read(
        &mut self,
        input: &mut dyn ExtractorInput,
        sink: &mut dyn EbmlSink,
    ) -> LiuResult<bool> {
        loop {
            // 内容区已结束的 master 元素出栈
            if let Some(&(id, end_position)) = self.master_stack.last() {
                if input.position() >= end_position {
                    self.master_stack.pop();
                    sink.end_master(id)?;
                    return Ok(true);
                }
            }

            if self.element_state == ElementState::ReadId {
                match self
                    .varint
                    .read_unsigned_varint(input, true, false, MAX_ID_BYTES)?
                {
                    None => return Ok(false),
                    Some(id) => self.element_id = id as u32,
                }
                self.element_state = ElementState::ReadSize;
            }

            if self.element_state == ElementState::ReadSize {
                let size = self
                    .varint
                    .read_unsigned_varint(input, false, true, MAX_SIZE_BYTES)?
                    .expect("大小读取不以流末尾结束");
                self.element_content_size = size;
                self.element_state = ElementState::ReadContent;
            }

            match sink.element_type(self.element_id) {
                ElementType::Master => {
                    let content_position = input.position();
                    self.master_stack
                        .push((self.element_id, content_position + self.element_content_size));
                    self.element_state = ElementState::ReadId;
                    sink.start_master(self.element_id, content_position, self.element_content_size)?;
                    return Ok(true);
                }
                ElementType::UnsignedInt => {
                    let size = self.element_content_size as usize;
                    if !(1..=8).contains(&size) {
                        return Err(LiuError::InvalidData(format!(
                            "EBML: 无效的整数元素大小 {size}"
                        )));
                    }
                    let mut buf = [0u8; 8];
                    input.read_fully(&mut buf[..size])?;
                    let mut value = 0u64;
                    for &byte in &buf[..size] {
                        value = (value << 8) | u64::from(byte);
                    }
                    self.element_state = ElementState::ReadId;
                    sink.unsigned_int(self.element_id, value)?;
                    return Ok(true);
                }
                ElementType::Float => {
                    let size = self.element_content_size as usize;
                    let value = match size {
                        0 => 0.0,
                        4 => {
                            let mut buf = [0u8; 4];
                            input.read_fully(&mut buf)?;
                            f64::from(f32::from_be_bytes(buf))
                        }
                        8 => {
                            let mut buf = [0u8; 8];
                            input.read_fully(&mut buf)?;
                            f64::from_be_bytes(buf)
                        }
                        _ => {
                            return Err(LiuError::InvalidData(format!(
                                "EBML: 无效的浮点数元素大小 {size}"
                            )))
                        }
                    };
                    self.element_state = ElementState::ReadId;
                    sink.float(self.element_id, value)?;
                    return Ok(true);
                }
                ElementType::String => {
                    let size = self.element_content_size as usize;
                    let mut buf = vec![0u8; size];
                    input.read_fully(&mut buf)?;
                    // 去除尾部 NUL 填充
                    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
                    let value = String::from_utf8_lossy(&buf[..end]).into_owned();
                    self.element_state = ElementState::ReadId;
                    sink.string(self.element_id, value)?;
                    return Ok(true);
                }
                ElementType::Binary => {
                    // 消费者可能因输入不足挂起, 挂起期间停留在本阶段,
                    // 下一次 read 以相同的 (id, size) 重新分发
                    sink.binary(self.element_id, self.element_content_size as usize, input)?;
                    self.element_state = ElementState::ReadId;
                    return Ok(true);
                }
                ElementType::Unknown => {
                    input.skip_fully(self.element_content_size)?;
                    self.element_state = ElementState::ReadId;
                }
            }
        }
    }
}

impl Default for EbmlReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::MemoryInput;

    /// 记录事件序列的测试接收器
    #[derive(Default)]
    struct RecordingSink {
        events: Vec<String>,
    }

    impl EbmlSink for RecordingSink {
        fn element_type(&self, id: u32) -> ElementType {
            match id {
                EBML_HEADER => ElementType::Master,
                EBML_READ_VERSION => ElementType::UnsignedInt,
                DOC_TYPE => ElementType::String,
                DURATION => ElementType::Float,
                CODEC_PRIVATE => ElementType::Binary,
                _ => ElementType::Unknown,
            }
        }

        fn start_master(&mut self, id: u32, pos: u64, size: u64) -> LiuResult<()> {
            self.events.push(format!("start {id:#X} @{pos} +{size}"));
            Ok(())
        }

        fn end_master(&mut self, id: u32) -> LiuResult<()> {
            self.events.push(format!("end {id:#X}"));
            Ok(())
        }

        fn unsigned_int(&mut self, id: u32, value: u64) -> LiuResult<()> {
            self.events.push(format!("uint {id:#X} = {value}"));
            Ok(())
        }

        fn float(&mut self, id: u32, value: f64) -> LiuResult<()> {
            self.events.push(format!("float {id:#X} = {value}"));
            Ok(())
        }

        fn string(&mut self, id: u32, value: String) -> LiuResult<()> {
            self.events.push(format!("string {id:#X} = {value}"));
            Ok(())
        }

        fn binary(
            &mut self,
            id: u32,
            content_size: usize,
            input: &mut dyn ExtractorInput,
        ) -> LiuResult<()> {
            let mut buf = vec![0u8; content_size];
            input.read_fully(&mut buf)?;
            self.events.push(format!("binary {id:#X} x{content_size}"));
            Ok(())
        }
    }

    fn drive(data: Vec<u8>) -> Vec<String> {
        let mut input = MemoryInput::from_data(data);
        let mut reader = EbmlReader::new();
        let mut sink = RecordingSink::default();
        while reader.read(&mut input, &mut sink).unwrap() {}
        sink.events
    }

    #[test]
    fn test_树遍历产生配对事件() {
        // EBML 头部, 内含: EBMLReadVersion=1, DocType="webm"
        let mut data = vec![0x1A, 0x45, 0xDF, 0xA3, 0x8B];
        data.extend_from_slice(&[0x42, 0xF7, 0x81, 0x01]);
        data.extend_from_slice(&[0x42, 0x82, 0x84]);
        data.extend_from_slice(b"webm");
        let events = drive(data);
        assert_eq!(
            events,
            vec![
                "start 0x1A45DFA3 @5 +11",
                "uint 0x42F7 = 1",
                "string 0x4282 = webm",
                "end 0x1A45DFA3",
            ]
        );
    }

    #[test]
    fn test_未知元素整体跳过() {
        let mut data = vec![0x1A, 0x45, 0xDF, 0xA3, 0x89];
        // 未知元素 0xEC (Void), 3 字节内容
        data.extend_from_slice(&[0xEC, 0x83, 0xAA, 0xBB, 0xCC]);
        data.extend_from_slice(&[0x42, 0xF7, 0x81, 0x01]);
        let events = drive(data);
        assert_eq!(
            events,
            vec![
                "start 0x1A45DFA3 @5 +9",
                "uint 0x42F7 = 1",
                "end 0x1A45DFA3",
            ]
        );
    }

    #[test]
    fn test_二进制元素流式读取() {
        let mut data = vec![0x63, 0xA2, 0x83, 0x01, 0x02, 0x03];
        data.extend_from_slice(&[0x44, 0x89, 0x84]);
        data.extend_from_slice(&1.0f32.to_be_bytes());
        let events = drive(data);
        assert_eq!(events, vec!["binary 0x63A2 x3", "float 0x4489 = 1"]);
    }

    #[test]
    fn test_挂起后续读() {
        let mut data = vec![0x42, 0xF7, 0x81, 0x01];
        let full = data.clone();
        data.truncate(2);
        let mut input = MemoryInput::from_data(full);
        input.set_visible_end(2);
        let mut reader = EbmlReader::new();
        let mut sink = RecordingSink::default();
        assert!(matches!(
            reader.read(&mut input, &mut sink),
            Err(liu_core::LiuError::NeedMoreData)
        ));
        input.make_all_visible();
        assert!(reader.read(&mut input, &mut sink).unwrap());
        assert_eq!(sink.events, vec!["uint 0x42F7 = 1"]);
    }
}
