//! MPEG-2 TS (Transport Stream) 提取器.
//!
//! MPEG-TS 是一种基于固定大小 (188 字节) 包的传输流格式,
//! 广泛用于数字广播 (DVB/ATSC) 和 HLS 流媒体.
//!
//! # TS 包结构 (188 字节)
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ 同步字节 (0x47)                    1 byte │
//! │ TEI(1) + PUSI(1) + Priority(1) +          │
//! │   PID(13)                         2 bytes │
//! │ TSC(2) + AFC(2) + CC(4)           1 byte  │
//! │ [Adaptation Field]                可变    │
//! │ [Payload]                         可变    │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # 流水线
//! 包分帧 → PID 分发 → PAT/PMT 节目表 → PES 重组 → 基本流读取器
//! (H.264 / ADTS-AAC / ID3-PES) → 按轨道排队的采样.
//!
//! 输入是非阻塞的: 可用数据不足一个完整 TS 包时, 任何操作都不产生
//! 副作用地挂起, 补充数据后重试即可.

mod adts;
mod h264;
mod id3;
mod pes;
mod psi;

use std::collections::{HashMap, VecDeque};

use liu_core::{BitBuffer, LiuResult};
use log::debug;

use crate::input::NonBlockingInput;
use crate::media_format::MediaFormat;
use crate::sample::{ReadFlags, Sample, SampleHolder, SamplePool};

use self::adts::AdtsReader;
use self::h264::H264Reader;
use self::id3::Id3Reader;
use self::pes::PesReader;

/// TS 包大小
const TS_PACKET_SIZE: usize = 188;
/// TS 同步字节
const TS_SYNC_BYTE: u8 = 0x47;
/// PAT PID
const PID_PAT: u16 = 0x0000;

/// PMT stream_type: ADTS AAC
const STREAM_TYPE_AAC: u8 = 0x0F;
/// PMT stream_type: H.264
const STREAM_TYPE_H264: u8 = 0x1B;
/// PMT stream_type: PES 封装的 ID3 元数据
const STREAM_TYPE_ID3: u8 = 0x15;

/// PID 对应的负载处理器
enum PidHandler {
    /// PAT 节目关联表
    Pat,
    /// PMT 节目映射表
    Pmt,
    /// PES 重组器 (携带基本流)
    Pes(PesReader),
}

/// 处理器类别 (分发前先拷出, 避免跨借用)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerKind {
    Pat,
    Pmt,
    Pes,
}

impl PidHandler {
    fn kind(&self) -> HandlerKind {
        match self {
            Self::Pat => HandlerKind::Pat,
            Self::Pmt => HandlerKind::Pmt,
            Self::Pes(_) => HandlerKind::Pes,
        }
    }
}

/// 基本流读取器的输出端: 媒体格式 + 待取采样队列
pub(crate) struct TrackSink {
    /// 轨道媒体格式 (确定后不为 None)
    pub media_format: Option<MediaFormat>,
    /// 已切分完成、等待调用方取走的采样
    pub samples: VecDeque<Sample>,
}

impl TrackSink {
    fn new() -> Self {
        Self {
            media_format: None,
            samples: VecDeque::new(),
        }
    }

    fn with_format(format: MediaFormat) -> Self {
        Self {
            media_format: Some(format),
            samples: VecDeque::new(),
        }
    }

    fn clear(&mut self, pool: &mut SamplePool) {
        while let Some(sample) = self.samples.pop_front() {
            pool.recycle(sample);
        }
    }
}

/// 基本流读取器
pub(crate) enum EsReader {
    H264(H264Reader),
    Adts(AdtsReader),
    Id3(Id3Reader),
}

impl EsReader {
    /// 消费一个完整 PES 的负载
    fn consume(
        &mut self,
        pes: &mut BitBuffer,
        payload_size: usize,
        time_us: i64,
        pool: &mut SamplePool,
    ) -> LiuResult<()> {
        match self {
            Self::H264(r) => r.consume(pes, payload_size, time_us, pool),
            Self::Adts(r) => r.consume(pes, payload_size, time_us, pool),
            Self::Id3(r) => r.consume(pes, payload_size, time_us),
        }
    }

    fn sink(&self) -> &TrackSink {
        match self {
            Self::H264(r) => &r.sink,
            Self::Adts(r) => &r.sink,
            Self::Id3(r) => &r.sink,
        }
    }

    fn sink_mut(&mut self) -> &mut TrackSink {
        match self {
            Self::H264(r) => &mut r.sink,
            Self::Adts(r) => &mut r.sink,
            Self::Id3(r) => &mut r.sink,
        }
    }

    fn clear(&mut self, pool: &mut SamplePool) {
        match self {
            Self::H264(r) => r.clear(pool),
            Self::Adts(r) => r.clear(pool),
            Self::Id3(r) => r.clear(pool),
        }
    }
}

/// MPEG-2 TS 提取器
///
/// 使用流程:
/// 1. 循环调用 [`prepare`](Self::prepare) 直到返回 `true` (轨道与格式就绪)
/// 2. [`track_count`](Self::track_count) / [`format`](Self::format) 查询轨道
/// 3. 循环调用 [`read`](Self::read) 按轨道拉取采样
/// 4. [`reset`](Self::reset) 后可针对新的流位置复用实例
pub struct TsExtractor {
    /// 当前 188 字节包窗口 (重同步后保留尾部)
    packet_buf: BitBuffer,
    /// PID → 负载处理器
    pid_handlers: HashMap<u16, PidHandler>,
    /// 基本流读取器, 下标即轨道索引
    es_readers: Vec<EsReader>,
    /// 已注册的 PMT stream_type (同类型只取第一条)
    registered_stream_types: Vec<u8>,
    /// 采样缓冲回收池
    sample_pool: SamplePool,
    /// 轨道与格式是否全部就绪
    prepared: bool,
}

impl TsExtractor {
    /// 创建提取器
    pub fn new() -> Self {
        let mut pid_handlers = HashMap::new();
        pid_handlers.insert(PID_PAT, PidHandler::Pat);
        Self {
            packet_buf: BitBuffer::new(),
            pid_handlers,
            es_readers: Vec::new(),
            registered_stream_types: Vec::new(),
            sample_pool: SamplePool::new(),
            prepared: false,
        }
    }

    /// 重置内部状态, 仅保留 PAT 处理器与采样回收池
    pub fn reset(&mut self) {
        self.prepared = false;
        self.packet_buf.reset();
        self.pid_handlers.clear();
        self.pid_handlers.insert(PID_PAT, PidHandler::Pat);
        // 先回收排队中的采样缓冲再丢弃读取器
        for reader in &mut self.es_readers {
            reader.clear(&mut self.sample_pool);
        }
        self.es_readers.clear();
        self.registered_stream_types.clear();
    }

    /// 尝试完成准备: 读入数据直到轨道集合与所有媒体格式确定
    ///
    /// 返回 `false` 表示还需要更多数据, 补充后重试.
    pub fn prepare(&mut self, input: &mut dyn NonBlockingInput) -> LiuResult<bool> {
        while !self.prepared {
            if !self.read_ts_packet(input)? {
                return Ok(false);
            }
            self.prepared = self.check_prepared();
        }
        Ok(true)
    }

    /// 是否已准备完成
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// 轨道数量 (准备完成后调用)
    pub fn track_count(&self) -> usize {
        debug_assert!(self.prepared);
        self.es_readers.len()
    }

    /// 指定轨道的媒体格式 (准备完成后调用)
    pub fn format(&self, track: usize) -> Option<&MediaFormat> {
        debug_assert!(self.prepared);
        self.es_readers
            .get(track)
            .and_then(|r| r.sink().media_format.as_ref())
    }

    /// 从指定轨道读取下一个采样
    ///
    /// 读取在以下任一情况发生时结束, 返回标志说明原因:
    /// - 输入数据不足 → [`ReadFlags::NEED_MORE_DATA`]
    /// - 队列中有采样但未提供容器 → [`ReadFlags::NEED_SAMPLE_HOLDER`]
    /// - 成功读出采样 → [`ReadFlags::READ_SAMPLE`]
    pub fn read(
        &mut self,
        input: &mut dyn NonBlockingInput,
        track: usize,
        holder: Option<&mut SampleHolder>,
    ) -> LiuResult<ReadFlags> {
        debug_assert!(self.prepared);

        while self.es_readers[track].sink().samples.is_empty() {
            if !self.read_ts_packet(input)? {
                return Ok(ReadFlags::NEED_MORE_DATA);
            }
        }

        let Some(holder) = holder else {
            return Ok(ReadFlags::NEED_SAMPLE_HOLDER);
        };

        let sample = self.es_readers[track]
            .sink_mut()
            .samples
            .pop_front()
            .expect("队列非空");
        let result = holder.fill_from(&sample);
        self.sample_pool.recycle(sample);
        result?;
        Ok(ReadFlags::READ_SAMPLE)
    }

    /// 所有轨道的媒体格式是否都已确定
    fn check_prepared(&self) -> bool {
        if self.es_readers.is_empty() {
            return false;
        }
        self.es_readers
            .iter()
            .all(|r| r.sink().media_format.is_some())
    }

    /// 读取并处理一个 188 字节 TS 包
    ///
    /// 返回 `false` 表示可用数据不足一个包, 未产生副作用.
    fn read_ts_packet(&mut self, input: &mut dyn NonBlockingInput) -> LiuResult<bool> {
        // 凑满一个 188 字节窗口 (重同步后窗口里可能已留有尾部数据)
        let have = self.packet_buf.bytes_left();
        if have < TS_PACKET_SIZE {
            let need = TS_PACKET_SIZE - have;
            if input.available_byte_count() < need {
                return Ok(false);
            }
            if input.read_into(&mut self.packet_buf, need) < need {
                return Ok(false);
            }
        }

        // 同步字节检查: 不匹配时跳到窗口内下一个 0x47, 保留其后的字节
        // 作为下一个窗口的前缀, 当前这段数据静默丢弃.
        if self.packet_buf.remaining()[0] != TS_SYNC_BYTE {
            let window = &self.packet_buf.remaining()[..TS_PACKET_SIZE];
            let skip = window
                .iter()
                .skip(1)
                .position(|&b| b == TS_SYNC_BYTE)
                .map_or(TS_PACKET_SIZE, |p| p + 1);
            debug!("TS: 同步字节不匹配, 跳过 {skip} 字节");
            self.packet_buf.skip_bytes(skip)?;
            self.packet_buf.clear_read_data();
            return Ok(true);
        }

        let result = self.process_packet();
        self.packet_buf.reset();
        result.map(|_| true)
    }

    /// 解析包头并把负载分发给 PID 对应的处理器
    fn process_packet(&mut self) -> LiuResult<()> {
        let buf = &mut self.packet_buf;
        buf.skip_bits(8)?; // 同步字节
        buf.skip_bits(1)?; // transport_error_indicator
        let payload_unit_start = buf.read_bit()? == 1;
        buf.skip_bits(1)?; // transport_priority
        let pid = buf.read_bits(13)? as u16;
        buf.skip_bits(2)?; // transport_scrambling_control
        let adaptation_field_exists = buf.read_bit()? == 1;
        let payload_exists = buf.read_bit()? == 1;
        buf.skip_bits(4)?; // continuity_counter

        if adaptation_field_exists {
            let af_length = buf.read_bits(8)? as usize;
            buf.skip_bytes(af_length)?;
        }

        if !payload_exists {
            return Ok(());
        }

        // 未注册的 PID 直接丢弃
        let kind = self.pid_handlers.get(&pid).map(PidHandler::kind);
        match kind {
            None => Ok(()),
            Some(HandlerKind::Pat) => psi::read_pat(
                &mut self.packet_buf,
                &mut self.pid_handlers,
                payload_unit_start,
            ),
            Some(HandlerKind::Pmt) => psi::read_pmt(
                &mut self.packet_buf,
                &mut self.pid_handlers,
                &mut self.es_readers,
                &mut self.registered_stream_types,
                payload_unit_start,
            ),
            Some(HandlerKind::Pes) => self.handle_pes_payload(pid, payload_unit_start),
        }
    }

    /// 把 TS 负载交给 PES 重组器
    fn handle_pes_payload(&mut self, pid: u16, payload_unit_start: bool) -> LiuResult<()> {
        let Self {
            packet_buf,
            pid_handlers,
            es_readers,
            sample_pool,
            ..
        } = self;
        let Some(PidHandler::Pes(pes)) = pid_handlers.get_mut(&pid) else {
            return Ok(());
        };
        pes.consume(packet_buf, payload_unit_start, es_readers, sample_pool)
    }
}

impl Default for TsExtractor {
    fn default() -> Self {
        Self::new()
    }
}
