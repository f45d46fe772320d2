//! WebM/Matroska 提取器集成测试.
//!
//! 在内存中构造符合 EBML/Matroska 规范的二进制数据, 测试完整的
//! 轨道发现 → Cues 定位循环 → 块与 lacing 解析 → 采样写出 流程.

use liu_core::{LiuError, LiuResult};
use liu_extract::chunk_index::ChunkIndex;
use liu_extract::input::{ExtractorInput, MemoryInput, PositionHolder};
use liu_extract::media_format::{self, MediaFormat};
use liu_extract::output::{ExtractorOutput, TrackOutput};
use liu_extract::sample::SampleFlags;
use liu_extract::webm::{ebml, ReadResult, WebmExtractor};

// ========================
// EBML 写入辅助
// ========================

/// 写入元素 ID (不掩码)
fn write_vint_id(buf: &mut Vec<u8>, id: u32) {
    if id <= 0xFF {
        buf.push(id as u8);
    } else if id <= 0xFFFF {
        buf.extend_from_slice(&[(id >> 8) as u8, id as u8]);
    } else if id <= 0xFF_FFFF {
        buf.extend_from_slice(&[(id >> 16) as u8, (id >> 8) as u8, id as u8]);
    } else {
        buf.extend_from_slice(&[(id >> 24) as u8, (id >> 16) as u8, (id >> 8) as u8, id as u8]);
    }
}

/// 写入内容大小 (加标记位)
fn write_vint_size(buf: &mut Vec<u8>, size: u64) {
    if size < 0x7F {
        buf.push(0x80 | size as u8);
    } else if size < 0x3FFF {
        buf.push(0x40 | (size >> 8) as u8);
        buf.push(size as u8);
    } else {
        buf.push(0x20 | (size >> 16) as u8);
        buf.push((size >> 8) as u8);
        buf.push(size as u8);
    }
}

fn write_element(buf: &mut Vec<u8>, id: u32, content: &[u8]) {
    write_vint_id(buf, id);
    write_vint_size(buf, content.len() as u64);
    buf.extend_from_slice(content);
}

fn write_uint_element(buf: &mut Vec<u8>, id: u32, value: u64) {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes.remove(0);
    }
    write_element(buf, id, &bytes);
}

fn write_float_element(buf: &mut Vec<u8>, id: u32, value: f64) {
    write_element(buf, id, &value.to_bits().to_be_bytes());
}

fn write_string_element(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_element(buf, id, value.as_bytes());
}

/// EBML 文件头
fn build_ebml_header(doc_type: &str) -> Vec<u8> {
    let mut content = Vec::new();
    write_uint_element(&mut content, ebml::EBML_READ_VERSION, 1);
    write_string_element(&mut content, ebml::DOC_TYPE, doc_type);
    write_uint_element(&mut content, ebml::DOC_TYPE_READ_VERSION, 2);
    let mut data = Vec::new();
    write_element(&mut data, ebml::EBML_HEADER, &content);
    data
}

/// SimpleBlock / Block 内容: 轨道号 + 相对时间戳 + 标志 + 负载
fn build_block_content(track_number: u8, timecode: i16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut block = vec![0x80 | track_number];
    block.extend_from_slice(&timecode.to_be_bytes());
    block.push(flags);
    block.extend_from_slice(payload);
    block
}

// ========================
// 记录式输出
// ========================

#[derive(Debug)]
struct FakeSample {
    time_us: i64,
    flags: SampleFlags,
    data: Vec<u8>,
    encryption_key_id: Option<Vec<u8>>,
}

#[derive(Default)]
struct FakeTrackOutput {
    number: i32,
    formats: Vec<MediaFormat>,
    data: Vec<u8>,
    samples: Vec<FakeSample>,
}

impl TrackOutput for FakeTrackOutput {
    fn format(&mut self, format: MediaFormat) {
        self.formats.push(format);
    }

    fn sample_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    fn sample_data_from_input(
        &mut self,
        input: &mut dyn ExtractorInput,
        length: usize,
    ) -> LiuResult<usize> {
        let mut buf = vec![0u8; length];
        input.read_fully(&mut buf)?;
        self.data.extend_from_slice(&buf);
        Ok(length)
    }

    fn sample_metadata(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: usize,
        encryption_key_id: Option<&[u8]>,
    ) {
        let end = self.data.len() - offset;
        self.samples.push(FakeSample {
            time_us,
            flags,
            data: self.data[end - size..end].to_vec(),
            encryption_key_id: encryption_key_id.map(<[u8]>::to_vec),
        });
    }
}

#[derive(Default)]
struct FakeOutput {
    tracks: Vec<FakeTrackOutput>,
    seek_maps: Vec<ChunkIndex>,
    drm_init: Vec<(String, Vec<u8>)>,
    end_tracks_count: u32,
}

impl FakeOutput {
    fn track_by_number(&self, number: i32) -> &FakeTrackOutput {
        self.tracks
            .iter()
            .find(|t| t.number == number)
            .expect("轨道存在")
    }
}

impl ExtractorOutput for FakeOutput {
    fn track(&mut self, track_number: i32) -> &mut dyn TrackOutput {
        if let Some(index) = self.tracks.iter().position(|t| t.number == track_number) {
            &mut self.tracks[index]
        } else {
            self.tracks.push(FakeTrackOutput {
                number: track_number,
                ..Default::default()
            });
            self.tracks.last_mut().unwrap()
        }
    }

    fn end_tracks(&mut self) {
        self.end_tracks_count += 1;
    }

    fn seek_map(&mut self, chunk_index: ChunkIndex) {
        self.seek_maps.push(chunk_index);
    }

    fn drm_init_data(&mut self, scheme_mime_type: &str, key_id: &[u8]) {
        self.drm_init.push((scheme_mime_type.to_string(), key_id.to_vec()));
    }
}

/// 驱动提取器直到输入结束, 返回 (输出, seek 次数)
fn drive(data: Vec<u8>) -> (FakeOutput, u32) {
    let mut input = MemoryInput::from_data(data);
    let mut extractor = WebmExtractor::new(FakeOutput::default());
    let mut holder = PositionHolder::default();
    let mut seeks = 0;
    loop {
        match extractor.read(&mut input, &mut holder).unwrap() {
            ReadResult::Continue => {}
            ReadResult::Seek => {
                seeks += 1;
                assert!(seeks <= 4, "seek 次数异常");
                input.set_position(holder.position);
            }
            ReadResult::EndOfInput => break,
        }
    }
    (extractor.into_output(), seeks)
}

fn drive_expect_err(data: Vec<u8>) -> LiuError {
    let mut input = MemoryInput::from_data(data);
    let mut extractor = WebmExtractor::new(FakeOutput::default());
    let mut holder = PositionHolder::default();
    loop {
        match extractor.read(&mut input, &mut holder) {
            Ok(ReadResult::Continue) => {}
            Ok(ReadResult::Seek) => input.set_position(holder.position),
            Ok(ReadResult::EndOfInput) => panic!("预期解析失败"),
            Err(e) => return e,
        }
    }
}

// ========================
// 具体流构造
// ========================

/// VP9 视频轨道 (轨道号 1, 1280x720)
fn build_vp9_track_entry() -> Vec<u8> {
    let mut entry = Vec::new();
    write_uint_element(&mut entry, ebml::TRACK_NUMBER, 1);
    write_uint_element(&mut entry, ebml::TRACK_TYPE, 1);
    write_string_element(&mut entry, ebml::CODEC_ID, "V_VP9");
    let mut video = Vec::new();
    write_uint_element(&mut video, ebml::PIXEL_WIDTH, 1280);
    write_uint_element(&mut video, ebml::PIXEL_HEIGHT, 720);
    write_element(&mut entry, ebml::VIDEO_SETTINGS, &video);
    let mut out = Vec::new();
    write_element(&mut out, ebml::TRACK_ENTRY, &entry);
    out
}

/// Opus 音频轨道 (轨道号 2, 48kHz 双声道, 带编解码延迟)
fn build_opus_track_entry() -> Vec<u8> {
    let mut entry = Vec::new();
    write_uint_element(&mut entry, ebml::TRACK_NUMBER, 2);
    write_uint_element(&mut entry, ebml::TRACK_TYPE, 2);
    write_string_element(&mut entry, ebml::CODEC_ID, "A_OPUS");
    write_uint_element(&mut entry, ebml::CODEC_DELAY, 6_500_000);
    write_uint_element(&mut entry, ebml::SEEK_PRE_ROLL, 80_000_000);
    write_element(&mut entry, ebml::CODEC_PRIVATE, b"OpusHead");
    let mut audio = Vec::new();
    write_element(
        &mut audio,
        ebml::SAMPLING_FREQUENCY,
        &48000.0f64.to_bits().to_be_bytes(),
    );
    write_uint_element(&mut audio, ebml::CHANNELS, 2);
    write_element(&mut entry, ebml::AUDIO_SETTINGS, &audio);
    let mut out = Vec::new();
    write_element(&mut out, ebml::TRACK_ENTRY, &entry);
    out
}

#[test]
fn test_vp9_opus_cues_定位循环() {
    let (data, cluster_offset) = build_vp9_opus_stream();
    let (output, seeks) = drive(data);

    // 一次去 Cues, 一次回跳
    assert_eq!(seeks, 2);

    // 轨道格式
    assert_eq!(output.end_tracks_count, 1);
    let video = output.track_by_number(1);
    assert_eq!(video.formats.len(), 1);
    assert_eq!(video.formats[0].mime_type, media_format::VIDEO_VP9);
    assert_eq!(video.formats[0].width, 1280);
    assert_eq!(video.formats[0].height, 720);
    assert_eq!(video.formats[0].duration_us, 10_000_000);

    let audio = output.track_by_number(2);
    assert_eq!(audio.formats[0].mime_type, media_format::AUDIO_OPUS);
    assert_eq!(audio.formats[0].sample_rate, 48000);
    assert_eq!(audio.formats[0].channel_count, 2);
    assert_eq!(audio.formats[0].max_input_size, 5760);
    // Opus 初始化数据: CodecPrivate + 延迟 + preroll (各 8 字节大端)
    let init = &audio.formats[0].initialization_data;
    assert_eq!(init.len(), 3);
    assert_eq!(init[0], b"OpusHead".to_vec());
    assert_eq!(init[1], 6_500_000u64.to_be_bytes().to_vec());
    assert_eq!(init[2], 80_000_000u64.to_be_bytes().to_vec());

    // seek_map 恰好交付一次, 索引指向 Cluster
    assert_eq!(output.seek_maps.len(), 1);
    let index = &output.seek_maps[0];
    assert_eq!(index.len(), 1);
    assert_eq!(index.times_us, vec![0]);
    assert_eq!(index.offsets[0], cluster_offset);
    assert_eq!(index.durations_us, vec![10_000_000]);

    // 采样: 两个视频 + 一个音频, 时间戳与关键帧标志正确
    assert_eq!(video.samples.len(), 2);
    assert_eq!(video.samples[0].time_us, 0);
    assert!(video.samples[0].flags.contains(SampleFlags::SYNC));
    assert_eq!(video.samples[0].data, vec![0xD0; 6]);
    assert_eq!(video.samples[1].time_us, 33_000);
    assert!(!video.samples[1].flags.contains(SampleFlags::SYNC));

    assert_eq!(audio.samples.len(), 1);
    assert_eq!(audio.samples[0].time_us, 0);
    assert!(audio.samples[0].flags.contains(SampleFlags::SYNC));
    assert_eq!(audio.samples[0].data, vec![0xA0; 4]);
}

/// 场景 3 的流: SeekHead → Info → Tracks → Cluster → Cues
///
/// 返回 (文件数据, Cluster 的绝对偏移).
fn build_vp9_opus_stream() -> (Vec<u8>, u64) {
    let header = build_ebml_header("webm");

    let mut info = Vec::new();
    {
        let mut content = Vec::new();
        write_uint_element(&mut content, ebml::TIMECODE_SCALE, 1_000_000);
        write_float_element(&mut content, ebml::DURATION, 10_000.0);
        write_element(&mut info, ebml::SEGMENT_INFO, &content);
    }

    let mut tracks = Vec::new();
    {
        let mut content = build_vp9_track_entry();
        content.extend_from_slice(&build_opus_track_entry());
        write_element(&mut tracks, ebml::TRACKS, &content);
    }

    let mut cluster = Vec::new();
    {
        let mut content = Vec::new();
        write_uint_element(&mut content, ebml::TIME_CODE, 0);
        write_element(
            &mut content,
            ebml::SIMPLE_BLOCK,
            &build_block_content(1, 0, 0x80, &[0xD0; 6]),
        );
        write_element(
            &mut content,
            ebml::SIMPLE_BLOCK,
            &build_block_content(2, 0, 0x80, &[0xA0; 4]),
        );
        write_element(
            &mut content,
            ebml::SIMPLE_BLOCK,
            &build_block_content(1, 33, 0x00, &[0xD1; 5]),
        );
        write_element(&mut cluster, ebml::CLUSTER, &content);
    }

    // SeekHead 的长度影响 Cues 偏移, 迭代到不动点
    let mut cues_position = 0u64;
    let (seek_head, cluster_position) = loop {
        let mut seek_content = Vec::new();
        write_element(&mut seek_content, ebml::SEEK_ID, &ebml::CUES.to_be_bytes());
        write_uint_element(&mut seek_content, ebml::SEEK_POSITION, cues_position);
        let mut seek = Vec::new();
        write_element(&mut seek, ebml::SEEK, &seek_content);
        let mut seek_head = Vec::new();
        write_element(&mut seek_head, ebml::SEEK_HEAD, &seek);

        let next =
            (seek_head.len() + info.len() + tracks.len() + cluster.len()) as u64;
        if next == cues_position {
            let cluster_position = (seek_head.len() + info.len() + tracks.len()) as u64;
            break (seek_head, cluster_position);
        }
        cues_position = next;
    };

    let mut cues = Vec::new();
    {
        let mut positions = Vec::new();
        write_uint_element(&mut positions, ebml::CUE_CLUSTER_POSITION, cluster_position);
        let mut point = Vec::new();
        write_uint_element(&mut point, ebml::CUE_TIME, 0);
        write_element(&mut point, ebml::CUE_TRACK_POSITIONS, &positions);
        let mut content = Vec::new();
        write_element(&mut content, ebml::CUE_POINT, &point);
        write_element(&mut cues, ebml::CUES, &content);
    }

    let mut segment_content = seek_head;
    segment_content.extend_from_slice(&info);
    segment_content.extend_from_slice(&tracks);
    segment_content.extend_from_slice(&cluster);
    segment_content.extend_from_slice(&cues);

    let mut data = header;
    write_element(&mut data, ebml::SEGMENT, &segment_content);

    // Segment 内容区起点 = 文件长度 - 内容长度
    let segment_content_start = (data.len() - segment_content.len()) as u64;
    (data, segment_content_start + cluster_position)
}

#[test]
fn test_blockgroup_referenceblock_决定关键帧() {
    let header = build_ebml_header("matroska");

    // H.264 轨道, NAL 长度字段 2 字节
    let mut tracks = Vec::new();
    {
        let mut entry = Vec::new();
        write_uint_element(&mut entry, ebml::TRACK_NUMBER, 1);
        write_uint_element(&mut entry, ebml::TRACK_TYPE, 1);
        write_string_element(&mut entry, ebml::CODEC_ID, "V_MPEG4/ISO/AVC");
        // avcC: 长度字段 2 字节, 1 个 SPS + 1 个 PPS
        let avcc = [
            0x01, 0x64, 0x00, 0x1F, 0xFD, 0xE1, 0x00, 0x03, 0x67, 0x64, 0x01, 0x01, 0x00, 0x01,
            0x68,
        ];
        write_element(&mut entry, ebml::CODEC_PRIVATE, &avcc);
        let mut content = Vec::new();
        write_element(&mut content, ebml::TRACK_ENTRY, &entry);
        write_element(&mut tracks, ebml::TRACKS, &content);
    }

    // NAL 负载: 两个 2 字节长度前缀的 NAL 单元
    let nal_payload = [0x00, 0x03, 0x65, 0xAA, 0xBB, 0x00, 0x01, 0x41];

    let mut cluster = Vec::new();
    {
        let mut content = Vec::new();
        write_uint_element(&mut content, ebml::TIME_CODE, 0);
        // BlockGroup 1: 无 ReferenceBlock → 关键帧
        {
            let mut group = Vec::new();
            write_element(
                &mut group,
                ebml::BLOCK,
                &build_block_content(1, 0, 0x00, &nal_payload),
            );
            write_element(&mut content, ebml::BLOCK_GROUP, &group);
        }
        // BlockGroup 2: 有 ReferenceBlock → 非关键帧
        {
            let mut group = Vec::new();
            write_element(
                &mut group,
                ebml::BLOCK,
                &build_block_content(1, 40, 0x00, &nal_payload),
            );
            write_uint_element(&mut group, ebml::REFERENCE_BLOCK, 0);
            write_element(&mut content, ebml::BLOCK_GROUP, &group);
        }
        write_element(&mut cluster, ebml::CLUSTER, &content);
    }

    let mut segment_content = tracks;
    segment_content.extend_from_slice(&cluster);
    let mut data = header;
    write_element(&mut data, ebml::SEGMENT, &segment_content);

    let (output, seeks) = drive(data);
    assert_eq!(seeks, 0);

    let video = output.track_by_number(1);
    // 初始化数据: 起始码前缀的 SPS 与 PPS
    assert_eq!(
        video.formats[0].initialization_data,
        vec![
            vec![0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x01],
            vec![0x00, 0x00, 0x00, 0x01, 0x68],
        ]
    );

    assert_eq!(video.samples.len(), 2);
    // 长度前缀已改写为起始码
    let expected = vec![
        0x00, 0x00, 0x00, 0x01, 0x65, 0xAA, 0xBB, 0x00, 0x00, 0x00, 0x01, 0x41,
    ];
    assert_eq!(video.samples[0].data, expected);
    assert!(video.samples[0].flags.contains(SampleFlags::SYNC));
    assert_eq!(video.samples[0].time_us, 0);

    assert_eq!(video.samples[1].data, expected);
    assert!(!video.samples[1].flags.contains(SampleFlags::SYNC));
    assert_eq!(video.samples[1].time_us, 40_000);
}

/// 带加密的 VP9 轨道流
fn build_encrypted_stream(signal_byte: u8, payload: &[u8]) -> Vec<u8> {
    let header = build_ebml_header("webm");
    let key_id = [0x5A; 16];

    let mut tracks = Vec::new();
    {
        let mut entry = Vec::new();
        write_uint_element(&mut entry, ebml::TRACK_NUMBER, 1);
        write_uint_element(&mut entry, ebml::TRACK_TYPE, 1);
        write_string_element(&mut entry, ebml::CODEC_ID, "V_VP9");

        let mut encryption = Vec::new();
        write_uint_element(&mut encryption, ebml::CONTENT_ENCRYPTION_ALGORITHM, 5);
        write_element(&mut encryption, ebml::CONTENT_ENCRYPTION_KEY_ID, &key_id);
        let mut aes = Vec::new();
        write_uint_element(&mut aes, ebml::AES_SETTINGS_CIPHER_MODE, 1);
        write_element(&mut encryption, ebml::CONTENT_ENCRYPTION_AES_SETTINGS, &aes);

        let mut encoding = Vec::new();
        write_uint_element(&mut encoding, ebml::CONTENT_ENCODING_ORDER, 0);
        write_uint_element(&mut encoding, ebml::CONTENT_ENCODING_SCOPE, 1);
        write_uint_element(&mut encoding, ebml::CONTENT_ENCODING_TYPE, 1);
        write_element(&mut encoding, ebml::CONTENT_ENCRYPTION, &encryption);

        let mut encodings = Vec::new();
        write_element(&mut encodings, ebml::CONTENT_ENCODING, &encoding);
        write_element(&mut entry, ebml::CONTENT_ENCODINGS, &encodings);

        let mut content = Vec::new();
        write_element(&mut content, ebml::TRACK_ENTRY, &entry);
        write_element(&mut tracks, ebml::TRACKS, &content);
    }

    let mut block_payload = vec![signal_byte];
    block_payload.extend_from_slice(payload);

    let mut cluster = Vec::new();
    {
        let mut content = Vec::new();
        write_uint_element(&mut content, ebml::TIME_CODE, 0);
        write_element(
            &mut content,
            ebml::SIMPLE_BLOCK,
            &build_block_content(1, 0, 0x80, &block_payload),
        );
        write_element(&mut cluster, ebml::CLUSTER, &content);
    }

    let mut segment_content = tracks;
    segment_content.extend_from_slice(&cluster);
    let mut data = header;
    write_element(&mut data, ebml::SEGMENT, &segment_content);
    data
}

#[test]
fn test_加密采样_信号字节改写为_iv_大小() {
    // 负载: 8 字节 IV + 密文
    let mut payload = vec![0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17];
    payload.extend_from_slice(&[0xEE; 5]);
    let (output, _) = drive(build_encrypted_stream(0x01, &payload));

    assert_eq!(
        output.drm_init,
        vec![(media_format::VIDEO_WEBM.to_string(), vec![0x5A; 16])]
    );

    let video = output.track_by_number(1);
    assert_eq!(video.samples.len(), 1);
    let sample = &video.samples[0];
    assert!(sample.flags.contains(SampleFlags::ENCRYPTED));
    assert_eq!(sample.encryption_key_id, Some(vec![0x5A; 16]));
    // 信号字节被改写为 IV 大小 (8), 其余负载原样转发
    let mut expected = vec![0x08];
    expected.extend_from_slice(&payload);
    assert_eq!(sample.data, expected);
}

#[test]
fn test_未加密采样_信号字节被丢弃() {
    let payload = [0xDD; 6];
    let (output, _) = drive(build_encrypted_stream(0x00, &payload));

    let video = output.track_by_number(1);
    let sample = &video.samples[0];
    assert!(!sample.flags.contains(SampleFlags::ENCRYPTED));
    assert_eq!(sample.data, payload.to_vec());
}

#[test]
fn test_信号字节扩展位非法() {
    let err = drive_expect_err(build_encrypted_stream(0x80, &[0x00; 4]));
    assert!(matches!(err, LiuError::InvalidData(_)));
}

/// Vorbis 轨道流, 带给定的 CodecPrivate 与一个采样
fn build_vorbis_stream(codec_private: &[u8]) -> Vec<u8> {
    let header = build_ebml_header("webm");
    let mut tracks = Vec::new();
    {
        let mut entry = Vec::new();
        write_uint_element(&mut entry, ebml::TRACK_NUMBER, 1);
        write_uint_element(&mut entry, ebml::TRACK_TYPE, 2);
        write_string_element(&mut entry, ebml::CODEC_ID, "A_VORBIS");
        write_element(&mut entry, ebml::CODEC_PRIVATE, codec_private);
        let mut audio = Vec::new();
        write_element(
            &mut audio,
            ebml::SAMPLING_FREQUENCY,
            &44100.0f64.to_bits().to_be_bytes(),
        );
        write_uint_element(&mut audio, ebml::CHANNELS, 2);
        write_element(&mut entry, ebml::AUDIO_SETTINGS, &audio);
        let mut content = Vec::new();
        write_element(&mut content, ebml::TRACK_ENTRY, &entry);
        write_element(&mut tracks, ebml::TRACKS, &content);
    }

    let mut cluster = Vec::new();
    {
        let mut content = Vec::new();
        write_uint_element(&mut content, ebml::TIME_CODE, 0);
        write_element(
            &mut content,
            ebml::SIMPLE_BLOCK,
            &build_block_content(1, 0, 0x80, &[0xAB; 10]),
        );
        write_element(&mut cluster, ebml::CLUSTER, &content);
    }

    let mut segment_content = tracks;
    segment_content.extend_from_slice(&cluster);
    let mut data = header;
    write_element(&mut data, ebml::SEGMENT, &segment_content);
    data
}

/// 构造 Vorbis CodecPrivate: 识别头 30 字节, 注释头 comment_len 字节
fn build_vorbis_codec_private(info_len: usize, comment_len: usize, books_len: usize) -> Vec<u8> {
    let mut data = vec![0x02];
    let push_len = |mut n: usize, data: &mut Vec<u8>| {
        while n >= 0xFF {
            data.push(0xFF);
            n -= 0xFF;
        }
        data.push(n as u8);
    };
    push_len(info_len, &mut data);
    push_len(comment_len, &mut data);
    let mut info = vec![0x01];
    info.resize(info_len, 0x11);
    data.extend_from_slice(&info);
    let mut comment = vec![0x03];
    comment.resize(comment_len, 0x22);
    data.extend_from_slice(&comment);
    let mut books = vec![0x05];
    books.resize(books_len, 0x33);
    data.extend_from_slice(&books);
    data
}

#[test]
fn test_vorbis_初始化数据与采样后缀() {
    let codec_private = build_vorbis_codec_private(30, 3749, 120);
    let (output, _) = drive(build_vorbis_stream(&codec_private));

    let audio = output.track_by_number(1);
    let init = &audio.formats[0].initialization_data;
    assert_eq!(init.len(), 2);
    assert_eq!(init[0].len(), 30);
    // setup 头长度 = 总长 - 1 - 长度字段 - 识别头 - 注释头
    let varint_bytes = 1 + (1 + 3749 / 0xFF);
    assert_eq!(
        init[1].len(),
        codec_private.len() - 1 - varint_bytes - 30 - 3749
    );
    assert_eq!(audio.formats[0].max_input_size, 8192);

    // 采样尾部追加 4 字节 -1 ("页内采样数")
    let sample = &audio.samples[0];
    assert_eq!(sample.data.len(), 14);
    assert_eq!(&sample.data[..10], &[0xAB; 10]);
    assert_eq!(&sample.data[10..], &[0xFF, 0xFF, 0xFF, 0xFF]);
}

/// Opus 轨道 + 指定 lacing 的 SimpleBlock
fn build_lacing_stream(block_content: &[u8]) -> Vec<u8> {
    let header = build_ebml_header("webm");
    let mut tracks = Vec::new();
    {
        let mut entry = Vec::new();
        write_uint_element(&mut entry, ebml::TRACK_NUMBER, 2);
        write_uint_element(&mut entry, ebml::TRACK_TYPE, 2);
        write_string_element(&mut entry, ebml::CODEC_ID, "A_OPUS");
        // 每采样 20ms
        write_uint_element(&mut entry, ebml::DEFAULT_DURATION, 20_000_000);
        let mut content = Vec::new();
        write_element(&mut content, ebml::TRACK_ENTRY, &entry);
        write_element(&mut tracks, ebml::TRACKS, &content);
    }

    let mut cluster = Vec::new();
    {
        let mut content = Vec::new();
        write_uint_element(&mut content, ebml::TIME_CODE, 100);
        write_element(&mut content, ebml::SIMPLE_BLOCK, block_content);
        write_element(&mut cluster, ebml::CLUSTER, &content);
    }

    let mut segment_content = tracks;
    segment_content.extend_from_slice(&cluster);
    let mut data = header;
    write_element(&mut data, ebml::SEGMENT, &segment_content);
    data
}

#[test]
fn test_xiph_lacing() {
    // 3 个采样: 300 / 20 / 10 字节
    let mut block = vec![0x82, 0x00, 0x00, 0x80 | 0x02]; // 轨道 2, ts=0, 关键帧 + Xiph lacing
    block.push(2); // 采样数 - 1
    block.extend_from_slice(&[0xFF, 0x2D]); // 300 = 255 + 45
    block.push(20);
    block.extend_from_slice(&vec![0x01; 300]);
    block.extend_from_slice(&vec![0x02; 20]);
    block.extend_from_slice(&vec![0x03; 10]);

    let (output, _) = drive(build_lacing_stream(&block));
    let audio = output.track_by_number(2);
    assert_eq!(audio.samples.len(), 3);
    assert_eq!(audio.samples[0].data, vec![0x01; 300]);
    assert_eq!(audio.samples[1].data, vec![0x02; 20]);
    assert_eq!(audio.samples[2].data, vec![0x03; 10]);
    // 簇时间 100ms + 每采样 20ms
    assert_eq!(audio.samples[0].time_us, 100_000);
    assert_eq!(audio.samples[1].time_us, 120_000);
    assert_eq!(audio.samples[2].time_us, 140_000);
}

#[test]
fn test_fixed_size_lacing() {
    // 3 个等大采样, 各 8 字节
    let mut block = vec![0x82, 0x00, 0x00, 0x80 | 0x04]; // 固定大小 lacing
    block.push(2);
    block.extend_from_slice(&vec![0x0A; 24]);

    let (output, _) = drive(build_lacing_stream(&block));
    let audio = output.track_by_number(2);
    assert_eq!(audio.samples.len(), 3);
    for sample in &audio.samples {
        assert_eq!(sample.data, vec![0x0A; 8]);
    }
}

#[test]
fn test_ebml_lacing() {
    // 3 个采样: 800 / 400 / 30 字节
    let mut block = vec![0x82, 0x00, 0x00, 0x80 | 0x06]; // EBML lacing
    block.push(2);
    // 首个大小: 800 (2 字节变长整数)
    block.extend_from_slice(&[0x43, 0x20]);
    // 第二个: 相对偏移 -400 → 存储值 -400 + 8191 = 7791
    block.extend_from_slice(&[0x40 | 0x1E, 0x6F]);
    block.extend_from_slice(&vec![0x01; 800]);
    block.extend_from_slice(&vec![0x02; 400]);
    block.extend_from_slice(&vec![0x03; 30]);

    let (output, _) = drive(build_lacing_stream(&block));
    let audio = output.track_by_number(2);
    assert_eq!(audio.samples.len(), 3);
    assert_eq!(audio.samples[0].data.len(), 800);
    assert_eq!(audio.samples[1].data.len(), 400);
    assert_eq!(audio.samples[2].data.len(), 30);
}

#[test]
fn test_block_不允许_lacing() {
    let header = build_ebml_header("matroska");
    let mut tracks = Vec::new();
    {
        let mut entry = Vec::new();
        write_uint_element(&mut entry, ebml::TRACK_NUMBER, 1);
        write_uint_element(&mut entry, ebml::TRACK_TYPE, 2);
        write_string_element(&mut entry, ebml::CODEC_ID, "A_OPUS");
        let mut content = Vec::new();
        write_element(&mut content, ebml::TRACK_ENTRY, &entry);
        write_element(&mut tracks, ebml::TRACKS, &content);
    }
    let mut cluster = Vec::new();
    {
        let mut content = Vec::new();
        write_uint_element(&mut content, ebml::TIME_CODE, 0);
        // Block 带 Xiph lacing → 失败
        let mut block = vec![0x81, 0x00, 0x00, 0x02, 0x01, 0x05];
        block.extend_from_slice(&[0x00; 12]);
        let mut group = Vec::new();
        write_element(&mut group, ebml::BLOCK, &block);
        write_element(&mut content, ebml::BLOCK_GROUP, &group);
        write_element(&mut cluster, ebml::CLUSTER, &content);
    }
    let mut segment_content = tracks;
    segment_content.extend_from_slice(&cluster);
    let mut data = header;
    write_element(&mut data, ebml::SEGMENT, &segment_content);

    assert!(matches!(drive_expect_err(data), LiuError::Unsupported(_)));
}

#[test]
fn test_doc_type_不支持() {
    let data = build_ebml_header("avi");
    assert!(matches!(drive_expect_err(data), LiuError::Unsupported(_)));
}

#[test]
fn test_ebml_read_version_不支持() {
    let mut content = Vec::new();
    write_uint_element(&mut content, ebml::EBML_READ_VERSION, 2);
    let mut data = Vec::new();
    write_element(&mut data, ebml::EBML_HEADER, &content);
    assert!(matches!(drive_expect_err(data), LiuError::Unsupported(_)));
}

#[test]
fn test_多个_segment_被拒绝() {
    let mut data = build_ebml_header("webm");
    write_element(&mut data, ebml::SEGMENT, &[]);
    write_element(&mut data, ebml::SEGMENT, &[]);
    assert!(matches!(drive_expect_err(data), LiuError::Unsupported(_)));
}

#[test]
fn test_重复的音频轨道只保留第一条() {
    let header = build_ebml_header("webm");
    let mut tracks = Vec::new();
    {
        let mut content = build_opus_track_entry();
        // 第二条音频轨道 (轨道号 3), 应被忽略
        let mut entry = Vec::new();
        write_uint_element(&mut entry, ebml::TRACK_NUMBER, 3);
        write_uint_element(&mut entry, ebml::TRACK_TYPE, 2);
        write_string_element(&mut entry, ebml::CODEC_ID, "A_OPUS");
        write_element(&mut content, ebml::TRACK_ENTRY, &entry);
        write_element(&mut tracks, ebml::TRACKS, &content);
    }
    let mut segment_content = tracks;
    let mut cluster = Vec::new();
    {
        let mut content = Vec::new();
        write_uint_element(&mut content, ebml::TIME_CODE, 0);
        // 轨道 3 的块被静默跳过
        write_element(
            &mut content,
            ebml::SIMPLE_BLOCK,
            &build_block_content(3, 0, 0x80, &[0x33; 4]),
        );
        write_element(
            &mut content,
            ebml::SIMPLE_BLOCK,
            &build_block_content(2, 0, 0x80, &[0x22; 4]),
        );
        write_element(&mut cluster, ebml::CLUSTER, &content);
    }
    segment_content.extend_from_slice(&cluster);
    let mut data = header;
    write_element(&mut data, ebml::SEGMENT, &segment_content);

    let (output, _) = drive(data);
    assert_eq!(output.track_by_number(2).samples.len(), 1);
    assert_eq!(output.track_by_number(2).samples[0].data, vec![0x22; 4]);
    assert!(output.tracks.iter().all(|t| t.number != 3));
}
