//! 提取器输出抽象 (WebM 流水线).
//!
//! 提取器通过这组能力接口向下游交付轨道格式、采样数据与 seek 索引.
//! 提取器只记录轨道号, 每次通过 [`ExtractorOutput::track`] 借用对应的
//! 轨道输出, 不持有其所有权.

use liu_core::LiuResult;

use crate::chunk_index::ChunkIndex;
use crate::input::ExtractorInput;
use crate::media_format::MediaFormat;
use crate::sample::SampleFlags;

/// 提取器输出
pub trait ExtractorOutput {
    /// 为指定轨道号分配 (或取回) 轨道输出
    fn track(&mut self, track_number: i32) -> &mut dyn TrackOutput;

    /// 轨道集合已确定, 不会再有新轨道
    fn end_tracks(&mut self);

    /// 交付 seek 索引
    fn seek_map(&mut self, chunk_index: ChunkIndex);

    /// 交付 DRM 初始化数据 (每条流至多一次)
    fn drm_init_data(&mut self, scheme_mime_type: &str, key_id: &[u8]);
}

/// 单轨道输出
pub trait TrackOutput {
    /// 交付轨道媒体格式
    fn format(&mut self, format: MediaFormat);

    /// 写入一段采样数据 (来自解析器自有缓冲)
    fn sample_data(&mut self, data: &[u8]);

    /// 从输入流直接写入至多 `length` 字节的采样数据, 返回实际写入量
    fn sample_data_from_input(
        &mut self,
        input: &mut dyn ExtractorInput,
        length: usize,
    ) -> LiuResult<usize>;

    /// 提交一个完整采样的元信息
    ///
    /// 此前通过 `sample_data*` 写入的 `size` 字节 (回退 `offset` 字节)
    /// 构成该采样的负载.
    fn sample_metadata(
        &mut self,
        time_us: i64,
        flags: SampleFlags,
        size: usize,
        offset: usize,
        encryption_key_id: Option<&[u8]>,
    );
}
