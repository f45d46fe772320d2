//! 时间戳换算.
//!
//! MPEG-TS 的 PTS 使用 90kHz 时钟, Matroska 的时间刻度以纳秒为基准,
//! 两条流水线统一换算为微秒对外输出.

/// 表示"未知时间"的哨兵值 (微秒)
pub const UNKNOWN_TIME_US: i64 = -1;

/// 每秒微秒数
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// 90kHz PTS → 微秒
///
/// `time_us = pts * 10^6 / 90000`. 33 位 PTS 乘以 10^6 仍在 i64 范围内.
pub const fn pts_to_us(pts: i64) -> i64 {
    pts * MICROS_PER_SECOND / 90_000
}

/// 纳秒 → 微秒
pub const fn ns_to_us(ns: i64) -> i64 {
    ns / 1_000
}
