//! 时间单位与换算.
//!
//! 插件对外的时间统一使用 HST 纳秒 (`i64`), 内部按格式自身的单位计算,
//! 在边界处通过本模块转换.

/// 1 微秒对应的 HST 刻度
pub const HST_USECOND: i64 = 1_000;
/// 1 毫秒对应的 HST 刻度
pub const HST_MSECOND: i64 = 1_000_000;
/// 1 秒对应的 HST 刻度
pub const HST_SECOND: i64 = 1_000_000_000;

/// 表示"未定义"的时间值
pub const HST_TIME_NONE: i64 = i64::MIN;

/// 毫秒转 HST
pub const fn ms_to_hst(ms: i64) -> i64 {
    ms.saturating_mul(HST_MSECOND)
}

/// HST 转毫秒 (向零取整)
pub const fn hst_to_ms(hst: i64) -> i64 {
    hst / HST_MSECOND
}

/// HST 转秒 (向零取整)
pub const fn hst_to_seconds(hst: i64) -> i64 {
    hst / HST_SECOND
}

/// 按采样数计算 HST 时长
///
/// 通过 i128 中间值避免溢出, `sample_rate` 为 0 时返回 0.
pub fn samples_to_hst(samples: u64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    let v = i128::from(samples) * i128::from(HST_SECOND) / i128::from(sample_rate);
    v.min(i128::from(i64::MAX)) as i64
}

/// 按字节数和码率 (bit/s) 计算 HST 时长
pub fn bytes_to_hst(bytes: u64, bit_rate: u64) -> i64 {
    if bit_rate == 0 {
        return 0;
    }
    let v = i128::from(bytes) * 8 * i128::from(HST_SECOND) / i128::from(bit_rate);
    v.min(i128::from(i64::MAX)) as i64
}
