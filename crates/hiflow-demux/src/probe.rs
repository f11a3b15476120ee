//! 格式探测.
//!
//! 每个格式提供一个探测函数, 读取数据源开头的一小段数据并匹配特征字节,
//! 返回 0 ~ 100 的置信度. 探测使用一次性的读取器, 不触碰任何插件实例的状态.

use hiflow_core::{HiError, HiResult};

use crate::data_source::SharedSource;
use crate::reader::{ReaderConfig, RetryingReader};
use crate::registry::STREAM_PROBE_SIZE;

/// 探测置信度
pub type ProbeScore = u32;

/// 不匹配
pub const SCORE_NONE: ProbeScore = 0;

/// 特征完全匹配
pub const SCORE_MAX: ProbeScore = 100;

/// 读取 `[offset, offset + len)` 的数据
///
/// 数据源较短时返回的数据可能不足 `len`. 不可寻址数据源从头顺序读取,
/// 会消耗流中的数据, 且 `offset + len` 不得超过 [`STREAM_PROBE_SIZE`].
pub fn read_prefix(
    source: &SharedSource,
    offset: u64,
    len: usize,
    config: ReaderConfig,
) -> HiResult<Vec<u8>> {
    let skip = usize::try_from(offset)
        .map_err(|_| HiError::InvalidParameter(format!("探测偏移过大: {}", offset)))?;
    let seekable = source.seekable().is_seekable();
    let capacity = if seekable {
        len
    } else {
        match skip.checked_add(len) {
            Some(total) if total <= STREAM_PROBE_SIZE => total,
            _ => {
                return Err(HiError::InvalidParameter(format!(
                    "顺序流探测区间过大: offset={}, len={}",
                    offset, len
                )));
            }
        }
    };
    let mut reader = RetryingReader::new(capacity, config);
    reader.set_source(source.clone());
    if seekable && offset > 0 {
        reader.reset_to(offset);
    }
    match reader.ensure(capacity) {
        Ok(_) => {}
        Err(HiError::NotEnoughData) if reader.remain() > 0 => {
            log::debug!("探测只读到 {} 字节", reader.remain());
        }
        Err(e) => return Err(e),
    }
    let data = reader.data();
    let start = if seekable { 0 } else { skip.min(data.len()) };
    Ok(data[start..].to_vec())
}

/// 读取前缀并用 `matcher` 判断, 命中返回 [`SCORE_MAX`]
///
/// 读取失败按不匹配处理.
pub fn sniff_prefix(
    name: &str,
    source: &SharedSource,
    offset: u64,
    len: usize,
    config: ReaderConfig,
    matcher: impl FnOnce(&[u8]) -> bool,
) -> ProbeScore {
    match read_prefix(source, offset, len, config) {
        Ok(data) if matcher(&data) => SCORE_MAX,
        Ok(_) => SCORE_NONE,
        Err(e) => {
            log::debug!("{}: 探测读取失败: {}", name, e);
            SCORE_NONE
        }
    }
}
