//! 带退避重试的数据读取器.
//!
//! 所有格式插件共用同一个读取器: 从 [`DataSource`] 拉取数据填入 [`IngestBuffer`],
//! 数据源暂时返回 0 字节时按 [`ReaderConfig`] 休眠重试.
//!
//! 对可寻址数据源, 缓冲区中的数据对应文件区间 `[offset - remain, offset)`.
//! 不可寻址数据源的偏移只作记录, 读取总是从 0 发起.

use std::thread;
use std::time::Duration;

use hiflow_core::{HiError, HiResult, Seekable};

use crate::data_source::SharedSource;
use crate::ingest::IngestBuffer;

/// 默认重试次数
pub const DEFAULT_RETRY_TIMES: u32 = 200;

/// 默认重试间隔
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(30);

/// 读取器配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderConfig {
    /// 连续读到 0 字节时的最大尝试次数 (含首次)
    pub retry_times: u32,
    /// 两次尝试之间的休眠时长
    pub retry_interval: Duration,
}

impl ReaderConfig {
    /// 只尝试一次, 不休眠
    pub const fn no_retry() -> Self {
        Self {
            retry_times: 1,
            retry_interval: Duration::ZERO,
        }
    }

    /// 单次调用最长阻塞时间
    pub fn max_block(&self) -> Duration {
        self.retry_interval
            .saturating_mul(self.retry_times.saturating_sub(1))
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            retry_times: DEFAULT_RETRY_TIMES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// I/O 上下文
#[derive(Default)]
struct IoContext {
    source: Option<SharedSource>,
    /// 下一次读取的文件偏移
    offset: u64,
    eos: bool,
}

/// 带退避重试的读取器
pub struct RetryingReader {
    io: IoContext,
    buffer: IngestBuffer,
    file_size: u64,
    seekable: Seekable,
    config: ReaderConfig,
}

impl RetryingReader {
    /// 创建读取器, `capacity` 为暂存缓冲区容量
    pub fn new(capacity: usize, config: ReaderConfig) -> Self {
        Self {
            io: IoContext::default(),
            buffer: IngestBuffer::new(capacity),
            file_size: 0,
            seekable: Seekable::Invalid,
            config,
        }
    }

    /// 绑定数据源, 记录文件大小与可寻址性, 清空已缓冲数据
    pub fn set_source(&mut self, source: SharedSource) {
        let seekable = source.seekable();
        let file_size = match source.size() {
            Ok(size) => size,
            Err(e) => {
                log::debug!("数据源大小未知: {}", e);
                0
            }
        };
        log::debug!("绑定数据源: size={}, seekable={:?}", file_size, seekable);
        self.io = IoContext {
            source: Some(source),
            offset: 0,
            eos: false,
        };
        self.file_size = file_size;
        self.seekable = seekable;
        self.buffer.clear();
    }

    /// 解除数据源并清空状态
    pub fn clear_source(&mut self) {
        self.io = IoContext::default();
        self.file_size = 0;
        self.seekable = Seekable::Invalid;
        self.buffer.clear();
    }

    /// 是否已绑定数据源
    pub fn has_source(&self) -> bool {
        self.io.source.is_some()
    }

    /// 当前数据源
    pub fn source(&self) -> Option<&SharedSource> {
        self.io.source.as_ref()
    }

    /// 读取器配置
    pub fn config(&self) -> ReaderConfig {
        self.config
    }

    /// 更新读取器配置
    pub fn set_config(&mut self, config: ReaderConfig) {
        self.config = config;
    }

    /// 文件大小 (未知为 0)
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// 可寻址性
    pub fn seekable(&self) -> Seekable {
        self.seekable
    }

    /// 是否可随机读取
    pub fn is_seekable(&self) -> bool {
        self.seekable.is_seekable()
    }

    /// 下一次读取的文件偏移
    pub fn offset(&self) -> u64 {
        self.io.offset
    }

    /// 缓冲区首字节对应的文件位置 (仅对可寻址数据源有意义)
    pub fn buffered_position(&self) -> u64 {
        self.io.offset.saturating_sub(self.buffer.remain() as u64)
    }

    /// 是否已遇到流结束
    pub fn is_eos(&self) -> bool {
        self.io.eos
    }

    /// 数据源是否已无更多数据可读
    pub fn source_exhausted(&self) -> bool {
        self.io.eos || (self.is_seekable() && self.io.offset >= self.file_size)
    }

    /// 未消费的数据
    pub fn data(&self) -> &[u8] {
        self.buffer.data()
    }

    /// 未消费的字节数
    pub fn remain(&self) -> usize {
        self.buffer.remain()
    }

    /// 缓冲区容量
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    /// 消费 `n` 字节
    pub fn consume(&mut self, n: usize) {
        self.buffer.consume(n);
    }

    /// 丢弃缓冲区并移动到 `offset`
    ///
    /// 可寻址数据源的偏移被限制在文件大小以内.
    pub fn reset_to(&mut self, offset: u64) {
        self.buffer.clear();
        self.io.offset = if self.is_seekable() {
            offset.min(self.file_size)
        } else {
            offset
        };
        self.io.eos = false;
    }

    /// 从数据源读取至多 `read_size` 字节追加到缓冲区
    ///
    /// 读到 0 字节且缓冲区为空时, 按配置休眠重试; 尝试次数用尽返回
    /// [`HiError::NotEnoughData`]. 数据源返回的其他错误立即向上传递.
    pub fn do_read_from_source(&mut self, read_size: usize) -> HiResult<()> {
        if read_size == 0 {
            return Ok(());
        }
        let source = self
            .io
            .source
            .clone()
            .ok_or_else(|| HiError::InvalidParameter("未设置数据源".into()))?;
        let read_size = read_size.min(self.buffer.free_space());
        if read_size == 0 {
            return Ok(());
        }
        let read_offset = if self.is_seekable() { self.io.offset } else { 0 };
        let attempts = self.config.retry_times.max(1);

        for attempt in 1..=attempts {
            let n = source.read_at(read_offset, &mut self.buffer.spare_mut()[..read_size])?;
            if n > 0 {
                self.buffer.commit(n)?;
                self.io.offset += n as u64;
                if attempt > 1 {
                    log::debug!("第 {} 次尝试读到 {} 字节", attempt, n);
                }
                return Ok(());
            }
            if self.buffer.remain() > 0 {
                return Ok(());
            }
            if attempt < attempts {
                thread::sleep(self.config.retry_interval);
            }
        }
        log::warn!(
            "数据源连续 {} 次返回 0 字节, offset={}",
            attempts,
            self.io.offset
        );
        Err(HiError::NotEnoughData)
    }

    /// 压缩缓冲区并尽量填满
    ///
    /// 可寻址数据源读到文件末尾且缓冲区为空时返回 [`HiError::EndOfStream`].
    /// 数据源报告流结束但缓冲区仍有数据时返回 `Ok`, 由调用方消费剩余数据.
    pub fn get_data_from_source(&mut self) -> HiResult<()> {
        self.buffer.compact()?;
        let remain = self.buffer.remain();
        if self.is_seekable() && self.io.offset >= self.file_size && remain == 0 {
            self.io.eos = true;
            return Err(HiError::EndOfStream);
        }
        let mut needed = self.buffer.free_space();
        if self.is_seekable() {
            let left = self.file_size - self.io.offset.min(self.file_size);
            needed = needed.min(usize::try_from(left).unwrap_or(usize::MAX));
        }
        match self.do_read_from_source(needed) {
            Err(HiError::EndOfStream) => {
                self.io.eos = true;
                if self.buffer.remain() > 0 {
                    Ok(())
                } else {
                    Err(HiError::EndOfStream)
                }
            }
            other => other,
        }
    }

    /// 保证缓冲区至少有 `n` 字节未消费数据
    ///
    /// 返回 `Ok(false)` 表示数据源在凑够之前已结束. `n` 超过容量时按容量计算.
    /// 缓冲区非空但数据源持续不给数据时, 也按重试配置休眠, 用尽后返回
    /// [`HiError::NotEnoughData`].
    pub fn ensure(&mut self, n: usize) -> HiResult<bool> {
        let target = n.min(self.capacity());
        let mut stalls = 0u32;
        while self.remain() < target {
            if self.source_exhausted() {
                return Ok(false);
            }
            let before = self.remain();
            match self.get_data_from_source() {
                Ok(()) => {}
                Err(HiError::EndOfStream) => return Ok(false),
                Err(e) => return Err(e),
            }
            if self.remain() > before {
                stalls = 0;
                continue;
            }
            if self.source_exhausted() {
                return Ok(false);
            }
            stalls += 1;
            if stalls >= self.config.retry_times.max(1) {
                return Err(HiError::NotEnoughData);
            }
            thread::sleep(self.config.retry_interval);
        }
        Ok(true)
    }

    /// 读取文件区间 `[pos, pos + out.len())`
    ///
    /// 区间落在已缓冲数据内时直接复制, 否则丢弃缓冲区、移动偏移后重新拉取.
    /// 只支持可寻址数据源.
    pub fn read_window(&mut self, pos: u64, out: &mut [u8]) -> HiResult<()> {
        if !self.is_seekable() {
            return Err(HiError::Unimplemented("不可寻址数据源不支持区间读取".into()));
        }
        let end = pos
            .checked_add(out.len() as u64)
            .ok_or_else(|| HiError::InvalidParameter("读取区间溢出".into()))?;
        if end > self.file_size {
            return Err(HiError::EndOfStream);
        }
        let mut done = 0usize;
        while done < out.len() {
            let want = pos + done as u64;
            let buf_start = self.buffered_position();
            if want >= buf_start && want < self.io.offset {
                let skip = (want - buf_start) as usize;
                let avail = &self.buffer.data()[skip..];
                let n = avail.len().min(out.len() - done);
                out[done..done + n].copy_from_slice(&avail[..n]);
                done += n;
                continue;
            }
            log::trace!("区间读取重定位: {} -> {}", self.io.offset, want);
            self.reset_to(want);
            self.get_data_from_source()?;
            if self.remain() == 0 {
                return Err(HiError::NotEnoughData);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::data_source::{DataSource, MemorySource, StreamSource};

    /// 前 `zeros` 次返回 0 字节, 之后从内存读取
    struct LaggySource {
        inner: MemorySource,
        zeros: u32,
        calls: AtomicU32,
    }

    impl DataSource for LaggySource {
        fn read_at(&self, offset: u64, buf: &mut [u8]) -> HiResult<usize> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.zeros {
                return Ok(0);
            }
            self.inner.read_at(offset, buf)
        }

        fn size(&self) -> HiResult<u64> {
            self.inner.size()
        }

        fn seekable(&self) -> Seekable {
            Seekable::Seekable
        }
    }

    struct BrokenSource;

    impl DataSource for BrokenSource {
        fn read_at(&self, _offset: u64, _buf: &mut [u8]) -> HiResult<usize> {
            Err(HiError::Io(std::io::Error::other("断开")))
        }

        fn size(&self) -> HiResult<u64> {
            Ok(100)
        }

        fn seekable(&self) -> Seekable {
            Seekable::Seekable
        }
    }

    fn fast_config() -> ReaderConfig {
        ReaderConfig {
            retry_times: 200,
            retry_interval: Duration::from_micros(10),
        }
    }

    fn laggy(zeros: u32, len: usize) -> Arc<LaggySource> {
        Arc::new(LaggySource {
            inner: MemorySource::new((0..len).map(|i| i as u8).collect::<Vec<_>>()),
            zeros,
            calls: AtomicU32::new(0),
        })
    }

    #[test]
    fn test_零长度读取为空操作() {
        let mut reader = RetryingReader::new(16, fast_config());
        reader.do_read_from_source(0).unwrap();
        assert_eq!(reader.remain(), 0);
    }

    #[test]
    fn test_未设置数据源() {
        let mut reader = RetryingReader::new(16, fast_config());
        let err = reader.do_read_from_source(4).unwrap_err();
        assert!(matches!(err, HiError::InvalidParameter(_)));
    }

    #[test]
    fn test_重试边界_第200次成功() {
        let src = laggy(199, 64);
        let mut reader = RetryingReader::new(32, fast_config());
        reader.set_source(src.clone());
        reader.do_read_from_source(16).unwrap();
        assert_eq!(reader.remain(), 16);
        assert_eq!(reader.offset(), 16);
        assert_eq!(src.calls.load(Ordering::SeqCst), 200);
    }

    #[test]
    fn test_重试耗尽() {
        let src = laggy(200, 64);
        let mut reader = RetryingReader::new(32, fast_config());
        reader.set_source(src.clone());
        let err = reader.do_read_from_source(16).unwrap_err();
        assert!(matches!(err, HiError::NotEnoughData));
        assert_eq!(src.calls.load(Ordering::SeqCst), 200);
        assert_eq!(reader.remain(), 0);
    }

    #[test]
    fn test_缓冲区非空时不重试() {
        let src = laggy(1, 64);
        let mut reader = RetryingReader::new(32, fast_config());
        reader.set_source(src.clone());
        // 先塞入数据, 使第一次 0 字节读取直接返回
        reader.buffer.append(&[1, 2, 3]);
        reader.do_read_from_source(8).unwrap();
        assert_eq!(reader.remain(), 3);
        assert_eq!(src.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_数据源错误直接传递() {
        let mut reader = RetryingReader::new(32, fast_config());
        reader.set_source(Arc::new(BrokenSource));
        assert!(matches!(reader.get_data_from_source(), Err(HiError::Io(_))));
    }

    #[test]
    fn test_填充限制在文件大小内并报告结束() {
        let mut reader = RetryingReader::new(16, fast_config());
        reader.set_source(MemorySource::shared(vec![7u8; 20]));
        reader.get_data_from_source().unwrap();
        assert_eq!(reader.remain(), 16);
        reader.consume(10);
        reader.get_data_from_source().unwrap();
        // 剩余 6 + 文件尾 4
        assert_eq!(reader.remain(), 10);
        assert_eq!(reader.offset(), 20);
        reader.consume(10);
        assert!(reader.get_data_from_source().unwrap_err().is_eos());
        assert!(reader.is_eos());
    }

    #[test]
    fn test_顺序流_偏移只作记录() {
        let src = Arc::new(StreamSource::from_data(vec![5u8; 10]));
        let mut reader = RetryingReader::new(8, fast_config());
        reader.set_source(src);
        assert!(!reader.is_seekable());
        reader.get_data_from_source().unwrap();
        assert_eq!(reader.remain(), 8);
        reader.consume(8);
        reader.get_data_from_source().unwrap();
        assert_eq!(reader.remain(), 2);
        reader.consume(2);
        assert!(reader.get_data_from_source().unwrap_err().is_eos());
    }

    #[test]
    fn test_流结束但缓冲区有数据() {
        let src = Arc::new(StreamSource::from_data(vec![1u8; 4]));
        let mut reader = RetryingReader::new(8, fast_config());
        reader.set_source(src);
        reader.get_data_from_source().unwrap();
        assert_eq!(reader.remain(), 4);
        // 数据源报告结束, 缓冲区仍有数据
        reader.get_data_from_source().unwrap();
        assert!(reader.is_eos());
        assert!(reader.source_exhausted());
    }

    #[test]
    fn test_区间读取() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut reader = RetryingReader::new(16, fast_config());
        reader.set_source(MemorySource::shared(data));
        let mut out = [0u8; 40];
        reader.read_window(30, &mut out).unwrap();
        assert_eq!(out[0], 30);
        assert_eq!(out[39], 69);
        // 命中缓冲
        let mut small = [0u8; 4];
        reader.read_window(60, &mut small).unwrap();
        assert_eq!(small, [60, 61, 62, 63]);
        // 向后重定位
        reader.read_window(2, &mut small).unwrap();
        assert_eq!(small, [2, 3, 4, 5]);
        assert!(reader.read_window(98, &mut small).unwrap_err().is_eos());
    }

    #[test]
    fn test_保证最少字节() {
        let mut reader = RetryingReader::new(16, fast_config());
        reader.set_source(MemorySource::shared(vec![1u8; 10]));
        assert!(reader.ensure(8).unwrap());
        assert!(!reader.ensure(12).unwrap());
        assert_eq!(reader.remain(), 10);
    }

    #[test]
    fn test_配置() {
        let cfg = ReaderConfig::default();
        assert_eq!(cfg.retry_times, 200);
        assert_eq!(cfg.max_block(), Duration::from_millis(30 * 199));
        assert_eq!(ReaderConfig::no_retry().max_block(), Duration::ZERO);
    }
}
