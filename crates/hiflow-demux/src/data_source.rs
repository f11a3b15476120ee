//! 数据源抽象.
//!
//! 解封装插件只通过 [`DataSource`] 按偏移读取字节, 不关心数据来自文件、内存还是网络.
//! 数据源由管线构造并以 `Arc` 共享给插件与探测函数.
//!
//! 约定:
//! - `read_at` 可以返回少于请求的字节数, 也可以返回 0 字节 (数据暂未就绪), 但不得无限阻塞
//! - 读到末尾返回 `Err(HiError::EndOfStream)`
//! - 不可寻址的数据源忽略 `offset`, 按顺序交付数据

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use hiflow_core::{HiError, HiResult, Seekable};

/// 数据源 trait
pub trait DataSource: Send + Sync {
    /// 从 `offset` 处读取数据到 `buf`, 返回实际读取的字节数
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> HiResult<usize>;

    /// 数据总大小
    fn size(&self) -> HiResult<u64>;

    /// 可寻址性
    fn seekable(&self) -> Seekable;
}

/// 共享数据源句柄
pub type SharedSource = Arc<dyn DataSource>;

fn lock_poisoned(what: &str) -> HiError {
    HiError::Unknown(format!("{what} 锁已中毒"))
}

/// 内存数据源
///
/// 可寻址, 用于测试和内存中处理.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    /// 从已有数据创建
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// 创建共享句柄
    pub fn shared(data: impl Into<Bytes>) -> SharedSource {
        Arc::new(Self::new(data))
    }
}

impl DataSource for MemorySource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> HiResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let len = self.data.len() as u64;
        if offset >= len {
            return Err(HiError::EndOfStream);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> HiResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn seekable(&self) -> Seekable {
        Seekable::Seekable
    }
}

/// 顺序流数据源内部状态
#[derive(Debug, Default)]
struct StreamState {
    chunks: VecDeque<Bytes>,
    finished: bool,
}

/// 顺序流数据源
///
/// 不可寻址, 大小未知. 生产者通过 [`StreamSource::push`] 投递数据,
/// 消费者读取时忽略偏移; 队列为空时返回 0 字节, 结束后返回 `EndOfStream`.
#[derive(Debug, Default)]
pub struct StreamSource {
    state: Mutex<StreamState>,
}

impl StreamSource {
    /// 创建空的流
    pub fn new() -> Self {
        Self::default()
    }

    /// 用完整数据创建并立即结束 (测试常用)
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        let src = Self::new();
        let data = data.into();
        if let Ok(mut st) = src.state.lock() {
            if !data.is_empty() {
                st.chunks.push_back(data);
            }
            st.finished = true;
        }
        src
    }

    /// 投递一段数据
    pub fn push(&self, data: impl Into<Bytes>) -> HiResult<()> {
        let data = data.into();
        let mut st = self.state.lock().map_err(|_| lock_poisoned("StreamSource"))?;
        if st.finished {
            return Err(HiError::InvalidParameter("流已结束, 不能继续投递".into()));
        }
        if !data.is_empty() {
            st.chunks.push_back(data);
        }
        Ok(())
    }

    /// 标记流结束
    pub fn finish(&self) -> HiResult<()> {
        let mut st = self.state.lock().map_err(|_| lock_poisoned("StreamSource"))?;
        st.finished = true;
        Ok(())
    }

    /// 尚未被读取的字节数
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .map(|st| st.chunks.iter().map(Bytes::len).sum())
            .unwrap_or(0)
    }
}

impl DataSource for StreamSource {
    fn read_at(&self, _offset: u64, buf: &mut [u8]) -> HiResult<usize> {
        let mut st = self.state.lock().map_err(|_| lock_poisoned("StreamSource"))?;
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = st.chunks.front_mut() else {
                break;
            };
            let n = front.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&front[..n]);
            copied += n;
            if n == front.len() {
                st.chunks.pop_front();
            } else {
                *front = front.slice(n..);
            }
        }
        if copied == 0 && st.finished && !buf.is_empty() {
            return Err(HiError::EndOfStream);
        }
        Ok(copied)
    }

    fn size(&self) -> HiResult<u64> {
        Err(HiError::Unimplemented("顺序流大小未知".into()))
    }

    fn seekable(&self) -> Seekable {
        Seekable::Unseekable
    }
}

/// 带重放前缀的顺序数据源
///
/// 先交付探测时截取的前缀, 再从底层数据源继续读取. 用于不可寻址数据源:
/// 探测消耗掉的开头数据通过前缀补回给插件.
pub struct PrefixedSource {
    prefix: Bytes,
    pos: Mutex<usize>,
    inner: SharedSource,
    touched_inner: AtomicBool,
}

impl PrefixedSource {
    pub fn new(prefix: Bytes, inner: SharedSource) -> Self {
        Self {
            prefix,
            pos: Mutex::new(0),
            inner,
            touched_inner: AtomicBool::new(false),
        }
    }

    /// 是否已经读取过前缀之外的数据
    ///
    /// 一旦为真, 同一个底层数据源不能再交给其他插件重放.
    pub fn touched_inner(&self) -> bool {
        self.touched_inner.load(Ordering::Acquire)
    }
}

impl DataSource for PrefixedSource {
    fn read_at(&self, _offset: u64, buf: &mut [u8]) -> HiResult<usize> {
        let mut pos = self.pos.lock().map_err(|_| lock_poisoned("PrefixedSource"))?;
        if *pos < self.prefix.len() {
            let n = buf.len().min(self.prefix.len() - *pos);
            buf[..n].copy_from_slice(&self.prefix[*pos..*pos + n]);
            *pos += n;
            return Ok(n);
        }
        drop(pos);
        self.touched_inner.store(true, Ordering::Release);
        self.inner.read_at(0, buf)
    }

    fn size(&self) -> HiResult<u64> {
        self.inner.size()
    }

    fn seekable(&self) -> Seekable {
        Seekable::Unseekable
    }
}

/// 文件数据源
#[derive(Debug)]
pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    /// 以只读方式打开文件
    pub fn open(path: impl AsRef<Path>) -> HiResult<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        log::debug!("打开文件 {}, 大小 {} 字节", path.as_ref().display(), size);
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }
}

impl DataSource for FileSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> HiResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if offset >= self.size {
            return Err(HiError::EndOfStream);
        }
        let mut file = self.file.lock().map_err(|_| lock_poisoned("FileSource"))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn size(&self) -> HiResult<u64> {
        Ok(self.size)
    }

    fn seekable(&self) -> Seekable {
        Seekable::Seekable
    }
}

// ========================
// HTTP 数据源
// ========================

/// HTTP 下载共享缓冲区
#[cfg(feature = "http")]
#[derive(Debug, Default)]
struct HttpDownload {
    /// 已下载的数据
    data: Vec<u8>,
    /// 总大小 (来自 Content-Length)
    total_size: Option<u64>,
    /// 下载是否已结束
    finished: bool,
    /// 下载错误信息
    error: Option<String>,
    /// 连接是否已建立
    connected: bool,
    /// 是否请求中止
    aborted: bool,
    /// 顺序模式下已交付的字节数
    delivered: usize,
}

/// HTTP 数据源
///
/// 后台线程流式下载, `read_at` 从不等待: 请求位置尚未下载时返回 0 字节,
/// 由 [`RetryingReader`](crate::reader::RetryingReader) 的退避重试吸收.
/// 已知 Content-Length 时可寻址; 否则按顺序交付, 忽略 `offset`.
#[cfg(feature = "http")]
pub struct HttpSource {
    shared: Arc<(Mutex<HttpDownload>, std::sync::Condvar)>,
    total_size: Option<u64>,
}

#[cfg(feature = "http")]
impl HttpSource {
    /// 打开 URL 并启动后台下载线程
    ///
    /// 仅等待连接建立, 不等待数据.
    pub fn open(url: &str) -> HiResult<Self> {
        use std::sync::Condvar;

        log::info!("正在连接: {}", url);
        let shared = Arc::new((Mutex::new(HttpDownload::default()), Condvar::new()));
        let worker_shared = Arc::clone(&shared);
        let url_owned = url.to_string();
        std::thread::spawn(move || {
            http_download_worker(&url_owned, &worker_shared);
        });

        let (lock, cvar) = &*shared;
        let mut dl = lock.lock().map_err(|_| lock_poisoned("HttpSource"))?;
        while !dl.connected && !dl.finished {
            dl = cvar.wait(dl).map_err(|_| lock_poisoned("HttpSource"))?;
        }
        if let Some(err) = &dl.error {
            return Err(HiError::Io(std::io::Error::other(err.clone())));
        }
        let total_size = dl.total_size;
        drop(dl);

        Ok(Self { shared, total_size })
    }

    /// 已下载字节数
    pub fn downloaded(&self) -> usize {
        self.shared.0.lock().map(|dl| dl.data.len()).unwrap_or(0)
    }
}

#[cfg(feature = "http")]
impl Drop for HttpSource {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.shared;
        if let Ok(mut dl) = lock.lock() {
            dl.aborted = true;
            cvar.notify_all();
        }
    }
}

#[cfg(feature = "http")]
impl DataSource for HttpSource {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> HiResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut dl = self.shared.0.lock().map_err(|_| lock_poisoned("HttpSource"))?;
        let sequential = self.total_size.is_none();
        let pos = if sequential {
            dl.delivered
        } else {
            usize::try_from(offset).unwrap_or(usize::MAX)
        };
        if pos < dl.data.len() {
            let n = buf.len().min(dl.data.len() - pos);
            buf[..n].copy_from_slice(&dl.data[pos..pos + n]);
            if sequential {
                dl.delivered += n;
            }
            return Ok(n);
        }
        if dl.finished {
            if let Some(err) = &dl.error {
                return Err(HiError::Io(std::io::Error::other(err.clone())));
            }
            return Err(HiError::EndOfStream);
        }
        // 数据尚未到达
        Ok(0)
    }

    fn size(&self) -> HiResult<u64> {
        self.total_size
            .ok_or_else(|| HiError::Unimplemented("HTTP: 未提供 Content-Length".into()))
    }

    fn seekable(&self) -> Seekable {
        if self.total_size.is_some() {
            Seekable::Seekable
        } else {
            Seekable::Unseekable
        }
    }
}

/// HTTP 后台下载线程
#[cfg(feature = "http")]
fn http_download_worker(url: &str, shared: &Arc<(Mutex<HttpDownload>, std::sync::Condvar)>) {
    let (lock, cvar) = &**shared;

    let mut response = match ureq::get(url).call() {
        Ok(resp) => resp,
        Err(e) => {
            if let Ok(mut dl) = lock.lock() {
                dl.error = Some(format!("HTTP 请求失败: {}", e));
                dl.finished = true;
                dl.connected = true;
            }
            cvar.notify_all();
            return;
        }
    };

    let content_length = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if let Ok(mut dl) = lock.lock() {
        dl.total_size = content_length;
        dl.connected = true;
        if let Some(len) = content_length {
            dl.data.reserve((len as usize).min(64 * 1024 * 1024));
        }
    }
    cvar.notify_all();
    log::info!("HTTP 连接成功, Content-Length: {:?}", content_length);

    let mut reader = response.body_mut().as_reader();
    let mut chunk = vec![0u8; 32 * 1024];
    loop {
        if lock.lock().map(|dl| dl.aborted).unwrap_or(true) {
            log::debug!("HTTP 下载被中止");
            return;
        }
        let result = reader.read(&mut chunk);
        let Ok(mut dl) = lock.lock() else {
            return;
        };
        match result {
            Ok(0) => {
                log::info!("HTTP 下载完成, 共 {} 字节", dl.data.len());
                dl.finished = true;
                return;
            }
            Ok(n) => dl.data.extend_from_slice(&chunk[..n]),
            Err(e) => {
                log::error!("HTTP 下载错误: {}", e);
                dl.error = Some(format!("网络读取错误: {}", e));
                dl.finished = true;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_内存数据源_部分读取与末尾() {
        let src = MemorySource::new(vec![1u8, 2, 3, 4, 5]);
        let mut buf = [0u8; 4];
        assert_eq!(src.read_at(3, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert!(src.read_at(5, &mut buf).unwrap_err().is_eos());
        assert_eq!(src.size().unwrap(), 5);
        assert_eq!(src.seekable(), Seekable::Seekable);
    }

    #[test]
    fn test_顺序流_忽略偏移() {
        let src = StreamSource::new();
        src.push(vec![1u8, 2, 3]).unwrap();
        src.push(vec![4u8, 5]).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(src.read_at(100, &mut buf).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(src.pending(), 1);
        assert_eq!(src.read_at(0, &mut buf).unwrap(), 1);
        // 未结束时空队列返回 0 字节
        assert_eq!(src.read_at(0, &mut buf).unwrap(), 0);
        src.finish().unwrap();
        assert!(src.read_at(0, &mut buf).unwrap_err().is_eos());
        assert!(src.push(vec![9u8]).is_err());
        assert_eq!(src.seekable(), Seekable::Unseekable);
        assert!(src.size().is_err());
    }

    #[test]
    fn test_前缀重放() {
        let inner: SharedSource = Arc::new(StreamSource::from_data(vec![3u8, 4]));
        let src = PrefixedSource::new(Bytes::from_static(&[1, 2]), inner);
        let mut buf = [0u8; 4];
        assert_eq!(src.read_at(0, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
        assert!(!src.touched_inner());
        assert_eq!(src.read_at(0, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
        assert!(src.touched_inner());
        assert!(src.read_at(0, &mut buf).unwrap_err().is_eos());
    }

    #[test]
    fn test_文件数据源() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"RIFF....WAVE").unwrap();
        tmp.flush().unwrap();
        let src = FileSource::open(tmp.path()).unwrap();
        assert_eq!(src.size().unwrap(), 12);
        let mut buf = [0u8; 4];
        assert_eq!(src.read_at(8, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"WAVE");
        assert!(src.read_at(12, &mut buf).unwrap_err().is_eos());
    }

    /// 本地 HTTP 服务, 只响应一次请求, 以关闭连接标记正文结束
    #[cfg(feature = "http")]
    fn serve_once(body: Vec<u8>, content_length: bool) -> String {
        use std::io::BufRead;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let mut head = String::from("HTTP/1.1 200 OK\r\nConnection: close\r\n");
            if content_length {
                head.push_str(&format!("Content-Length: {}\r\n", body.len()));
            }
            head.push_str("\r\n");
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("http://{addr}/stream")
    }

    #[cfg(feature = "http")]
    fn collect_all(src: &HttpSource) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 300];
        loop {
            match src.read_at(0, &mut buf) {
                Ok(0) => std::thread::sleep(std::time::Duration::from_millis(1)),
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) => {
                    assert!(e.is_eos(), "{e}");
                    return out;
                }
            }
        }
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_无长度时按顺序交付() {
        let body: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        let src = HttpSource::open(&serve_once(body.clone(), false)).unwrap();
        assert_eq!(src.seekable(), Seekable::Unseekable);
        assert!(src.size().is_err());
        // 偏移恒为 0 也不会重复交付开头
        assert_eq!(collect_all(&src), body);
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_顺序源经读取器不重复() {
        use crate::reader::{ReaderConfig, RetryingReader};

        let body: Vec<u8> = (0..1024u32).map(|i| (i * 7 % 256) as u8).collect();
        let src: SharedSource = Arc::new(HttpSource::open(&serve_once(body.clone(), false)).unwrap());
        let config = ReaderConfig {
            retry_times: 2000,
            retry_interval: std::time::Duration::from_millis(1),
        };
        let mut reader = RetryingReader::new(256, config);
        reader.set_source(src);
        let mut collected = Vec::new();
        loop {
            match reader.get_data_from_source() {
                Ok(()) => {
                    let n = reader.remain();
                    collected.extend_from_slice(reader.data());
                    reader.consume(n);
                }
                Err(e) => {
                    assert!(e.is_eos(), "{e}");
                    break;
                }
            }
        }
        assert_eq!(collected, body);
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_有长度时按偏移读取() {
        let body: Vec<u8> = (0..512u32).map(|i| i as u8).collect();
        let src = HttpSource::open(&serve_once(body.clone(), true)).unwrap();
        assert_eq!(src.seekable(), Seekable::Seekable);
        assert_eq!(src.size().unwrap(), 512);
        let mut buf = [0u8; 4];
        let n = loop {
            match src.read_at(100, &mut buf).unwrap() {
                0 => std::thread::sleep(std::time::Duration::from_millis(1)),
                n => break n,
            }
        };
        assert_eq!(&buf[..n], &body[100..100 + n]);
    }
}
