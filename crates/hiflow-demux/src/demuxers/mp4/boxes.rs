//! MP4 Box (Atom) 头部解析与区间读取.
//!
//! ISO 14496-12 定义的 Box 结构:
//! ```text
//! Size:       4 bytes (big-endian, 含头部本身)
//! Type:       4 bytes (FourCC)
//! [ExtSize]:  8 bytes (仅当 Size==1 时存在, 64-bit 大小)
//! ```
//!
//! 特殊大小值:
//! - 0: Box 延伸到文件末尾
//! - 1: 使用 64-bit 扩展大小

use byteorder::{BigEndian, ByteOrder};
use hiflow_core::{HiError, HiResult};

use crate::reader::RetryingReader;

/// 按文件区间读取数据的回调
pub trait ReadCallback {
    /// 读取 `[pos, pos + buf.len())`, 不足时返回错误
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> HiResult<()>;

    /// 文件总大小
    fn size(&self) -> u64;
}

impl ReadCallback for RetryingReader {
    fn read_at(&mut self, pos: u64, buf: &mut [u8]) -> HiResult<()> {
        self.read_window(pos, buf)
    }

    fn size(&self) -> u64 {
        self.file_size()
    }
}

/// 在 [`ReadCallback`] 上顺序读取大端整数的游标
pub struct BoxCursor<'a> {
    cb: &'a mut dyn ReadCallback,
    pos: u64,
}

impl<'a> BoxCursor<'a> {
    pub fn new(cb: &'a mut dyn ReadCallback) -> Self {
        Self { cb, pos: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn size(&self) -> u64 {
        self.cb.size()
    }

    fn fill(&mut self, buf: &mut [u8]) -> HiResult<()> {
        self.cb.read_at(self.pos, buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> HiResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    pub fn skip(&mut self, n: u64) {
        self.pos += n;
    }

    pub fn read_u8(&mut self) -> HiResult<u8> {
        let mut b = [0u8; 1];
        self.fill(&mut b)?;
        Ok(b[0])
    }

    pub fn read_u16_be(&mut self) -> HiResult<u16> {
        let mut b = [0u8; 2];
        self.fill(&mut b)?;
        Ok(BigEndian::read_u16(&b))
    }

    pub fn read_u32_be(&mut self) -> HiResult<u32> {
        let mut b = [0u8; 4];
        self.fill(&mut b)?;
        Ok(BigEndian::read_u32(&b))
    }

    pub fn read_u64_be(&mut self) -> HiResult<u64> {
        let mut b = [0u8; 8];
        self.fill(&mut b)?;
        Ok(BigEndian::read_u64(&b))
    }

    pub fn read_tag(&mut self) -> HiResult<[u8; 4]> {
        let mut b = [0u8; 4];
        self.fill(&mut b)?;
        Ok(b)
    }

    /// 跳过 FullBox 的 version 与 flags, 返回 version
    pub fn read_full_box_header(&mut self) -> HiResult<u8> {
        let version = self.read_u8()?;
        self.skip(3);
        Ok(version)
    }
}

/// Box 类型 (只列出解封装用到的)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxType {
    Ftyp,
    Moov,
    Mvhd,
    Trak,
    Tkhd,
    Mdia,
    Mdhd,
    Hdlr,
    Minf,
    Stbl,
    Stsd,
    Stts,
    Stsc,
    Stsz,
    Stco,
    Co64,
    Mdat,
    Unknown([u8; 4]),
}

impl BoxType {
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Self {
        match fourcc {
            b"ftyp" => Self::Ftyp,
            b"moov" => Self::Moov,
            b"mvhd" => Self::Mvhd,
            b"trak" => Self::Trak,
            b"tkhd" => Self::Tkhd,
            b"mdia" => Self::Mdia,
            b"mdhd" => Self::Mdhd,
            b"hdlr" => Self::Hdlr,
            b"minf" => Self::Minf,
            b"stbl" => Self::Stbl,
            b"stsd" => Self::Stsd,
            b"stts" => Self::Stts,
            b"stsc" => Self::Stsc,
            b"stsz" => Self::Stsz,
            b"stco" => Self::Stco,
            b"co64" => Self::Co64,
            b"mdat" => Self::Mdat,
            _ => Self::Unknown(*fourcc),
        }
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(cc) => write!(f, "{}", String::from_utf8_lossy(cc)),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// 已解析的 Box 头部
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    /// Box 总大小 (含头部, 0 表示到文件末尾)
    pub size: u64,
    pub box_type: BoxType,
    /// 头部大小 (8 或 16 字节)
    pub header_size: u64,
}

impl BoxHeader {
    /// 内容区域结束位置
    pub fn end(&self, start: u64, file_size: u64) -> u64 {
        if self.size == 0 {
            file_size
        } else {
            start.saturating_add(self.size)
        }
    }
}

/// 读取一个 Box 头部
pub fn read_box_header(cur: &mut BoxCursor<'_>) -> HiResult<BoxHeader> {
    let size32 = cur.read_u32_be()?;
    let fourcc = cur.read_tag()?;
    let box_type = BoxType::from_fourcc(&fourcc);

    let (size, header_size) = if size32 == 1 {
        (cur.read_u64_be()?, 16u64)
    } else {
        (u64::from(size32), 8u64)
    };
    if size != 0 && size < header_size {
        return Err(HiError::UnsupportedFormat(format!(
            "MP4: box {} 大小 {} 无效",
            box_type, size
        )));
    }

    Ok(BoxHeader {
        size,
        box_type,
        header_size,
    })
}
