//! WAV (RIFF) 解封装插件.
//!
//! 头部一次读入后按 RIFF 块遍历 (`fmt `, 可选 `fact`, `data`),
//! 之后按固定大小顺序切出 PCM 数据.
//!
//! # 头部布局
//! ```text
//! "RIFF" <riff_size:u32> "WAVE"
//! "fmt " <size:u32> audio_format:u16 channels:u16 sample_rate:u32
//!                   byte_rate:u32 block_align:u16 bits_per_sample:u16 [...]
//! ["fact" <size:u32> sample_length:u32]
//! "data" <size:u32> <PCM 数据>
//! ```
//! 标准 PCM 头部 44 字节, 带 `fact` 块时 56 字节.

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use log::{debug, warn};

use hiflow_core::meta::mime;
use hiflow_core::time::{HST_SECOND, bytes_to_hst, hst_to_seconds};
use hiflow_core::{
    Buffer, BufferFlags, ChannelLayout, HiError, HiResult, Meta, SampleFormat, Tag,
};

use crate::data_source::SharedSource;
use crate::plugin::{DemuxerPlugin, FormatDemuxer, FormatParser, MediaInfo, SeekMode};
use crate::probe::{self, ProbeScore};
use crate::reader::{ReaderConfig, RetryingReader};
use crate::registry::DemuxerPluginDef;

/// 插件名称
pub const NAME: &str = "wav";

/// 每次输出的数据大小
pub const WAV_PER_FRAME_SIZE: usize = 8192;

/// 暂存缓冲区容量
const WAV_BUFFER_SIZE: usize = 2 * WAV_PER_FRAME_SIZE;

/// 首次读取的头部长度
const WAV_HEAD_INFO_LEN: usize = 56;

/// 头部最大长度, 超过时放弃查找 `data` 块
const WAV_HEAD_MAX_LEN: usize = WAV_BUFFER_SIZE;

/// WAVE 格式码
pub mod format_tag {
    pub const PCM: u16 = 0x0001;
    pub const IEEE_FLOAT: u16 = 0x0003;
    pub const EXTENSIBLE: u16 = 0xFFFE;
}

/// WAV seek 位置的计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WavSeekPolicy {
    /// 绝对位置 `head + t * byte_rate`, 按 block_align 对齐
    #[default]
    ByteRate,
    /// 旧算法: 相对当前位置移动 `t * sample_rate * channels * byte_rate`,
    /// 向下对齐到 `sample_rate * channels` 的整数倍
    Legacy,
}

/// 解析得到的 WAV 头部
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHead {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// 头部总长度, 即 PCM 数据起始偏移
    pub head_len: u64,
    /// `data` 块声明的长度
    pub data_size: u32,
}

impl WavHead {
    /// 采样格式
    ///
    /// PCM 与 EXTENSIBLE 按位深查表, 浮点映射为 F32, 其他为 `None`.
    pub fn sample_format(&self) -> SampleFormat {
        match self.audio_format {
            format_tag::PCM | format_tag::EXTENSIBLE => SampleFormat::from_pcm_bits(self.bits_per_sample),
            format_tag::IEEE_FLOAT => SampleFormat::F32,
            _ => SampleFormat::None,
        }
    }
}

fn chunk_header(buf: &[u8], pos: usize) -> HiResult<(&[u8], u32)> {
    let head = buf.get(pos..pos + 8).ok_or(HiError::NotEnoughData)?;
    Ok((&head[..4], LittleEndian::read_u32(&head[4..8])))
}

/// 遍历 RIFF 块解析头部
///
/// 数据不足以找到 `data` 块时返回 [`HiError::NotEnoughData`].
pub fn parse_wav_head(buf: &[u8]) -> HiResult<WavHead> {
    if buf.len() < 12 {
        return Err(HiError::NotEnoughData);
    }
    if &buf[..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return Err(HiError::UnsupportedFormat("WAV: 缺少 RIFF/WAVE 标识".into()));
    }

    let mut fmt: Option<WavHead> = None;
    let mut pos = 12usize;
    loop {
        let (id, size) = chunk_header(buf, pos)?;
        let body = pos + 8;
        match id {
            b"fmt " => {
                if size < 16 {
                    return Err(HiError::UnsupportedFormat(format!("WAV: fmt 块过短 ({})", size)));
                }
                let b = buf.get(body..body + 16).ok_or(HiError::NotEnoughData)?;
                let mut audio_format = LittleEndian::read_u16(&b[0..2]);
                // EXTENSIBLE 的子格式 GUID 前 2 字节为实际格式码
                if audio_format == format_tag::EXTENSIBLE && size >= 40 {
                    let sub = buf.get(body + 24..body + 26).ok_or(HiError::NotEnoughData)?;
                    let sub_format = LittleEndian::read_u16(sub);
                    if sub_format == format_tag::IEEE_FLOAT {
                        audio_format = sub_format;
                    }
                }
                fmt = Some(WavHead {
                    audio_format,
                    channels: LittleEndian::read_u16(&b[2..4]),
                    sample_rate: LittleEndian::read_u32(&b[4..8]),
                    byte_rate: LittleEndian::read_u32(&b[8..12]),
                    block_align: LittleEndian::read_u16(&b[12..14]),
                    bits_per_sample: LittleEndian::read_u16(&b[14..16]),
                    head_len: 0,
                    data_size: 0,
                });
            }
            b"data" => {
                let mut head = fmt.take().ok_or_else(|| {
                    HiError::UnsupportedFormat("WAV: data 块之前没有 fmt 块".into())
                })?;
                head.head_len = body as u64;
                head.data_size = size;
                return Ok(head);
            }
            other => {
                debug!("WAV: 跳过块 {:?} ({} 字节)", String::from_utf8_lossy(other), size);
            }
        }
        // 块按 2 字节对齐
        pos = body + size as usize + (size as usize & 1);
    }
}

/// 旧算法的位移量: `t_s * sample_rate * channels * byte_rate`, 向下对齐到 `sample_rate * channels`
pub fn legacy_seek_delta(seconds: u64, sample_rate: u32, channels: u16, byte_rate: u32) -> u64 {
    let unit = u64::from(sample_rate) * u64::from(channels);
    let delta = seconds
        .saturating_mul(unit)
        .saturating_mul(u64::from(byte_rate));
    if unit == 0 { delta } else { delta - delta % unit }
}

/// 计算 seek 目标位置, 结果在 `[head_len, file_size]` 内
pub fn compute_seek_position(
    policy: WavSeekPolicy,
    head: &WavHead,
    mode: SeekMode,
    hst_time: i64,
    current: u64,
    file_size: u64,
) -> u64 {
    let hst = hst_time.max(0) as u64;
    let target = match policy {
        WavSeekPolicy::ByteRate => {
            let raw = (u128::from(hst) * u128::from(head.byte_rate) / HST_SECOND as u128) as u64;
            let align = u64::from(head.block_align.max(1));
            let aligned = match mode {
                SeekMode::PreviousSync => raw - raw % align,
                SeekMode::NextSync => raw.div_ceil(align) * align,
                SeekMode::ClosestSync => (raw + align / 2) / align * align,
            };
            head.head_len.saturating_add(aligned)
        }
        WavSeekPolicy::Legacy => {
            let seconds = hst_to_seconds(hst as i64) as u64;
            let delta = legacy_seek_delta(seconds, head.sample_rate, head.channels, head.byte_rate);
            if delta == 0 {
                0
            } else if mode == SeekMode::PreviousSync {
                current.saturating_sub(delta)
            } else {
                current.saturating_add(delta)
            }
        }
    };
    target.clamp(head.head_len, file_size.max(head.head_len))
}

/// WAV 解析器
#[derive(Debug, Default)]
pub struct WavParser {
    head: Option<WavHead>,
    /// PCM 数据结束位置, 未知时为 `None`
    data_end: Option<u64>,
    seek_policy: WavSeekPolicy,
}

impl WavParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seek_policy(mut self, policy: WavSeekPolicy) -> Self {
        self.seek_policy = policy;
        self
    }

    pub fn seek_policy(&self) -> WavSeekPolicy {
        self.seek_policy
    }

    pub fn head(&self) -> Option<&WavHead> {
        self.head.as_ref()
    }

    fn read_head(&self, reader: &mut RetryingReader) -> HiResult<WavHead> {
        reader.ensure(WAV_HEAD_INFO_LEN)?;
        loop {
            match parse_wav_head(reader.data()) {
                Err(HiError::NotEnoughData) => {
                    let remain = reader.remain();
                    if reader.source_exhausted() || remain >= WAV_HEAD_MAX_LEN.min(reader.capacity()) {
                        return Err(HiError::UnsupportedFormat("WAV: 头部不完整".into()));
                    }
                    reader.ensure(remain + 1)?;
                }
                other => return other,
            }
        }
    }
}

impl FormatParser for WavParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn buffer_capacity(&self) -> usize {
        WAV_BUFFER_SIZE
    }

    fn parse_media_info(&mut self, reader: &mut RetryingReader) -> HiResult<MediaInfo> {
        let head = self.read_head(reader)?;
        let sample_format = head.sample_format();
        if sample_format == SampleFormat::None {
            warn!(
                "WAV: 不支持的格式 0x{:04x} / {} bit",
                head.audio_format, head.bits_per_sample
            );
        }
        debug!(
            "WAV: 格式 0x{:04x} {}Hz {}ch {}bit, 头部 {} 字节, 数据 {} 字节",
            head.audio_format,
            head.sample_rate,
            head.channels,
            head.bits_per_sample,
            head.head_len,
            head.data_size
        );
        reader.consume(head.head_len as usize);

        let file_size = reader.file_size();
        self.data_end = match head.data_size {
            0 | u32::MAX => reader.is_seekable().then_some(file_size),
            n => {
                let end = head.head_len + u64::from(n);
                Some(if reader.is_seekable() { end.min(file_size) } else { end })
            }
        };

        let bit_rate = u64::from(head.byte_rate) * 8;
        let mut general = Meta::new()
            .with(Tag::MediaFileSize(file_size))
            .with(Tag::MediaSeekable(reader.seekable()));
        if let Some(end) = self.data_end {
            general.set(Tag::MediaDuration(bytes_to_hst(end - head.head_len, bit_rate)));
        }

        let channels = u32::from(head.channels);
        let block_align = u32::from(head.block_align.max(1));
        let track = Meta::new()
            .with(Tag::TrackId(0))
            .with(Tag::Mime(mime::AUDIO_RAW.into()))
            .with(Tag::AudioSampleRate(head.sample_rate))
            .with(Tag::AudioChannels(channels))
            .with(Tag::AudioChannelLayout(ChannelLayout::from_channels(channels)))
            .with(Tag::AudioSampleFormat(sample_format))
            .with(Tag::AudioBitsPerSample(u32::from(head.bits_per_sample)))
            .with(Tag::AudioSamplesPerFrame(WAV_PER_FRAME_SIZE as u32 / block_align))
            .with(Tag::BitRate(bit_rate));

        self.head = Some(head);
        Ok(MediaInfo {
            general,
            tracks: vec![track],
        })
    }

    fn read_frame(&mut self, reader: &mut RetryingReader) -> HiResult<Buffer> {
        let head = self
            .head
            .as_ref()
            .ok_or_else(|| HiError::WrongState("WAV: 尚未解析头部".into()))?;
        let pos = reader.buffered_position();
        let want = match self.data_end {
            Some(end) => end.saturating_sub(pos).min(WAV_PER_FRAME_SIZE as u64) as usize,
            None => WAV_PER_FRAME_SIZE,
        };
        if want == 0 {
            return Err(HiError::EndOfStream);
        }
        reader.ensure(want)?;
        let n = reader.remain().min(want);
        if n == 0 {
            return Err(HiError::EndOfStream);
        }
        let data = Bytes::copy_from_slice(&reader.data()[..n]);
        reader.consume(n);

        let bit_rate = u64::from(head.byte_rate) * 8;
        let pts = bytes_to_hst(pos.saturating_sub(head.head_len), bit_rate);
        Ok(Buffer::from_data(data)
            .with_timing(pts, bytes_to_hst(n as u64, bit_rate))
            .with_track(0)
            .with_flags(BufferFlags::KEY_FRAME))
    }

    fn seek_to(&mut self, reader: &mut RetryingReader, hst_time: i64, mode: SeekMode) -> HiResult<()> {
        if !reader.is_seekable() {
            return Err(HiError::Unimplemented("WAV: 不可寻址数据源不支持 seek".into()));
        }
        let head = self
            .head
            .as_ref()
            .ok_or_else(|| HiError::WrongState("WAV: 尚未解析头部".into()))?;
        let current = reader.buffered_position();
        let pos = compute_seek_position(
            self.seek_policy,
            head,
            mode,
            hst_time,
            current,
            reader.file_size(),
        );
        debug!("WAV: seek {:?} 从 {} 到 {}", self.seek_policy, current, pos);
        reader.reset_to(pos);
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::new().with_seek_policy(self.seek_policy);
    }
}

/// WAV 插件类型
pub type WavDemuxerPlugin = FormatDemuxer<WavParser>;

impl WavDemuxerPlugin {
    /// 设置 seek 位置计算方式
    pub fn with_seek_policy(mut self, policy: WavSeekPolicy) -> Self {
        self.parser_mut().seek_policy = policy;
        self
    }
}

/// 插件创建函数
pub fn create(_name: &str) -> Box<dyn DemuxerPlugin> {
    Box::new(WavDemuxerPlugin::new(WavParser::new()))
}

/// 探测: 开头 4 字节为 "RIFF"
pub fn sniff(name: &str, source: &SharedSource) -> ProbeScore {
    probe::sniff_prefix(name, source, 0, 4, ReaderConfig::no_retry(), |data| {
        data.starts_with(b"RIFF")
    })
}

/// 使用旧 seek 算法的插件创建函数
pub fn create_legacy(_name: &str) -> Box<dyn DemuxerPlugin> {
    Box::new(WavDemuxerPlugin::new(WavParser::new()).with_seek_policy(WavSeekPolicy::Legacy))
}

/// 插件定义
pub fn plugin_def() -> DemuxerPluginDef {
    plugin_def_with_policy(WavSeekPolicy::ByteRate)
}

/// 指定 seek 算法的插件定义
pub fn plugin_def_with_policy(policy: WavSeekPolicy) -> DemuxerPluginDef {
    DemuxerPluginDef {
        name: NAME.into(),
        description: "wav demuxer plugin".into(),
        rank: 100,
        creator: match policy {
            WavSeekPolicy::ByteRate => create,
            WavSeekPolicy::Legacy => create_legacy,
        },
        sniffer: sniff,
    }
}
