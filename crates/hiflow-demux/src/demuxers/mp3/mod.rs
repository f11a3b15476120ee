//! MPEG 音频 (MP3) 解封装插件.
//!
//! 文件开头可能有 ID3v2 标签, 先按标签长度增量丢弃, 再逐帧扫描.
//! 时长与 seek 位置按首帧码率估算 (CBR 假设).
//!
//! seek 之后解码器需要若干帧预热, 插件把跳转后的前几帧静音
//! (保留 4 字节帧头, 其余置零), 帧数由 [`Mp3Parser::with_seek_discard_frames`] 配置.

mod frame;
mod id3;

pub use frame::{FrameInfo, MpegVersion, decode_check, iterate, parse_frame_header};
pub use id3::{ID3_HEADER_SIZE, id3v2_size};

use bytes::Bytes;
use log::{debug, warn};

use hiflow_core::meta::mime;
use hiflow_core::time::{bytes_to_hst, hst_to_ms, samples_to_hst};
use hiflow_core::{Buffer, BufferFlags, ChannelLayout, HiError, HiResult, Meta, Tag};

use crate::data_source::SharedSource;
use crate::plugin::{DemuxerPlugin, FormatDemuxer, FormatParser, MediaInfo, SeekMode};
use crate::probe::{self, ProbeScore, SCORE_MAX, SCORE_NONE};
use crate::reader::{ReaderConfig, RetryingReader};
use crate::registry::{DemuxerPluginDef, STREAM_PROBE_SIZE};

/// 插件名称
pub const NAME: &str = "minimp3";

/// 暂存缓冲区容量
const MP3_BUFFER_SIZE: usize = 8 * 1024;

/// 解析头部时最多扫描的字节数
const MP3_PROBE_LIMIT: usize = 64 * 1024;

/// 探测时读取的帧数据窗口
const MP3_SNIFF_WINDOW: usize = 4096;

/// seek 后默认静音的帧数
pub const MP3_SEEK_DISCARD_FRAMES: u32 = 2;

/// MP3 解析器
#[derive(Debug)]
pub struct Mp3Parser {
    /// 首帧信息
    first: Option<FrameInfo>,
    /// ID3v2 标签总长度
    id3_size: u64,
    /// 尚未丢弃的标签字节数
    id3_remaining: u64,
    frame_index: u64,
    seek_discard_frames: u32,
    /// 还需静音的帧数
    discard_left: u32,
}

impl Mp3Parser {
    pub fn new() -> Self {
        Self {
            first: None,
            id3_size: 0,
            id3_remaining: 0,
            frame_index: 0,
            seek_discard_frames: MP3_SEEK_DISCARD_FRAMES,
            discard_left: 0,
        }
    }

    /// 设置 seek 后静音的帧数
    pub fn with_seek_discard_frames(mut self, frames: u32) -> Self {
        self.seek_discard_frames = frames;
        self
    }

    pub fn seek_discard_frames(&self) -> u32 {
        self.seek_discard_frames
    }

    /// ID3v2 标签长度 (无标签时为 0)
    pub fn id3_size(&self) -> u64 {
        self.id3_size
    }

    /// 丢弃缓冲区中属于 ID3v2 标签的字节
    ///
    /// 标签可能跨越多次读取, 数据源读完时提前返回.
    fn skip_id3(&mut self, reader: &mut RetryingReader) -> HiResult<()> {
        while self.id3_remaining > 0 {
            if reader.remain() == 0 {
                reader.ensure(reader.capacity())?;
                if reader.remain() == 0 {
                    return Ok(());
                }
            }
            let n = (reader.remain() as u64).min(self.id3_remaining) as usize;
            reader.consume(n);
            self.id3_remaining -= n as u64;
        }
        Ok(())
    }

    /// 扫描首个有效帧, 丢弃之前的垃圾字节
    fn find_first_frame(&mut self, reader: &mut RetryingReader) -> HiResult<FrameInfo> {
        let mut scanned = 0usize;
        loop {
            let at_eof = reader.source_exhausted();
            let mut found = None;
            let consumed = iterate(reader.data(), at_eof, |info, _, offset| {
                found = Some((*info, offset));
                true
            });
            if let Some((info, offset)) = found {
                reader.consume(offset);
                if !decode_check(&info) {
                    return Err(HiError::UnsupportedFormat(format!(
                        "MP3: 帧参数不在参考表内 (layer={} hz={} kbps={})",
                        info.layer, info.hz, info.bitrate_kbps
                    )));
                }
                if offset > 0 {
                    debug!("MP3: 首帧前跳过 {} 字节", scanned + offset);
                }
                return Ok(info);
            }
            if at_eof || scanned > MP3_PROBE_LIMIT {
                return Err(HiError::UnsupportedFormat("MP3: 未找到帧同步".into()));
            }
            reader.consume(consumed);
            scanned += consumed;
            if consumed == 0 && reader.remain() >= reader.capacity() {
                reader.consume(1);
                scanned += 1;
            }
            reader.ensure(reader.remain() + 1)?;
        }
    }

    fn build_buffer(&mut self, info: &FrameInfo, frame: &[u8]) -> Buffer {
        let data = if self.discard_left > 0 {
            self.discard_left -= 1;
            let mut muted = frame.to_vec();
            muted[4..].fill(0);
            Bytes::from(muted)
        } else {
            Bytes::copy_from_slice(frame)
        };
        let spf = u64::from(info.samples_per_frame);
        let pts = samples_to_hst(self.frame_index * spf, info.hz);
        self.frame_index += 1;
        Buffer::from_data(data)
            .with_timing(pts, samples_to_hst(spf, info.hz))
            .with_track(0)
            .with_flags(BufferFlags::KEY_FRAME)
    }
}

impl Default for Mp3Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatParser for Mp3Parser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn buffer_capacity(&self) -> usize {
        MP3_BUFFER_SIZE
    }

    fn parse_media_info(&mut self, reader: &mut RetryingReader) -> HiResult<MediaInfo> {
        reader.ensure(ID3_HEADER_SIZE)?;
        self.id3_size = id3v2_size(reader.data()) as u64;
        self.id3_remaining = self.id3_size;
        if self.id3_size > 0 {
            debug!("MP3: ID3v2 标签 {} 字节", self.id3_size);
        }
        self.skip_id3(reader)?;

        let info = self.find_first_frame(reader)?;
        let bit_rate = u64::from(info.bitrate_kbps) * 1000;
        debug!(
            "MP3: mpeg{} layer{} {}Hz {}ch {}kbps",
            info.version.number(),
            info.layer,
            info.hz,
            info.channels,
            info.bitrate_kbps
        );

        let file_size = reader.file_size();
        let mut general = Meta::new()
            .with(Tag::MediaFileSize(file_size))
            .with(Tag::MediaSeekable(reader.seekable()));
        if reader.is_seekable() {
            general.set(Tag::MediaDuration(bytes_to_hst(
                file_size.saturating_sub(self.id3_size),
                bit_rate,
            )));
        }

        let track = Meta::new()
            .with(Tag::TrackId(0))
            .with(Tag::Mime(mime::AUDIO_MPEG.into()))
            .with(Tag::AudioSampleRate(info.hz))
            .with(Tag::AudioChannels(info.channels))
            .with(Tag::AudioChannelLayout(ChannelLayout::from_channels(info.channels)))
            .with(Tag::AudioSamplesPerFrame(info.samples_per_frame))
            .with(Tag::AudioMpegVersion(info.version.number()))
            .with(Tag::AudioMpegLayer(u32::from(info.layer)))
            .with(Tag::BitRate(bit_rate));

        self.first = Some(info);
        self.frame_index = 0;
        self.discard_left = 0;
        Ok(MediaInfo {
            general,
            tracks: vec![track],
        })
    }

    fn read_frame(&mut self, reader: &mut RetryingReader) -> HiResult<Buffer> {
        loop {
            self.skip_id3(reader)?;
            let at_eof = reader.source_exhausted();
            let mut found = None;
            let consumed = iterate(reader.data(), at_eof, |info, frame, _| {
                found = Some((*info, Bytes::copy_from_slice(frame)));
                true
            });
            reader.consume(consumed);
            if let Some((info, frame)) = found {
                return Ok(self.build_buffer(&info, &frame));
            }
            if at_eof {
                return Err(HiError::EndOfStream);
            }
            if consumed == 0 && reader.remain() >= reader.capacity() {
                warn!("MP3: 缓冲区已满仍未找到帧, 丢弃 1 字节");
                reader.consume(1);
            }
            reader.ensure(reader.remain() + 1)?;
        }
    }

    fn seek_to(&mut self, reader: &mut RetryingReader, hst_time: i64, _mode: SeekMode) -> HiResult<()> {
        if !reader.is_seekable() {
            return Err(HiError::Unimplemented("MP3: 不可寻址数据源不支持 seek".into()));
        }
        let info = self
            .first
            .ok_or_else(|| HiError::WrongState("MP3: 尚未解析头部".into()))?;
        let ms = hst_to_ms(hst_time).max(0) as u64;
        let target = ms * u64::from(info.bitrate_kbps) / 8 + self.id3_size;
        if target > reader.file_size() {
            reader.reset_to(0);
            self.id3_remaining = self.id3_size;
            self.frame_index = 0;
            self.discard_left = 0;
            return Err(HiError::InvalidParameter(format!(
                "MP3: seek 位置 {} 超出文件大小 {}",
                target,
                reader.file_size()
            )));
        }
        reader.reset_to(target);
        self.id3_remaining = 0;
        self.frame_index = ms * u64::from(info.hz) / u64::from(info.samples_per_frame) / 1000;
        self.discard_left = self.seek_discard_frames;
        debug!("MP3: seek 到字节 {}, 帧序号 {}", target, self.frame_index);
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::new().with_seek_discard_frames(self.seek_discard_frames);
    }
}

/// MP3 插件类型
pub type Mp3DemuxerPlugin = FormatDemuxer<Mp3Parser>;

impl Mp3DemuxerPlugin {
    /// 设置 seek 后静音的帧数 (默认 [`MP3_SEEK_DISCARD_FRAMES`])
    pub fn with_seek_discard_frames(mut self, frames: u32) -> Self {
        self.parser_mut().seek_discard_frames = frames;
        self
    }
}

/// 插件创建函数
pub fn create(_name: &str) -> Box<dyn DemuxerPlugin> {
    Box::new(Mp3DemuxerPlugin::new(Mp3Parser::new()))
}

/// 探测: 跳过 ID3v2 标签后能找到一个通过参考表校验的帧
pub fn sniff(name: &str, source: &SharedSource) -> ProbeScore {
    // 探测先于插件创建, 使用固定的默认重试参数
    let config = ReaderConfig::default();
    if !source.seekable().is_seekable() {
        // 顺序流只能读一次, ID3 标签与帧数据都在同一段前缀内
        return match probe::read_prefix(source, 0, STREAM_PROBE_SIZE, config) {
            Ok(prefix) => {
                let id3_size = id3v2_size(&prefix).min(prefix.len());
                let rest = &prefix[id3_size..];
                score_window(&rest[..rest.len().min(MP3_SNIFF_WINDOW)])
            }
            Err(e) => {
                debug!("{}: 探测读取失败: {}", name, e);
                SCORE_NONE
            }
        };
    }
    let head = match probe::read_prefix(source, 0, ID3_HEADER_SIZE, config) {
        Ok(head) => head,
        Err(e) => {
            debug!("{}: 探测读取失败: {}", name, e);
            return SCORE_NONE;
        }
    };
    let id3_size = id3v2_size(&head) as u64;
    probe::sniff_prefix(name, source, id3_size, MP3_SNIFF_WINDOW, config, |window| {
        score_window(window) == SCORE_MAX
    })
}

fn score_window(window: &[u8]) -> ProbeScore {
    let at_eof = window.len() < MP3_SNIFF_WINDOW;
    let mut matched = false;
    iterate(window, at_eof, |info, _, _| {
        matched = decode_check(info);
        true
    });
    if matched { SCORE_MAX } else { SCORE_NONE }
}

/// 插件定义
pub fn plugin_def() -> DemuxerPluginDef {
    DemuxerPluginDef {
        name: NAME.into(),
        description: "mp3 demuxer plugin".into(),
        rank: 100,
        creator: create,
        sniffer: sniff,
    }
}
