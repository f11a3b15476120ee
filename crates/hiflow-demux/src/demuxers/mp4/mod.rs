//! MP4 (ISO Base Media File Format) 音频解封装插件.
//!
//! 只取第一条 `soun`/`mp4a` 轨道, 每个 AAC 采样前补一个 7 字节 ADTS 头输出,
//! 下游按 ADTS 流处理. 头部与采样都通过 [`ReadCallback`] 按区间读取, 只支持可寻址数据源.
//!
//! # Box 树结构
//! ```text
//! ftyp                  文件类型
//! moov                  影片元数据
//! ├── mvhd              影片头部
//! └── trak              轨道
//!     ├── tkhd          轨道头部 (track_id)
//!     └── mdia
//!         ├── mdhd      媒体头部 (时间刻度, 时长)
//!         ├── hdlr      处理器引用 (soun)
//!         └── minf
//!             └── stbl  采样表 (stsd/stts/stsc/stsz/stco/co64)
//! mdat                  媒体数据
//! ```

mod boxes;
mod sample_table;

pub use boxes::{BoxCursor, BoxHeader, BoxType, ReadCallback, read_box_header};
pub use sample_table::SampleTable;

use bytes::Bytes;
use log::debug;

use hiflow_core::meta::{AacProfile, AacStreamFormat, mime};
use hiflow_core::time::HST_SECOND;
use hiflow_core::{Buffer, BufferFlags, ChannelLayout, HiError, HiResult, Meta, Tag};

use crate::data_source::SharedSource;
use crate::demuxers::aac::{AAC_SAMPLE_RATES, ADTS_HEADER_SIZE};
use crate::plugin::{DemuxerPlugin, FormatDemuxer, FormatParser, MediaInfo, SeekMode};
use crate::probe::{self, ProbeScore};
use crate::reader::{ReaderConfig, RetryingReader};
use crate::registry::DemuxerPluginDef;

/// 插件名称
pub const NAME: &str = "minimp4";

/// 暂存缓冲区容量
const MP4_BUFFER_SIZE: usize = 16 * 1024;

/// DecoderSpecificInfo 长度上限 (不含)
const MAX_DSI_LEN: usize = 20;

/// ADTS frame_length 字段上限
const MAX_ADTS_FRAME_LEN: usize = 0x1FFF;

/// AudioSpecificConfig 中解出的解码参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacDsi {
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub channels: u8,
}

impl AacDsi {
    pub fn sample_rate(&self) -> u32 {
        AAC_SAMPLE_RATES[usize::from(self.sampling_frequency_index)]
    }

    /// 合成 7 字节 ADTS 头 (无 CRC), `frame_len` 含头部
    pub fn adts_header(&self, frame_len: usize) -> [u8; ADTS_HEADER_SIZE] {
        let len = frame_len as u32;
        let profile = self.object_type.wrapping_sub(1) & 0x03;
        let ch = self.channels;
        [
            0xFF,
            0xF1,
            (profile << 6) | (self.sampling_frequency_index << 2) | ((ch >> 2) & 0x01),
            ((ch & 0x03) << 6) | ((len >> 11) & 0x03) as u8,
            ((len >> 3) & 0xFF) as u8,
            (((len & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ]
    }
}

/// 解析 AudioSpecificConfig
///
/// 长度不小于 20 字节或采样率索引越界时返回 [`HiError::MismatchedType`].
pub fn parse_dsi(dsi: &[u8]) -> HiResult<AacDsi> {
    if dsi.len() >= MAX_DSI_LEN || dsi.len() < 2 {
        return Err(HiError::MismatchedType(format!("MP4: dsi 长度 {} 无效", dsi.len())));
    }
    let sampling_frequency_index = ((dsi[0] & 0x07) << 1) + (dsi[1] >> 7);
    if usize::from(sampling_frequency_index) >= AAC_SAMPLE_RATES.len() {
        return Err(HiError::MismatchedType(format!(
            "MP4: 采样率索引 {} 越界",
            sampling_frequency_index
        )));
    }
    Ok(AacDsi {
        object_type: dsi[0] >> 3,
        sampling_frequency_index,
        channels: (dsi[1] & 0x7F) >> 3,
    })
}

/// 媒体时间刻度转 HST
fn ticks_to_hst(ticks: u64, timescale: u32) -> i64 {
    if timescale == 0 {
        return 0;
    }
    let v = i128::from(ticks) * i128::from(HST_SECOND) / i128::from(timescale);
    v.min(i128::from(i64::MAX)) as i64
}

/// 解析出的轨道
#[derive(Debug, Clone, Default)]
pub struct Mp4Track {
    pub track_id: u32,
    pub timescale: u32,
    /// mdhd 中的时长 (媒体时间刻度)
    pub duration: u64,
    pub handler: [u8; 4],
    pub table: SampleTable,
}

impl Mp4Track {
    fn is_aac_audio(&self) -> bool {
        &self.handler == b"soun" && &self.table.format == b"mp4a"
    }

    /// 时长 (媒体时间刻度), mdhd 未给出时由 stts 累加
    fn duration_ticks(&self) -> u64 {
        if self.duration > 0 {
            self.duration
        } else {
            self.table.total_time()
        }
    }
}

fn parse_moov(cur: &mut BoxCursor<'_>, moov_end: u64, tracks: &mut Vec<Mp4Track>) -> HiResult<()> {
    while cur.position() + 8 <= moov_end {
        let start = cur.position();
        let header = read_box_header(cur)?;
        let box_end = header.end(start, moov_end).min(moov_end);
        if header.box_type == BoxType::Trak {
            let mut track = Mp4Track::default();
            parse_trak_boxes(cur, box_end, &mut track)?;
            debug!(
                "MP4: 轨道 id={} handler={} format={} timescale={} samples={}",
                track.track_id,
                String::from_utf8_lossy(&track.handler),
                String::from_utf8_lossy(&track.table.format),
                track.timescale,
                track.table.sample_count()
            );
            tracks.push(track);
        }
        if box_end <= start {
            break;
        }
        cur.seek(box_end);
    }
    Ok(())
}

/// 递归解析 trak 内部的 box
fn parse_trak_boxes(cur: &mut BoxCursor<'_>, end: u64, track: &mut Mp4Track) -> HiResult<()> {
    while cur.position() + 8 <= end {
        let start = cur.position();
        let header = read_box_header(cur)?;
        let box_end = header.end(start, end).min(end);

        match header.box_type {
            BoxType::Mdia | BoxType::Minf | BoxType::Stbl => {
                parse_trak_boxes(cur, box_end, track)?;
            }
            BoxType::Tkhd => {
                let version = cur.read_full_box_header()?;
                // creation + modification
                cur.skip(if version == 0 { 8 } else { 16 });
                track.track_id = cur.read_u32_be()?;
            }
            BoxType::Mdhd => {
                let version = cur.read_full_box_header()?;
                if version == 0 {
                    cur.skip(8);
                    track.timescale = cur.read_u32_be()?;
                    track.duration = u64::from(cur.read_u32_be()?);
                } else {
                    cur.skip(16);
                    track.timescale = cur.read_u32_be()?;
                    track.duration = cur.read_u64_be()?;
                }
            }
            BoxType::Hdlr => {
                cur.read_full_box_header()?;
                let _pre_defined = cur.read_u32_be()?;
                track.handler = cur.read_tag()?;
            }
            BoxType::Stsd => track.table.parse_stsd(cur, box_end)?,
            BoxType::Stts => track.table.parse_stts(cur)?,
            BoxType::Stsc => track.table.parse_stsc(cur)?,
            BoxType::Stsz => track.table.parse_stsz(cur)?,
            BoxType::Stco => track.table.parse_stco(cur, false)?,
            BoxType::Co64 => track.table.parse_stco(cur, true)?,
            _ => {}
        }

        if box_end <= start {
            break;
        }
        cur.seek(box_end);
    }
    Ok(())
}

/// 遍历顶层 box, 收集 moov 中的所有轨道
pub fn read_tracks(cb: &mut dyn ReadCallback) -> HiResult<Vec<Mp4Track>> {
    let file_size = cb.size();
    let mut cur = BoxCursor::new(cb);
    let mut tracks = Vec::new();
    let mut has_moov = false;

    while cur.position() + 8 <= file_size {
        let start = cur.position();
        let header = read_box_header(&mut cur)?;
        let box_end = header.end(start, file_size);
        match header.box_type {
            BoxType::Ftyp => {
                let brand = cur.read_tag()?;
                debug!("MP4: major brand {}", String::from_utf8_lossy(&brand));
            }
            BoxType::Moov => {
                parse_moov(&mut cur, box_end.min(file_size), &mut tracks)?;
                has_moov = true;
            }
            _ => {}
        }
        if box_end <= start {
            break;
        }
        cur.seek(box_end);
    }

    if !has_moov {
        return Err(HiError::UnsupportedFormat("MP4: 未找到 moov".into()));
    }
    Ok(tracks)
}

/// MP4 解析器
#[derive(Debug, Default)]
pub struct Mp4Parser {
    track: Option<Mp4Track>,
    dsi: Option<AacDsi>,
    /// 下一个输出的采样序号
    sample_index: u32,
    /// 首个采样的文件偏移
    first_offset: u64,
    /// 平均码率 (bit/s)
    avg_bitrate: u64,
}

impl Mp4Parser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一个输出的采样序号
    pub fn sample_index(&self) -> u32 {
        self.sample_index
    }

    pub fn track(&self) -> Option<&Mp4Track> {
        self.track.as_ref()
    }
}

impl FormatParser for Mp4Parser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn buffer_capacity(&self) -> usize {
        MP4_BUFFER_SIZE
    }

    fn requires_seekable(&self) -> bool {
        true
    }

    fn parse_media_info(&mut self, reader: &mut RetryingReader) -> HiResult<MediaInfo> {
        let tracks = read_tracks(reader).map_err(|e| match e {
            HiError::EndOfStream | HiError::NotEnoughData => {
                HiError::UnsupportedFormat("MP4: 文件被截断".into())
            }
            other => other,
        })?;
        let track = tracks
            .into_iter()
            .find(Mp4Track::is_aac_audio)
            .ok_or_else(|| HiError::UnsupportedFormat("MP4: 没有 AAC 音频轨道".into()))?;
        let dsi = parse_dsi(&track.table.dsi)?;
        let sample_rate = dsi.sample_rate();
        let channels = if dsi.channels > 0 {
            u32::from(dsi.channels)
        } else {
            track.table.channel_count
        };

        let ticks = track.duration_ticks();
        let duration = ticks_to_hst(ticks, track.timescale);
        self.avg_bitrate = if ticks > 0 {
            (u128::from(track.table.total_size()) * 8 * u128::from(track.timescale) / u128::from(ticks))
                as u64
        } else {
            0
        };
        self.first_offset = if track.table.sample_count() > 0 {
            track.table.sample_offset(0)
        } else {
            0
        };
        debug!(
            "MP4: AAC object_type={} {}Hz {}ch, {} 个采样, 平均码率 {}",
            dsi.object_type,
            sample_rate,
            channels,
            track.table.sample_count(),
            self.avg_bitrate
        );

        let general = Meta::new()
            .with(Tag::MediaFileSize(reader.file_size()))
            .with(Tag::MediaSeekable(reader.seekable()))
            .with(Tag::MediaDuration(duration));
        let meta = Meta::new()
            .with(Tag::TrackId(0))
            .with(Tag::Mime(mime::AUDIO_AAC.into()))
            .with(Tag::AudioSampleRate(sample_rate))
            .with(Tag::AudioChannels(channels))
            .with(Tag::AudioChannelLayout(ChannelLayout::from_channels(channels)))
            .with(Tag::AudioSamplesPerFrame(1024))
            .with(Tag::AudioMpegVersion(4))
            .with(Tag::AudioAacProfile(AacProfile::from_adts(dsi.object_type.wrapping_sub(1))))
            .with(Tag::AudioAacStreamFormat(AacStreamFormat::Adts))
            .with(Tag::BitRate(self.avg_bitrate))
            .with(Tag::MediaDuration(duration))
            .with(Tag::MediaCodecConfig(track.table.dsi.clone()));

        self.track = Some(track);
        self.dsi = Some(dsi);
        self.sample_index = 0;
        Ok(MediaInfo {
            general,
            tracks: vec![meta],
        })
    }

    fn read_frame(&mut self, reader: &mut RetryingReader) -> HiResult<Buffer> {
        let (Some(track), Some(dsi)) = (self.track.as_ref(), self.dsi) else {
            return Err(HiError::WrongState("MP4: 尚未解析头部".into()));
        };
        let table = &track.table;
        let idx = self.sample_index;
        if idx >= table.sample_count() {
            return Err(HiError::EndOfStream);
        }

        let size = table.sample_size(idx) as usize;
        let frame_len = size + ADTS_HEADER_SIZE;
        if frame_len > MAX_ADTS_FRAME_LEN {
            return Err(HiError::MismatchedType(format!(
                "MP4: 采样 {} 大小 {} 超出 ADTS 帧长上限",
                idx, size
            )));
        }
        let mut frame = vec![0u8; frame_len];
        frame[..ADTS_HEADER_SIZE].copy_from_slice(&dsi.adts_header(frame_len));
        reader.read_window(table.sample_offset(idx), &mut frame[ADTS_HEADER_SIZE..])?;

        let pts = ticks_to_hst(table.sample_time(idx), track.timescale);
        let duration = ticks_to_hst(u64::from(table.sample_delta(idx)), track.timescale);
        self.sample_index += 1;
        Ok(Buffer::from_data(Bytes::from(frame))
            .with_timing(pts, duration)
            .with_track(0)
            .with_flags(BufferFlags::KEY_FRAME))
    }

    fn seek_to(&mut self, reader: &mut RetryingReader, hst_time: i64, _mode: SeekMode) -> HiResult<()> {
        let track = self
            .track
            .as_ref()
            .ok_or_else(|| HiError::WrongState("MP4: 尚未解析头部".into()))?;
        let table = &track.table;
        let delta = u128::from(hst_time.max(0) as u64) * u128::from(self.avg_bitrate) / 8 / HST_SECOND as u128;
        let target = self.first_offset.saturating_add(delta as u64);
        // 按采样表顺序线性查找
        let count = table.sample_count();
        self.sample_index = (0..count)
            .find(|&i| table.sample_offset(i) >= target)
            .unwrap_or(count);
        let resume = if self.sample_index < count {
            table.sample_offset(self.sample_index)
        } else {
            reader.file_size()
        };
        reader.reset_to(resume);
        debug!("MP4: seek 到字节 {}, 采样 {}/{}", target, self.sample_index, count);
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// MP4 插件类型
pub type Mp4DemuxerPlugin = FormatDemuxer<Mp4Parser>;

/// 插件创建函数
pub fn create(_name: &str) -> Box<dyn DemuxerPlugin> {
    Box::new(Mp4DemuxerPlugin::new(Mp4Parser::new()))
}

/// 探测: 偏移 4 处为 "ftyp"
pub fn sniff(name: &str, source: &SharedSource) -> ProbeScore {
    probe::sniff_prefix(name, source, 4, 4, ReaderConfig::no_retry(), |data| data == b"ftyp")
}

/// 插件定义
pub fn plugin_def() -> DemuxerPluginDef {
    DemuxerPluginDef {
        name: NAME.into(),
        description: "mp4 audio demuxer plugin".into(),
        rank: 100,
        creator: create,
        sniffer: sniff,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::data_source::{MemorySource, StreamSource};
    use crate::demuxers::aac::parse_adts_header;
    use crate::probe::{SCORE_MAX, SCORE_NONE};

    fn mp4_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(fourcc);
        out.extend_from_slice(body);
        out
    }

    fn full_box(fourcc: &[u8; 4], version: u8, body: &[u8]) -> Vec<u8> {
        let mut content = vec![version, 0, 0, 0];
        content.extend_from_slice(body);
        mp4_box(fourcc, &content)
    }

    fn u32s(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    /// 构造单轨 AAC-LC 44100Hz 立体声 MP4
    ///
    /// 布局 ftyp | mdat | moov, 每块 `per_chunk` 个采样, 每个采样时长 1024.
    /// 第 k 个采样以 k 填充.
    pub(crate) fn build_mp4(sizes: &[u32], per_chunk: u32) -> Vec<u8> {
        let mut out = mp4_box(b"ftyp", b"M4A \0\0\0\0isomM4A ");

        let mut mdat_body = Vec::new();
        for (k, &size) in sizes.iter().enumerate() {
            mdat_body.extend_from_slice(&vec![k as u8; size as usize]);
        }
        let data_start = (out.len() + 8) as u32;
        out.extend_from_slice(&mp4_box(b"mdat", &mdat_body));

        let mut chunk_offsets = Vec::new();
        let mut pos = data_start;
        for (k, &size) in sizes.iter().enumerate() {
            if k as u32 % per_chunk == 0 {
                chunk_offsets.push(pos);
            }
            pos += size;
        }

        // esds: ES_Descriptor > DecoderConfigDescriptor > DecoderSpecificInfo [0x12, 0x10]
        let esds_body = [
            0x03, 0x19, 0x00, 0x01, 0x00, 0x04, 0x11, 0x40, 0x15, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            0x05, 0x02, 0x12, 0x10, 0x06, 0x01, 0x02,
        ];
        let mut mp4a = vec![0u8; 6];
        mp4a.extend_from_slice(&1u16.to_be_bytes());
        mp4a.extend_from_slice(&[0u8; 8]);
        mp4a.extend_from_slice(&2u16.to_be_bytes());
        mp4a.extend_from_slice(&16u16.to_be_bytes());
        mp4a.extend_from_slice(&[0u8; 4]);
        mp4a.extend_from_slice(&(44100u32 << 16).to_be_bytes());
        mp4a.extend_from_slice(&full_box(b"esds", 0, &esds_body));

        let mut stsd = u32s(&[1]);
        stsd.extend_from_slice(&mp4_box(b"mp4a", &mp4a));
        let mut stsz = u32s(&[0, sizes.len() as u32]);
        stsz.extend_from_slice(&u32s(sizes));
        let mut stco = u32s(&[chunk_offsets.len() as u32]);
        stco.extend_from_slice(&u32s(&chunk_offsets));

        let stbl = [
            full_box(b"stsd", 0, &stsd),
            full_box(b"stts", 0, &u32s(&[1, sizes.len() as u32, 1024])),
            full_box(b"stsc", 0, &u32s(&[1, 1, per_chunk, 1])),
            full_box(b"stsz", 0, &stsz),
            full_box(b"stco", 0, &stco),
        ]
        .concat();
        let minf = mp4_box(b"stbl", &stbl);
        let mut hdlr = u32s(&[0]);
        hdlr.extend_from_slice(b"soun");
        hdlr.extend_from_slice(&[0u8; 12]);
        let mdhd = u32s(&[0, 0, 44100, sizes.len() as u32 * 1024, 0]);
        let mdia = [
            full_box(b"mdhd", 0, &mdhd),
            full_box(b"hdlr", 0, &hdlr),
            mp4_box(b"minf", &minf),
        ]
        .concat();
        let tkhd = u32s(&[0, 0, 1, 0, 0]);
        let trak = [full_box(b"tkhd", 0, &tkhd), mp4_box(b"mdia", &mdia)].concat();
        let mvhd = u32s(&[0, 0, 1000, 0]);
        let moov = [full_box(b"mvhd", 0, &mvhd), mp4_box(b"trak", &trak)].concat();
        out.extend_from_slice(&mp4_box(b"moov", &moov));
        out
    }

    fn open(data: Vec<u8>) -> Mp4DemuxerPlugin {
        let mut plugin = Mp4DemuxerPlugin::new(Mp4Parser::new());
        plugin.init().unwrap();
        plugin.set_data_source(MemorySource::shared(data)).unwrap();
        plugin.prepare().unwrap();
        plugin
    }

    #[test]
    fn test_dsi_解析() {
        let dsi = parse_dsi(&[0x12, 0x10]).unwrap();
        assert_eq!(dsi.object_type, 2);
        assert_eq!(dsi.sampling_frequency_index, 4);
        assert_eq!(dsi.channels, 2);
        assert_eq!(dsi.sample_rate(), 44100);
        // 索引 15 越界
        assert!(matches!(parse_dsi(&[0x17, 0x90]), Err(HiError::MismatchedType(_))));
        assert!(matches!(parse_dsi(&[0u8; 20]), Err(HiError::MismatchedType(_))));
        assert!(matches!(parse_dsi(&[0x12]), Err(HiError::MismatchedType(_))));
    }

    #[test]
    fn test_adts_头合成() {
        let dsi = parse_dsi(&[0x12, 0x10]).unwrap();
        let header = dsi.adts_header(300);
        let parsed = parse_adts_header(&header).unwrap();
        assert_eq!(parsed.frame_length, 300);
        assert_eq!(parsed.profile, AacProfile::Lc);
        assert_eq!(parsed.sample_rate(), 44100);
        assert_eq!(parsed.channels(), 2);
        assert_eq!(header[6], 0xFC);
    }

    #[test]
    fn test_媒体信息() {
        let sizes = [100, 120, 90, 110, 105];
        let mut plugin = open(build_mp4(&sizes, 2));
        let info = plugin.get_media_info().unwrap();
        let track = &info.tracks[0];
        assert_eq!(track.mime(), Some(mime::AUDIO_AAC));
        assert_eq!(track.sample_rate(), Some(44100));
        assert_eq!(track.channels(), Some(2));
        assert_eq!(track.aac_profile(), Some(AacProfile::Lc));
        assert_eq!(track.codec_config(), Some(&[0x12, 0x10][..]));
        assert_eq!(info.general.duration(), Some(ticks_to_hst(5 * 1024, 44100)));
        // 525 字节 / (5120 / 44100) 秒
        assert_eq!(track.bit_rate(), Some(525 * 8 * 44100 / 5120));
    }

    #[test]
    fn test_采样单调递增并在末尾结束() {
        let sizes = [100, 120, 90, 110, 105, 80, 95];
        let mut plugin = open(build_mp4(&sizes, 3));
        plugin.get_media_info().unwrap();
        plugin.start().unwrap();
        for (k, &size) in sizes.iter().enumerate() {
            assert_eq!(plugin.parser().sample_index(), k as u32);
            let frame = plugin.read_frame(0).unwrap();
            assert_eq!(frame.len(), size as usize + ADTS_HEADER_SIZE);
            assert_eq!(parse_adts_header(&frame.data).unwrap().frame_length, frame.len());
            assert!(frame.data[ADTS_HEADER_SIZE..].iter().all(|&b| b == k as u8));
            assert_eq!(frame.pts, ticks_to_hst(k as u64 * 1024, 44100));
        }
        assert_eq!(plugin.parser().sample_index(), sizes.len() as u32);
        assert!(plugin.read_frame(0).unwrap_err().is_eos());
        assert!(plugin.read_frame(0).unwrap_err().is_eos());
        assert_eq!(plugin.parser().sample_index(), sizes.len() as u32);
    }

    #[test]
    fn test_seek_线性查找() {
        let sizes = [100u32; 20];
        let mut plugin = open(build_mp4(&sizes, 4));
        plugin.get_media_info().unwrap();
        // 平均码率 = 2000 * 8 * 44100 / 20480 = 34453, 0.1s 约 430 字节
        plugin.seek_to(0, HST_SECOND / 10, SeekMode::PreviousSync).unwrap();
        assert_eq!(plugin.parser().sample_index(), 5);
        let frame = plugin.read_frame(0).unwrap();
        assert_eq!(frame.data[ADTS_HEADER_SIZE], 5);

        plugin.seek_to(0, 100 * HST_SECOND, SeekMode::PreviousSync).unwrap();
        assert!(plugin.read_frame(0).unwrap_err().is_eos());
        plugin.seek_to(0, 0, SeekMode::PreviousSync).unwrap();
        assert_eq!(plugin.read_frame(0).unwrap().pts, 0);
    }

    #[test]
    fn test_seek_清空缓冲区() {
        let sizes = [100u32; 20];
        let mut plugin = open(build_mp4(&sizes, 4));
        plugin.get_media_info().unwrap();
        plugin.read_frame(0).unwrap();
        assert!(plugin.reader().unwrap().remain() > 0);

        plugin.seek_to(0, HST_SECOND / 10, SeekMode::PreviousSync).unwrap();
        let reader = plugin.reader().unwrap();
        assert_eq!(reader.remain(), 0);
        let table = &plugin.parser().track.as_ref().unwrap().table;
        assert_eq!(reader.offset(), table.sample_offset(5));
        assert_eq!(plugin.read_frame(0).unwrap().data[ADTS_HEADER_SIZE], 5);

        plugin.seek_to(0, 100 * HST_SECOND, SeekMode::PreviousSync).unwrap();
        assert_eq!(plugin.reader().unwrap().remain(), 0);
        assert!(plugin.read_frame(0).unwrap_err().is_eos());
    }

    #[test]
    fn test_不可寻址数据源() {
        let mut plugin = Mp4DemuxerPlugin::new(Mp4Parser::new());
        plugin.init().unwrap();
        let src: SharedSource = Arc::new(StreamSource::from_data(build_mp4(&[10], 1)));
        assert!(matches!(
            plugin.set_data_source(src),
            Err(HiError::Unimplemented(_))
        ));
    }

    #[test]
    fn test_缺少_moov() {
        let data = mp4_box(b"ftyp", b"isom\0\0\0\0");
        let mut plugin = open(data);
        assert!(matches!(
            plugin.get_media_info(),
            Err(HiError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_探测() {
        assert_eq!(sniff(NAME, &MemorySource::shared(build_mp4(&[10], 1))), SCORE_MAX);
        assert_eq!(sniff(NAME, &MemorySource::shared(b"RIFF\0\0\0\0WAVE".to_vec())), SCORE_NONE);
    }
}
