//! AAC ADTS 裸流解封装插件.
//!
//! 每个 ADTS 帧由 7 字节 (带 CRC 时 9 字节) 头部加 AAC 帧数据组成,
//! 插件按帧切分, 输出包含头部的完整帧.
//!
//! # ADTS 帧头
//! ```text
//! 固定头部 (28 bits):
//!   sync word (12 bits = 0xFFF)
//!   ID (1 bit): 0=MPEG-4, 1=MPEG-2
//!   layer (2 bits): always 0
//!   protection_absent (1 bit)
//!   profile (2 bits): 0=Main, 1=LC, 2=SSR, 3=LTP
//!   sampling_frequency_index (4 bits)
//!   private_bit (1 bit)
//!   channel_configuration (3 bits)
//!   original_copy (1 bit), home (1 bit)
//! 可变头部 (28 bits):
//!   copyright_id_bit (1 bit), copyright_id_start (1 bit)
//!   frame_length (13 bits): 含头部的完整帧大小
//!   adts_buffer_fullness (11 bits)
//!   number_of_raw_data_blocks (2 bits)
//! ```
//!
//! 切帧时除了头部本身, 还要求 `frame_length` 处紧跟下一个同步字;
//! 校验失败则丢弃 1 字节重新同步. 数据源读完后, 最后一帧不再要求后继同步字.

use bytes::Bytes;
use log::{debug, warn};

use hiflow_core::meta::{AacProfile, AacStreamFormat, mime};
use hiflow_core::time::{HST_SECOND, samples_to_hst};
use hiflow_core::{
    Buffer, BufferFlags, ChannelLayout, HiError, HiResult, Meta, Tag,
};

use crate::data_source::SharedSource;
use crate::plugin::{DemuxerPlugin, FormatDemuxer, FormatParser, MediaInfo, SeekMode};
use crate::probe::{self, ProbeScore};
use crate::reader::{ReaderConfig, RetryingReader};
use crate::registry::DemuxerPluginDef;

/// 插件名称
pub const NAME: &str = "aac";

/// 暂存缓冲区容量
const AAC_BUFFER_SIZE: usize = 16 * 1024;

/// ADTS 头部长度 (不含 CRC)
pub const ADTS_HEADER_SIZE: usize = 7;

/// 每帧采样数
const SAMPLES_PER_FRAME: u32 = 1024;

/// AAC 采样率索引表 (ISO 14496-3)
pub const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// ADTS 帧头部信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdtsHeader {
    /// MPEG 版本 (4 或 2)
    pub mpeg_version: u32,
    pub profile: AacProfile,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    /// 帧总大小 (含头部)
    pub frame_length: usize,
    pub has_crc: bool,
}

impl AdtsHeader {
    /// 采样率 (索引越界时为 0)
    pub fn sample_rate(&self) -> u32 {
        AAC_SAMPLE_RATES
            .get(self.sampling_frequency_index as usize)
            .copied()
            .unwrap_or(0)
    }

    /// 声道数 (配置 0 按立体声处理, 7 为 7.1)
    pub fn channels(&self) -> u32 {
        match self.channel_configuration {
            0 => 2,
            7 => 8,
            n => u32::from(n),
        }
    }

    /// 2 字节 AudioSpecificConfig
    pub fn audio_specific_config(&self) -> [u8; 2] {
        let aot = self.profile.object_type();
        let sfi = self.sampling_frequency_index;
        let cc = self.channel_configuration;
        [(aot << 3) | (sfi >> 1), ((sfi & 1) << 7) | (cc << 3)]
    }
}

/// 是否为 ADTS 同步模式
///
/// 0xFF, 高 4 位 0xF, layer 位为 0.
pub fn is_aac_pattern(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0xFF && (data[1] & 0xF0) == 0xF0 && (data[1] & 0x06) == 0
}

/// 解析 ADTS 帧头部
///
/// 同步模式不匹配返回 `None`. 采样率索引与帧长不在此校验.
pub fn parse_adts_header(data: &[u8]) -> Option<AdtsHeader> {
    if data.len() < ADTS_HEADER_SIZE || !is_aac_pattern(data) {
        return None;
    }
    let mpeg_version = if (data[1] >> 3) & 0x01 == 0 { 4 } else { 2 };
    let protection_absent = (data[1] & 0x01) != 0;
    let profile = AacProfile::from_adts(data[2] >> 6);
    let sampling_frequency_index = (data[2] >> 2) & 0x0F;
    let channel_configuration = ((data[2] & 0x01) << 2) | (data[3] >> 6);
    // frame_length (13 bits): data[3] 低 2 位 + data[4] + data[5] 高 3 位
    let frame_length = (usize::from(data[3] & 0x03) << 11)
        | (usize::from(data[4]) << 3)
        | (usize::from(data[5]) >> 5);

    Some(AdtsHeader {
        mpeg_version,
        profile,
        sampling_frequency_index,
        channel_configuration,
        frame_length,
        has_crc: !protection_absent,
    })
}

/// 单步切帧结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AacStep {
    /// 缓冲区开头是一帧, 长度为给定值
    Frame(usize),
    /// 至少需要这么多字节才能判断
    NeedMore(usize),
    /// 丢弃若干字节以重新同步
    Skip(usize),
}

/// 在缓冲区开头尝试切出一帧
fn process(data: &[u8], at_eof: bool) -> HiResult<AacStep> {
    if data.len() < ADTS_HEADER_SIZE {
        return Ok(AacStep::NeedMore(ADTS_HEADER_SIZE));
    }
    let Some(header) = parse_adts_header(data) else {
        return Ok(AacStep::Skip(1));
    };
    let frame_length = header.frame_length;
    if frame_length == 0 {
        return Err(HiError::Unknown("AAC: 帧长度为 0".into()));
    }
    if frame_length < ADTS_HEADER_SIZE {
        return Ok(AacStep::Skip(1));
    }
    if frame_length + 2 > data.len() {
        if at_eof && frame_length <= data.len() {
            return Ok(AacStep::Frame(frame_length));
        }
        return Ok(AacStep::NeedMore(frame_length + 2));
    }
    if is_aac_pattern(&data[frame_length..]) {
        Ok(AacStep::Frame(frame_length))
    } else {
        debug!("AAC: 帧尾未找到同步字, 重新同步");
        Ok(AacStep::Skip(1))
    }
}

/// AAC 解析器
#[derive(Debug, Default)]
pub struct AacParser {
    header: Option<AdtsHeader>,
    /// 已输出的帧数
    frame_index: u64,
    /// 平均码率 (bit/s, 由首帧估算)
    bit_rate: u64,
}

impl AacParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn sample_rate(&self) -> u32 {
        self.header.as_ref().map_or(0, AdtsHeader::sample_rate)
    }
}

impl FormatParser for AacParser {
    fn name(&self) -> &'static str {
        NAME
    }

    fn buffer_capacity(&self) -> usize {
        AAC_BUFFER_SIZE
    }

    fn parse_media_info(&mut self, reader: &mut RetryingReader) -> HiResult<MediaInfo> {
        if !reader.ensure(ADTS_HEADER_SIZE)? {
            return Err(HiError::UnsupportedFormat("AAC: 数据不足一个帧头".into()));
        }
        let header = parse_adts_header(reader.data())
            .ok_or_else(|| HiError::UnsupportedFormat("AAC: 未找到 ADTS 同步字".into()))?;
        let sample_rate = header.sample_rate();
        if sample_rate == 0 {
            return Err(HiError::MismatchedType(format!(
                "AAC: 不支持的采样率索引 {}",
                header.sampling_frequency_index
            )));
        }
        let channels = header.channels();
        self.bit_rate =
            header.frame_length as u64 * 8 * u64::from(sample_rate) / u64::from(SAMPLES_PER_FRAME);
        debug!(
            "AAC: mpeg{} profile={:?} sr={} ch={} 首帧 {} 字节, 估算码率 {}",
            header.mpeg_version,
            header.profile,
            sample_rate,
            channels,
            header.frame_length,
            self.bit_rate
        );

        let mut general = Meta::new()
            .with(Tag::MediaFileSize(reader.file_size()))
            .with(Tag::MediaSeekable(reader.seekable()));
        if reader.is_seekable() && self.bit_rate > 0 {
            general.set(Tag::MediaDuration(hiflow_core::time::bytes_to_hst(
                reader.file_size(),
                self.bit_rate,
            )));
        }

        let track = Meta::new()
            .with(Tag::TrackId(0))
            .with(Tag::Mime(mime::AUDIO_AAC.into()))
            .with(Tag::AudioSampleRate(sample_rate))
            .with(Tag::AudioChannels(channels))
            .with(Tag::AudioChannelLayout(ChannelLayout::from_channels(channels)))
            .with(Tag::AudioSamplesPerFrame(SAMPLES_PER_FRAME))
            .with(Tag::AudioMpegVersion(header.mpeg_version))
            .with(Tag::AudioAacProfile(header.profile))
            .with(Tag::AudioAacStreamFormat(AacStreamFormat::Adts))
            .with(Tag::BitRate(self.bit_rate))
            .with(Tag::MediaCodecConfig(header.audio_specific_config().to_vec()));

        self.header = Some(header);
        self.frame_index = 0;
        Ok(MediaInfo {
            general,
            tracks: vec![track],
        })
    }

    fn read_frame(&mut self, reader: &mut RetryingReader) -> HiResult<Buffer> {
        let sample_rate = self.sample_rate();
        loop {
            let at_eof = reader.source_exhausted();
            match process(reader.data(), at_eof)? {
                AacStep::Frame(len) => {
                    let data = Bytes::copy_from_slice(&reader.data()[..len]);
                    reader.consume(len);
                    let pts =
                        samples_to_hst(self.frame_index * u64::from(SAMPLES_PER_FRAME), sample_rate);
                    let duration = samples_to_hst(u64::from(SAMPLES_PER_FRAME), sample_rate);
                    self.frame_index += 1;
                    return Ok(Buffer::from_data(data)
                        .with_timing(pts, duration)
                        .with_track(0)
                        .with_flags(BufferFlags::KEY_FRAME));
                }
                AacStep::Skip(n) => reader.consume(n),
                AacStep::NeedMore(n) => {
                    if at_eof {
                        if reader.remain() > 0 {
                            warn!("AAC: 丢弃末尾不完整的 {} 字节", reader.remain());
                            reader.consume(reader.remain());
                        }
                        return Err(HiError::EndOfStream);
                    }
                    // 数据源读完时 ensure 返回 false, 下一轮按末尾处理
                    reader.ensure(n)?;
                }
            }
        }
    }

    fn seek_to(&mut self, reader: &mut RetryingReader, hst_time: i64, _mode: SeekMode) -> HiResult<()> {
        if !reader.is_seekable() {
            return Err(HiError::Unimplemented("AAC: 不可寻址数据源不支持 seek".into()));
        }
        let sample_rate = u64::from(self.sample_rate());
        if sample_rate == 0 || self.bit_rate == 0 {
            return Err(HiError::WrongState("AAC: 尚未解析头部".into()));
        }
        let hst = hst_time as u128;
        let pos = (hst * u128::from(self.bit_rate) / 8 / HST_SECOND as u128)
            .min(u128::from(reader.file_size())) as u64;
        self.frame_index =
            (hst * u128::from(sample_rate) / u128::from(SAMPLES_PER_FRAME) / HST_SECOND as u128) as u64;
        debug!("AAC: seek 到字节 {}, 帧序号 {}", pos, self.frame_index);
        reader.reset_to(pos);
        Ok(())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// AAC 插件类型
pub type AacDemuxerPlugin = FormatDemuxer<AacParser>;

/// 插件创建函数
pub fn create(_name: &str) -> Box<dyn DemuxerPlugin> {
    Box::new(AacDemuxerPlugin::new(AacParser::new()))
}

/// 探测: 开头 2 字节为 ADTS 同步模式
pub fn sniff(name: &str, source: &SharedSource) -> ProbeScore {
    probe::sniff_prefix(name, source, 0, 2, ReaderConfig::no_retry(), is_aac_pattern)
}

/// 插件定义
pub fn plugin_def() -> DemuxerPluginDef {
    DemuxerPluginDef {
        name: NAME.into(),
        description: "adts aac demuxer plugin".into(),
        rank: 100,
        creator: create,
        sniffer: sniff,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data_source::{MemorySource, StreamSource};
    use std::sync::Arc;

    /// 构造一个有效的 ADTS 帧 (总长 `frame_length`)
    /// profile=1(LC), sr_index=4(44100), ch=2
    pub(crate) fn build_adts_frame(frame_length: usize, fill: u8) -> Vec<u8> {
        assert!((ADTS_HEADER_SIZE..0x2000).contains(&frame_length));
        let len = frame_length as u16;
        let mut frame = vec![fill; frame_length];
        frame[0] = 0xFF;
        // MPEG-4, layer 00, protection_absent=1
        frame[1] = 0xF1;
        // profile(01) + sr_index(0100) + private(0) + ch 高位(0)
        frame[2] = 0x50;
        // ch 低 2 位(10) + frame_length 高 2 位
        frame[3] = 0x80 | ((len >> 11) as u8 & 0x03);
        frame[4] = (len >> 3) as u8;
        frame[5] = ((len & 0x07) as u8) << 5 | 0x1F;
        frame[6] = 0xFC;
        frame
    }

    fn open(data: Vec<u8>) -> AacDemuxerPlugin {
        let mut plugin = AacDemuxerPlugin::new(AacParser::new());
        plugin.init().unwrap();
        plugin.set_data_source(MemorySource::shared(data)).unwrap();
        plugin.prepare().unwrap();
        plugin
    }

    #[test]
    fn test_adts_header_parse() {
        let frame = build_adts_frame(17, 0xAA);
        let header = parse_adts_header(&frame).expect("应该解析成功");
        assert_eq!(header.profile, AacProfile::Lc);
        assert_eq!(header.sampling_frequency_index, 4);
        assert_eq!(header.sample_rate(), 44100);
        assert_eq!(header.channels(), 2);
        assert_eq!(header.frame_length, 17);
        assert_eq!(header.mpeg_version, 4);
        assert!(!header.has_crc);
    }

    #[test]
    fn test_mpeg2_版本位() {
        let mut frame = build_adts_frame(17, 0);
        frame[1] |= 0x08;
        assert_eq!(parse_adts_header(&frame).unwrap().mpeg_version, 2);
    }

    #[test]
    fn test_同步模式() {
        assert!(is_aac_pattern(&[0xFF, 0xF1]));
        assert!(is_aac_pattern(&[0xFF, 0xF9]));
        // layer 位非 0 (MP3 帧头)
        assert!(!is_aac_pattern(&[0xFF, 0xFB]));
        assert!(!is_aac_pattern(&[0xFF]));
        assert!(!is_aac_pattern(b"RIFF"));
    }

    #[test]
    fn test_audio_specific_config() {
        let header = parse_adts_header(&build_adts_frame(20, 0)).unwrap();
        // AOT=2, SFI=4, ch=2: 00010 0100 0010 000
        assert_eq!(header.audio_specific_config(), [0x12, 0x10]);
    }

    #[test]
    fn test_切帧_下一同步字校验() {
        let mut data = build_adts_frame(100, 0);
        data.extend_from_slice(&build_adts_frame(50, 0));
        assert_eq!(process(&data, false).unwrap(), AacStep::Frame(100));
        // 第二帧后面没有同步字也没有读完, 需要更多数据
        assert_eq!(process(&data[100..], false).unwrap(), AacStep::NeedMore(52));
        // 读完后接受最后一帧
        assert_eq!(process(&data[100..], true).unwrap(), AacStep::Frame(50));
        // 帧尾同步字被破坏
        let mut broken = data.clone();
        broken[100] = 0x00;
        assert_eq!(process(&broken, false).unwrap(), AacStep::Skip(1));
    }

    #[test]
    fn test_帧长为零() {
        let mut frame = build_adts_frame(10, 0);
        frame[3] &= !0x03;
        frame[4] = 0;
        frame[5] &= 0x1F;
        assert!(matches!(process(&frame, false), Err(HiError::Unknown(_))));
    }

    #[test]
    fn test_媒体信息() {
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&build_adts_frame(128, 0x11));
        }
        let mut plugin = open(data);
        let info = plugin.get_media_info().unwrap();
        let track = &info.tracks[0];
        assert_eq!(track.mime(), Some(mime::AUDIO_AAC));
        assert_eq!(track.sample_rate(), Some(44100));
        assert_eq!(track.channels(), Some(2));
        assert_eq!(track.samples_per_frame(), Some(1024));
        assert_eq!(track.aac_stream_format(), Some(AacStreamFormat::Adts));
        // 128 * 8 * 44100 / 1024
        assert_eq!(track.bit_rate(), Some(44100));
        assert_eq!(info.general.file_size(), Some(512));
        assert!(info.general.duration().is_some());
    }

    #[test]
    fn test_非_adts_数据() {
        let mut plugin = open(b"RIFF\x00\x00\x00\x00WAVE".to_vec());
        assert!(matches!(
            plugin.get_media_info(),
            Err(HiError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_读帧与时间戳() {
        let mut data = Vec::new();
        for i in 0..3u8 {
            data.extend_from_slice(&build_adts_frame(64, i));
        }
        let mut plugin = open(data);
        plugin.get_media_info().unwrap();
        plugin.start().unwrap();
        let f0 = plugin.read_frame(0).unwrap();
        let f1 = plugin.read_frame(0).unwrap();
        let f2 = plugin.read_frame(0).unwrap();
        assert_eq!((f0.len(), f1.len(), f2.len()), (64, 64, 64));
        assert_eq!(f0.pts, 0);
        assert_eq!(f1.pts, samples_to_hst(1024, 44100));
        assert_eq!(f2.pts, samples_to_hst(2048, 44100));
        assert!(f2.is_key_frame());
        assert_eq!(f2.data[63], 2);
        assert!(plugin.read_frame(0).unwrap_err().is_eos());
    }

    #[test]
    fn test_跳过帧间垃圾字节() {
        let mut data = build_adts_frame(40, 0);
        data.extend_from_slice(&[0x00, 0x12, 0xFF]);
        data.extend_from_slice(&build_adts_frame(40, 0));
        let mut plugin = open(data);
        plugin.get_media_info().unwrap();
        // 第一帧后紧跟垃圾, 同步字校验失败, 第一帧被跳过
        let frame = plugin.read_frame(0).unwrap();
        assert_eq!(frame.len(), 40);
        assert!(plugin.read_frame(0).unwrap_err().is_eos());
    }

    #[test]
    fn test_顺序流读帧() {
        let src = StreamSource::new();
        src.push(build_adts_frame(30, 0)).unwrap();
        src.push(build_adts_frame(30, 0)).unwrap();
        src.finish().unwrap();
        let mut plugin = AacDemuxerPlugin::new(AacParser::new());
        plugin.set_reader_config(ReaderConfig::no_retry());
        plugin.init().unwrap();
        plugin.set_data_source(Arc::new(src)).unwrap();
        plugin.prepare().unwrap();
        let info = plugin.get_media_info().unwrap();
        assert!(info.general.duration().is_none());
        assert_eq!(plugin.read_frame(0).unwrap().len(), 30);
        assert_eq!(plugin.read_frame(0).unwrap().len(), 30);
        assert!(plugin.read_frame(0).unwrap_err().is_eos());
        assert!(matches!(
            plugin.seek_to(0, 0, SeekMode::PreviousSync),
            Err(HiError::Unimplemented(_))
        ));
    }

    #[test]
    fn test_seek_重新同步() {
        let mut data = Vec::new();
        for i in 0..50u8 {
            data.extend_from_slice(&build_adts_frame(100, i));
        }
        let mut plugin = open(data);
        plugin.get_media_info().unwrap();
        // 码率 = 100 * 8 * 44100 / 1024 = 34453 bit/s, 0.5s 约 2153 字节
        plugin.seek_to(0, HST_SECOND / 2, SeekMode::PreviousSync).unwrap();
        let frame = plugin.read_frame(0).unwrap();
        assert_eq!(frame.len(), 100);
        // 2153 落在第 21 帧内部, 重新同步到第 22 帧
        assert_eq!(frame.data[99], 22);
        // 0.5s * 44100 / 1024 = 21 帧
        assert_eq!(frame.pts, samples_to_hst(21 * 1024, 44100));
    }

    #[test]
    fn test_探测() {
        let src = MemorySource::shared(build_adts_frame(20, 0));
        assert_eq!(sniff(NAME, &src), probe::SCORE_MAX);
        let src = MemorySource::shared(b"RIFF".to_vec());
        assert_eq!(sniff(NAME, &src), probe::SCORE_NONE);
    }
}
