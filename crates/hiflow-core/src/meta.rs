//! 媒体元数据.
//!
//! 元数据是 "键 -> 类型化值" 的列表. 值用封闭的 [`Tag`] 枚举承载,
//! 每个键只有一种值类型, 取值走按键生成的访问器, 不存在运行时类型转换失败.

use std::fmt;

use crate::channel_layout::ChannelLayout;
use crate::sample_format::SampleFormat;

/// 常用 MIME 类型
pub mod mime {
    /// AAC (ADTS 封装)
    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    /// MPEG 音频 (MP1/MP2/MP3)
    pub const AUDIO_MPEG: &str = "audio/mpeg";
    /// 未压缩 PCM
    pub const AUDIO_RAW: &str = "audio/raw";
}

/// 数据源可寻址性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Seekable {
    /// 无效 (未设置数据源)
    #[default]
    Invalid,
    /// 可随机读取
    Seekable,
    /// 只能顺序读取
    Unseekable,
}

impl Seekable {
    /// 是否可随机读取
    pub const fn is_seekable(&self) -> bool {
        matches!(self, Self::Seekable)
    }
}

/// AAC 规格 (ADTS profile 字段)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AacProfile {
    Main,
    Lc,
    Ssr,
    Ltp,
}

impl AacProfile {
    /// ADTS 2 位 profile 字段 (object_type - 1)
    pub const fn from_adts(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::Main,
            1 => Self::Lc,
            2 => Self::Ssr,
            _ => Self::Ltp,
        }
    }

    /// MPEG-4 audio object type
    pub const fn object_type(&self) -> u8 {
        match self {
            Self::Main => 1,
            Self::Lc => 2,
            Self::Ssr => 3,
            Self::Ltp => 4,
        }
    }
}

/// AAC 码流封装形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AacStreamFormat {
    /// 每帧带 7 字节 ADTS 头
    Adts,
    /// 裸 AAC, 配置在 codec config 中
    Raw,
}

/// 元数据键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKey {
    Mime,
    TrackId,
    AudioSampleRate,
    AudioChannels,
    AudioChannelLayout,
    AudioSampleFormat,
    AudioBitsPerSample,
    AudioSamplesPerFrame,
    AudioMpegVersion,
    AudioMpegLayer,
    AudioAacProfile,
    AudioAacStreamFormat,
    BitRate,
    MediaDuration,
    MediaFileSize,
    MediaSeekable,
    MediaCodecConfig,
}

impl TagKey {
    /// 键名 (用于日志与 JSON 输出)
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mime => "mime",
            Self::TrackId => "track_id",
            Self::AudioSampleRate => "audio_sample_rate",
            Self::AudioChannels => "audio_channels",
            Self::AudioChannelLayout => "audio_channel_layout",
            Self::AudioSampleFormat => "audio_sample_format",
            Self::AudioBitsPerSample => "audio_bits_per_sample",
            Self::AudioSamplesPerFrame => "audio_samples_per_frame",
            Self::AudioMpegVersion => "audio_mpeg_version",
            Self::AudioMpegLayer => "audio_mpeg_layer",
            Self::AudioAacProfile => "audio_aac_profile",
            Self::AudioAacStreamFormat => "audio_aac_stream_format",
            Self::BitRate => "bit_rate",
            Self::MediaDuration => "media_duration",
            Self::MediaFileSize => "media_file_size",
            Self::MediaSeekable => "media_seekable",
            Self::MediaCodecConfig => "media_codec_config",
        }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 类型化元数据值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Mime(String),
    TrackId(u32),
    AudioSampleRate(u32),
    AudioChannels(u32),
    AudioChannelLayout(ChannelLayout),
    AudioSampleFormat(SampleFormat),
    AudioBitsPerSample(u32),
    AudioSamplesPerFrame(u32),
    AudioMpegVersion(u32),
    AudioMpegLayer(u32),
    AudioAacProfile(AacProfile),
    AudioAacStreamFormat(AacStreamFormat),
    /// 码率 (bit/s)
    BitRate(u64),
    /// 时长 (HST 纳秒)
    MediaDuration(i64),
    MediaFileSize(u64),
    MediaSeekable(Seekable),
    MediaCodecConfig(Vec<u8>),
}

impl Tag {
    /// 值对应的键
    pub const fn key(&self) -> TagKey {
        match self {
            Self::Mime(_) => TagKey::Mime,
            Self::TrackId(_) => TagKey::TrackId,
            Self::AudioSampleRate(_) => TagKey::AudioSampleRate,
            Self::AudioChannels(_) => TagKey::AudioChannels,
            Self::AudioChannelLayout(_) => TagKey::AudioChannelLayout,
            Self::AudioSampleFormat(_) => TagKey::AudioSampleFormat,
            Self::AudioBitsPerSample(_) => TagKey::AudioBitsPerSample,
            Self::AudioSamplesPerFrame(_) => TagKey::AudioSamplesPerFrame,
            Self::AudioMpegVersion(_) => TagKey::AudioMpegVersion,
            Self::AudioMpegLayer(_) => TagKey::AudioMpegLayer,
            Self::AudioAacProfile(_) => TagKey::AudioAacProfile,
            Self::AudioAacStreamFormat(_) => TagKey::AudioAacStreamFormat,
            Self::BitRate(_) => TagKey::BitRate,
            Self::MediaDuration(_) => TagKey::MediaDuration,
            Self::MediaFileSize(_) => TagKey::MediaFileSize,
            Self::MediaSeekable(_) => TagKey::MediaSeekable,
            Self::MediaCodecConfig(_) => TagKey::MediaCodecConfig,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=", self.key())?;
        match self {
            Self::Mime(v) => write!(f, "{v}"),
            Self::TrackId(v)
            | Self::AudioSampleRate(v)
            | Self::AudioChannels(v)
            | Self::AudioBitsPerSample(v)
            | Self::AudioSamplesPerFrame(v)
            | Self::AudioMpegVersion(v)
            | Self::AudioMpegLayer(v) => write!(f, "{v}"),
            Self::AudioChannelLayout(v) => write!(f, "{v}"),
            Self::AudioSampleFormat(v) => write!(f, "{v}"),
            Self::AudioAacProfile(v) => write!(f, "{v:?}"),
            Self::AudioAacStreamFormat(v) => write!(f, "{v:?}"),
            Self::BitRate(v) | Self::MediaFileSize(v) => write!(f, "{v}"),
            Self::MediaDuration(v) => write!(f, "{v}"),
            Self::MediaSeekable(v) => write!(f, "{v:?}"),
            Self::MediaCodecConfig(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// 元数据表
///
/// 按插入顺序保存, 同一个键只保留一份 (后写覆盖).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Meta {
    tags: Vec<Tag>,
}

macro_rules! meta_getter {
    ($(#[$doc:meta])* $fn_name:ident, $variant:ident, $ty:ty) => {
        $(#[$doc])*
        pub fn $fn_name(&self) -> Option<$ty> {
            match self.get(TagKey::$variant) {
                Some(Tag::$variant(v)) => Some(*v),
                _ => None,
            }
        }
    };
}

impl Meta {
    /// 创建空表
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一个值, 同键旧值被替换
    pub fn set(&mut self, tag: Tag) -> &mut Self {
        let key = tag.key();
        match self.tags.iter_mut().find(|t| t.key() == key) {
            Some(slot) => *slot = tag,
            None => self.tags.push(tag),
        }
        self
    }

    /// 链式写入
    pub fn with(mut self, tag: Tag) -> Self {
        self.set(tag);
        self
    }

    /// 按键读取
    pub fn get(&self, key: TagKey) -> Option<&Tag> {
        self.tags.iter().find(|t| t.key() == key)
    }

    /// 是否包含键
    pub fn contains(&self, key: TagKey) -> bool {
        self.get(key).is_some()
    }

    /// 全部值 (插入顺序)
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }

    /// 值数量
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// MIME 类型
    pub fn mime(&self) -> Option<&str> {
        match self.get(TagKey::Mime) {
            Some(Tag::Mime(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// 编解码器配置 (如 AudioSpecificConfig)
    pub fn codec_config(&self) -> Option<&[u8]> {
        match self.get(TagKey::MediaCodecConfig) {
            Some(Tag::MediaCodecConfig(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    meta_getter!(track_id, TrackId, u32);
    meta_getter!(sample_rate, AudioSampleRate, u32);
    meta_getter!(channels, AudioChannels, u32);
    meta_getter!(channel_layout, AudioChannelLayout, ChannelLayout);
    meta_getter!(sample_format, AudioSampleFormat, SampleFormat);
    meta_getter!(bits_per_sample, AudioBitsPerSample, u32);
    meta_getter!(samples_per_frame, AudioSamplesPerFrame, u32);
    meta_getter!(mpeg_version, AudioMpegVersion, u32);
    meta_getter!(mpeg_layer, AudioMpegLayer, u32);
    meta_getter!(aac_profile, AudioAacProfile, AacProfile);
    meta_getter!(aac_stream_format, AudioAacStreamFormat, AacStreamFormat);
    meta_getter!(
        /// 码率 (bit/s)
        bit_rate, BitRate, u64
    );
    meta_getter!(
        /// 时长 (HST 纳秒)
        duration, MediaDuration, i64
    );
    meta_getter!(file_size, MediaFileSize, u64);
    meta_getter!(seekable, MediaSeekable, Seekable);
}
