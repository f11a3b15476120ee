//! 音频采样格式定义.
//!
//! 解封装器只关心交错格式: PCM 数据按文件中的原样交给下游.

use std::fmt;

/// 音频采样格式
///
/// 所有声道的采样点交替排列, 如 LRLRLR...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleFormat {
    /// 未指定或不支持
    #[default]
    None,
    /// 无符号 8 位整数
    U8,
    /// 有符号 16 位整数
    S16,
    /// 有符号 24 位整数 (3 字节紧凑排列)
    S24,
    /// 有符号 32 位整数
    S32,
    /// 32 位浮点
    F32,
    /// 64 位浮点
    F64,
}

impl SampleFormat {
    /// 每个采样点占用的字节数
    pub const fn bytes_per_sample(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// 整数 PCM 位深映射
    ///
    /// 只认 8/16/32 位, 其余位深返回 `None`.
    pub const fn from_pcm_bits(bits: u16) -> Self {
        match bits {
            8 => Self::U8,
            16 => Self::S16,
            32 => Self::S32,
            _ => Self::None,
        }
    }

    /// 浮点 PCM 位深映射
    pub const fn from_float_bits(bits: u16) -> Self {
        match bits {
            32 => Self::F32,
            64 => Self::F64,
            _ => Self::None,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::U8 => "u8",
            Self::S16 => "s16",
            Self::S24 => "s24",
            Self::S32 => "s32",
            Self::F32 => "flt",
            Self::F64 => "dbl",
        };
        write!(f, "{name}")
    }
}
