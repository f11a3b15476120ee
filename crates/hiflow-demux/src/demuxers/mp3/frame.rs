//! MPEG 音频帧头解析与逐帧扫描.
//!
//! 帧头结构 (32 位):
//! ```text
//! AAAA AAAA  AAAB BCCD  EEEE FFGH  IIJJ KLMM
//! A = 同步位 (11 bit, 全1)   B = MPEG 版本    C = 层
//! D = CRC 保护              E = 比特率索引    F = 采样率索引
//! G = 填充位                H = 私有位        I = 声道模式
//! J = 模式扩展              K = 版权         L = 原始/复制
//! M = 强调
//! ```

/// MPEG 音频版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MpegVersion {
    /// MPEG-1
    V1,
    /// MPEG-2
    V2,
    /// MPEG-2.5
    V25,
}

impl MpegVersion {
    /// 元数据中的版本号 (MPEG-2.5 记为 25)
    pub const fn number(&self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V25 => 25,
        }
    }
}

/// 帧信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub version: MpegVersion,
    /// 层 (1, 2, 3)
    pub layer: u8,
    pub bitrate_kbps: u32,
    pub hz: u32,
    pub channels: u32,
    pub samples_per_frame: u32,
    /// 帧总字节数 (含头部)
    pub frame_size: usize,
}

/// MPEG-1 比特率表 (kbps), 按层区分, 索引 1-14
const BITRATE_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];

/// MPEG-2/2.5 比特率表 (kbps), Layer I 与 Layer II/III
const BITRATE_V2: [[u32; 15]; 2] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

/// MPEG-1 采样率表
const SAMPLERATE_V1: [u32; 3] = [44100, 48000, 32000];

/// 校验用的参考表
const CHECK_LAYERS: [u8; 3] = [1, 2, 3];
const CHECK_SAMPLE_RATES: [u32; 9] = [8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000];
const CHECK_BITRATES: [u32; 18] = [
    8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 192, 224, 256, 320,
];

/// 解析 4 字节帧头
pub fn parse_frame_header(bytes: [u8; 4]) -> Option<FrameInfo> {
    let header = u32::from_be_bytes(bytes);
    if (header >> 21) != 0x7FF {
        return None;
    }

    let version = match (header >> 19) & 0x03 {
        0 => MpegVersion::V25,
        2 => MpegVersion::V2,
        3 => MpegVersion::V1,
        _ => return None,
    };

    let layer: u8 = match (header >> 17) & 0x03 {
        1 => 3,
        2 => 2,
        3 => 1,
        _ => return None,
    };

    // free format 与 bad 不支持
    let br_idx = ((header >> 12) & 0x0F) as usize;
    if br_idx == 0 || br_idx == 15 {
        return None;
    }
    let bitrate_kbps = match version {
        MpegVersion::V1 => BITRATE_V1[usize::from(layer - 1)][br_idx],
        _ if layer == 1 => BITRATE_V2[0][br_idx],
        _ => BITRATE_V2[1][br_idx],
    };

    let sr_idx = ((header >> 10) & 0x03) as usize;
    if sr_idx == 3 {
        return None;
    }
    let hz = match version {
        MpegVersion::V1 => SAMPLERATE_V1[sr_idx],
        MpegVersion::V2 => SAMPLERATE_V1[sr_idx] / 2,
        MpegVersion::V25 => SAMPLERATE_V1[sr_idx] / 4,
    };

    let padding = (header >> 9) & 1;
    let channels = if (header >> 6) & 0x03 == 3 { 1 } else { 2 };

    let samples_per_frame = match (version, layer) {
        (_, 1) => 384,
        (MpegVersion::V1, _) | (_, 2) => 1152,
        _ => 576,
    };

    let bitrate = bitrate_kbps * 1000;
    let frame_size = match (version, layer) {
        (_, 1) => (12 * bitrate / hz + padding) * 4,
        (MpegVersion::V1, _) | (_, 2) => 144 * bitrate / hz + padding,
        _ => 72 * bitrate / hz + padding,
    } as usize;
    if frame_size < 4 {
        return None;
    }

    Some(FrameInfo {
        version,
        layer,
        bitrate_kbps,
        hz,
        channels,
        samples_per_frame,
        frame_size,
    })
}

/// 帧参数是否落在参考表内
///
/// 只在探测和解析头部时使用, 用于排除伪同步.
pub fn decode_check(info: &FrameInfo) -> bool {
    CHECK_LAYERS.contains(&info.layer)
        && CHECK_SAMPLE_RATES.contains(&info.hz)
        && CHECK_BITRATES.contains(&info.bitrate_kbps)
}

/// 两个帧头是否属于同一条流
fn same_stream(a: &FrameInfo, b: &FrameInfo) -> bool {
    a.version == b.version && a.layer == b.layer && a.hz == b.hz
}

fn header_at(buf: &[u8], pos: usize) -> Option<FrameInfo> {
    let bytes: [u8; 4] = buf.get(pos..pos + 4)?.try_into().ok()?;
    parse_frame_header(bytes)
}

/// 逐帧扫描缓冲区
///
/// 对每个确认的帧调用 `callback(info, frame, offset)`, 回调返回 `true` 时停止.
/// 帧后若还能读到 4 字节, 要求其为同一条流的帧头; `at_eof` 为真时最后一帧免于此校验.
///
/// 返回可丢弃的字节数: 停止时为最后一帧的结尾, 否则为第一个未能确认的位置.
pub fn iterate(
    buf: &[u8],
    at_eof: bool,
    mut callback: impl FnMut(&FrameInfo, &[u8], usize) -> bool,
) -> usize {
    let mut pos = 0;
    while pos + 4 <= buf.len() {
        let Some(info) = header_at(buf, pos) else {
            pos += 1;
            continue;
        };
        let end = pos + info.frame_size;
        if end > buf.len() {
            if at_eof {
                pos += 1;
                continue;
            }
            break;
        }
        if end + 4 <= buf.len() {
            match header_at(buf, end) {
                Some(next) if same_stream(&info, &next) => {}
                _ => {
                    pos += 1;
                    continue;
                }
            }
        } else if !at_eof {
            break;
        }
        if callback(&info, &buf[pos..end], pos) {
            return end;
        }
        pos = end;
    }
    if at_eof { buf.len() } else { pos }
}
