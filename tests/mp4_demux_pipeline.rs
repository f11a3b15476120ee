//! 端到端集成测试: moov 前置的 M4A 文件经注册表打开, 输出带 ADTS 头的 AAC 帧.

use std::sync::Arc;

use hiflow::core::HiError;
use hiflow::core::meta::{AacProfile, AacStreamFormat, mime};
use hiflow::core::time::samples_to_hst;
use hiflow::demux::data_source::{MemorySource, StreamSource};
use hiflow::demux::demuxers::{aac, mp4};
use hiflow::demux::{DemuxerPlugin, ReaderConfig, SeekMode, SharedSource};

const ADTS_HEADER_SIZE: usize = 7;

fn mp4_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

fn full_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut content = vec![0u8; 4];
    content.extend_from_slice(body);
    mp4_box(fourcc, &content)
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

/// 按块分组的 M4A 文件描述
struct M4a {
    /// 每个块内的采样大小
    chunks: Vec<Vec<u32>>,
    /// 块之间插入的无关字节数
    gap: usize,
}

impl M4a {
    fn sample_count(&self) -> u32 {
        self.chunks.iter().map(|c| c.len() as u32).sum()
    }

    fn moov(&self, chunk_offsets: &[u32]) -> Vec<u8> {
        let esds = [
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
        mp4a.extend_from_slice(&full_box(b"esds", &esds));

        let mut stsd = u32s(&[1]);
        stsd.extend_from_slice(&mp4_box(b"mp4a", &mp4a));

        // 相邻块采样数相同的合并为一条 stsc 记录
        let mut stsc = Vec::new();
        let mut runs = 0u32;
        let mut prev = None;
        for (i, chunk) in self.chunks.iter().enumerate() {
            if prev != Some(chunk.len()) {
                stsc.extend_from_slice(&u32s(&[i as u32 + 1, chunk.len() as u32, 1]));
                runs += 1;
                prev = Some(chunk.len());
            }
        }
        let mut stsc_body = u32s(&[runs]);
        stsc_body.extend_from_slice(&stsc);

        let sizes: Vec<u32> = self.chunks.iter().flatten().copied().collect();
        let mut stsz = u32s(&[0, sizes.len() as u32]);
        stsz.extend_from_slice(&u32s(&sizes));
        let mut stco = u32s(&[chunk_offsets.len() as u32]);
        stco.extend_from_slice(&u32s(chunk_offsets));

        let stbl = [
            full_box(b"stsd", &stsd),
            full_box(b"stts", &u32s(&[1, self.sample_count(), 1024])),
            full_box(b"stsc", &stsc_body),
            full_box(b"stsz", &stsz),
            full_box(b"stco", &stco),
        ]
        .concat();
        let mut hdlr = u32s(&[0]);
        hdlr.extend_from_slice(b"soun");
        hdlr.extend_from_slice(&[0u8; 12]);
        let mdia = [
            full_box(b"mdhd", &u32s(&[0, 0, 44100, self.sample_count() * 1024, 0])),
            full_box(b"hdlr", &hdlr),
            mp4_box(b"minf", &mp4_box(b"stbl", &stbl)),
        ]
        .concat();
        let trak = [full_box(b"tkhd", &u32s(&[0, 0, 1, 0, 0])), mp4_box(b"mdia", &mdia)].concat();
        let moov = [full_box(b"mvhd", &u32s(&[0, 0, 1000, 0])), mp4_box(b"trak", &trak)].concat();
        mp4_box(b"moov", &moov)
    }

    /// 布局 ftyp | moov | mdat, 第 k 个采样以 k 填充
    fn build(&self) -> Vec<u8> {
        let ftyp = mp4_box(b"ftyp", b"M4A \0\0\0\0isomM4A ");
        // 偏移不影响 moov 长度, 先用占位值计算 mdat 起点
        let moov_len = self.moov(&vec![0; self.chunks.len()]).len();
        let data_start = ftyp.len() + moov_len + 8;

        let mut mdat = Vec::new();
        let mut offsets = Vec::new();
        let mut k = 0u8;
        for chunk in &self.chunks {
            mdat.extend(std::iter::repeat_n(0xEEu8, self.gap));
            offsets.push((data_start + mdat.len()) as u32);
            for &size in chunk {
                mdat.extend(std::iter::repeat_n(k, size as usize));
                k = k.wrapping_add(1);
            }
        }
        [ftyp, self.moov(&offsets), mp4_box(b"mdat", &mdat)].concat()
    }
}

fn sample_file() -> (M4a, Vec<u32>) {
    let m4a = M4a {
        chunks: vec![
            vec![100, 120, 90],
            vec![110, 105, 95],
            vec![80, 130],
            vec![100, 100],
        ],
        gap: 16,
    };
    let sizes = m4a.chunks.iter().flatten().copied().collect();
    (m4a, sizes)
}

#[test]
fn test_注册表打开_m4a() {
    let (m4a, sizes) = sample_file();
    let registry = hiflow::default_plugin_registry().unwrap();
    let opened = registry.open_source(MemorySource::shared(m4a.build())).unwrap();
    assert_eq!(opened.name, mp4::NAME);

    let track = &opened.media_info.tracks[0];
    assert_eq!(track.mime(), Some(mime::AUDIO_AAC));
    assert_eq!(track.sample_rate(), Some(44100));
    assert_eq!(track.channels(), Some(2));
    assert_eq!(track.aac_profile(), Some(AacProfile::Lc));
    assert_eq!(track.aac_stream_format(), Some(AacStreamFormat::Adts));
    assert_eq!(track.codec_config(), Some(&[0x12, 0x10][..]));
    assert_eq!(
        opened.media_info.general.duration(),
        Some(samples_to_hst(sizes.len() as u64 * 1024, 44100))
    );
}

#[test]
fn test_逐帧输出_adts_并在末尾结束() {
    let (m4a, sizes) = sample_file();
    let registry = hiflow::default_plugin_registry().unwrap();
    let mut opened = registry.open_source(MemorySource::shared(m4a.build())).unwrap();

    for (k, &size) in sizes.iter().enumerate() {
        let frame = opened.plugin.read_frame(0).unwrap();
        let header = aac::parse_adts_header(&frame.data).unwrap();
        assert_eq!(header.frame_length, size as usize + ADTS_HEADER_SIZE);
        assert_eq!(header.sample_rate(), 44100);
        assert_eq!(header.channels(), 2);
        // 块间隙不会混入负载
        assert!(frame.data[ADTS_HEADER_SIZE..].iter().all(|&b| b == k as u8));
        assert_eq!(frame.pts, samples_to_hst(k as u64 * 1024, 44100));
    }
    for _ in 0..3 {
        assert!(matches!(opened.plugin.read_frame(0), Err(HiError::EndOfStream)));
    }
}

#[test]
fn test_seek_后从更靠后的采样继续() {
    let (m4a, sizes) = sample_file();
    let registry = hiflow::default_plugin_registry().unwrap();
    let mut opened = registry.open_source(MemorySource::shared(m4a.build())).unwrap();
    let duration = opened.media_info.general.duration().unwrap();

    opened.plugin.seek_to(0, duration / 2, SeekMode::PreviousSync).unwrap();
    let frame = opened.plugin.read_frame(0).unwrap();
    let index = frame.data[ADTS_HEADER_SIZE] as usize;
    assert!(index > 0 && index < sizes.len());
    assert_eq!(frame.pts, samples_to_hst(index as u64 * 1024, 44100));

    opened.plugin.seek_to(0, 0, SeekMode::PreviousSync).unwrap();
    assert_eq!(opened.plugin.read_frame(0).unwrap().pts, 0);
}

#[test]
fn test_顺序流不支持() {
    let (m4a, _) = sample_file();
    let src = Arc::new(StreamSource::from_data(m4a.build()));
    let mut registry = hiflow::default_plugin_registry().unwrap();
    registry.set_reader_config(ReaderConfig::no_retry());
    let err = registry.open_source(src as SharedSource);
    assert!(matches!(err, Err(HiError::Unimplemented(_))));
}

#[test]
fn test_截断的文件() {
    let (m4a, _) = sample_file();
    let data = m4a.build();
    // 只保留 ftyp 与 moov 的一部分
    let truncated = data[..100].to_vec();
    let mut plugin = mp4::create(mp4::NAME);
    plugin.init().unwrap();
    plugin.set_data_source(MemorySource::shared(truncated)).unwrap();
    plugin.prepare().unwrap();
    assert!(matches!(plugin.get_media_info(), Err(HiError::UnsupportedFormat(_))));
}
