//! MP4 采样表 (Sample Table) 解析.
//!
//! 采样表 (stbl) 包含了从采样序号到文件偏移的完整映射:
//! - stsd: 采样描述 (音频参数与 esds 中的 AudioSpecificConfig)
//! - stts: 解码时间→采样编号映射 (delta 编码)
//! - stsc: 采样→块映射 (压缩的 Run-Length 编码)
//! - stsz: 每个采样的字节大小
//! - stco/co64: 每个块的文件偏移

use hiflow_core::HiResult;

use super::boxes::BoxCursor;

/// 时间→采样条目 (stts)
#[derive(Debug, Clone, PartialEq, Eq)]
struct SttsEntry {
    count: u32,
    delta: u32,
}

/// 采样→块条目 (stsc)
#[derive(Debug, Clone, PartialEq, Eq)]
struct StscEntry {
    /// 起始块号 (1-based)
    first_chunk: u32,
    samples_per_chunk: u32,
}

/// 采样表
#[derive(Debug, Clone, Default)]
pub struct SampleTable {
    /// 采样条目格式 (如 `mp4a`)
    pub format: [u8; 4],
    /// esds 中的 DecoderSpecificInfo
    pub dsi: Vec<u8>,
    pub sample_rate: u32,
    pub channel_count: u32,

    stts_entries: Vec<SttsEntry>,
    stsc_entries: Vec<StscEntry>,
    /// 默认采样大小 (0 表示使用逐样本大小表)
    default_sample_size: u32,
    sample_sizes: Vec<u32>,
    total_samples: u32,
    chunk_offsets: Vec<u64>,
}

impl SampleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 总采样数
    pub fn sample_count(&self) -> u32 {
        if self.total_samples > 0 {
            self.total_samples
        } else {
            self.sample_sizes.len() as u32
        }
    }

    /// 指定采样的字节大小
    pub fn sample_size(&self, sample_idx: u32) -> u32 {
        if self.default_sample_size > 0 {
            self.default_sample_size
        } else {
            self.sample_sizes
                .get(sample_idx as usize)
                .copied()
                .unwrap_or(0)
        }
    }

    /// 所有采样的字节总数
    pub fn total_size(&self) -> u64 {
        if self.default_sample_size > 0 {
            u64::from(self.default_sample_size) * u64::from(self.sample_count())
        } else {
            self.sample_sizes.iter().map(|&s| u64::from(s)).sum()
        }
    }

    /// 指定采样在文件中的偏移量
    pub fn sample_offset(&self, sample_idx: u32) -> u64 {
        let chunk_idx = self.sample_to_chunk(sample_idx);
        let chunk_offset = self
            .chunk_offsets
            .get(chunk_idx as usize)
            .copied()
            .unwrap_or(0);

        // 累加块内之前的采样大小
        let chunk_start = self.chunk_start_sample(chunk_idx);
        let in_chunk: u64 = (chunk_start..sample_idx)
            .map(|i| u64::from(self.sample_size(i)))
            .sum();
        chunk_offset.saturating_add(in_chunk)
    }

    /// 指定采样的解码时间 (媒体时间刻度)
    pub fn sample_time(&self, sample_idx: u32) -> u64 {
        let mut time = 0u64;
        let mut remaining = sample_idx;
        for entry in &self.stts_entries {
            if remaining < entry.count {
                return time + u64::from(remaining) * u64::from(entry.delta);
            }
            time += u64::from(entry.count) * u64::from(entry.delta);
            remaining -= entry.count;
        }
        time
    }

    /// 指定采样的时长 (媒体时间刻度)
    pub fn sample_delta(&self, sample_idx: u32) -> u32 {
        let mut remaining = sample_idx;
        for entry in &self.stts_entries {
            if remaining < entry.count {
                return entry.delta;
            }
            remaining -= entry.count;
        }
        self.stts_entries.last().map_or(0, |e| e.delta)
    }

    /// 所有采样的总时长 (媒体时间刻度)
    pub fn total_time(&self) -> u64 {
        self.stts_entries
            .iter()
            .map(|e| u64::from(e.count) * u64::from(e.delta))
            .sum()
    }

    // === 解析方法 ===

    /// 解析 stsd, 只处理第一个条目
    pub fn parse_stsd(&mut self, cur: &mut BoxCursor<'_>, box_end: u64) -> HiResult<()> {
        cur.read_full_box_header()?;
        let entry_count = cur.read_u32_be()?;
        if entry_count == 0 {
            return Ok(());
        }

        let entry_start = cur.position();
        let entry_size = cur.read_u32_be()?;
        self.format = cur.read_tag()?;
        let entry_end = (entry_start + u64::from(entry_size)).min(box_end);

        // 保留字段 (6 bytes) + data_reference_index (2 bytes)
        cur.skip(8);
        if &self.format == b"mp4a" {
            self.parse_audio_sample_entry(cur, entry_end)?;
        }
        Ok(())
    }

    /// 解析音频采样条目 (ISO 14496-12 AudioSampleEntry)
    fn parse_audio_sample_entry(&mut self, cur: &mut BoxCursor<'_>, entry_end: u64) -> HiResult<()> {
        cur.skip(8);
        self.channel_count = u32::from(cur.read_u16_be()?);
        let _sample_size = cur.read_u16_be()?;
        cur.skip(4);
        self.sample_rate = cur.read_u32_be()? >> 16;

        while cur.position() + 8 <= entry_end {
            let pos = cur.position();
            let size = cur.read_u32_be()?;
            let tag = cur.read_tag()?;
            if size < 8 {
                break;
            }
            if &tag == b"esds" {
                let data = cur.read_bytes(size as usize - 8)?;
                if let Some(dsi) = extract_decoder_specific_info(&data) {
                    self.dsi = dsi;
                }
            }
            cur.seek(pos + u64::from(size));
        }
        Ok(())
    }

    /// 解析 stts (Time-to-Sample Box)
    pub fn parse_stts(&mut self, cur: &mut BoxCursor<'_>) -> HiResult<()> {
        cur.read_full_box_header()?;
        let entry_count = cur.read_u32_be()?;
        self.stts_entries.clear();
        for _ in 0..entry_count {
            let count = cur.read_u32_be()?;
            let delta = cur.read_u32_be()?;
            self.stts_entries.push(SttsEntry { count, delta });
        }
        Ok(())
    }

    /// 解析 stsc (Sample-to-Chunk Box)
    pub fn parse_stsc(&mut self, cur: &mut BoxCursor<'_>) -> HiResult<()> {
        cur.read_full_box_header()?;
        let entry_count = cur.read_u32_be()?;
        self.stsc_entries.clear();
        for _ in 0..entry_count {
            let first_chunk = cur.read_u32_be()?;
            let samples_per_chunk = cur.read_u32_be()?;
            let _sample_desc_idx = cur.read_u32_be()?;
            if first_chunk == 0 || samples_per_chunk == 0 {
                log::warn!("MP4: 忽略无效 stsc 条目 ({}, {})", first_chunk, samples_per_chunk);
                continue;
            }
            self.stsc_entries.push(StscEntry {
                first_chunk,
                samples_per_chunk,
            });
        }
        Ok(())
    }

    /// 解析 stsz (Sample Size Box)
    pub fn parse_stsz(&mut self, cur: &mut BoxCursor<'_>) -> HiResult<()> {
        cur.read_full_box_header()?;
        self.default_sample_size = cur.read_u32_be()?;
        self.total_samples = cur.read_u32_be()?;
        self.sample_sizes.clear();
        if self.default_sample_size == 0 {
            let table = cur.read_bytes(self.total_samples as usize * 4)?;
            self.sample_sizes = table
                .chunks_exact(4)
                .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
        }
        Ok(())
    }

    /// 解析 stco/co64 (Chunk Offset Box)
    pub fn parse_stco(&mut self, cur: &mut BoxCursor<'_>, is_64bit: bool) -> HiResult<()> {
        cur.read_full_box_header()?;
        let entry_count = cur.read_u32_be()?;
        self.chunk_offsets.clear();
        for _ in 0..entry_count {
            let offset = if is_64bit {
                cur.read_u64_be()?
            } else {
                u64::from(cur.read_u32_be()?)
            };
            self.chunk_offsets.push(offset);
        }
        Ok(())
    }

    // === 内部辅助方法 ===

    /// 遍历 stsc 的每段: (起始块, 结束块, 每块采样数, 段前的采样数)
    fn runs(&self) -> impl Iterator<Item = (u32, u32, u32, u32)> + '_ {
        let total_chunks = self.chunk_offsets.len() as u32;
        let mut samples_before = 0u32;
        self.stsc_entries.iter().enumerate().map(move |(i, entry)| {
            let first = entry.first_chunk - 1;
            let next = self
                .stsc_entries
                .get(i + 1)
                .map_or(total_chunks, |e| e.first_chunk - 1)
                .max(first);
            let run = (first, next, entry.samples_per_chunk, samples_before);
            samples_before = samples_before.saturating_add((next - first).saturating_mul(entry.samples_per_chunk));
            run
        })
    }

    /// 采样所在的块号 (0-based)
    fn sample_to_chunk(&self, sample_idx: u32) -> u32 {
        for (first, next, per_chunk, before) in self.runs() {
            let in_run = (next - first).saturating_mul(per_chunk);
            if sample_idx < before.saturating_add(in_run) {
                return first + (sample_idx - before) / per_chunk;
            }
        }
        0
    }

    /// 块的起始采样序号
    fn chunk_start_sample(&self, chunk_idx: u32) -> u32 {
        let mut last = 0;
        for (first, next, per_chunk, before) in self.runs() {
            if chunk_idx < next {
                return before.saturating_add(chunk_idx.saturating_sub(first).saturating_mul(per_chunk));
            }
            last = before.saturating_add((next - first).saturating_mul(per_chunk));
        }
        last
    }
}

/// 从 esds box 内容中提取 DecoderSpecificInfo (AudioSpecificConfig)
///
/// esds 结构: version(1) + flags(3) + ES_Descriptor(tag=0x03)
///   → DecoderConfigDescriptor(tag=0x04)
///     → DecoderSpecificInfo(tag=0x05)
fn extract_decoder_specific_info(esds_data: &[u8]) -> Option<Vec<u8>> {
    if esds_data.len() < 4 {
        return None;
    }
    search_descriptor(&esds_data[4..], 0x05)
}

/// 在 MPEG-4 描述符数据中递归搜索指定 tag 的负载
fn search_descriptor(data: &[u8], target_tag: u8) -> Option<Vec<u8>> {
    let mut pos = 0;
    while pos < data.len() {
        let tag = data[pos];
        pos += 1;

        // 可变长度: 每字节高位为续标志, 低 7 位为值
        let mut len = 0usize;
        for _ in 0..4 {
            let b = *data.get(pos)?;
            pos += 1;
            len = (len << 7) | usize::from(b & 0x7F);
            if b & 0x80 == 0 {
                break;
            }
        }

        let desc_end = (pos + len).min(data.len());
        if tag == target_tag {
            return Some(data[pos..desc_end].to_vec());
        }

        let child_start = (pos + descriptor_header_size(tag, &data[pos..desc_end])).min(desc_end);
        if child_start < desc_end {
            if let Some(found) = search_descriptor(&data[child_start..desc_end], target_tag) {
                return Some(found);
            }
        }
        pos = desc_end;
    }
    None
}

/// MPEG-4 描述符固定头部大小
fn descriptor_header_size(tag: u8, payload: &[u8]) -> usize {
    match tag {
        0x03 => {
            // ES_Descriptor: ES_ID(2) + flags(1) + 可选字段
            let Some(&flags) = payload.get(2) else {
                return payload.len();
            };
            let mut skip = 3;
            if flags & 0x80 != 0 {
                skip += 2;
            }
            if flags & 0x40 != 0 {
                skip += 1 + payload.get(skip).map_or(0, |&n| usize::from(n));
            }
            if flags & 0x20 != 0 {
                skip += 2;
            }
            skip
        }
        // DecoderConfigDescriptor: objectType(1)+stream(1)+buf(3)+max(4)+avg(4)
        0x04 => 13,
        _ => 0,
    }
}
