//! 探测结果的 JSON 结构与文本输出.

use hiflow_core::time::HST_MSECOND;
use hiflow_core::{Meta, Status};
use hiflow_demux::{MediaInfo, SniffResult};
use serde::Serialize;

/// 完整探测结果
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub input: String,
    /// 选用的插件
    pub demuxer: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sniff: Vec<SniffEntry>,
    pub general: GeneralInfo,
    pub tracks: Vec<TrackInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frames: Option<FrameSummary>,
}

#[derive(Debug, Serialize)]
pub struct SniffEntry {
    pub name: String,
    pub score: u32,
    pub rank: u32,
}

impl From<&SniffResult> for SniffEntry {
    fn from(r: &SniffResult) -> Self {
        Self {
            name: r.name.clone(),
            score: r.score,
            rank: r.rank,
        }
    }
}

/// 容器级信息
#[derive(Debug, Serialize)]
pub struct GeneralInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    pub seekable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// 轨道信息
#[derive(Debug, Serialize)]
pub struct TrackInfo {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_layout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits_per_sample: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples_per_frame: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bit_rate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    /// 全部元数据 (`key=value`)
    pub tags: Vec<String>,
}

/// 读帧统计
#[derive(Debug, Default, Serialize)]
pub struct FrameSummary {
    /// 读帧前 seek 的目标时间
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_ms: Option<i64>,
    pub count: u64,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_pts_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pts_ms: Option<i64>,
    /// 结束读帧时的状态 (正常结束为 END_OF_STREAM)
    pub status: String,
}

impl FrameSummary {
    pub fn record(&mut self, pts: i64, len: usize) {
        let pts_ms = pts / HST_MSECOND;
        self.count += 1;
        self.bytes += len as u64;
        self.first_pts_ms.get_or_insert(pts_ms);
        self.last_pts_ms = Some(pts_ms);
    }

    pub fn finish(&mut self, status: Status) {
        self.status = status.name().to_string();
    }
}

impl GeneralInfo {
    pub fn from_meta(meta: &Meta) -> Self {
        Self {
            file_size: meta.file_size().filter(|&s| s > 0),
            seekable: meta.seekable().is_some_and(|s| s.is_seekable()),
            duration_ms: meta.duration().map(|d| d / HST_MSECOND),
        }
    }
}

impl TrackInfo {
    pub fn from_meta(index: usize, meta: &Meta) -> Self {
        Self {
            index,
            mime: meta.mime().map(str::to_string),
            sample_rate: meta.sample_rate(),
            channels: meta.channels(),
            channel_layout: meta.channel_layout().map(|l| l.to_string()),
            sample_format: meta.sample_format().map(|f| f.to_string()),
            bits_per_sample: meta.bits_per_sample(),
            samples_per_frame: meta.samples_per_frame(),
            bit_rate: meta.bit_rate().filter(|&b| b > 0),
            duration_ms: meta.duration().map(|d| d / HST_MSECOND),
            tags: meta.iter().map(ToString::to_string).collect(),
        }
    }
}

impl ProbeReport {
    pub fn new(input: &str, demuxer: &str, sniff: &[SniffResult], info: &MediaInfo) -> Self {
        Self {
            input: input.to_string(),
            demuxer: demuxer.to_string(),
            sniff: sniff.iter().map(SniffEntry::from).collect(),
            general: GeneralInfo::from_meta(&info.general),
            tracks: info
                .tracks
                .iter()
                .enumerate()
                .map(|(i, t)| TrackInfo::from_meta(i, t))
                .collect(),
            frames: None,
        }
    }

    /// 文本输出
    pub fn print_text(&self) {
        if !self.sniff.is_empty() {
            println!("[SNIFF]");
            for entry in &self.sniff {
                println!("  {:<12} : {} (rank {})", entry.name, entry.score, entry.rank);
            }
            println!("[/SNIFF]");
            println!();
        }

        println!("[FORMAT]");
        println!("  输入         : {}", self.input);
        println!("  解封装插件   : {}", self.demuxer);
        println!("  轨道数量     : {}", self.tracks.len());
        if let Some(size) = self.general.file_size {
            println!("  文件大小     : {size} 字节");
        }
        println!("  可寻址       : {}", if self.general.seekable { "是" } else { "否" });
        if let Some(ms) = self.general.duration_ms {
            println!("  时长         : {:.3} 秒", ms as f64 / 1000.0);
        }
        println!("[/FORMAT]");
        println!();

        for track in &self.tracks {
            println!("[TRACK #{}]", track.index);
            if let Some(ref mime) = track.mime {
                println!("  MIME         : {mime}");
            }
            if let Some(sr) = track.sample_rate {
                println!("  采样率       : {sr} Hz");
            }
            if let Some(ch) = track.channels {
                println!("  声道数       : {ch}");
            }
            if let Some(ref cl) = track.channel_layout {
                println!("  声道布局     : {cl}");
            }
            if let Some(ref sf) = track.sample_format {
                println!("  采样格式     : {sf}");
            }
            if let Some(spf) = track.samples_per_frame {
                println!("  每帧采样数   : {spf}");
            }
            if let Some(br) = track.bit_rate {
                println!("  码率         : {} kbps", br / 1000);
            }
            println!("[/TRACK]");
            println!();
        }

        if let Some(ref frames) = self.frames {
            println!("[FRAMES]");
            if let Some(ms) = frames.seek_ms {
                println!("  起始位置     : {ms} ms");
            }
            println!("  帧数         : {}", frames.count);
            println!(
                "  数据总量     : {} 字节 ({:.2} KB)",
                frames.bytes,
                frames.bytes as f64 / 1024.0
            );
            if let (Some(first), Some(last)) = (frames.first_pts_ms, frames.last_pts_ms) {
                println!("  时间戳范围   : {first} ~ {last} ms");
            }
            println!("  结束状态     : {}", frames.status);
            println!("[/FRAMES]");
            println!();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiflow_core::meta::mime;
    use hiflow_core::time::HST_SECOND;
    use hiflow_core::{Seekable, Tag};

    #[test]
    fn test_轨道信息() {
        let meta = Meta::new()
            .with(Tag::Mime(mime::AUDIO_RAW.into()))
            .with(Tag::AudioSampleRate(8000))
            .with(Tag::AudioChannels(1))
            .with(Tag::BitRate(0));
        let track = TrackInfo::from_meta(0, &meta);
        assert_eq!(track.mime.as_deref(), Some(mime::AUDIO_RAW));
        assert_eq!(track.sample_rate, Some(8000));
        assert_eq!(track.bit_rate, None);
        assert_eq!(track.tags.len(), 4);
    }

    #[test]
    fn test_容器信息() {
        let meta = Meta::new()
            .with(Tag::MediaFileSize(1234))
            .with(Tag::MediaSeekable(Seekable::Seekable))
            .with(Tag::MediaDuration(3 * HST_SECOND / 2));
        let general = GeneralInfo::from_meta(&meta);
        assert_eq!(general.file_size, Some(1234));
        assert!(general.seekable);
        assert_eq!(general.duration_ms, Some(1500));
    }

    #[test]
    fn test_帧统计() {
        let mut summary = FrameSummary::default();
        summary.record(0, 100);
        summary.record(HST_SECOND, 50);
        summary.finish(Status::EndOfStream);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.bytes, 150);
        assert_eq!(summary.first_pts_ms, Some(0));
        assert_eq!(summary.last_pts_ms, Some(1000));
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["status"], "END_OF_STREAM");
        assert!(json.get("seek_ms").is_none());
    }
}
