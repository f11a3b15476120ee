//! # hiflow-demux
//!
//! hiflow 解封装插件库, 提供数据源抽象、带重试的读取器和各格式解封装插件.
//!
//! 插件按 [`DemuxerPlugin`] 生命周期驱动:
//! `init` → `set_data_source` → `prepare` → `get_media_info` → `start` → `read_frame`...
//!
//! ```rust,no_run
//! use hiflow_demux::{PluginRegistry, data_source::MemorySource};
//!
//! let mut registry = PluginRegistry::new();
//! hiflow_demux::register_all(&mut registry).unwrap();
//! let mut opened = registry.open_source(MemorySource::shared(vec![0u8; 16])).unwrap();
//! while let Ok(frame) = opened.plugin.read_frame(0) {
//!     println!("pts={} size={}", frame.pts, frame.len());
//! }
//! ```

pub mod data_source;
pub mod demuxers;
pub mod ingest;
pub mod plugin;
pub mod probe;
pub mod reader;
pub mod registry;

// 重导出常用类型
pub use data_source::{DataSource, SharedSource};
pub use ingest::IngestBuffer;
pub use plugin::{DemuxerPlugin, FormatDemuxer, FormatParser, MediaInfo, PluginState, SeekMode};
pub use probe::ProbeScore;
pub use reader::{ReaderConfig, RetryingReader};
pub use registry::{DemuxerPluginDef, OpenedDemuxer, PluginRegistry, SniffResult};

/// 注册所有内置解封装插件
pub fn register_all(registry: &mut PluginRegistry) -> hiflow_core::HiResult<()> {
    demuxers::register_all_demuxers(registry)
}
