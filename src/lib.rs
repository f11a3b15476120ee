//! # hiflow
//!
//! 纯 Rust 实现的音频解封装插件框架.
//!
//! 支持 AAC (ADTS)、MP3、MP4 (AAC 音频轨) 与 WAV, 数据源可以是内存、本地文件、
//! HTTP 或边下载边推送的顺序流.
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use hiflow::demux::data_source::FileSource;
//! use std::sync::Arc;
//!
//! let registry = hiflow::default_plugin_registry().unwrap();
//! let source = Arc::new(FileSource::open("music.wav").unwrap());
//! let mut opened = registry.open_source(source).unwrap();
//! println!("选用插件: {}", opened.name);
//! while let Ok(frame) = opened.plugin.read_frame(0) {
//!     println!("pts={} bytes={}", frame.pts, frame.len());
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `hiflow-core` | 错误码、元数据、缓冲区与时间换算 |
//! | `hiflow-demux` | 数据源、读取器、插件接口与各格式解封装插件 |

/// 核心类型与工具
pub use hiflow_core as core;

/// 解封装框架与插件
pub use hiflow_demux as demux;

pub mod logging;

/// 获取 hiflow 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建已注册所有内置解封装插件的注册表
pub fn default_plugin_registry() -> hiflow_core::HiResult<hiflow_demux::PluginRegistry> {
    let mut registry = hiflow_demux::PluginRegistry::new();
    hiflow_demux::register_all(&mut registry)?;
    Ok(registry)
}
