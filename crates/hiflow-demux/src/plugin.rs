//! 解封装插件接口与生命周期.
//!
//! [`DemuxerPlugin`] 是管线看到的统一接口. 各格式只实现 [`FormatParser`],
//! 由 [`FormatDemuxer`] 负责状态机、数据源绑定和共享的 [`RetryingReader`].
//!
//! 生命周期:
//! ```text
//! Created --init--> Initialized --prepare--> Prepared --start--> Running
//!                        ^                      |  ^               |
//!                        |                      |  +----start---- Stopped <--stop--+
//!                        +-------reset----------+------------------+
//! 任意状态 --deinit--> Deinitialized (终态)
//! ```

use std::fmt;

use hiflow_core::{Buffer, HiError, HiResult, Meta, Tag, TagKey};

use crate::data_source::SharedSource;
use crate::reader::{ReaderConfig, RetryingReader};

use PluginState::*;

/// 插件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginState {
    Created,
    Initialized,
    Prepared,
    Running,
    Stopped,
    Deinitialized,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Prepared => "prepared",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Deinitialized => "deinitialized",
        };
        f.write_str(name)
    }
}

/// Seek 模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SeekMode {
    /// 目标之后最近的同步点
    NextSync,
    /// 目标之前最近的同步点
    #[default]
    PreviousSync,
    /// 离目标最近的同步点
    ClosestSync,
}

/// 媒体信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    /// 容器级元数据
    pub general: Meta,
    /// 每条轨道的元数据
    pub tracks: Vec<Meta>,
}

/// 生命周期状态机
#[derive(Debug, Clone)]
pub struct Lifecycle {
    name: &'static str,
    state: PluginState,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: PluginState::Created,
        }
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    /// 检查当前状态是否允许 `op`
    pub fn check(&self, op: &str, allowed: &[PluginState]) -> HiResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(HiError::WrongState(format!(
                "{}: {} 状态下不允许 {}",
                self.name, self.state, op
            )))
        }
    }

    /// 检查后切换状态
    pub fn transition(&mut self, op: &str, allowed: &[PluginState], to: PluginState) -> HiResult<()> {
        self.check(op, allowed)?;
        if self.state != to {
            log::debug!("{}: {} -> {} ({})", self.name, self.state, to, op);
        }
        self.state = to;
        Ok(())
    }
}

/// 解封装插件 trait
///
/// 所有方法由同一个管线线程顺序调用, 插件内部不加锁.
///
/// 读取约定:
/// - `Ok(buffer)`: 得到一帧
/// - `Err(HiError::EndOfStream)`: 没有更多数据, 调用方应停止读取
pub trait DemuxerPlugin: Send {
    /// 插件名称
    fn name(&self) -> &str;

    /// 当前状态
    fn state(&self) -> PluginState;

    /// 分配解析所需的资源
    fn init(&mut self) -> HiResult<()>;

    /// 释放全部资源, 之后插件不可再用
    fn deinit(&mut self) -> HiResult<()>;

    fn prepare(&mut self) -> HiResult<()>;

    /// 清空解析状态并解除数据源, 回到 `Initialized`
    fn reset(&mut self) -> HiResult<()>;

    fn start(&mut self) -> HiResult<()>;

    fn stop(&mut self) -> HiResult<()>;

    /// 绑定数据源
    ///
    /// 只能在 `Initialized` 状态下调用一次, 再次绑定需要先 `reset`.
    fn set_data_source(&mut self, source: SharedSource) -> HiResult<()>;

    /// 解析头部并返回媒体信息
    ///
    /// 首次调用可能经历多轮读取; 之后返回缓存的结果.
    fn get_media_info(&mut self) -> HiResult<MediaInfo>;

    /// 读取下一帧
    ///
    /// `timeout_ms` 仅为接口兼容保留, 阻塞上限由读取器的重试配置决定.
    fn read_frame(&mut self, timeout_ms: i32) -> HiResult<Buffer>;

    /// 定位到 `hst_time` (HST 纳秒)
    fn seek_to(&mut self, track_id: u32, hst_time: i64, mode: SeekMode) -> HiResult<()>;

    /// 轨道数量
    fn track_count(&self) -> usize;

    /// 设置读取器重试参数
    fn set_reader_config(&mut self, config: ReaderConfig);

    fn select_track(&mut self, track_id: u32) -> HiResult<()> {
        let _ = track_id;
        Err(HiError::Unimplemented(format!("{}: select_track", self.name())))
    }

    fn unselect_track(&mut self, track_id: u32) -> HiResult<()> {
        let _ = track_id;
        Err(HiError::Unimplemented(format!("{}: unselect_track", self.name())))
    }

    fn selected_tracks(&self) -> HiResult<Vec<u32>> {
        Err(HiError::Unimplemented(format!("{}: selected_tracks", self.name())))
    }

    fn get_parameter(&self, key: TagKey) -> HiResult<Tag> {
        Err(HiError::Unimplemented(format!("{}: get_parameter({})", self.name(), key)))
    }

    fn set_parameter(&mut self, tag: Tag) -> HiResult<()> {
        Err(HiError::Unimplemented(format!(
            "{}: set_parameter({})",
            self.name(),
            tag.key()
        )))
    }
}

/// 格式解析器
///
/// 只负责字节层面的解析, 状态检查与数据源管理由 [`FormatDemuxer`] 完成.
pub trait FormatParser: Send {
    /// 插件名称
    fn name(&self) -> &'static str;

    /// 暂存缓冲区容量
    fn buffer_capacity(&self) -> usize;

    /// 是否只支持可寻址数据源
    fn requires_seekable(&self) -> bool {
        false
    }

    /// 解析头部, 得到媒体信息
    fn parse_media_info(&mut self, reader: &mut RetryingReader) -> HiResult<MediaInfo>;

    /// 解析下一帧
    fn read_frame(&mut self, reader: &mut RetryingReader) -> HiResult<Buffer>;

    /// 定位
    fn seek_to(&mut self, reader: &mut RetryingReader, hst_time: i64, mode: SeekMode) -> HiResult<()>;

    /// 清空解析状态
    fn reset(&mut self);
}

/// 以格式解析器为核心的解封装插件
pub struct FormatDemuxer<P: FormatParser> {
    parser: P,
    lifecycle: Lifecycle,
    reader: Option<RetryingReader>,
    config: ReaderConfig,
    media_info: Option<MediaInfo>,
}

impl<P: FormatParser> FormatDemuxer<P> {
    pub fn new(parser: P) -> Self {
        let name = parser.name();
        Self {
            parser,
            lifecycle: Lifecycle::new(name),
            reader: None,
            config: ReaderConfig::default(),
            media_info: None,
        }
    }

    /// 解析器
    pub fn parser(&self) -> &P {
        &self.parser
    }

    /// 解析器 (可变)
    pub fn parser_mut(&mut self) -> &mut P {
        &mut self.parser
    }

    /// 读取器 (`init` 之后才存在)
    pub fn reader(&self) -> Option<&RetryingReader> {
        self.reader.as_ref()
    }

    fn reader_mut(&mut self, op: &str) -> HiResult<&mut RetryingReader> {
        self.reader
            .as_mut()
            .ok_or_else(|| HiError::WrongState(format!("{}: {} 前未初始化", self.parser.name(), op)))
    }

    fn require_source(&self, op: &str) -> HiResult<()> {
        match &self.reader {
            Some(r) if r.has_source() => Ok(()),
            _ => Err(HiError::WrongState(format!(
                "{}: {} 前未设置数据源",
                self.parser.name(),
                op
            ))),
        }
    }
}

impl<P: FormatParser> DemuxerPlugin for FormatDemuxer<P> {
    fn name(&self) -> &str {
        self.parser.name()
    }

    fn state(&self) -> PluginState {
        self.lifecycle.state()
    }

    fn init(&mut self) -> HiResult<()> {
        self.lifecycle.transition("init", &[Created], Initialized)?;
        self.reader = Some(RetryingReader::new(self.parser.buffer_capacity(), self.config));
        self.parser.reset();
        Ok(())
    }

    fn deinit(&mut self) -> HiResult<()> {
        self.lifecycle.transition(
            "deinit",
            &[Created, Initialized, Prepared, Running, Stopped],
            Deinitialized,
        )?;
        self.reader = None;
        self.media_info = None;
        self.parser.reset();
        Ok(())
    }

    fn prepare(&mut self) -> HiResult<()> {
        self.lifecycle.transition("prepare", &[Initialized], Prepared)
    }

    fn reset(&mut self) -> HiResult<()> {
        self.lifecycle
            .transition("reset", &[Initialized, Prepared, Running, Stopped], Initialized)?;
        if let Some(reader) = self.reader.as_mut() {
            reader.clear_source();
        }
        self.media_info = None;
        self.parser.reset();
        Ok(())
    }

    fn start(&mut self) -> HiResult<()> {
        self.lifecycle.transition("start", &[Prepared, Stopped], Running)
    }

    fn stop(&mut self) -> HiResult<()> {
        self.lifecycle.transition("stop", &[Prepared, Running], Stopped)
    }

    fn set_data_source(&mut self, source: SharedSource) -> HiResult<()> {
        self.lifecycle.check("set_data_source", &[Initialized])?;
        let name = self.parser.name();
        if self.parser.requires_seekable() && !source.seekable().is_seekable() {
            return Err(HiError::Unimplemented(format!("{}: 不支持不可寻址数据源", name)));
        }
        let reader = self.reader_mut("set_data_source")?;
        if reader.has_source() {
            return Err(HiError::WrongState(format!(
                "{}: 数据源已设置, 需要先 reset",
                name
            )));
        }
        reader.set_source(source);
        Ok(())
    }

    fn get_media_info(&mut self) -> HiResult<MediaInfo> {
        self.lifecycle
            .check("get_media_info", &[Initialized, Prepared, Running, Stopped])?;
        self.require_source("get_media_info")?;
        if let Some(info) = &self.media_info {
            return Ok(info.clone());
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| HiError::WrongState("未初始化".into()))?;
        let info = self.parser.parse_media_info(reader)?;
        log::info!(
            "{}: 解析完成, {} 条轨道, {}",
            self.parser.name(),
            info.tracks.len(),
            info.tracks
                .first()
                .map(|t| t.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "))
                .unwrap_or_default()
        );
        self.media_info = Some(info.clone());
        Ok(info)
    }

    fn read_frame(&mut self, _timeout_ms: i32) -> HiResult<Buffer> {
        self.lifecycle.check("read_frame", &[Prepared, Running])?;
        if self.media_info.is_none() {
            return Err(HiError::WrongState(format!(
                "{}: read_frame 前需要 get_media_info",
                self.parser.name()
            )));
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| HiError::WrongState("未初始化".into()))?;
        self.parser.read_frame(reader)
    }

    fn seek_to(&mut self, track_id: u32, hst_time: i64, mode: SeekMode) -> HiResult<()> {
        self.lifecycle.check("seek_to", &[Prepared, Running, Stopped])?;
        let track_count = self.track_count();
        if self.media_info.is_none() || track_id as usize >= track_count {
            return Err(HiError::InvalidParameter(format!(
                "{}: 无效轨道 {} (共 {} 条)",
                self.parser.name(),
                track_id,
                track_count
            )));
        }
        if hst_time < 0 {
            return Err(HiError::InvalidParameter(format!("无效时间 {}", hst_time)));
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| HiError::WrongState("未初始化".into()))?;
        log::debug!("{}: seek 到 {}ns ({:?})", self.parser.name(), hst_time, mode);
        self.parser.seek_to(reader, hst_time, mode)
    }

    fn track_count(&self) -> usize {
        self.media_info.as_ref().map_or(0, |info| info.tracks.len())
    }

    fn set_reader_config(&mut self, config: ReaderConfig) {
        self.config = config;
        if let Some(reader) = self.reader.as_mut() {
            reader.set_config(config);
        }
    }
}
