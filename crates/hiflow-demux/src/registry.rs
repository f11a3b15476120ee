//! 解封装插件注册表.
//!
//! 管理所有已注册的插件定义, 支持按名称创建和按数据源自动探测.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use hiflow_core::{HiError, HiResult};

use crate::data_source::{PrefixedSource, SharedSource};
use crate::plugin::{DemuxerPlugin, MediaInfo};
use crate::probe::{self, ProbeScore, SCORE_MAX};
use crate::reader::ReaderConfig;

/// 插件创建函数, 参数为插件名
pub type PluginCreator = fn(&str) -> Box<dyn DemuxerPlugin>;

/// 探测函数, 返回 0 ~ 100 的置信度
pub type PluginSniffer = fn(&str, &SharedSource) -> ProbeScore;

/// 不可寻址数据源的探测前缀长度
pub const STREAM_PROBE_SIZE: usize = 64 * 1024;

/// 插件定义
#[derive(Clone)]
pub struct DemuxerPluginDef {
    /// 插件名称, 注册表内唯一
    pub name: String,
    pub description: String,
    /// 同分时的优先级 (0 ~ 100)
    pub rank: u32,
    pub creator: PluginCreator,
    pub sniffer: PluginSniffer,
}

/// 探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffResult {
    pub name: String,
    pub score: ProbeScore,
    pub rank: u32,
}

/// 已打开的解封装插件
pub struct OpenedDemuxer {
    /// 插件名称
    pub name: String,
    /// 处于 `Running` 状态的插件
    pub plugin: Box<dyn DemuxerPlugin>,
    /// 解析得到的媒体信息
    pub media_info: MediaInfo,
}

impl fmt::Debug for OpenedDemuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedDemuxer")
            .field("name", &self.name)
            .field("plugin", &self.plugin.name())
            .field("media_info", &self.media_info)
            .finish()
    }
}

/// 插件注册表
pub struct PluginRegistry {
    defs: Vec<DemuxerPluginDef>,
    reader_config: ReaderConfig,
}

impl PluginRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            defs: Vec::new(),
            reader_config: ReaderConfig::default(),
        }
    }

    /// 注册一个插件
    ///
    /// 名称为空、重名或 rank 超过 100 时返回 [`HiError::InvalidParameter`].
    pub fn register(&mut self, def: DemuxerPluginDef) -> HiResult<()> {
        if def.name.is_empty() {
            return Err(HiError::InvalidParameter("插件名称为空".into()));
        }
        if def.rank > SCORE_MAX {
            return Err(HiError::InvalidParameter(format!(
                "{}: rank {} 超出范围",
                def.name, def.rank
            )));
        }
        if self.find(&def.name).is_some() {
            return Err(HiError::InvalidParameter(format!("{}: 重复注册", def.name)));
        }
        log::debug!("注册解封装插件: {} (rank={})", def.name, def.rank);
        self.defs.push(def);
        Ok(())
    }

    /// 设置之后创建的插件所用的读取器配置
    pub fn set_reader_config(&mut self, config: ReaderConfig) {
        self.reader_config = config;
    }

    pub fn reader_config(&self) -> ReaderConfig {
        self.reader_config
    }

    fn find(&self, name: &str) -> Option<&DemuxerPluginDef> {
        self.defs.iter().find(|d| d.name == name)
    }

    /// 所有已注册插件 (名称, 描述, rank)
    pub fn list(&self) -> Vec<(&str, &str, u32)> {
        self.defs
            .iter()
            .map(|d| (d.name.as_str(), d.description.as_str(), d.rank))
            .collect()
    }

    /// 创建指定名称的插件实例
    pub fn create(&self, name: &str) -> HiResult<Box<dyn DemuxerPlugin>> {
        let def = self
            .find(name)
            .ok_or_else(|| HiError::InvalidParameter(format!("未注册的插件: {}", name)))?;
        let mut plugin = (def.creator)(&def.name);
        plugin.set_reader_config(self.reader_config);
        Ok(plugin)
    }

    /// 用所有插件探测数据源
    ///
    /// 只返回置信度大于 0 的结果, 按置信度、rank 降序排列.
    pub fn sniff(&self, source: &SharedSource) -> Vec<SniffResult> {
        let mut results: Vec<SniffResult> = self
            .defs
            .iter()
            .filter_map(|def| {
                let score = (def.sniffer)(&def.name, source).min(SCORE_MAX);
                log::debug!("探测 {}: {}", def.name, score);
                (score > 0).then(|| SniffResult {
                    name: def.name.clone(),
                    score,
                    rank: def.rank,
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.cmp(&a.score).then(b.rank.cmp(&a.rank)));
        results
    }

    /// 探测并打开数据源
    ///
    /// 按探测顺序逐个尝试, 某个插件解析头部返回 `UnsupportedFormat` 时换下一个.
    /// 不可寻址数据源先截取一段前缀用于探测, 再以 [`PrefixedSource`] 交给插件.
    pub fn open_source(&self, source: SharedSource) -> HiResult<OpenedDemuxer> {
        if source.seekable().is_seekable() {
            let candidates = self.sniff(&source);
            return self.try_candidates(&candidates, || Some(source.clone()));
        }

        let prefix = Bytes::from(probe::read_prefix(
            &source,
            0,
            STREAM_PROBE_SIZE,
            self.reader_config,
        )?);
        log::debug!("顺序流探测前缀 {} 字节", prefix.len());
        let probe_src: SharedSource = Arc::new(crate::data_source::MemorySource::new(prefix.clone()));
        let candidates = self.sniff(&probe_src);

        let mut last: Option<Arc<PrefixedSource>> = None;
        self.try_candidates(&candidates, || {
            // 上一个插件已读过前缀之外的数据, 无法重放
            if last.as_ref().is_some_and(|p| p.touched_inner()) {
                return None;
            }
            let replay = Arc::new(PrefixedSource::new(prefix.clone(), source.clone()));
            last = Some(replay.clone());
            Some(replay as SharedSource)
        })
    }

    fn try_candidates(
        &self,
        candidates: &[SniffResult],
        mut next_source: impl FnMut() -> Option<SharedSource>,
    ) -> HiResult<OpenedDemuxer> {
        let mut last_err = HiError::UnsupportedFormat("没有插件能识别该数据源".into());
        for cand in candidates {
            let Some(source) = next_source() else {
                log::warn!("数据源无法重放, 停止尝试 {}", cand.name);
                break;
            };
            let mut plugin = self.create(&cand.name)?;
            match open_plugin(plugin.as_mut(), source) {
                Ok(media_info) => {
                    log::info!("选用解封装插件 {} (置信度 {})", cand.name, cand.score);
                    return Ok(OpenedDemuxer {
                        name: cand.name.clone(),
                        plugin,
                        media_info,
                    });
                }
                Err(HiError::UnsupportedFormat(msg)) => {
                    log::debug!("{} 无法解析: {}", cand.name, msg);
                    let _ = plugin.deinit();
                    last_err = HiError::UnsupportedFormat(msg);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }
}

fn open_plugin(plugin: &mut dyn DemuxerPlugin, source: SharedSource) -> HiResult<MediaInfo> {
    plugin.init()?;
    plugin.set_data_source(source)?;
    plugin.prepare()?;
    let info = plugin.get_media_info()?;
    plugin.start()?;
    Ok(info)
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
