//! hiflow-probe - 音频解封装探测工具
//!
//! 用所有内置插件探测输入, 打开置信度最高的插件并输出媒体信息,
//! 可选地先 seek 再读完全部帧.

mod config;
mod report;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};

use hiflow_core::time::ms_to_hst;
use hiflow_core::{HiError, Status};
use hiflow_demux::data_source::{FileSource, HttpSource};
use hiflow_demux::demuxers::{aac, mp3, mp4, wav};
use hiflow_demux::{PluginRegistry, SeekMode, SharedSource};

use config::ProbeConfig;
use report::{FrameSummary, ProbeReport};

/// hiflow 音频解封装探测工具
#[derive(Parser, Debug, Clone)]
#[command(name = "hiflow-probe", version, about = "纯 Rust 音频解封装探测工具")]
struct Cli {
    /// 输入文件路径或 http(s) URL
    input: String,

    /// 输出 JSON 格式
    #[arg(long)]
    json: bool,

    /// 读取全部帧并统计
    #[arg(long)]
    frames: bool,

    /// 读帧前先 seek 到指定毫秒
    #[arg(long, value_name = "N")]
    seek_ms: Option<i64>,

    /// JSON 配置文件
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 日志目录 (覆盖配置文件)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// 静默模式 (关闭控制台日志与横幅)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("错误: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => ProbeConfig::load(path)?,
        None => ProbeConfig::default(),
    };
    if let Some(dir) = &cli.log_dir {
        config.logging.directory = dir.to_string_lossy().to_string();
    }
    if cli.quiet {
        config.logging.console_level = None;
    }
    hiflow::logging::init(config.logging.clone())?;

    if !cli.quiet {
        eprintln!("hiflow-probe 版本 {} -- 纯 Rust 音频解封装探测工具", hiflow::version());
        eprintln!("输入: {}", cli.input);
    }

    let json = cli.json;
    let report = tokio::task::spawn_blocking(move || probe(&cli, &config))
        .await
        .context("探测任务异常退出")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print_text();
    }
    Ok(())
}

/// 按配置构造注册表
fn build_registry(config: &ProbeConfig) -> Result<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register(aac::plugin_def())?;
    registry.register(mp3::plugin_def())?;
    registry.register(mp4::plugin_def())?;
    registry.register(wav::plugin_def_with_policy(config.wav_seek_policy.into()))?;
    registry.set_reader_config(config.reader.into());
    Ok(registry)
}

fn open_input(input: &str) -> Result<SharedSource> {
    if input.starts_with("http://") || input.starts_with("https://") {
        let source = HttpSource::open(input).with_context(|| format!("无法连接 '{input}'"))?;
        Ok(Arc::new(source))
    } else {
        let source = FileSource::open(input).with_context(|| format!("无法打开文件 '{input}'"))?;
        Ok(Arc::new(source))
    }
}

/// 阻塞执行探测, 在 `spawn_blocking` 线程上运行
fn probe(cli: &Cli, config: &ProbeConfig) -> Result<ProbeReport> {
    let registry = build_registry(config)?;
    let source = open_input(&cli.input)?;

    // 顺序流的探测由 open_source 在前缀副本上完成, 这里只对可寻址数据源列出置信度
    let sniff = if source.seekable().is_seekable() {
        registry.sniff(&source)
    } else {
        Vec::new()
    };

    let mut opened = registry
        .open_source(source)
        .with_context(|| format!("无法识别 '{}'", cli.input))?;
    info!("{}: 使用插件 {}", cli.input, opened.name);

    let mut report = ProbeReport::new(&cli.input, &opened.name, &sniff, &opened.media_info);

    if cli.frames || cli.seek_ms.is_some() {
        let mut summary = FrameSummary::default();
        if let Some(ms) = cli.seek_ms {
            opened
                .plugin
                .seek_to(0, ms_to_hst(ms), SeekMode::PreviousSync)
                .with_context(|| format!("seek 到 {ms} ms 失败"))?;
            summary.seek_ms = Some(ms);
        }
        loop {
            match opened.plugin.read_frame(0) {
                Ok(frame) => {
                    summary.record(frame.pts, frame.len());
                    if !cli.frames {
                        summary.finish(Status::Ok);
                        break;
                    }
                }
                Err(HiError::EndOfStream) => {
                    summary.finish(Status::EndOfStream);
                    break;
                }
                Err(e) => {
                    warn!("读帧出错: {}", e);
                    summary.finish(e.status());
                    break;
                }
            }
        }
        report.frames = Some(summary);
    }

    let _ = opened.plugin.stop();
    let _ = opened.plugin.deinit();
    Ok(report)
}
