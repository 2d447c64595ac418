use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use raspbridge::config::{load_options, EngineOptions};
use raspbridge::{ContextGetters, EngineGateway, Plugin};

#[derive(Parser)]
#[command(name = "rasp-bridge", version, about = "Run RASP plugins against a request")]
struct Cli {
    /// 引擎配置文件（YAML / JSON）
    #[arg(long, global = true)]
    options: Option<PathBuf>,

    /// 插件目录，加载其中全部 *.js
    #[arg(long, global = true)]
    plugins: Option<PathBuf>,

    /// 在插件之前执行的全局配置脚本
    #[arg(long, global = true)]
    config_script: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 执行一段脚本并打印结果的 JSON
    Exec {
        /// 脚本文件，缺省从参数读取源码
        #[arg(long)]
        file: Option<PathBuf>,
        /// 内联源码
        source: Option<String>,
    },
    /// 对一个检测点执行全部插件
    Check {
        /// 检测点名称，如 request / command / sql
        check_point: String,
        /// 检测参数 JSON
        #[arg(long, default_value = "{}")]
        params: String,
        /// 请求上下文 JSON 文件，键为字段名
        #[arg(long)]
        context: Option<PathBuf>,
        /// 超时（毫秒），0 使用配置值
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,
    },
}

fn main() -> Result<()> {
    raspbridge::logging::init_tracing("info");
    let cli = Cli::parse();

    let options = match &cli.options {
        Some(path) => load_options(path)?,
        None => EngineOptions::default(),
    };
    let gateway = EngineGateway::try_with_options(options)?;
    gateway.initialize(None)?;

    let config = match &cli.config_script {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config script {}", path.display()))?,
        None => String::new(),
    };
    let plugins = match &cli.plugins {
        Some(dir) => Plugin::load_dir(dir)?,
        None => Vec::new(),
    };
    if !config.is_empty() || !plugins.is_empty() {
        gateway.create_snapshot(&config, plugins)?;
        info!(plugins = ?gateway.loaded_plugins()?, "snapshot loaded");
    }

    match cli.command {
        Command::Exec { file, source } => {
            let (source, filename) = match (file, source) {
                (Some(path), _) => (
                    std::fs::read_to_string(&path)?,
                    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
                ),
                (None, Some(src)) => (src, "eval.js".to_string()),
                (None, None) => anyhow::bail!("either --file or inline source is required"),
            };
            println!("{}", gateway.exec_script(&source, &filename)?);
        }
        Command::Check {
            check_point,
            params,
            context,
            timeout_ms,
        } => {
            let getters = match context {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)?;
                    let value: serde_json::Value = serde_json::from_str(&raw)
                        .with_context(|| format!("invalid context file {}", path.display()))?;
                    ContextGetters::from_json(&value)
                }
                None => ContextGetters::new(),
            };
            let out = gateway.check(&check_point, params.as_bytes(), getters, timeout_ms)?;
            println!("{}", String::from_utf8_lossy(&out));
        }
    }

    gateway.dispose();
    Ok(())
}
