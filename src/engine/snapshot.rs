//! 插件快照
//!
//! 快照是一份不可变的配置脚本加插件列表。构建时在当前线程完整实例化一次，
//! 任何脚本异常都会让构建失败；构建成功后各工作线程按需从同一份配方
//! 重建自己的 isolate。

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use super::isolate::{self, Isolate};
use crate::common::{BridgeError, Result};
use crate::config::EngineOptions;
use crate::context::ContextRegistry;
use crate::logging::LogBridge;

/// 单个插件脚本
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plugin {
    pub source: String,
    pub filename: String,
}

impl Plugin {
    pub fn new(source: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            filename: filename.into(),
        }
    }

    /// 读取目录下的全部 `*.js`，按文件名排序
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<Plugin>> {
        let mut plugins = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("js") {
                continue;
            }
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let source = std::fs::read_to_string(&path)?;
            plugins.push(Plugin::new(source, filename));
        }
        plugins.sort_by(|a, b| a.filename.cmp(&b.filename));
        debug!(dir = %dir.as_ref().display(), count = plugins.len(), "plugins read from directory");
        Ok(plugins)
    }
}

/// isolate 与宿主之间共享的对象
pub(crate) struct Bindings {
    pub registry: Arc<ContextRegistry>,
    pub log: Arc<LogBridge>,
    pub options: EngineOptions,
}

/// 不可变快照
pub struct Snapshot {
    bindings: Arc<Bindings>,
    config: String,
    plugins: Vec<Plugin>,
    created_at: SystemTime,
}

impl Snapshot {
    /// 构建并试运行；失败时异常信息同时写入插件日志
    pub(crate) fn build(
        bindings: Arc<Bindings>,
        config: &str,
        plugins: Vec<Plugin>,
    ) -> Result<Arc<Snapshot>> {
        let snapshot = Arc::new(Snapshot {
            bindings,
            config: config.to_string(),
            plugins,
            created_at: SystemTime::now(),
        });

        match Isolate::new(&snapshot, false) {
            Ok(trial) => {
                // 试运行的实例留给当前线程继续使用
                isolate::adopt(trial);
                info!(plugins = snapshot.plugins.len(), "snapshot built");
                Ok(snapshot)
            }
            Err(e) => {
                if let BridgeError::Script { .. } = e {
                    snapshot.bindings.log.emit(&format!("{}\n", e));
                }
                Err(e)
            }
        }
    }

    pub(crate) fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub(crate) fn options(&self) -> &EngineOptions {
        &self.bindings.options
    }

    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.filename.as_str()).collect::<Vec<_>>(),
            )
            .field("config_len", &self.config.len())
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_dir_reads_sorted_js_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.js"), "const b = 1;").unwrap();
        std::fs::write(dir.path().join("a.js"), "const a = 1;").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();
        std::fs::create_dir(dir.path().join("nested.js")).unwrap();

        let plugins = Plugin::load_dir(dir.path()).unwrap();
        let names: Vec<_> = plugins.iter().map(|p| p.filename.as_str()).collect();
        assert_eq!(names, vec!["a.js", "b.js"]);
        assert_eq!(plugins[0].source, "const a = 1;");
    }

    #[test]
    fn load_dir_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Plugin::load_dir(dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
