//! 插件日志桥
//!
//! 引擎内 `console.log` / `plugin.log` 产生的每一行都同步转发给宿主回调。
//! 回调运行在正在执行脚本的线程上，必须尽快返回。

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// 宿主日志回调，收到的是完整的一行（含引擎附加的换行符）
pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// 未安装回调时，日志行进入 tracing 的这个 target
pub const PLUGIN_LOG_TARGET: &str = "raspbridge::plugin";

/// 日志汇聚点
#[derive(Default)]
pub struct LogBridge {
    sink: RwLock<Option<LogCallback>>,
}

impl LogBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// 安装回调，后写者生效；None 表示回退到 tracing
    pub fn install(&self, callback: Option<LogCallback>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = callback;
    }

    pub fn clear(&self) {
        self.install(None);
    }

    pub fn is_installed(&self) -> bool {
        self.sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// 转发一行日志
    pub fn emit(&self, line: &str) {
        // 先克隆出回调再释放锁，回调内部可以重新安装
        let callback = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match callback {
            Some(cb) => cb(line),
            None => {
                tracing::info!(target: PLUGIN_LOG_TARGET, "{}", line.trim_end_matches('\n'));
            }
        }
    }
}

impl fmt::Debug for LogBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBridge")
            .field("installed", &self.is_installed())
            .finish()
    }
}

/// 初始化进程级 tracing 输出（命令行入口使用）
pub fn init_tracing(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collector() -> (LogCallback, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let cb: LogCallback = Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_string()));
        (cb, lines)
    }

    #[test]
    fn emit_reaches_callback_verbatim() {
        let bridge = LogBridge::new();
        let (cb, lines) = collector();
        bridge.install(Some(cb));
        bridge.emit("2333\n");
        assert_eq!(*lines.lock().unwrap(), vec!["2333\n".to_string()]);
    }

    #[test]
    fn last_writer_wins() {
        let bridge = LogBridge::new();
        let (first, first_lines) = collector();
        let (second, second_lines) = collector();
        bridge.install(Some(first));
        bridge.install(Some(second));
        bridge.emit("[test] ok\n");
        assert!(first_lines.lock().unwrap().is_empty());
        assert_eq!(second_lines.lock().unwrap().len(), 1);
    }

    #[test]
    fn cleared_bridge_falls_back_to_tracing() {
        let bridge = LogBridge::new();
        let (cb, lines) = collector();
        bridge.install(Some(cb));
        bridge.clear();
        assert!(!bridge.is_installed());
        bridge.emit("dropped into tracing\n");
        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn callback_may_reinstall() {
        let bridge = Arc::new(LogBridge::new());
        let inner = bridge.clone();
        bridge.install(Some(Arc::new(move |_line: &str| inner.clear())));
        bridge.emit("once\n");
        assert!(!bridge.is_installed());
    }
}
