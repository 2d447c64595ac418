//! 引擎网关
//!
//! 生命周期：`Uninitialized → Initialized → Disposed`。`check` / `exec_script`
//! 持共享锁执行，`initialize` / `dispose` / `create_snapshot` 持独占锁，
//! 因此任何一次检测看到的插件集合要么全是旧快照，要么全是新快照。

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::finding::Finding;
use super::isolate;
use super::snapshot::{Bindings, Plugin, Snapshot};
use crate::common::{BridgeError, Result};
use crate::config::EngineOptions;
use crate::context::{ContextGetters, ContextRegistry};
use crate::logging::{LogBridge, LogCallback};

/// 网关所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Uninitialized,
    Initialized,
    Disposed,
}

enum State {
    Uninitialized,
    Initialized(Arc<Snapshot>),
    Disposed,
}

impl State {
    fn snapshot(&self) -> Result<&Arc<Snapshot>> {
        match self {
            State::Initialized(snapshot) => Ok(snapshot),
            State::Uninitialized => Err(BridgeError::NotInitialized),
            State::Disposed => Err(BridgeError::Disposed),
        }
    }
}

/// 插件引擎入口
pub struct EngineGateway {
    state: RwLock<State>,
    bindings: Arc<Bindings>,
}

impl Default for EngineGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineGateway {
    pub fn new() -> Self {
        Self::with_options(EngineOptions::default())
    }

    /// 校验配置后构造
    pub fn try_with_options(options: EngineOptions) -> Result<Self> {
        options
            .validate()
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        Ok(Self::with_options(options))
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self {
            state: RwLock::new(State::Uninitialized),
            bindings: Arc::new(Bindings {
                registry: Arc::new(ContextRegistry::new()),
                log: Arc::new(LogBridge::new()),
                options,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// 当前快照；引擎不可用时顺带释放本线程缓存的实例
    fn serving(state: &State) -> Result<&Arc<Snapshot>> {
        state.snapshot().inspect_err(|_| isolate::release_current())
    }

    pub fn options(&self) -> &EngineOptions {
        &self.bindings.options
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.bindings.registry
    }

    pub fn log_bridge(&self) -> &LogBridge {
        &self.bindings.log
    }

    pub fn state(&self) -> GatewayState {
        match &*self.read() {
            State::Uninitialized => GatewayState::Uninitialized,
            State::Initialized(_) => GatewayState::Initialized,
            State::Disposed => GatewayState::Disposed,
        }
    }

    /// 当前快照中插件的文件名
    pub fn loaded_plugins(&self) -> Result<Vec<String>> {
        let state = self.read();
        let snapshot = state.snapshot()?;
        Ok(snapshot.plugins().iter().map(|p| p.filename.clone()).collect())
    }

    /// 安装日志回调并建立空快照
    ///
    /// 重复调用只替换日志回调；Dispose 之后不能再初始化。
    pub fn initialize(&self, log: Option<LogCallback>) -> Result<()> {
        let mut state = self.write();
        match &*state {
            State::Disposed => Err(BridgeError::Disposed),
            State::Initialized(_) => {
                self.bindings.log.install(log);
                debug!("engine already initialized, log sink replaced");
                Ok(())
            }
            State::Uninitialized => {
                self.bindings.log.install(log);
                let baseline = Snapshot::build(self.bindings.clone(), "", Vec::new())?;
                *state = State::Initialized(baseline);
                info!(version = env!("CARGO_PKG_VERSION"), "engine initialized");
                Ok(())
            }
        }
    }

    /// 释放引擎，可重复调用
    ///
    /// 其他线程缓存的实例在它们下一次调用 `check` / `exec_script` 或线程退出时释放。
    pub fn dispose(&self) {
        let mut state = self.write();
        let previous = std::mem::replace(&mut *state, State::Disposed);
        isolate::release_current();
        self.bindings.log.clear();
        if let State::Initialized(_) = previous {
            info!("engine disposed");
        }
    }

    /// 用新的配置脚本与插件列表整体替换当前快照
    ///
    /// 任一脚本抛出异常时返回错误，原快照保持不变。
    pub fn create_snapshot(
        &self,
        config: &str,
        plugins: impl IntoIterator<Item = Plugin>,
    ) -> Result<()> {
        let mut state = self.write();
        let current = match &mut *state {
            State::Initialized(current) => current,
            State::Uninitialized => return Err(BridgeError::NotInitialized),
            State::Disposed => return Err(BridgeError::Disposed),
        };
        let plugins: Vec<Plugin> = plugins.into_iter().collect();
        let count = plugins.len();
        match Snapshot::build(self.bindings.clone(), config, plugins) {
            Ok(snapshot) => {
                *current = snapshot;
                info!(plugins = count, "snapshot replaced");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "snapshot build failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    /// 对一个检测点执行全部插件
    ///
    /// 返回 JSON 数组文本；没有结果时为空。`timeout_ms` 为 0 时使用配置的默认值。
    /// 超时返回一条 `log` 结果而不是错误。
    pub fn check(
        &self,
        request_type: &str,
        params: &[u8],
        getters: impl Into<Arc<ContextGetters>>,
        timeout_ms: u64,
    ) -> Result<Vec<u8>> {
        let timeout = if timeout_ms == 0 {
            self.bindings.options.check_timeout()
        } else {
            Duration::from_millis(timeout_ms)
        };

        let state = self.read();
        let snapshot = Self::serving(&state)?;
        let registration = self.bindings.registry.enter(getters);
        let handle = registration.handle();
        let result = isolate::with_isolate(snapshot, |iso| {
            iso.check(request_type, params, Some(handle), timeout)
        });
        drop(registration);
        result
    }

    /// `check` 并解析结果
    pub fn check_findings(
        &self,
        request_type: &str,
        params: &[u8],
        getters: impl Into<Arc<ContextGetters>>,
        timeout_ms: u64,
    ) -> Result<Vec<Finding>> {
        let raw = self.check(request_type, params, getters, timeout_ms)?;
        Finding::parse_all(&raw).map_err(|e| BridgeError::Script {
            filename: request_type.to_string(),
            message: e.to_string(),
        })
    }

    /// 在当前线程的实例中执行一段脚本，返回结果的 JSON 文本
    pub fn exec_script(&self, source: &str, filename: &str) -> Result<String> {
        let state = self.read();
        let snapshot = Self::serving(&state)?;
        let timeout = self.bindings.options.script_timeout();
        isolate::with_isolate(snapshot, |iso| iso.exec(source, filename, timeout))
    }
}
