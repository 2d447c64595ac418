//! 线程私有的脚本实例
//!
//! 每个工作线程缓存一个从当前快照实例化出的 QuickJS 运行时。线程发现缓存
//! 的实例不属于当前快照时，静默重放配方重建（重放期间的 console 输出丢弃）。

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rquickjs::{
    ArrayBuffer, CatchResultExt, CaughtError, Context, Ctx, Function, IntoJs, Object, Persistent, Runtime,
    Value,
};
use tracing::{debug, warn};

use super::finding::Finding;
use super::snapshot::{Bindings, Snapshot};
use crate::common::{AsBufferView, BridgeError, BufferKind, BufferView, Result};
use crate::context::{ContextRegistry, Field, FieldKind, Handle};

const CONSOLE_JS: &str = include_str!("js/console.js");
const CONTEXT_JS: &str = include_str!("js/context.js");
const RASP_JS: &str = include_str!("js/rasp.js");

// ─── Watchdog ───────────────────────────────────────────────────────────────

/// 执行截止时间，由运行时的中断回调轮询
struct Watchdog {
    epoch: Instant,
    /// 相对 epoch 的纳秒数，0 表示未启用
    deadline: AtomicU64,
    fired: AtomicBool,
}

impl Watchdog {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            deadline: AtomicU64::new(0),
            fired: AtomicBool::new(false),
        }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn set(&self, timeout: Duration) {
        self.fired.store(false, Ordering::SeqCst);
        let budget = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let at = self.now().saturating_add(budget).max(1);
        self.deadline.store(at, Ordering::SeqCst);
    }

    fn arm(&self, timeout: Duration) -> Armed<'_> {
        self.set(timeout);
        Armed { watchdog: self }
    }

    fn should_interrupt(&self) -> bool {
        let deadline = self.deadline.load(Ordering::SeqCst);
        if deadline == 0 || self.now() < deadline {
            return false;
        }
        self.fired.store(true, Ordering::SeqCst);
        true
    }
}

/// 启用中的截止时间，析构时关闭
struct Armed<'a> {
    watchdog: &'a Watchdog,
}

impl Armed<'_> {
    fn fired(&self) -> bool {
        self.watchdog.fired.load(Ordering::SeqCst)
    }

    fn rearm(&mut self, timeout: Duration) {
        self.watchdog.set(timeout);
    }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.watchdog.deadline.store(0, Ordering::SeqCst);
    }
}

// ─── Context fields ─────────────────────────────────────────────────────────

/// 交给脚本的字段值：文本为字符串，body 为 ArrayBuffer
enum JsField {
    Text(String),
    Bytes(Vec<u8>),
}

impl<'js> IntoJs<'js> for JsField {
    fn into_js(self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        match self {
            JsField::Text(text) => text.into_js(ctx),
            JsField::Bytes(bytes) => ArrayBuffer::new(ctx.clone(), bytes)?.into_js(ctx),
        }
    }
}

/// 立即复制宿主视图；空视图表示字段不存在
fn copy_field(view: BufferView<'_>, field: Field, limit: usize) -> Option<JsField> {
    if view.kind() == BufferKind::Empty {
        return None;
    }
    let bytes = view.as_bytes();
    let mut end = bytes.len().min(limit);
    if field.kind() != FieldKind::Bytes {
        // 退回到字符边界
        while end > 0 && end < bytes.len() && bytes[end] & 0xC0 == 0x80 {
            end -= 1;
        }
    }
    let bytes = &bytes[..end];
    Some(match field.kind() {
        FieldKind::Bytes => JsField::Bytes(bytes.to_vec()),
        FieldKind::Text | FieldKind::Json => {
            JsField::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    })
}

/// 只有正在检测的请求可读；其他句柄一律视为不存在
fn read_field(
    registry: &ContextRegistry,
    active: u32,
    requested: f64,
    name: &str,
    limit: usize,
) -> Option<JsField> {
    if active == 0 || requested != f64::from(active) {
        return None;
    }
    let field = Field::from_name(name)?;
    let value = registry.fetch(active, field)?;
    copy_field(value.buffer_view(), field, limit)
}

/// 检测期间登记当前句柄，析构时清零
struct ActiveHandle<'a>(&'a AtomicU32);

impl<'a> ActiveHandle<'a> {
    fn enter(slot: &'a AtomicU32, handle: u32) -> Self {
        slot.store(handle, Ordering::SeqCst);
        Self(slot)
    }
}

impl Drop for ActiveHandle<'_> {
    fn drop(&mut self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

// ─── Isolate ────────────────────────────────────────────────────────────────

fn script_error(filename: &str, err: CaughtError<'_>) -> BridgeError {
    BridgeError::Script {
        filename: filename.to_string(),
        message: err.to_string(),
    }
}

fn eval_script<'js>(ctx: &Ctx<'js>, source: &str, filename: &str) -> Result<Value<'js>> {
    ctx.eval::<Value, _>(source)
        .catch(ctx)
        .map_err(|e| script_error(filename, e))
}

/// JSON 序列化；undefined 等无法序列化的值得到空串
fn stringify<'js>(ctx: &Ctx<'js>, value: Value<'js>, filename: &str) -> Result<String> {
    match ctx
        .json_stringify(value)
        .catch(ctx)
        .map_err(|e| script_error(filename, e))?
    {
        Some(json) => Ok(json.to_string()?),
        None => Ok(String::new()),
    }
}

/// rasp.js 交回的入口，不出现在全局对象上
struct Entry {
    check: Persistent<Function<'static>>,
    settle: Persistent<Function<'static>>,
}

fn save_entry<'js>(ctx: &Ctx<'js>, entry: &Object<'js>, name: &str) -> Result<Persistent<Function<'static>>> {
    let f: Function<'js> = entry.get(name)?;
    Ok(Persistent::save(ctx, f))
}

/// 注册原生函数并执行内置脚本，返回检测入口
fn install_builtins(
    context: &Context,
    bindings: &Bindings,
    quiet: &Arc<AtomicBool>,
    active: &Arc<AtomicU32>,
) -> Result<Entry> {
    context.with(|ctx| -> Result<Entry> {
        let globals = ctx.globals();

        let log = bindings.log.clone();
        let quiet = quiet.clone();
        globals.set(
            "__rasp_write",
            Function::new(ctx.clone(), move |line: String| {
                if !quiet.load(Ordering::Relaxed) {
                    log.emit(&line);
                }
            })?,
        )?;

        let registry = bindings.registry.clone();
        let active = active.clone();
        let limit = bindings.options.max_field_size;
        globals.set(
            "__rasp_context_field",
            Function::new(ctx.clone(), move |handle: f64, name: String| -> Option<JsField> {
                read_field(&registry, active.load(Ordering::SeqCst), handle, &name, limit)
            })?,
        )?;

        globals.set("version", env!("CARGO_PKG_VERSION"))?;
        globals.set("checkPoints", bindings.options.check_points.clone())?;

        eval_script(&ctx, CONSOLE_JS, "console.js")?;
        eval_script(&ctx, CONTEXT_JS, "context.js")?;
        let entry = eval_script(&ctx, RASP_JS, "rasp.js")?
            .into_object()
            .ok_or_else(|| BridgeError::Script {
                filename: "rasp.js".to_string(),
                message: "missing check entry".to_string(),
            })?;
        Ok(Entry {
            check: save_entry(&ctx, &entry, "check")?,
            settle: save_entry(&ctx, &entry, "settle")?,
        })
    })
}

pub(crate) struct Isolate {
    snapshot: Arc<Snapshot>,
    watchdog: Arc<Watchdog>,
    quiet: Arc<AtomicBool>,
    active: Arc<AtomicU32>,
    // 以下按声明顺序释放：entry 与 context 必须先于 runtime
    entry: Entry,
    context: Context,
    runtime: Runtime,
}

impl Isolate {
    /// 按快照配方实例化；`quiet` 时实例化期间的日志被丢弃
    pub(crate) fn new(snapshot: &Arc<Snapshot>, quiet: bool) -> Result<Self> {
        let options = snapshot.options();
        let runtime = Runtime::new()?;
        if options.memory_limit > 0 {
            runtime.set_memory_limit(options.memory_limit);
        }
        runtime.set_max_stack_size(options.max_stack_size);

        let watchdog = Arc::new(Watchdog::new());
        let dog = watchdog.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || dog.should_interrupt())));

        let context = Context::full(&runtime)?;
        let quiet = Arc::new(AtomicBool::new(quiet));
        let active = Arc::new(AtomicU32::new(0));
        let entry = install_builtins(&context, snapshot.bindings(), &quiet, &active)?;
        let isolate = Isolate {
            snapshot: snapshot.clone(),
            watchdog,
            quiet,
            active,
            entry,
            context,
            runtime,
        };
        isolate.load_scripts()?;
        isolate.quiet.store(false, Ordering::Relaxed);
        Ok(isolate)
    }

    pub(crate) fn is_from(&self, snapshot: &Arc<Snapshot>) -> bool {
        Arc::ptr_eq(&self.snapshot, snapshot)
    }

    /// 配置脚本在全局作用域执行，插件各自包在函数作用域内
    fn load_scripts(&self) -> Result<()> {
        let snapshot = &self.snapshot;
        let armed = snapshot.options().script_timeout().map(|t| self.watchdog.arm(t));
        let loaded = self.context.with(|ctx| -> Result<()> {
            if !snapshot.config().trim().is_empty() {
                eval_script(&ctx, snapshot.config(), "config.js")?;
            }
            for plugin in snapshot.plugins() {
                let wrapped = format!("(function(){{\n{}\n}})()", plugin.source);
                eval_script(&ctx, &wrapped, &plugin.filename)?;
            }
            Ok(())
        });
        if armed.as_ref().is_some_and(|a| a.fired()) {
            return Err(BridgeError::Timeout);
        }
        loaded
    }

    /// 插件异常不会上抛，只写入插件日志
    fn report(&self, message: &str) {
        warn!(error = message, "plugin check failed");
        self.snapshot.bindings().log.emit(&format!("{}\n", message));
    }

    fn drain_jobs(&self, armed: &Armed<'_>) {
        while self.runtime.is_job_pending() && !armed.fired() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => debug!("pending job raised"),
            }
        }
    }

    /// 执行一次检测，返回 JSON 数组文本；没有结果时为空
    pub(crate) fn check(
        &self,
        request_type: &str,
        params: &[u8],
        handle: Option<Handle>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let params = match std::str::from_utf8(params) {
            Ok(s) if s.trim().is_empty() => "{}",
            Ok(s) => s,
            Err(e) => return Err(BridgeError::InvalidParams(e.to_string())),
        };
        // 句柄以 number 传入脚本，超过 i31 的值在引擎内是浮点
        let raw = handle.map_or(0, Handle::get);
        let raw_handle = f64::from(raw);
        let _active = ActiveHandle::enter(&self.active, raw);
        let mut armed = self.watchdog.arm(timeout);

        let failure = self.context.with(|ctx| -> Result<Option<String>> {
            let params = ctx
                .json_parse(params)
                .catch(&ctx)
                .map_err(|e| BridgeError::InvalidParams(e.to_string()))?;
            let check = self.entry.check.clone().restore(&ctx)?;
            Ok(check
                .call::<_, Value>((request_type, params, raw_handle))
                .catch(&ctx)
                .err()
                .map(|e| e.to_string()))
        })?;

        if failure.is_none() {
            self.drain_jobs(&armed);
        }
        let timed_out = armed.fired();

        // 收尾阶段总要执行，以关闭本次请求的 context
        armed.rearm(timeout);
        let settled = self.context.with(|ctx| -> Result<String> {
            let settle = self.entry.settle.clone().restore(&ctx)?;
            let results = settle
                .call::<_, Value>(())
                .catch(&ctx)
                .map_err(|e| script_error("rasp.js", e))?;
            if timed_out {
                return Ok(String::new());
            }
            stringify(&ctx, results, request_type)
        });

        if timed_out || armed.fired() {
            debug!(request_type, timeout_ms = timeout.as_millis() as u64, "plugin check timed out");
            return Ok(Finding::serialize_all(&[Finding::timeout()]));
        }
        if let Some(message) = failure {
            self.report(&message);
            return Ok(Vec::new());
        }
        match settled {
            Ok(json) if json.is_empty() || json == "[]" => Ok(Vec::new()),
            Ok(json) => Ok(json.into_bytes()),
            Err(e) => {
                self.report(&e.to_string());
                Ok(Vec::new())
            }
        }
    }

    /// 执行任意脚本并返回结果的 JSON 文本
    pub(crate) fn exec(&self, source: &str, filename: &str, timeout: Option<Duration>) -> Result<String> {
        let armed = timeout.map(|t| self.watchdog.arm(t));
        let result = self.context.with(|ctx| -> Result<String> {
            let value = eval_script(&ctx, source, filename)?;
            stringify(&ctx, value, filename)
        });
        if armed.as_ref().is_some_and(|a| a.fired()) {
            return Err(BridgeError::Timeout);
        }
        result
    }
}

// ─── Per-thread cache ───────────────────────────────────────────────────────

thread_local! {
    static CURRENT: RefCell<Option<Isolate>> = RefCell::new(None);
}

/// 以当前线程的实例执行 `f`，实例过期时先重建
pub(crate) fn with_isolate<R>(
    snapshot: &Arc<Snapshot>,
    f: impl FnOnce(&Isolate) -> Result<R>,
) -> Result<R> {
    let cached = CURRENT.with(|slot| slot.borrow_mut().take());
    let isolate = match cached {
        Some(isolate) if isolate.is_from(snapshot) => isolate,
        _ => {
            debug!("rebuilding isolate from snapshot");
            Isolate::new(snapshot, true)?
        }
    };
    let result = f(&isolate);
    CURRENT.with(|slot| *slot.borrow_mut() = Some(isolate));
    result
}

/// 把刚构建好的实例放入当前线程的缓存
pub(crate) fn adopt(isolate: Isolate) {
    CURRENT.with(|slot| *slot.borrow_mut() = Some(isolate));
}

/// 释放当前线程缓存的实例
pub(crate) fn release_current() {
    CURRENT.with(|slot| slot.borrow_mut().take());
}

/// 当前线程是否缓存着实例
#[cfg(test)]
pub(crate) fn cached() -> bool {
    CURRENT.with(|slot| slot.borrow().is_some())
}

// ═══════════════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════════════
