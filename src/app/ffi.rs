//! FFI 层：将插件引擎以 C ABI 接口导出，供宿主语言运行时调用。
//!
//! 所有导出函数使用统一约定：
//! - 返回 bool: true = 成功，false = 失败（原因写入 tracing / 插件日志）
//! - 返回 OwnedBuffer: Rust 分配的缓冲区，调用方需通过 `rasp_buffer_free` 释放；
//!   空缓冲区表示没有结果或调用失败
//! - 入参 BufferView 只在调用期间有效，内容会被立即复制

use std::os::raw::c_void;
use std::sync::{Arc, OnceLock};

use crate::common::{BufferKind, BufferView, OwnedBuffer};
use crate::context::{ContextGetters, Field, FieldValue};
use crate::engine::{EngineGateway, Plugin};
use crate::logging::LogCallback;

/// 全局引擎实例
static GATEWAY: OnceLock<EngineGateway> = OnceLock::new();

fn gateway() -> &'static EngineGateway {
    GATEWAY.get_or_init(EngineGateway::new)
}

/// 插件日志回调，收到的视图在回调返回后失效
pub type RaspLogFn = extern "C" fn(line: BufferView<'_>);

/// 请求字段访问器，返回的视图只需在本次调用返回前有效
pub type RaspGetterFn = unsafe extern "C" fn(user_data: *mut c_void) -> BufferView<'static>;

/// 一个插件脚本
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RaspPlugin<'a> {
    pub source: BufferView<'a>,
    pub filename: BufferView<'a>,
}

/// 请求访问器表，未提供的字段置空
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RaspContextGetters {
    pub user_data: *mut c_void,
    pub url: Option<RaspGetterFn>,
    pub path: Option<RaspGetterFn>,
    pub querystring: Option<RaspGetterFn>,
    pub method: Option<RaspGetterFn>,
    pub protocol: Option<RaspGetterFn>,
    pub remote_addr: Option<RaspGetterFn>,
    pub header: Option<RaspGetterFn>,
    pub parameter: Option<RaspGetterFn>,
    pub json: Option<RaspGetterFn>,
    pub server: Option<RaspGetterFn>,
    pub app_base_path: Option<RaspGetterFn>,
    pub body: Option<RaspGetterFn>,
}

/// 宿主的请求对象指针；宿主保证它在 `rasp_check` 返回前有效且可跨线程访问
struct UserData(*mut c_void);

unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn ptr(&self) -> *mut c_void {
        self.0
    }
}

/// 复制宿主返回的视图
fn copy_view(view: BufferView<'_>) -> FieldValue {
    match view.kind() {
        BufferKind::Text => FieldValue::Text(view.to_string_lossy()),
        BufferKind::Bytes => FieldValue::Bytes(view.as_bytes().to_vec()),
        // 不支持的类型按字段缺省值处理
        BufferKind::Empty => FieldValue::Value(serde_json::Value::Null),
    }
}

impl RaspContextGetters {
    fn slots(&self) -> [(Field, Option<RaspGetterFn>); 12] {
        [
            (Field::Url, self.url),
            (Field::Path, self.path),
            (Field::Querystring, self.querystring),
            (Field::Method, self.method),
            (Field::Protocol, self.protocol),
            (Field::RemoteAddr, self.remote_addr),
            (Field::Header, self.header),
            (Field::Parameter, self.parameter),
            (Field::Json, self.json),
            (Field::Server, self.server),
            (Field::AppBasePath, self.app_base_path),
            (Field::Body, self.body),
        ]
    }

    fn to_getters(&self) -> ContextGetters {
        let user_data = Arc::new(UserData(self.user_data));
        let mut getters = ContextGetters::new();
        for (field, slot) in self.slots() {
            let Some(getter) = slot else {
                continue;
            };
            let user_data = user_data.clone();
            getters = getters.with(field, move || {
                // SAFETY: 访问器只在 rasp_check 期间被调用，宿主保证 user_data 有效
                copy_view(unsafe { getter(user_data.ptr()) })
            });
        }
        getters
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 生命周期
// ═══════════════════════════════════════════════════════════════════════════

/// 初始化引擎并安装日志回调；回调为空时日志进入 tracing
#[no_mangle]
pub extern "C" fn rasp_initialize(log: Option<RaspLogFn>) -> bool {
    let callback = log.map(|cb| -> LogCallback { Arc::new(move |line: &str| cb(BufferView::text(line))) });
    match gateway().initialize(callback) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "rasp_initialize failed");
            false
        }
    }
}

/// 释放引擎，可重复调用
#[no_mangle]
pub extern "C" fn rasp_dispose() -> bool {
    gateway().dispose();
    true
}

/// 以配置脚本和插件列表替换当前快照
///
/// # Safety
/// `plugins` 必须指向 `count` 个有效的 `RaspPlugin`，或在 `count` 为 0 时为空指针
#[no_mangle]
pub unsafe extern "C" fn rasp_create_snapshot(
    config: BufferView<'_>,
    plugins: *const RaspPlugin<'_>,
    count: usize,
) -> bool {
    let plugins: &[RaspPlugin<'_>] = if plugins.is_null() || count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(plugins, count)
    };
    let plugins: Vec<Plugin> = plugins
        .iter()
        .map(|p| Plugin::new(p.source.to_string_lossy(), p.filename.to_string_lossy()))
        .collect();
    match gateway().create_snapshot(&config.to_string_lossy(), plugins) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "rasp_create_snapshot failed");
            false
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 检测与脚本执行
// ═══════════════════════════════════════════════════════════════════════════

/// 执行一次检测，返回 JSON 数组文本
///
/// # Safety
/// `getters` 为空或指向有效的 `RaspContextGetters`，其中的 `user_data`
/// 与各访问器在本函数返回前保持有效
#[no_mangle]
pub unsafe extern "C" fn rasp_check(
    request_type: BufferView<'_>,
    params: BufferView<'_>,
    getters: *const RaspContextGetters,
    timeout_ms: u64,
) -> OwnedBuffer {
    let getters = match getters.as_ref() {
        Some(g) => g.to_getters(),
        None => ContextGetters::new(),
    };
    match gateway().check(&request_type.to_string_lossy(), params.as_bytes(), getters, timeout_ms) {
        Ok(findings) => OwnedBuffer::from_vec(findings),
        Err(e) => {
            tracing::warn!(error = %e, kind = e.kind().as_str(), "rasp_check failed");
            OwnedBuffer::null()
        }
    }
}

/// 执行脚本，返回结果的 JSON 文本
#[no_mangle]
pub extern "C" fn rasp_exec_script(source: BufferView<'_>, filename: BufferView<'_>) -> OwnedBuffer {
    match gateway().exec_script(&source.to_string_lossy(), &filename.to_string_lossy()) {
        Ok(json) => OwnedBuffer::from_vec(json.into_bytes()),
        Err(e) => {
            tracing::warn!(error = %e, kind = e.kind().as_str(), "rasp_exec_script failed");
            OwnedBuffer::null()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 工具
// ═══════════════════════════════════════════════════════════════════════════

/// 释放由本库返回的缓冲区
///
/// # Safety
/// `buffer` 必须来自本库且只释放一次
#[no_mangle]
pub unsafe extern "C" fn rasp_buffer_free(buffer: OwnedBuffer) {
    drop(buffer.into_vec());
}

/// 库版本号
#[no_mangle]
pub extern "C" fn rasp_version() -> BufferView<'static> {
    BufferView::text(env!("CARGO_PKG_VERSION"))
}
