//! 句柄注册表
//!
//! 引擎不能直接持有宿主对象的引用，因此每个进行中的请求把自己的
//! `ContextGetters` 登记到这里换取一个整数句柄，引擎回调时再凭句柄取回。
//! 表由独立的互斥锁保护，与引擎读写锁互不争用。

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::getters::{ContextGetters, Field, FieldValue};

/// 正整数句柄，0 保留为“无上下文”
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU32);

impl Handle {
    /// 0 不是合法句柄
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Handle)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Table {
    /// 上一次分配的值，单调递增并在溢出时回绕
    cursor: u32,
    entries: HashMap<Handle, Arc<ContextGetters>>,
}

/// 句柄 → 访问器集合
pub struct ContextRegistry {
    table: Mutex<Table>,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(Table {
                cursor: 0,
                entries: HashMap::new(),
            }),
        }
    }

    // 表内容在任何时刻都是一致的，锁中毒时直接沿用
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 分配下一个未被占用的句柄并登记
    pub fn register(&self, getters: impl Into<Arc<ContextGetters>>) -> Handle {
        let getters = getters.into();
        let mut table = self.lock();
        let mut skipped = 0u32;
        loop {
            table.cursor = table.cursor.wrapping_add(1);
            match Handle::new(table.cursor) {
                Some(handle) if !table.entries.contains_key(&handle) => {
                    table.entries.insert(handle, getters);
                    if skipped > 0 {
                        trace!(handle = handle.get(), skipped, "handle allocation skipped live slots");
                    }
                    return handle;
                }
                _ => skipped += 1,
            }
        }
    }

    /// 只读查找；未知或已注销的句柄返回 None
    pub fn lookup(&self, handle: Handle) -> Option<Arc<ContextGetters>> {
        self.lock().entries.get(&handle).cloned()
    }

    /// 按原始整数查找，0 直接返回 None（没有上下文的脚本执行）
    pub fn lookup_raw(&self, raw: u32) -> Option<Arc<ContextGetters>> {
        Handle::new(raw).and_then(|h| self.lookup(h))
    }

    /// 注销句柄；不存在时为空操作，返回是否真的移除了
    pub fn unregister(&self, handle: Handle) -> bool {
        self.lock().entries.remove(&handle).is_some()
    }

    /// 登记并返回守卫，守卫析构时自动注销（包括提前返回和 panic 展开）
    pub fn enter(&self, getters: impl Into<Arc<ContextGetters>>) -> Registration<'_> {
        let handle = self.register(getters);
        Registration {
            registry: self,
            handle,
        }
    }

    /// 经句柄调用某个字段的访问器
    ///
    /// 访问器在锁外执行，慢访问器不会阻塞其他请求的登记与注销。
    pub fn fetch(&self, raw: u32, field: Field) -> Option<FieldValue> {
        let getters = self.lookup_raw(raw)?;
        getters.get(field)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ContextRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistry")
            .field("live", &self.len())
            .finish()
    }
}

/// 作用域内有效的登记，析构时注销
pub struct Registration<'a> {
    registry: &'a ContextRegistry,
    handle: Handle,
}

impl Registration<'_> {
    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.handle);
    }
}

// ═══════════════════════════════════════════════════════════════════
// 测试
// ═══════════════════════════════════════════════════════════════════
