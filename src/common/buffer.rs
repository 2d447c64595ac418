//! 跨边界的零拷贝缓冲区描述符
//!
//! `BufferView` 只是 (指针, 长度, 类型) 三元组，不持有内存：
//! - 宿主内存在本次边界调用返回前不得被修改、移动或释放
//! - 接收方不得在调用返回后保留指针
//!
//! `OwnedBuffer` 是本库分配、交给宿主的输出缓冲区，宿主需通过
//! `rasp_buffer_free` 归还。

use std::marker::PhantomData;
use std::os::raw::c_void;

/// 缓冲区内容类型
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// 空视图（不支持的类型也产生空视图）
    Empty = 0,
    /// UTF-8 文本
    Text = 1,
    /// 原始字节
    Bytes = 2,
}

impl BufferKind {
    /// 从 C 侧传入的标签解析，未知标签视为空
    pub fn from_raw(tag: u8) -> Self {
        match tag {
            1 => BufferKind::Text,
            2 => BufferKind::Bytes,
            _ => BufferKind::Empty,
        }
    }
}

/// 零拷贝视图，`#[repr(C)]` 布局可直接跨 C ABI 传递
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferView<'a> {
    data: *const c_void,
    len: usize,
    /// 宿主可写入任意值，读取时经 `BufferKind::from_raw` 解析
    kind: u8,
    _marker: PhantomData<&'a [u8]>,
}

impl<'a> BufferView<'a> {
    pub const fn empty() -> Self {
        Self {
            data: std::ptr::null(),
            len: 0,
            kind: BufferKind::Empty as u8,
            _marker: PhantomData,
        }
    }

    pub fn text(s: &'a str) -> Self {
        Self {
            data: s.as_ptr().cast(),
            len: s.len(),
            kind: BufferKind::Text as u8,
            _marker: PhantomData,
        }
    }

    pub fn bytes(b: &'a [u8]) -> Self {
        Self {
            data: b.as_ptr().cast(),
            len: b.len(),
            kind: BufferKind::Bytes as u8,
            _marker: PhantomData,
        }
    }

    /// 由宿主提供的裸指针构造
    ///
    /// # Safety
    /// `data` 必须指向至少 `len` 字节的可读内存，且在 `'a` 内保持不变。
    /// `data` 为空时 `len` 被忽略，得到空视图；未知的 `kind` 标签按空视图处理。
    pub unsafe fn from_raw_parts(data: *const c_void, len: usize, kind: u8) -> Self {
        if data.is_null() {
            return Self::empty();
        }
        Self {
            data,
            len,
            kind,
            _marker: PhantomData,
        }
    }

    pub fn kind(&self) -> BufferKind {
        BufferKind::from_raw(self.kind)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_null() || self.len == 0
    }

    /// 未知标签的视图不暴露内容
    pub fn as_bytes(&self) -> &'a [u8] {
        if self.data.is_null() || self.len == 0 || self.kind() == BufferKind::Empty {
            return &[];
        }
        // SAFETY: 构造时保证 data/len 在 'a 内有效
        unsafe { std::slice::from_raw_parts(self.data.cast::<u8>(), self.len) }
    }

    /// 按 UTF-8 读取，非法序列替换为 U+FFFD
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Default for BufferView<'_> {
    fn default() -> Self {
        Self::empty()
    }
}

/// 能够零拷贝地给出 `BufferView` 的宿主类型
pub trait AsBufferView {
    fn buffer_view(&self) -> BufferView<'_>;
}

impl AsBufferView for str {
    fn buffer_view(&self) -> BufferView<'_> {
        BufferView::text(self)
    }
}

impl AsBufferView for String {
    fn buffer_view(&self) -> BufferView<'_> {
        BufferView::text(self)
    }
}

impl AsBufferView for [u8] {
    fn buffer_view(&self) -> BufferView<'_> {
        BufferView::bytes(self)
    }
}

impl AsBufferView for Vec<u8> {
    fn buffer_view(&self) -> BufferView<'_> {
        BufferView::bytes(self)
    }
}

/// JSON 字符串视为文本，其余 JSON 值属于不支持的类型，得到空视图
impl AsBufferView for serde_json::Value {
    fn buffer_view(&self) -> BufferView<'_> {
        match self {
            serde_json::Value::String(s) => BufferView::text(s),
            _ => BufferView::empty(),
        }
    }
}

impl<T: AsBufferView + ?Sized> AsBufferView for Option<&T> {
    fn buffer_view(&self) -> BufferView<'_> {
        match self {
            Some(v) => v.buffer_view(),
            None => BufferView::empty(),
        }
    }
}

/// 本库分配、移交给宿主的输出缓冲区
#[repr(C)]
#[derive(Debug)]
pub struct OwnedBuffer {
    pub data: *mut u8,
    pub len: usize,
}

impl OwnedBuffer {
    pub const fn null() -> Self {
        Self {
            data: std::ptr::null_mut(),
            len: 0,
        }
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        if bytes.is_empty() {
            return Self::null();
        }
        let boxed = bytes.into_boxed_slice();
        let len = boxed.len();
        let data = Box::into_raw(boxed).cast::<u8>();
        Self { data, len }
    }

    /// 收回由 `from_vec` 分配的内存
    ///
    /// # Safety
    /// 只能对 `from_vec` 产生的缓冲区调用一次。
    pub unsafe fn into_vec(self) -> Vec<u8> {
        if self.data.is_null() {
            return Vec::new();
        }
        let slice = std::ptr::slice_from_raw_parts_mut(self.data, self.len);
        Box::from_raw(slice).into_vec()
    }
}
