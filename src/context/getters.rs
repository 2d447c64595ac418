//! 请求上下文访问器 —— 插件按需拉取的请求字段
//!
//! 每个字段是一个可选的访问器槽位；未提供的字段在插件侧表现为未设置。
//! 访问器只在插件真正读取该字段时才会被调用。

use std::fmt;
use std::sync::Arc;

use crate::common::{AsBufferView, BufferView};

/// 请求字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Url,
    Path,
    Querystring,
    Method,
    Protocol,
    RemoteAddr,
    Header,
    Parameter,
    Json,
    Server,
    AppBasePath,
    Body,
}

/// 字段在插件侧的呈现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// 字符串，缺省为 ""
    Text,
    /// JSON 文本，插件侧解析为对象，缺省为 {}
    Json,
    /// ArrayBuffer，缺省为空
    Bytes,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::Url,
        Field::Path,
        Field::Querystring,
        Field::Method,
        Field::Protocol,
        Field::RemoteAddr,
        Field::Header,
        Field::Parameter,
        Field::Json,
        Field::Server,
        Field::AppBasePath,
        Field::Body,
    ];

    /// 插件侧 context 对象上的属性名
    pub fn name(self) -> &'static str {
        match self {
            Field::Url => "url",
            Field::Path => "path",
            Field::Querystring => "querystring",
            Field::Method => "method",
            Field::Protocol => "protocol",
            Field::RemoteAddr => "remoteAddr",
            Field::Header => "header",
            Field::Parameter => "parameter",
            Field::Json => "json",
            Field::Server => "server",
            Field::AppBasePath => "appBasePath",
            Field::Body => "body",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Field::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Field::Header | Field::Parameter | Field::Json | Field::Server => FieldKind::Json,
            Field::Body => FieldKind::Bytes,
            _ => FieldKind::Text,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 访问器产出的值
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Bytes(Vec<u8>),
    /// 任意 JSON 值：字符串视为文本，其他类型不受支持（视为空）
    Value(serde_json::Value),
}

impl AsBufferView for FieldValue {
    fn buffer_view(&self) -> BufferView<'_> {
        match self {
            FieldValue::Text(s) => s.buffer_view(),
            FieldValue::Bytes(b) => b.buffer_view(),
            FieldValue::Value(v) => v.buffer_view(),
        }
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Bytes(b)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(b: &[u8]) -> Self {
        FieldValue::Bytes(b.to_vec())
    }
}

impl From<serde_json::Value> for FieldValue {
    fn from(v: serde_json::Value) -> Self {
        FieldValue::Value(v)
    }
}

/// 单个字段访问器
pub type Accessor = Arc<dyn Fn() -> FieldValue + Send + Sync>;

/// 一次请求的访问器集合
#[derive(Clone, Default)]
pub struct ContextGetters {
    pub url: Option<Accessor>,
    pub path: Option<Accessor>,
    pub querystring: Option<Accessor>,
    pub method: Option<Accessor>,
    pub protocol: Option<Accessor>,
    pub remote_addr: Option<Accessor>,
    pub header: Option<Accessor>,
    pub parameter: Option<Accessor>,
    pub json: Option<Accessor>,
    pub server: Option<Accessor>,
    pub app_base_path: Option<Accessor>,
    pub body: Option<Accessor>,
}

impl ContextGetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, field: Field) -> Option<&Accessor> {
        match field {
            Field::Url => self.url.as_ref(),
            Field::Path => self.path.as_ref(),
            Field::Querystring => self.querystring.as_ref(),
            Field::Method => self.method.as_ref(),
            Field::Protocol => self.protocol.as_ref(),
            Field::RemoteAddr => self.remote_addr.as_ref(),
            Field::Header => self.header.as_ref(),
            Field::Parameter => self.parameter.as_ref(),
            Field::Json => self.json.as_ref(),
            Field::Server => self.server.as_ref(),
            Field::AppBasePath => self.app_base_path.as_ref(),
            Field::Body => self.body.as_ref(),
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<Accessor> {
        match field {
            Field::Url => &mut self.url,
            Field::Path => &mut self.path,
            Field::Querystring => &mut self.querystring,
            Field::Method => &mut self.method,
            Field::Protocol => &mut self.protocol,
            Field::RemoteAddr => &mut self.remote_addr,
            Field::Header => &mut self.header,
            Field::Parameter => &mut self.parameter,
            Field::Json => &mut self.json,
            Field::Server => &mut self.server,
            Field::AppBasePath => &mut self.app_base_path,
            Field::Body => &mut self.body,
        }
    }

    /// 设置某个字段的访问器（链式）
    pub fn with<F, V>(mut self, field: Field, f: F) -> Self
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<FieldValue>,
    {
        *self.slot_mut(field) = Some(Arc::new(move || -> FieldValue { f().into() }));
        self
    }

    /// 调用访问器；未提供时返回 None
    pub fn get(&self, field: Field) -> Option<FieldValue> {
        self.slot(field).map(|accessor| accessor())
    }

    pub fn provided(&self) -> impl Iterator<Item = Field> + '_ {
        Field::ALL.into_iter().filter(|f| self.slot(*f).is_some())
    }

    /// 从以字段名为键的 JSON 对象构造：字符串按原样提供，
    /// 对象/数组序列化为 JSON 文本，body 的字符串按字节提供。
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut getters = Self::new();
        let Some(map) = value.as_object() else {
            return getters;
        };
        for (name, v) in map {
            let Some(field) = Field::from_name(name) else {
                continue;
            };
            let produced = match (field.kind(), v) {
                (FieldKind::Bytes, serde_json::Value::String(s)) => {
                    FieldValue::Bytes(s.clone().into_bytes())
                }
                (FieldKind::Json, serde_json::Value::Object(_) | serde_json::Value::Array(_)) => {
                    FieldValue::Text(v.to_string())
                }
                _ => FieldValue::Value(v.clone()),
            };
            *getters.slot_mut(field) = Some(Arc::new(move || produced.clone()));
        }
        getters
    }
}

impl fmt::Debug for ContextGetters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextGetters")
            .field("provided", &self.provided().collect::<Vec<_>>())
            .finish()
    }
}
