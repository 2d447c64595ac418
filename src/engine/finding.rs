//! 检测结果

use serde::{Deserialize, Serialize};

/// 超时时合成的结果消息
pub const TIMEOUT_MESSAGE: &str = "Javascript plugin execution timeout";

/// 插件给出的处置动作
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Ignore,
    Log,
    Block,
    /// 插件返回的 Promise 被 reject
    Exception,
    #[serde(other)]
    Unknown,
}

/// 单条检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub action: Action,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Finding {
    /// 插件执行超时时的合成结果
    pub fn timeout() -> Self {
        Self {
            action: Action::Log,
            message: TIMEOUT_MESSAGE.to_string(),
            name: None,
            confidence: None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.action == Action::Log && self.message == TIMEOUT_MESSAGE && self.name.is_none()
    }

    /// 解析 Check 的输出；空输出表示没有结果
    pub fn parse_all(raw: &[u8]) -> serde_json::Result<Vec<Finding>> {
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(raw)
    }

    /// 序列化为 Check 输出；空列表序列化为空字节串
    pub fn serialize_all(findings: &[Finding]) -> Vec<u8> {
        if findings.is_empty() {
            return Vec::new();
        }
        serde_json::to_vec(findings).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_wire_format() {
        let raw = Finding::serialize_all(&[Finding::timeout()]);
        assert_eq!(
            std::str::from_utf8(&raw).unwrap(),
            r#"[{"action":"log","message":"Javascript plugin execution timeout"}]"#
        );
        let parsed = Finding::parse_all(&raw).unwrap();
        assert!(parsed[0].is_timeout());
    }

    #[test]
    fn empty_is_empty_string() {
        assert!(Finding::serialize_all(&[]).is_empty());
        assert!(Finding::parse_all(b"").unwrap().is_empty());
    }

    #[test]
    fn parse_plugin_result_with_extra_fields() {
        let raw = br#"[{"action":"block","message":"","name":"test2","confidence":0,"algorithm":"cmd_userinput"}]"#;
        let findings = Finding::parse_all(raw).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].action, Action::Block);
        assert_eq!(findings[0].name.as_deref(), Some("test2"));
        assert_eq!(findings[0].confidence, Some(0.0));
    }

    #[test]
    fn unknown_action() {
        let findings = Finding::parse_all(br#"[{"action":"quarantine"}]"#).unwrap();
        assert_eq!(findings[0].action, Action::Unknown);
        assert_eq!(findings[0].message, "");
    }
}
