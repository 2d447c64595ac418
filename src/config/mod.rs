//! 引擎配置
//!
//! 支持 YAML / JSON 两种格式，所有字段均有默认值，例如：
//!
//! ```yaml
//! check_timeout_ms: 100
//! max_field_size: 4194304
//! check_points: [request, command, sql]
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// 默认检测点，与插件侧 `checkPoints` 全局数组一致
pub const DEFAULT_CHECK_POINTS: &[&str] = &[
    "command",
    "directory",
    "fileUpload",
    "readFile",
    "request",
    "requestEnd",
    "sql",
    "sql_exception",
    "writeFile",
    "xxe",
    "ognl",
    "deserialization",
    "reflection",
    "webdav",
    "ssrf",
    "include",
    "eval",
    "copy",
    "rename",
    "loadLibrary",
];

/// 引擎运行参数
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineOptions {
    /// 调用方传入 0 时使用的检测超时（毫秒）
    pub check_timeout_ms: u64,
    /// ExecScript 的可选超时（毫秒），None 表示不限
    pub script_timeout_ms: Option<u64>,
    /// 单个 isolate 的内存上限（字节），0 表示不限
    pub memory_limit: usize,
    /// 脚本栈上限（字节）
    pub max_stack_size: usize,
    /// 请求字段最大长度（字节），超出部分截断
    pub max_field_size: usize,
    /// 插件可注册的检测点
    pub check_points: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            check_timeout_ms: 100,
            script_timeout_ms: None,
            memory_limit: 0,
            max_stack_size: 1024 * 1024,
            max_field_size: 4 * 1024 * 1024,
            check_points: DEFAULT_CHECK_POINTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl EngineOptions {
    pub fn validate(&self) -> Result<()> {
        if self.check_timeout_ms == 0 {
            anyhow::bail!("check_timeout_ms must be positive");
        }
        if self.max_field_size == 0 {
            anyhow::bail!("max_field_size must be positive");
        }
        if self.check_points.is_empty() {
            anyhow::bail!("at least one check point is required");
        }
        if let Some(cp) = self.check_points.iter().find(|cp| cp.is_empty()) {
            anyhow::bail!("invalid check point name '{}'", cp);
        }
        Ok(())
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout_ms.map(Duration::from_millis)
    }
}

/// 从文件加载配置，先按 YAML 解析（JSON 是其子集）
pub fn load_options(path: impl AsRef<Path>) -> Result<EngineOptions> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    parse_options(&raw)
}

pub fn parse_options(content: &str) -> Result<EngineOptions> {
    let expanded = expand_env_vars(content);
    let options: EngineOptions = if expanded.trim().is_empty() {
        EngineOptions::default()
    } else {
        match serde_yml::from_str(&expanded) {
            Ok(o) => o,
            Err(yaml_err) => serde_json::from_str(&expanded)
                .map_err(|_| anyhow::anyhow!("invalid engine options: {}", yaml_err))?,
        }
    };
    options.validate()?;
    Ok(options)
}

/// 展开 `${VAR}` 与 `${VAR:-default}`，未定义的变量替换为空
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            result.push_str(&rest[start..]);
            return result;
        };
        let expr = &after[..end];
        match expr.split_once(":-") {
            Some((name, default)) => match std::env::var(name) {
                Ok(val) if !val.is_empty() => result.push_str(&val),
                _ => result.push_str(default),
            },
            None => {
                if let Ok(val) = std::env::var(expr) {
                    result.push_str(&val);
                }
            }
        }
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = EngineOptions::default();
        options.validate().unwrap();
        assert_eq!(options.check_timeout(), Duration::from_millis(100));
        assert_eq!(options.script_timeout(), None);
        assert!(options.check_points.iter().any(|cp| cp == "command"));
    }

    #[test]
    fn parse_yaml_partial() {
        let options = parse_options("check_timeout_ms: 250\nmax_field_size: 1024\n").unwrap();
        assert_eq!(options.check_timeout_ms, 250);
        assert_eq!(options.max_field_size, 1024);
        // 未给出的字段取默认值
        assert_eq!(options.max_stack_size, 1024 * 1024);
        assert_eq!(options.check_points.len(), DEFAULT_CHECK_POINTS.len());
    }

    #[test]
    fn parse_json() {
        let options =
            parse_options(r#"{"script_timeout_ms": 500, "check_points": ["request"]}"#).unwrap();
        assert_eq!(options.script_timeout(), Some(Duration::from_millis(500)));
        assert_eq!(options.check_points, vec!["request".to_string()]);
    }

    #[test]
    fn empty_content_uses_defaults() {
        assert_eq!(parse_options("  \n").unwrap(), EngineOptions::default());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        assert!(parse_options("check_timeout_ms: 0").is_err());
        assert!(parse_options("check_points: []").is_err());
    }

    #[test]
    fn env_expansion() {
        std::env::set_var("RASP_TEST_TIMEOUT", "300");
        let options = parse_options("check_timeout_ms: ${RASP_TEST_TIMEOUT}\n").unwrap();
        assert_eq!(options.check_timeout_ms, 300);

        let options = parse_options("check_timeout_ms: ${RASP_TEST_UNSET_VAR:-42}\n").unwrap();
        assert_eq!(options.check_timeout_ms, 42);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");
        std::fs::write(&path, "memory_limit: 67108864\n").unwrap();
        let options = load_options(&path).unwrap();
        assert_eq!(options.memory_limit, 64 * 1024 * 1024);
    }
}
