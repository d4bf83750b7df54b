//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TUTOR__*` 覆盖（双下划线表示嵌套，如 `TUTOR__TOOLS__DEADLINE_MS=10000`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

/// [app] 段：应用名
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [session] 段：会话节律与教学判定
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 不活跃超时（毫秒），超过后会话自行优雅关闭
    #[serde(default = "default_inactivity_ms")]
    pub inactivity_ms: u64,
    /// 周期性 Tick 间隔（毫秒），驱动持久化与不活跃检查
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// 对话历史保留条数
    #[serde(default = "default_history_retained")]
    pub history_retained: usize,
    /// 断线后保留出站端点绑定的宽限期（毫秒）
    #[serde(default = "default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
    /// 诊断判定为「已知错误」所需的最低置信度
    #[serde(default = "default_known_error_confidence")]
    pub known_error_confidence: f64,
}

fn default_inactivity_ms() -> u64 {
    1_800_000
}

fn default_tick_ms() -> u64 {
    30_000
}

fn default_history_retained() -> usize {
    200
}

fn default_reconnect_grace_ms() -> u64 {
    120_000
}

fn default_known_error_confidence() -> f64 {
    0.5
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            inactivity_ms: default_inactivity_ms(),
            tick_ms: default_tick_ms(),
            history_retained: default_history_retained(),
            reconnect_grace_ms: default_reconnect_grace_ms(),
            known_error_confidence: default_known_error_confidence(),
        }
    }
}

/// [tools] 段：工具执行器
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用的截止时间（毫秒）
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// 并发执行上限
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// 超出并发上限后允许排队的提交数，再超出则同步返回 Busy
    #[serde(default = "default_queue_cap")]
    pub queue_cap: usize,
}

fn default_deadline_ms() -> u64 {
    30_000
}

fn default_max_concurrent() -> usize {
    8
}

fn default_queue_cap() -> usize {
    32
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            max_concurrent: default_max_concurrent(),
            queue_cap: default_queue_cap(),
        }
    }
}

/// [persistence] 段：会话快照存储
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSection {
    /// 是否启用持久化（关闭时仅内存）
    #[serde(default)]
    pub enabled: bool,
    /// JSON 文件存储目录
    #[serde(default = "default_persistence_dir")]
    pub dir: PathBuf,
}

fn default_persistence_dir() -> PathBuf {
    PathBuf::from("./data/sessions")
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: default_persistence_dir(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TUTOR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TUTOR__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TUTOR")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_app_config() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.tools.deadline_ms, 30_000);
        assert_eq!(cfg.session.tick_ms, 30_000);
        assert!(!cfg.persistence.enabled);
        assert!((cfg.session.known_error_confidence - 0.5).abs() < f64::EPSILON);
    }
}
