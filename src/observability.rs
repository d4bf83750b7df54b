//! 可观测性：tracing 初始化与全局指标
//!
//! 提供会话与工具执行的原子计数器，可导出为 JSON；作为最小事件挂钩，
//! 不含任何外发分析管道。

use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();
}

/// 全局指标收集器
#[derive(Debug, Default)]
pub struct Metrics {
    /// 会话相关指标
    pub sessions: SessionCounters,
    /// 工具相关指标
    pub tools: ToolCounters,
}

#[derive(Debug, Default)]
pub struct SessionCounters {
    pub started: AtomicU64,
    pub restored: AtomicU64,
    pub completed: AtomicU64,
    pub expired: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Default)]
pub struct ToolCounters {
    pub submitted: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
    pub rejected_busy: AtomicU64,
}

impl Metrics {
    /// 获取全局指标实例
    pub fn global() -> &'static Metrics {
        static INSTANCE: std::sync::OnceLock<Metrics> = std::sync::OnceLock::new();
        INSTANCE.get_or_init(Metrics::default)
    }

    /// 导出为 JSON 格式
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sessions": {
                "started": self.sessions.started.load(Ordering::Relaxed),
                "restored": self.sessions.restored.load(Ordering::Relaxed),
                "completed": self.sessions.completed.load(Ordering::Relaxed),
                "expired": self.sessions.expired.load(Ordering::Relaxed),
                "failed": self.sessions.failed.load(Ordering::Relaxed),
            },
            "tools": {
                "submitted": self.tools.submitted.load(Ordering::Relaxed),
                "succeeded": self.tools.succeeded.load(Ordering::Relaxed),
                "failed": self.tools.failed.load(Ordering::Relaxed),
                "timed_out": self.tools.timed_out.load(Ordering::Relaxed),
                "cancelled": self.tools.cancelled.load(Ordering::Relaxed),
                "rejected_busy": self.tools.rejected_busy.load(Ordering::Relaxed),
            },
        })
    }
}

/// 计数 +1 的便捷封装
pub fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_export() {
        let metrics = Metrics::default();
        bump(&metrics.sessions.started);
        bump(&metrics.tools.submitted);
        bump(&metrics.tools.submitted);

        let json = metrics.to_json();
        assert_eq!(json["sessions"]["started"], 1);
        assert_eq!(json["tools"]["submitted"], 2);
    }
}
