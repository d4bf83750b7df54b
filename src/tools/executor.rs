//! 受监管的工具执行器
//!
//! 职责：让工具调用脱离会话自身的执行上下文并发运行；施加截止时间；
//! 对每个令牌保证恰好一个终结结果；工具处理器 panic 转为 Err 上报而不波及调用方。
//! 背压策略：Semaphore 限并发、FIFO 排队，超出排队额度时 submit 同步返回 Busy。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ToolsSection;
use crate::core::CoreError;
use crate::observability::{bump, Metrics};
use crate::tools::{ToolClient, ToolName};

/// 关联令牌：把一次提交与其未来的终结结果连起来
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallToken(u64);

static NEXT_CALL_TOKEN: AtomicU64 = AtomicU64::new(1);

impl CallToken {
    fn next() -> Self {
        Self(NEXT_CALL_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// 发一个未经执行器登记的新令牌；提交被同步拒绝时，
    /// 会话用它把拒绝伪装成一次普通的失败投递
    pub(crate) fn fresh() -> Self {
        Self::next()
    }
}

impl std::fmt::Display for CallToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

/// 单次调用的终结结果（每令牌恰好一个）
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Ok(Value),
    Err(String),
    Timeout,
    Cancelled,
}

/// 投递给提交方的终结事件
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub token: CallToken,
    pub tool: ToolName,
    pub outcome: ToolOutcome,
}

/// 工具执行器：所有会话共享一个实例
pub struct ToolExecutor {
    client: Arc<dyn ToolClient>,
    semaphore: Arc<Semaphore>,
    /// 在途 + 排队中的提交数（准入额度）
    admitted: Arc<AtomicUsize>,
    admission_cap: usize,
    default_deadline: Duration,
    /// 未终结令牌 → 取消令牌；终结时移除，不保留已完成的令牌
    inflight: Arc<Mutex<HashMap<CallToken, CancellationToken>>>,
}

/// 准入额度守卫：工作任务结束时归还
struct AdmissionGuard(Arc<AtomicUsize>);

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ToolExecutor {
    pub fn new(client: Arc<dyn ToolClient>, cfg: &ToolsSection) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(cfg.max_concurrent.max(1))),
            admitted: Arc::new(AtomicUsize::new(0)),
            admission_cap: cfg.max_concurrent.max(1) + cfg.queue_cap,
            default_deadline: Duration::from_millis(cfg.deadline_ms),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 提交一次工具调用；立即返回令牌，绝不阻塞提交方
    ///
    /// 终结结果（Ok / Err / Timeout / Cancelled）之后恰好一次投递到 reply。
    /// 准入额度已满时同步返回 ExecutorBusy，不产生令牌。
    pub fn submit(
        &self,
        tool: ToolName,
        args: Value,
        deadline: Option<Duration>,
        reply: mpsc::UnboundedSender<ToolResult>,
    ) -> Result<CallToken, CoreError> {
        let prev = self.admitted.fetch_add(1, Ordering::Relaxed);
        if prev >= self.admission_cap {
            self.admitted.fetch_sub(1, Ordering::Relaxed);
            bump(&Metrics::global().tools.rejected_busy);
            return Err(CoreError::ExecutorBusy);
        }
        let guard = AdmissionGuard(Arc::clone(&self.admitted));

        let token = CallToken::next();
        let cancel = CancellationToken::new();
        self.inflight
            .lock()
            .expect("inflight lock poisoned")
            .insert(token, cancel.clone());

        let client = Arc::clone(&self.client);
        let semaphore = Arc::clone(&self.semaphore);
        let inflight = Arc::clone(&self.inflight);
        let deadline_at = Instant::now() + deadline.unwrap_or(self.default_deadline);
        bump(&Metrics::global().tools.submitted);

        tokio::spawn(async move {
            let _guard = guard;
            let started = Instant::now();

            let work = async {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return ToolOutcome::Err("executor closed".to_string()),
                };
                // catch_unwind：工具处理器崩溃转为 Err，恰好上报一次
                match std::panic::AssertUnwindSafe(client.invoke(tool, args))
                    .catch_unwind()
                    .await
                {
                    Ok(Ok(value)) => ToolOutcome::Ok(value),
                    Ok(Err(reason)) => ToolOutcome::Err(reason),
                    Err(_) => ToolOutcome::Err(format!("tool handler panicked: {tool}")),
                }
            };
            tokio::pin!(work);

            // 截止时间覆盖排队等待；超时/取消时丢弃在途 future 即中断
            let outcome = tokio::select! {
                _ = cancel.cancelled() => ToolOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline_at) => ToolOutcome::Timeout,
                outcome = &mut work => outcome,
            };

            inflight
                .lock()
                .expect("inflight lock poisoned")
                .remove(&token);

            let metrics = Metrics::global();
            let outcome_label = match &outcome {
                ToolOutcome::Ok(_) => {
                    bump(&metrics.tools.succeeded);
                    "ok"
                }
                ToolOutcome::Err(_) => {
                    bump(&metrics.tools.failed);
                    "error"
                }
                ToolOutcome::Timeout => {
                    bump(&metrics.tools.timed_out);
                    "timeout"
                }
                ToolOutcome::Cancelled => {
                    bump(&metrics.tools.cancelled);
                    "cancelled"
                }
            };
            let audit = serde_json::json!({
                "event": "tool_audit",
                "tool": tool.label(),
                "token": token.to_string(),
                "outcome": outcome_label,
                "duration_ms": started.elapsed().as_millis() as u64,
            });
            tracing::info!(audit = %audit.to_string(), "tool");

            if reply.send(ToolResult { token, tool, outcome }).is_err() {
                tracing::debug!("tool result dropped, session {token} receiver gone");
            }
        });

        Ok(token)
    }

    /// 尽力取消：完成与取消竞争时终结结果可能仍是 Ok；未知令牌为空操作
    pub fn cancel(&self, token: CallToken) {
        let cancel = self
            .inflight
            .lock()
            .expect("inflight lock poisoned")
            .get(&token)
            .cloned();
        if let Some(c) = cancel {
            c.cancel();
        }
    }

    /// 在途（未终结）调用数，测试与自省用
    pub fn inflight_count(&self) -> usize {
        self.inflight.lock().expect("inflight lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::MockBehavior;
    use serde_json::json;

    fn test_cfg() -> ToolsSection {
        ToolsSection {
            deadline_ms: 200,
            max_concurrent: 2,
            queue_cap: 2,
        }
    }

    #[tokio::test]
    async fn test_success_delivers_once() {
        let client = Arc::new(crate::tools::MockToolClient::new());
        client.queue(
            ToolName::ExplainConcept,
            MockBehavior::Respond(json!("because")),
        );
        let executor = ToolExecutor::new(client, &test_cfg());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let token = executor
            .submit(ToolName::ExplainConcept, json!({}), None, tx)
            .unwrap();

        let result = rx.recv().await.unwrap();
        assert_eq!(result.token, token);
        assert!(matches!(result.outcome, ToolOutcome::Ok(v) if v == json!("because")));
        assert!(rx.recv().await.is_none(), "exactly one terminal result");
        assert_eq!(executor.inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let client = Arc::new(crate::tools::MockToolClient::new());
        client.queue(ToolName::GenerateQuestion, MockBehavior::Hang);
        let executor = ToolExecutor::new(client, &test_cfg());
        let (tx, mut rx) = mpsc::unbounded_channel();

        executor
            .submit(ToolName::GenerateQuestion, json!({}), None, tx)
            .unwrap();

        let result = rx.recv().await.unwrap();
        assert!(matches!(result.outcome, ToolOutcome::Timeout));
        assert_eq!(executor.inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_err() {
        let client = Arc::new(crate::tools::MockToolClient::new());
        client.queue(ToolName::CheckAnswer, MockBehavior::Panic);
        let executor = ToolExecutor::new(client, &test_cfg());
        let (tx, mut rx) = mpsc::unbounded_channel();

        executor
            .submit(ToolName::CheckAnswer, json!({}), None, tx)
            .unwrap();

        let result = rx.recv().await.unwrap();
        assert!(matches!(result.outcome, ToolOutcome::Err(reason) if reason.contains("panicked")));
    }

    #[tokio::test]
    async fn test_cancel_inflight() {
        let client = Arc::new(crate::tools::MockToolClient::new());
        client.queue(ToolName::ProvideHint, MockBehavior::Hang);
        let executor = ToolExecutor::new(client, &test_cfg());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let token = executor
            .submit(ToolName::ProvideHint, json!({}), None, tx)
            .unwrap();
        executor.cancel(token);

        let result = rx.recv().await.unwrap();
        assert!(matches!(result.outcome, ToolOutcome::Cancelled));

        // 已终结令牌再取消是空操作
        executor.cancel(token);
    }

    #[tokio::test]
    async fn test_busy_above_admission_cap() {
        let client = Arc::new(crate::tools::MockToolClient::new());
        for _ in 0..4 {
            client.queue(ToolName::ExplainConcept, MockBehavior::Hang);
        }
        let executor = ToolExecutor::new(client, &test_cfg());
        let (tx, _rx) = mpsc::unbounded_channel();

        // 2 并发 + 2 排队全部占满后，第 5 个提交被同步拒绝
        for _ in 0..4 {
            executor
                .submit(ToolName::ExplainConcept, json!({}), None, tx.clone())
                .unwrap();
        }
        let fifth = executor.submit(ToolName::ExplainConcept, json!({}), None, tx);
        assert!(matches!(fifth, Err(CoreError::ExecutorBusy)));
    }

    #[tokio::test]
    async fn test_unrelated_tokens_independent() {
        let client = Arc::new(crate::tools::MockToolClient::new());
        client.queue(ToolName::ExplainConcept, MockBehavior::Hang);
        client.queue(
            ToolName::ClassifyIntent,
            MockBehavior::Respond(json!("general")),
        );
        let executor = ToolExecutor::new(client, &test_cfg());
        let (tx, mut rx) = mpsc::unbounded_channel();

        executor
            .submit(ToolName::ExplainConcept, json!({}), None, tx.clone())
            .unwrap();
        executor
            .submit(ToolName::ClassifyIntent, json!({}), None, tx)
            .unwrap();

        // 挂起的调用不影响另一个完成
        let result = rx.recv().await.unwrap();
        assert_eq!(result.tool, ToolName::ClassifyIntent);
        assert!(matches!(result.outcome, ToolOutcome::Ok(_)));
    }
}
