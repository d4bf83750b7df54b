//! 会话监管与注册表
//!
//! 每个学习者 ID 至多一个活会话；并发 start_session 返回同一句柄。
//! 每个会话任务有一个死亡监视任务：任务退出（正常、panic、强杀）后
//! 清除注册表条目。故障不会波及其他会话，也不自动重启；
//! 恢复由下一次 start_session 驱动，可从持久化快照复活。
//! 注册表只按不透明字符串取键，绝不转成运行时符号。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::AbortHandle;

use crate::config::AppConfig;
use crate::core::CoreError;
use crate::gateway::message::TransportSink;
use crate::observability::{bump, Metrics};
use crate::persistence::SessionStore;
use crate::session::actor::{SessionActor, SessionInit};
use crate::session::handle::SessionHandle;
use crate::session::state::Topic;
use crate::tools::executor::ToolExecutor;

/// start_session 的结果
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Started(SessionHandle),
    /// 该 ID 已有活会话；返回现有句柄，对调用方不算错误
    AlreadyStarted(SessionHandle),
}

impl StartOutcome {
    pub fn handle(&self) -> &SessionHandle {
        match self {
            StartOutcome::Started(h) | StartOutcome::AlreadyStarted(h) => h,
        }
    }
}

struct Entry {
    handle: SessionHandle,
    abort: AbortHandle,
}

type Registry = Arc<RwLock<HashMap<String, Entry>>>;

/// 会话监管器 + 注册表
pub struct SessionSupervisor {
    config: Arc<AppConfig>,
    executor: Arc<ToolExecutor>,
    store: Option<Arc<dyn SessionStore>>,
    registry: Registry,
}

impl SessionSupervisor {
    pub fn new(
        config: Arc<AppConfig>,
        executor: Arc<ToolExecutor>,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        Self {
            config,
            executor,
            store,
            registry: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 为 learner_id 启动（或找到）会话
    ///
    /// 写锁内检查-插入，保证并发调用下的唯一性；存在持久化快照时先复活。
    pub async fn start_session(
        &self,
        learner_id: &str,
        syllabus: Vec<Topic>,
        sink: Option<TransportSink>,
    ) -> StartOutcome {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.get(learner_id) {
            if entry.handle.is_alive() {
                return StartOutcome::AlreadyStarted(entry.handle.clone());
            }
            registry.remove(learner_id);
        }

        let restored = match &self.store {
            Some(store) => {
                let session_id = format!("session_{learner_id}");
                match store.restore(&session_id).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        tracing::warn!("restore failed for {session_id}: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        let (handle, join) = SessionActor::spawn(
            SessionInit {
                learner_id: learner_id.to_string(),
                syllabus,
                sink,
                restored,
            },
            Arc::clone(&self.config),
            Arc::clone(&self.executor),
            self.store.clone(),
        );

        registry.insert(
            learner_id.to_string(),
            Entry {
                handle: handle.clone(),
                abort: join.abort_handle(),
            },
        );

        // 死亡监视：任务退出后清除仍指向死句柄的条目
        let registry = Arc::clone(&self.registry);
        let id = learner_id.to_string();
        let session_id = handle.session_id().to_string();
        tokio::spawn(async move {
            match join.await {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    bump(&Metrics::global().sessions.failed);
                    tracing::error!("session {session_id} panicked, removing from registry");
                }
                Err(_) => {
                    bump(&Metrics::global().sessions.failed);
                    tracing::warn!("session {session_id} aborted, removing from registry");
                }
            }
            let mut reg = registry.write().await;
            if let Some(entry) = reg.get(&id) {
                // 可能已被重启覆盖；只清除死条目
                if !entry.handle.is_alive() {
                    reg.remove(&id);
                }
            }
        });

        StartOutcome::Started(handle)
    }

    /// 按学习者 ID 寻址当前活会话；死会话即便条目暂未清除也返回 None
    pub async fn lookup(&self, learner_id: &str) -> Option<SessionHandle> {
        let registry = self.registry.read().await;
        registry
            .get(learner_id)
            .filter(|entry| entry.handle.is_alive())
            .map(|entry| entry.handle.clone())
    }

    /// 请求优雅关闭；条目由死亡监视清除
    pub async fn stop_session(&self, learner_id: &str) -> Result<(), CoreError> {
        match self.lookup(learner_id).await {
            Some(handle) => {
                handle.request_shutdown(true);
                Ok(())
            }
            None => Err(CoreError::SessionNotFound(learner_id.to_string())),
        }
    }

    /// 强制终止（卡死会话的最后手段）；与 panic 走同一条清理路径
    pub async fn abort_session(&self, learner_id: &str) -> Result<(), CoreError> {
        let registry = self.registry.read().await;
        match registry.get(learner_id) {
            Some(entry) if entry.handle.is_alive() => {
                entry.abort.abort();
                Ok(())
            }
            _ => Err(CoreError::SessionNotFound(learner_id.to_string())),
        }
    }

    /// 活会话的学习者 ID 集合（自省用）
    pub async fn active_ids(&self) -> Vec<String> {
        self.registry
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.handle.is_alive())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// 请求所有会话优雅关闭，并在限时内等待它们退出
    pub async fn shutdown_all(&self, wait: std::time::Duration) {
        let handles: Vec<SessionHandle> = {
            let registry = self.registry.read().await;
            registry.values().map(|e| e.handle.clone()).collect()
        };
        for handle in &handles {
            handle.request_shutdown(true);
        }

        let deadline = tokio::time::Instant::now() + wait;
        while tokio::time::Instant::now() < deadline {
            if handles.iter().all(|h| !h.is_alive()) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let stragglers = handles.iter().filter(|h| h.is_alive()).count();
        if stragglers > 0 {
            tracing::warn!("{stragglers} session(s) still alive after shutdown wait");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::tools::MockToolClient;

    fn supervisor() -> SessionSupervisor {
        let config = Arc::new(AppConfig::default());
        let executor = Arc::new(ToolExecutor::new(
            Arc::new(MockToolClient::new()),
            &config.tools,
        ));
        SessionSupervisor::new(config, executor, None)
    }

    fn topic() -> Vec<Topic> {
        vec![Topic {
            id: 1,
            name: "Addition".to_string(),
            tier: None,
        }]
    }

    #[tokio::test]
    async fn test_start_then_lookup() {
        let sup = supervisor();
        let outcome = sup.start_session("alice", topic(), None).await;
        assert!(matches!(outcome, StartOutcome::Started(_)));

        let found = sup.lookup("alice").await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().session_id(), "session_alice");
        assert!(sup.lookup("bob").await.is_none());
    }

    #[tokio::test]
    async fn test_second_start_returns_same_handle() {
        let sup = supervisor();
        let first = sup.start_session("alice", topic(), None).await;
        let second = sup.start_session("alice", topic(), None).await;
        assert!(matches!(second, StartOutcome::AlreadyStarted(_)));
        assert_eq!(
            first.handle().session_id(),
            second.handle().session_id()
        );
    }

    #[tokio::test]
    async fn test_concurrent_starts_single_session() {
        let sup = Arc::new(supervisor());
        let mut joins = Vec::new();
        for _ in 0..8 {
            let sup = Arc::clone(&sup);
            joins.push(tokio::spawn(async move {
                sup.start_session("alice", topic(), None).await
            }));
        }
        let mut started = 0;
        for join in joins {
            if matches!(join.await.unwrap(), StartOutcome::Started(_)) {
                started += 1;
            }
        }
        assert_eq!(started, 1, "exactly one Started under concurrency");
        assert_eq!(sup.active_ids().await, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_stop_session_not_found() {
        let sup = supervisor();
        assert!(matches!(
            sup.stop_session("ghost").await,
            Err(CoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_abort_cleans_registry() {
        let sup = supervisor();
        sup.start_session("alice", topic(), None).await;
        sup.abort_session("alice").await.unwrap();

        // 死亡监视清理在任务退出后一小会儿内完成
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(sup.lookup("alice").await.is_none());
        assert!(sup.active_ids().await.is_empty());

        // 重启同一 ID 成功
        let outcome = sup.start_session("alice", topic(), None).await;
        assert!(matches!(outcome, StartOutcome::Started(_)));
    }
}
