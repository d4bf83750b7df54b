//! 会话快照存储
//!
//! 核心只依赖 SessionStore 契约（persist 按 session_id 幂等 / restore）；
//! 耐久存储本体是外部协作方。内置两种实现：内存（测试与默认）与
//! JSON 文件（每会话一个文件）。持久化失败只影响恢复能力，不影响存活。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::PersistenceSection;
use crate::session::state::SessionSnapshot;

/// 会话快照存储契约
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 保存快照；同一 session_id 重复保存是幂等覆盖
    async fn persist(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()>;

    /// 读取快照；无记录返回 None
    async fn restore(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>>;
}

/// 内存存储
#[derive(Default)]
pub struct MemorySessionStore {
    inner: RwLock<HashMap<String, SessionSnapshot>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn persist(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        self.inner
            .write()
            .await
            .insert(snapshot.session_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn restore(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        Ok(self.inner.read().await.get(session_id).cloned())
    }
}

/// JSON 文件存储：dir 下每会话一个 <session_id>.json
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// 会话 ID 来自不可信输入，落盘前压成安全文件名
    fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn persist(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
        let path = self.path_for(&snapshot.session_id);
        let data = serde_json::to_string_pretty(snapshot)?;
        tokio::fs::write(&path, data).await?;
        Ok(())
    }

    async fn restore(&self, session_id: &str) -> anyhow::Result<Option<SessionSnapshot>> {
        let path = self.path_for(session_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// 按配置创建存储：未启用返回 None；文件存储打不开时降级为内存并告警
pub async fn create_session_store(cfg: &PersistenceSection) -> Option<Arc<dyn SessionStore>> {
    if !cfg.enabled {
        return None;
    }
    match JsonFileStore::open(&cfg.dir).await {
        Ok(store) => {
            tracing::info!("Using JSON file session store: {:?}", cfg.dir);
            Some(Arc::new(store))
        }
        Err(e) => {
            tracing::warn!("Failed to open session store dir, falling back to memory: {e}");
            Some(Arc::new(MemorySessionStore::new()))
        }
    }
}
