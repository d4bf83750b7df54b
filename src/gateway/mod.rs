//! 传输层入口门面
//!
//! 双向客户端套接字本体在核心之外；这里只暴露它要消费的最小 API：
//! on_connect / on_message / on_disconnect。消息入队即返回，绝不等待 LLM 工作。

pub mod message;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::supervisor::SessionSupervisor;
use crate::persistence::create_session_store;
use crate::session::handle::Delivery;
use crate::session::state::Topic;
use crate::tools::executor::ToolExecutor;
use crate::tools::ToolClient;

pub use message::{OutboundMessage, OutboundPayload, TransportSink};

/// 会话核心门面：传输协作方的唯一入口
pub struct SessionGateway {
    config: Arc<AppConfig>,
    supervisor: SessionSupervisor,
    /// 新会话的默认学习轨道（课程数据源在核心之外）
    syllabus: Vec<Topic>,
}

impl SessionGateway {
    pub async fn new(
        config: AppConfig,
        client: Arc<dyn ToolClient>,
        syllabus: Vec<Topic>,
    ) -> Self {
        let config = Arc::new(config);
        let executor = Arc::new(ToolExecutor::new(client, &config.tools));
        let store = create_session_store(&config.persistence).await;
        let supervisor = SessionSupervisor::new(Arc::clone(&config), executor, store);
        Self {
            config,
            supervisor,
            syllabus,
        }
    }

    /// 绑定/更新出站端点；没有会话时启动一个
    pub async fn on_connect(&self, learner_id: &str, sink: TransportSink) {
        match self.supervisor.lookup(learner_id).await {
            Some(handle) => handle.bind_sink(sink),
            None => {
                self.supervisor
                    .start_session(learner_id, self.syllabus.clone(), Some(sink))
                    .await;
            }
        }
    }

    /// 投递学习者消息；没有会话时先启动再入队，立即返回
    pub async fn on_message(&self, learner_id: &str, content: &str) -> Delivery {
        let handle = match self.supervisor.lookup(learner_id).await {
            Some(handle) => handle,
            None => self
                .supervisor
                .start_session(learner_id, self.syllabus.clone(), None)
                .await
                .handle()
                .clone(),
        };
        handle.handle_user_message(content)
    }

    /// 断开：解绑端点；会话在不活跃窗口内存活等待重连
    pub async fn on_disconnect(&self, learner_id: &str) {
        if let Some(handle) = self.supervisor.lookup(learner_id).await {
            handle.unbind_sink();
        }
    }

    /// 监管器（自省与测试）
    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 请求所有会话优雅关闭
    pub async fn shutdown(&self) {
        self.supervisor
            .shutdown_all(std::time::Duration::from_secs(5))
            .await;
    }
}
