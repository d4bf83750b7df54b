//! 会话收件箱事件
//!
//! 会话是单消费者 Actor：所有外部触达都收敛为同一收件箱上的事件，
//! 按到达顺序逐条处理，彼此之间没有并发。

use tokio::sync::oneshot;

use crate::gateway::message::TransportSink;
use crate::session::state::SessionView;
use crate::tools::ToolResult;

/// 收件箱事件
#[derive(Debug)]
pub enum SessionEvent {
    /// 学习者消息
    UserMessage { content: String },
    /// 工具终结结果（执行器投递，每令牌恰好一次）
    Tool(ToolResult),
    /// 绑定/更新出站端点（连接或重连）
    BindSink(TransportSink),
    /// 解绑出站端点（断开；会话在不活跃窗口内存活等待重连）
    UnbindSink,
    /// 只读快照请求
    Snapshot {
        reply: oneshot::Sender<SessionView>,
    },
    /// 关闭命令；graceful 时先持久化并发出小结
    Shutdown { graceful: bool },
}
