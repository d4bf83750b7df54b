//! 控制台演示：用 Mock 工具客户端在本地跑通完整辅导流程
//!
//! stdin 一行一条消息；Ctrl+C 或 /quit 优雅退出。

use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use tutor::config::load_config;
use tutor::gateway::{OutboundMessage, OutboundPayload, SessionGateway};
use tutor::session::state::Topic;
use tutor::session::Delivery;
use tutor::tools::MockToolClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tutor::observability::init();

    let config = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        Default::default()
    });

    let syllabus = vec![
        Topic {
            id: 1,
            name: "Addition".to_string(),
            tier: Some(1),
        },
        Topic {
            id: 2,
            name: "Multiplication".to_string(),
            tier: Some(1),
        },
    ];

    let gateway = SessionGateway::new(config, Arc::new(MockToolClient::new()), syllabus).await;

    let (sink, mut outbound) = mpsc::unbounded_channel::<OutboundMessage>();
    let printer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            match msg.payload {
                OutboundPayload::SystemMessage { content } => println!("tutor> {content}"),
                OutboundPayload::StateChange { state } => {
                    tracing::debug!("state changed to {state}")
                }
                OutboundPayload::Error { reason } => eprintln!("[degraded] {reason}"),
            }
        }
    });

    gateway.on_connect("local", sink).await;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => {
                    let line = line.trim();
                    if line == "/quit" {
                        break;
                    }
                    if line.is_empty() {
                        continue;
                    }
                    if let Delivery::Rejected(reason) = gateway.on_message("local", line).await {
                        eprintln!("rejected: {reason}");
                        break;
                    }
                }
                None => break,
            },
        }
    }

    gateway.shutdown().await;
    printer.abort();
    Ok(())
}
