//! Tutor - 一对一 AI 辅导平台的会话核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 教学状态机（PSM）、诊断分类、会话监管与注册表、错误类型
//! - **session**: 每学习者一个会话 Actor：单消费者收件箱、历史、待定工具调用
//! - **tools**: 教学工具契约、受监管的并发执行器、确定性回退、Mock 客户端
//! - **gateway**: 传输层入口门面与出站消息信封
//! - **persistence**: 会话快照存储（内存 / JSON 文件）
//! - **observability**: tracing 初始化与全局指标

pub mod config;
pub mod core;
pub mod gateway;
pub mod observability;
pub mod persistence;
pub mod session;
pub mod tools;
