//! 会话 Actor：每学习者一个任务，单消费者收件箱
//!
//! 一条消息的处理内部绝不同步等待工具或传输 I/O：工具提交立即拿到
//! 关联令牌返回收件箱循环，终结结果稍后作为收件箱事件到达。
//! 会话内因此没有数据竞争，也不需要任何内部锁。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::diagnosis::{classify_diagnosis, intervention_level, DiagnosisClass};
use crate::core::psm::{self, EntryAction, PsmEvent, PsmState};
use crate::gateway::message::{OutboundMessage, OutboundPayload, TransportSink};
use crate::observability::{bump, Metrics};
use crate::persistence::SessionStore;
use crate::session::event::SessionEvent;
use crate::session::handle::SessionHandle;
use crate::session::intent::{self, LearnerIntent};
use crate::session::state::{
    CallIntent, HistoryEntry, PendingCall, Question, Role, SessionMetrics, SessionSnapshot,
    SessionView, Topic,
};
use crate::tools::executor::{CallToken, ToolExecutor, ToolOutcome, ToolResult};
use crate::tools::{fallback, AnswerCheck, ToolName};

/// 快照视图返回的历史尾部长度
const HISTORY_TAIL: usize = 50;
/// 工具参数里附带的最近历史条数
const HISTORY_FOR_TOOLS: usize = 10;

/// 会话创建参数
pub struct SessionInit {
    pub learner_id: String,
    /// 本次学习轨道的有序话题表（课程数据源在核心之外）
    pub syllabus: Vec<Topic>,
    pub sink: Option<TransportSink>,
    /// 持久化恢复的快照；None 表示全新会话
    pub restored: Option<SessionSnapshot>,
}

/// 收件箱处理结果：继续消费还是终止任务
#[derive(PartialEq)]
enum Flow {
    Continue,
    Stop,
}

/// 主循环的唤醒来源
enum Wake {
    Inbox(Option<SessionEvent>),
    Tick,
}

/// 终止原因（指标与日志用）
enum StopCause {
    Completed,
    Requested,
    Inactive,
}

pub struct SessionActor {
    learner_id: String,
    session_id: String,
    config: Arc<AppConfig>,
    executor: Arc<ToolExecutor>,
    store: Option<Arc<dyn SessionStore>>,
    inbox: mpsc::UnboundedReceiver<SessionEvent>,
    /// 执行器投递终结结果的端点（转发任务再并入收件箱）
    tool_tx: mpsc::UnboundedSender<ToolResult>,
    sink: Option<TransportSink>,

    psm_state: PsmState,
    topic: Option<Topic>,
    syllabus: Vec<Topic>,
    syllabus_index: usize,
    question: Option<Question>,
    attempt_count: u32,
    history: Vec<HistoryEntry>,
    pending: HashMap<CallToken, PendingCall>,
    metrics: SessionMetrics,
    /// 不活跃计时（单调钟；仅学习者活动刷新）
    last_activity: Instant,
}

impl SessionActor {
    /// 启动会话任务；返回句柄与 JoinHandle（监管方用后者做死亡监视）
    pub fn spawn(
        init: SessionInit,
        config: Arc<AppConfig>,
        executor: Arc<ToolExecutor>,
        store: Option<Arc<dyn SessionStore>>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let SessionInit {
            learner_id,
            syllabus,
            sink,
            restored,
        } = init;
        let session_id = format!("session_{learner_id}");
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (tool_tx, mut tool_rx) = mpsc::unbounded_channel::<ToolResult>();

        // 工具结果并入同一收件箱，保持单消费者的严格顺序
        let forward = inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(result) = tool_rx.recv().await {
                if forward.send(SessionEvent::Tool(result)).is_err() {
                    break;
                }
            }
        });

        // 已完成的快照不复活
        let restored = restored.filter(|s| !psm::is_terminal(s.psm_state));
        let mut actor = match restored {
            Some(snapshot) => {
                bump(&Metrics::global().sessions.restored);
                Self::from_snapshot(snapshot, sink, config, executor, store, inbox_rx, tool_tx)
            }
            None => {
                bump(&Metrics::global().sessions.started);
                Self::fresh(
                    learner_id, session_id, syllabus, sink, config, executor, store, inbox_rx,
                    tool_tx,
                )
            }
        };

        let handle = SessionHandle::new(
            actor.learner_id.clone(),
            actor.session_id.clone(),
            inbox_tx,
        );
        let join = tokio::spawn(async move {
            actor.run().await;
        });
        (handle, join)
    }

    #[allow(clippy::too_many_arguments)]
    fn fresh(
        learner_id: String,
        session_id: String,
        syllabus: Vec<Topic>,
        sink: Option<TransportSink>,
        config: Arc<AppConfig>,
        executor: Arc<ToolExecutor>,
        store: Option<Arc<dyn SessionStore>>,
        inbox: mpsc::UnboundedReceiver<SessionEvent>,
        tool_tx: mpsc::UnboundedSender<ToolResult>,
    ) -> Self {
        let topic = syllabus.first().cloned();
        Self {
            learner_id,
            session_id,
            config,
            executor,
            store,
            inbox,
            tool_tx,
            sink,
            psm_state: psm::initial(),
            topic,
            syllabus,
            syllabus_index: 0,
            question: None,
            attempt_count: 0,
            history: Vec::new(),
            pending: HashMap::new(),
            metrics: SessionMetrics::new(),
            last_activity: Instant::now(),
        }
    }

    fn from_snapshot(
        snapshot: SessionSnapshot,
        sink: Option<TransportSink>,
        config: Arc<AppConfig>,
        executor: Arc<ToolExecutor>,
        store: Option<Arc<dyn SessionStore>>,
        inbox: mpsc::UnboundedReceiver<SessionEvent>,
        tool_tx: mpsc::UnboundedSender<ToolResult>,
    ) -> Self {
        // 瞬态（在途工具随旧进程一起丢了）回落到最近的稳定状态，避免复活即死锁
        let state = match snapshot.psm_state {
            PsmState::SettingQuestion | PsmState::EvaluatingAnswer | PsmState::AwaitingToolResult => {
                if snapshot.question.is_some() {
                    PsmState::AwaitingAnswer
                } else {
                    PsmState::Exposition
                }
            }
            PsmState::Initializing => PsmState::Initializing,
            other => other,
        };
        Self {
            learner_id: snapshot.learner_id,
            session_id: snapshot.session_id,
            config,
            executor,
            store,
            inbox,
            tool_tx,
            sink,
            psm_state: state,
            topic: snapshot.topic,
            syllabus: snapshot.syllabus,
            syllabus_index: snapshot.syllabus_index,
            question: snapshot.question,
            attempt_count: snapshot.attempt_count,
            history: snapshot.history,
            pending: HashMap::new(),
            metrics: snapshot.metrics,
            last_activity: Instant::now(),
        }
    }

    async fn run(&mut self) {
        tracing::info!(session = %self.session_id, "session started in {}", self.psm_state);

        if self.psm_state == PsmState::Initializing {
            // 内部 initialized 事件进入讲解态
            self.apply(PsmEvent::Initialized);
            let greeting = match &self.topic {
                Some(topic) => format!(
                    "Hello! Today we'll work on {}. Say \"ready\" when you want a question, or ask me anything about it.",
                    topic.name
                ),
                None => {
                    "Hello! No syllabus is configured yet, but feel free to ask me anything."
                        .to_string()
                }
            };
            self.emit_system(greeting);
        } else {
            let name = self
                .topic
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "our last topic".to_string());
            self.emit_system(format!("Welcome back! We were working on {name}."));
            self.emit_state_change();
        }

        let mut tick = tokio::time::interval(Duration::from_millis(self.config.session.tick_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.reset();

        loop {
            // 先收敛到一个唤醒值再处理，收件箱借用在 select 表达式结束即释放
            let wake = tokio::select! {
                maybe = self.inbox.recv() => Wake::Inbox(maybe),
                _ = tick.tick() => Wake::Tick,
            };
            let flow = match wake {
                Wake::Inbox(Some(event)) => self.handle_event(event).await,
                Wake::Inbox(None) => Flow::Stop,
                Wake::Tick => self.on_tick().await,
            };
            if flow == Flow::Stop {
                break;
            }
        }

        tracing::info!(session = %self.session_id, "session task finished");
    }

    async fn handle_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::UserMessage { content } => self.on_user_message(content).await,
            SessionEvent::Tool(result) => self.on_tool_result(result).await,
            SessionEvent::BindSink(sink) => {
                self.sink = Some(sink);
                self.last_activity = Instant::now();
                self.emit_state_change();
                Flow::Continue
            }
            SessionEvent::UnbindSink => {
                self.sink = None;
                Flow::Continue
            }
            SessionEvent::Snapshot { reply } => {
                let _ = reply.send(self.view());
                Flow::Continue
            }
            SessionEvent::Shutdown { graceful } => {
                self.terminate(graceful, StopCause::Requested).await;
                Flow::Stop
            }
        }
    }

    // ------------------------------------------------------------------
    // 用户消息
    // ------------------------------------------------------------------

    async fn on_user_message(&mut self, content: String) -> Flow {
        self.last_activity = Instant::now();
        self.push_history(Role::User, &content);

        match self.psm_state {
            PsmState::Exposition => self.on_exposition_message(&content),
            PsmState::AwaitingAnswer => {
                // 进入评估锁态；入口动作调度 check_answer
                if self.apply(PsmEvent::AnswerReceived) {
                    self.attempt_count += 1;
                    self.metrics.questions_attempted += 1;
                    self.dispatch_check_answer(content);
                }
                Flow::Continue
            }
            PsmState::GuidingStudent => {
                if intent::signals_understanding(&content) {
                    self.retry_question();
                } else {
                    self.dispatch_hint(&content);
                }
                Flow::Continue
            }
            PsmState::RemediatingKnownError | PsmState::RemediatingUnknownError => {
                // 补救子对话：表态就绪则重试原题，否则继续补救
                if intent::signals_understanding(&content) {
                    self.retry_question();
                } else {
                    self.dispatch_hint(&content);
                }
                Flow::Continue
            }
            _ => {
                // 锁态与瞬态不把消息当事件，只确认收到
                self.emit_system("One moment, I'm still working on the previous step.");
                Flow::Continue
            }
        }
    }

    fn on_exposition_message(&mut self, content: &str) -> Flow {
        match intent::fast_match(content) {
            Some(known) => self.route_intent(known, content),
            None => {
                // 规则判不了，交给 classify_intent 工具并进入等待锁态
                if self.apply(PsmEvent::ToolRequested) {
                    let args = json!({
                        "message": content,
                        "history": self.history_for_tools(),
                    });
                    self.dispatch_tool(
                        ToolName::ClassifyIntent,
                        args,
                        CallIntent::IntentClassify {
                            message: content.to_string(),
                        },
                    );
                }
                Flow::Continue
            }
        }
    }

    /// 讲解态的意图路由；也用于 classify_intent 结果到达后（AwaitingToolResult）
    fn route_intent(&mut self, learner_intent: LearnerIntent, content: &str) -> Flow {
        match learner_intent {
            LearnerIntent::RequestQuestion if self.topic.is_some() => {
                // instruction_complete → SettingQuestion，入口动作选题
                self.apply(PsmEvent::InstructionComplete);
            }
            LearnerIntent::RequestHelp | LearnerIntent::Confusion => {
                if self.enter_tool_wait() {
                    self.dispatch_explain(content, "targeted");
                }
            }
            _ => {
                if self.enter_tool_wait() {
                    self.dispatch_explain(content, "general");
                }
            }
        }
        Flow::Continue
    }

    /// 从讲解/选题态进入 AwaitingToolResult；已处于其中则原地等待
    fn enter_tool_wait(&mut self) -> bool {
        if self.psm_state == PsmState::AwaitingToolResult {
            return true;
        }
        self.apply(PsmEvent::ToolRequested)
    }

    fn retry_question(&mut self) {
        if self.apply(PsmEvent::RetryQuestion) {
            let text = self
                .question
                .as_ref()
                .map(|q| q.text.clone())
                .unwrap_or_default();
            self.emit_system(format!("Let's try again: {text}"));
        }
    }

    // ------------------------------------------------------------------
    // 工具结果
    // ------------------------------------------------------------------

    async fn on_tool_result(&mut self, result: ToolResult) -> Flow {
        let Some(call) = self.pending.remove(&result.token) else {
            // 未知或已解决的令牌：幂等空操作（迟到投递）
            tracing::debug!(session = %self.session_id, token = %result.token, "late tool result dropped");
            return Flow::Continue;
        };

        match result.outcome {
            ToolOutcome::Ok(value) => self.on_tool_success(call, value).await,
            ToolOutcome::Cancelled => Flow::Continue,
            ToolOutcome::Err(reason) => {
                self.on_tool_failure(result.tool, call.intent, &reason).await
            }
            ToolOutcome::Timeout => {
                self.on_tool_failure(result.tool, call.intent, "deadline exceeded")
                    .await
            }
        }
    }

    async fn on_tool_success(&mut self, call: PendingCall, value: Value) -> Flow {
        match call.intent {
            CallIntent::QuestionForTopic => {
                let question = Question::from_tool_output(&value)
                    .unwrap_or_else(|| fallback::question(self.topic.as_ref()));
                self.present_question(question);
                Flow::Continue
            }
            CallIntent::AnswerCheck { answer } => {
                let check = AnswerCheck::from_value(&value);
                self.finish_answer_check(check, &answer).await
            }
            CallIntent::Diagnosis { .. } => {
                self.finish_diagnosis(&value);
                Flow::Continue
            }
            CallIntent::Remediation => {
                let text = crate::tools::text_from_value(&value)
                    .unwrap_or_else(|| fallback::remediation(self.topic.as_ref()));
                // 不自动推进：等学习者表态再 retry_question
                self.emit_system(text);
                Flow::Continue
            }
            CallIntent::Hint => {
                let text = crate::tools::text_from_value(&value)
                    .unwrap_or_else(|| fallback::hint(self.question.as_ref()));
                self.emit_system(text);
                Flow::Continue
            }
            CallIntent::Explanation => {
                let text = crate::tools::text_from_value(&value)
                    .unwrap_or_else(|| fallback::explanation(self.topic.as_ref()));
                self.emit_system(text);
                if self.psm_state == PsmState::AwaitingToolResult {
                    self.apply(PsmEvent::ToolCompleted);
                }
                Flow::Continue
            }
            CallIntent::IntentClassify { message } => {
                let learner_intent = LearnerIntent::from_tool_output(&value);
                self.route_intent(learner_intent, &message)
            }
        }
    }

    /// Err / Timeout / Busy 的统一降级路径：发出降级通知，走该工具的确定性回退
    async fn on_tool_failure(
        &mut self,
        tool: ToolName,
        call_intent: CallIntent,
        reason: &str,
    ) -> Flow {
        tracing::warn!(session = %self.session_id, %tool, reason, "tool degraded, using fallback");
        self.emit_error(format!("{tool} unavailable ({reason}), falling back"));

        match call_intent {
            CallIntent::QuestionForTopic => {
                self.present_question(fallback::question(self.topic.as_ref()));
                Flow::Continue
            }
            CallIntent::AnswerCheck { answer } => {
                let question = self
                    .question
                    .clone()
                    .unwrap_or_else(|| fallback::question(self.topic.as_ref()));
                let check = fallback::answer_check(&question, &answer);
                self.finish_answer_check(check, &answer).await
            }
            CallIntent::Diagnosis { .. } => {
                self.finish_diagnosis(&fallback::diagnosis());
                Flow::Continue
            }
            CallIntent::Remediation => {
                self.emit_system(fallback::remediation(self.topic.as_ref()));
                Flow::Continue
            }
            CallIntent::Hint => {
                self.emit_system(fallback::hint(self.question.as_ref()));
                Flow::Continue
            }
            CallIntent::Explanation => {
                self.emit_system(fallback::explanation(self.topic.as_ref()));
                if self.psm_state == PsmState::AwaitingToolResult {
                    self.apply(PsmEvent::ToolCompleted);
                }
                Flow::Continue
            }
            CallIntent::IntentClassify { message } => self.route_intent(fallback::intent(), &message),
        }
    }

    fn present_question(&mut self, question: Question) {
        let text = question.text.clone();
        self.question = Some(question);
        self.attempt_count = 0;
        if self.apply(PsmEvent::QuestionPresented) {
            self.emit_system(text);
        }
    }

    async fn finish_answer_check(&mut self, check: AnswerCheck, answer: &str) -> Flow {
        if check.is_correct {
            self.metrics.questions_correct += 1;
            if let Some(topic) = &self.topic {
                self.metrics.topics_covered.insert(topic.id);
            }
            if self.apply(PsmEvent::AnswerCorrect) {
                self.emit_system(check.feedback);
                self.question = None;
                self.attempt_count = 0;
                // 还有在途调用的话（比如迟到的提示），现在都与本题无关了
                self.cancel_all_pending();
                return self.advance_syllabus().await;
            }
            Flow::Continue
        } else {
            // 错误作答：先给反馈，再诊断错误根因；保持评估锁态
            self.emit_system(check.feedback);
            let question = self.question.clone();
            self.dispatch_tool(
                ToolName::DiagnoseError,
                json!({
                    "question": question,
                    "answer_data": {
                        "student_answer": answer,
                        "correct_answer": question.as_ref().map(|q| q.correct_answer.clone()),
                        "is_correct": false,
                    },
                }),
                CallIntent::Diagnosis {
                    answer: answer.to_string(),
                },
            );
            Flow::Continue
        }
    }

    fn finish_diagnosis(&mut self, payload: &Value) {
        let threshold = self.config.session.known_error_confidence;
        match classify_diagnosis(payload, threshold) {
            DiagnosisClass::Known { confidence, .. } => {
                if self.apply(PsmEvent::KnownErrorDetected) {
                    // 入口动作：按干预级别生成针对性补救
                    let level = intervention_level(self.attempt_count, confidence);
                    let args = json!({
                        "topic": self.topic.clone(),
                        "diagnosis": payload,
                        "intervention_level": level.label(),
                    });
                    self.dispatch_tool(ToolName::CreateRemediation, args, CallIntent::Remediation);
                }
            }
            DiagnosisClass::Unknown { .. } => {
                if self.apply(PsmEvent::UnknownErrorDetected) {
                    // 入口动作已发出苏格拉底引导；随即进入引导对话
                    self.apply(PsmEvent::GuidanceComplete);
                }
            }
        }
    }

    async fn advance_syllabus(&mut self) -> Flow {
        if self.syllabus_index + 1 < self.syllabus.len() {
            self.syllabus_index += 1;
            self.topic = Some(self.syllabus[self.syllabus_index].clone());
            if self.apply(PsmEvent::NextTopic) {
                let name = self.syllabus[self.syllabus_index].name.clone();
                self.emit_system(format!(
                    "Great progress! Next up: {name}. Say \"ready\" for a question, or ask me about it first."
                ));
            }
            Flow::Continue
        } else {
            if self.apply(PsmEvent::SyllabusComplete) {
                self.terminate(true, StopCause::Completed).await;
                return Flow::Stop;
            }
            Flow::Continue
        }
    }

    // ------------------------------------------------------------------
    // 工具调度
    // ------------------------------------------------------------------

    /// 提交工具调用并登记待定项；Busy/Closed 转为立刻到达的失败结果，
    /// 复用同一条降级路径
    fn dispatch_tool(&mut self, tool: ToolName, args: Value, call_intent: CallIntent) {
        let token = match self
            .executor
            .submit(tool, args, None, self.tool_tx.clone())
        {
            Ok(token) => token,
            Err(e) => {
                let token = CallToken::fresh();
                let _ = self.tool_tx.send(ToolResult {
                    token,
                    tool,
                    outcome: ToolOutcome::Err(e.to_string()),
                });
                token
            }
        };
        self.pending.insert(
            token,
            PendingCall {
                tool,
                intent: call_intent,
                started_at: Instant::now(),
            },
        );
    }

    fn dispatch_check_answer(&mut self, answer: String) {
        let question = self.question.clone();
        self.dispatch_tool(
            ToolName::CheckAnswer,
            json!({
                "question": question,
                "student_answer": answer,
            }),
            CallIntent::AnswerCheck { answer },
        );
    }

    fn dispatch_hint(&mut self, content: &str) {
        let level = intervention_level(self.attempt_count.max(1), 0.5);
        let question = self.question.clone();
        let args = json!({
            "question": question,
            "context": {
                "message": content,
                "attempt_count": self.attempt_count,
                "intervention_level": level.label(),
                "flow": psm::flow(self.psm_state),
            },
        });
        self.dispatch_tool(ToolName::ProvideHint, args, CallIntent::Hint);
    }

    fn dispatch_explain(&mut self, message: &str, framing: &str) {
        let args = json!({
            "topic": self.topic.clone(),
            "message": message,
            "framing": framing,
            "history": self.history_for_tools(),
        });
        self.dispatch_tool(ToolName::ExplainConcept, args, CallIntent::Explanation);
    }

    fn cancel_all_pending(&mut self) {
        for token in self.pending.keys() {
            self.executor.cancel(*token);
        }
        self.pending.clear();
    }

    // ------------------------------------------------------------------
    // PSM 推进与入口动作
    // ------------------------------------------------------------------

    /// 推进 PSM；非法转移仅记日志、状态不变、绝不 panic
    fn apply(&mut self, event: PsmEvent) -> bool {
        match psm::transition(self.psm_state, event) {
            Ok(next) => {
                tracing::debug!(
                    session = %self.session_id,
                    "psm {} --{}--> {next}", self.psm_state, event
                );
                self.psm_state = next;
                self.emit_state_change();
                match psm::entry_action(next) {
                    Some(EntryAction::SelectQuestion) => {
                        self.dispatch_generate_question();
                        // 选题在途，进入等待锁态
                        self.apply(PsmEvent::ToolRequested);
                    }
                    Some(EntryAction::EmitSocraticPrompt) => {
                        let text = self
                            .question
                            .as_ref()
                            .map(|q| {
                                format!(
                                    "Let's think it through. Re-read the question: \"{}\". What is the first step you would take?",
                                    q.text
                                )
                            })
                            .unwrap_or_else(|| {
                                "Let's think it through. What is the first step you would take?"
                                    .to_string()
                            });
                        self.emit_system(text);
                    }
                    // EvaluateAnswer / CreateRemediation 需要作答与诊断上下文，在调用点执行
                    _ => {}
                }
                true
            }
            Err(e) => {
                tracing::warn!(session = %self.session_id, "{e}");
                false
            }
        }
    }

    fn dispatch_generate_question(&mut self) {
        let args = json!({
            "topic": self.topic.clone(),
            "history": self.history_for_tools(),
        });
        self.dispatch_tool(ToolName::GenerateQuestion, args, CallIntent::QuestionForTopic);
    }

    // ------------------------------------------------------------------
    // Tick、持久化与终止
    // ------------------------------------------------------------------

    async fn on_tick(&mut self) -> Flow {
        // 断线后只保留重连宽限期，不再等满整个不活跃窗口
        let limit_ms = if self.sink.is_none() {
            self.config
                .session
                .inactivity_ms
                .min(self.config.session.reconnect_grace_ms)
        } else {
            self.config.session.inactivity_ms
        };
        let inactive_for = self.last_activity.elapsed();
        if inactive_for >= Duration::from_millis(limit_ms) {
            tracing::info!(
                session = %self.session_id,
                "inactive for {}s, shutting down", inactive_for.as_secs()
            );
            self.terminate(true, StopCause::Inactive).await;
            return Flow::Stop;
        }
        self.persist().await;
        Flow::Continue
    }

    /// 把序列化状态交给持久化协作方；失败只记日志，不影响存活
    async fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.persist(&self.snapshot()).await {
                tracing::warn!(session = %self.session_id, "persist failed: {e}");
            }
        }
    }

    async fn terminate(&mut self, graceful: bool, cause: StopCause) {
        self.cancel_all_pending();
        if graceful {
            if let StopCause::Completed = cause {
                self.emit_system(format!(
                    "Session complete! You answered {} of {} attempts correctly across {} topic(s). Well done!",
                    self.metrics.questions_correct,
                    self.metrics.questions_attempted,
                    self.metrics.topics_covered.len(),
                ));
            } else {
                self.emit_system("Session closed. See you next time!");
            }
        }
        // 任何终止路径都恰好一次把当前状态交给持久化协作方
        self.persist().await;

        let metrics = Metrics::global();
        match cause {
            StopCause::Completed => bump(&metrics.sessions.completed),
            StopCause::Inactive => bump(&metrics.sessions.expired),
            StopCause::Requested => bump(&metrics.sessions.completed),
        }
        self.inbox.close();
    }

    // ------------------------------------------------------------------
    // 输出与视图
    // ------------------------------------------------------------------

    fn push_history(&mut self, role: Role, content: &str) {
        self.history.push(HistoryEntry::now(role, content));
        self.metrics.last_activity = chrono::Utc::now();
        let cap = self.config.session.history_retained;
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    fn emit_system(&mut self, content: impl Into<String>) {
        let content = content.into();
        self.push_history(Role::System, &content);
        self.send_out(OutboundPayload::SystemMessage { content });
    }

    fn emit_state_change(&mut self) {
        self.send_out(OutboundPayload::StateChange {
            state: self.psm_state,
        });
    }

    fn emit_error(&mut self, reason: impl Into<String>) {
        self.send_out(OutboundPayload::Error {
            reason: reason.into(),
        });
    }

    fn send_out(&mut self, payload: OutboundPayload) {
        if let Some(sink) = &self.sink {
            let msg = OutboundMessage::new(self.session_id.clone(), payload);
            if sink.send(msg).is_err() {
                // 端点已断开；等待重连，期间静默丢弃
                self.sink = None;
            }
        }
    }

    fn history_for_tools(&self) -> Value {
        let tail: Vec<Value> = self
            .history
            .iter()
            .rev()
            .take(HISTORY_FOR_TOOLS)
            .rev()
            .map(|entry| {
                json!({
                    "role": entry.role,
                    "content": entry.content,
                })
            })
            .collect();
        Value::Array(tail)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            learner_id: self.learner_id.clone(),
            psm_state: self.psm_state,
            topic: self.topic.clone(),
            syllabus: self.syllabus.clone(),
            syllabus_index: self.syllabus_index,
            question: self.question.clone(),
            attempt_count: self.attempt_count,
            history: self.history.clone(),
            metrics: self.metrics.clone(),
        }
    }

    fn view(&self) -> SessionView {
        let tail_start = self.history.len().saturating_sub(HISTORY_TAIL);
        SessionView {
            session_id: self.session_id.clone(),
            learner_id: self.learner_id.clone(),
            psm_state: self.psm_state,
            topic: self.topic.clone(),
            question: self.question.clone(),
            history_tail: self.history[tail_start..].to_vec(),
            metrics: self.metrics.clone(),
            pending_tools: self.pending.len(),
        }
    }
}
