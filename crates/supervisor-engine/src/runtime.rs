//! One session's agent: backend, system prompt, tools and conversation window.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use supervisor_core::context::{LlmContext, SystemBlock};
use supervisor_core::errors::{GatewayError, SupervisorError};
use supervisor_core::events::{normalize, EventPayload, StreamEvent};
use supervisor_core::ids::SessionId;
use supervisor_core::messages::{Message, ToolCallBlock};
use supervisor_core::provider::{GenerationOptions, LlmProvider};
use supervisor_core::stream::BackendEvent;
use supervisor_core::tools::{ToolContext, ToolError};
use supervisor_core::turns::{ConversationTurn, Role};
use supervisor_settings::SupervisorSettings;
use supervisor_store::HistoryStore;

use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::truncate::truncate_output;
use crate::window::ConversationWindow;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-runtime knobs, shared by every session a manager creates.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub system_prompt: String,
    pub options: GenerationOptions,
    pub window_size: usize,
    pub max_tool_rounds: u32,
    pub max_tool_output_bytes: usize,
    pub stream_buffer: usize,
    pub tool_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a concise AI assistant. Answer directly and briefly.".into(),
            options: GenerationOptions::default(),
            window_size: 20,
            max_tool_rounds: 8,
            max_tool_output_bytes: 16 * 1024,
            stream_buffer: 64,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl RuntimeConfig {
    pub fn from_settings(settings: &SupervisorSettings) -> Self {
        Self {
            system_prompt: settings.agent.system_prompt.clone(),
            options: GenerationOptions {
                max_tokens: Some(settings.model.max_tokens),
                temperature: Some(settings.model.temperature),
                stop_sequences: Vec::new(),
            },
            window_size: settings.session.conversation_window_size,
            max_tool_rounds: settings.session.max_tool_rounds,
            max_tool_output_bytes: settings.tools.max_output_bytes,
            stream_buffer: settings.server.stream_buffer_size,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// Result of a batch turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutput {
    pub output: String,
    pub model: String,
}

pub struct AgentRuntime {
    session_id: SessionId,
    actor_id: Option<String>,
    provider: Arc<dyn LlmProvider>,
    system: SystemBlock,
    tools: Arc<ToolRegistry>,
    window: Mutex<ConversationWindow>,
    history: Option<Arc<dyn HistoryStore>>,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
    options: GenerationOptions,
    max_tool_rounds: u32,
    max_tool_output_bytes: usize,
    stream_buffer: usize,
    tool_timeout: Duration,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("session_id", &self.session_id)
            .field("model", &self.provider.model())
            .field("turns", &self.window.lock().len())
            .finish_non_exhaustive()
    }
}

impl AgentRuntime {
    pub fn new(
        session_id: SessionId,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: &RuntimeConfig,
    ) -> Result<Self, EngineError> {
        if config.max_tool_rounds == 0 {
            return Err(EngineError::Configuration(
                "max tool rounds must be at least 1".into(),
            ));
        }
        Ok(Self {
            session_id,
            actor_id: None,
            provider,
            system: SystemBlock::stable(config.system_prompt.clone()),
            tools,
            window: Mutex::new(ConversationWindow::new(config.window_size)?),
            history: None,
            turn_lock: Arc::new(tokio::sync::Mutex::new(())),
            options: config.options.clone(),
            max_tool_rounds: config.max_tool_rounds,
            max_tool_output_bytes: config.max_tool_output_bytes,
            stream_buffer: config.stream_buffer.max(1),
            tool_timeout: config.tool_timeout,
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
        })
    }

    pub fn with_actor(mut self, actor_id: Option<String>) -> Self {
        self.actor_id = actor_id;
        self
    }

    /// Attach a history store, replaying its most recent turns into the window.
    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Result<Self, EngineError> {
        let window = self.window.get_mut();
        let restored = store.load_recent(window.capacity())?;
        if !restored.is_empty() {
            debug!(session_id = %self.session_id, turns = restored.len(), "restored history");
        }
        window.extend(restored);
        self.history = Some(store);
        Ok(self)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn actor_id(&self) -> Option<&str> {
        self.actor_id.as_deref()
    }

    pub fn model(&self) -> &str {
        self.provider.model()
    }

    pub fn system_prompt(&self) -> &SystemBlock {
        &self.system
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn snapshot(&self) -> Vec<ConversationTurn> {
        self.window.lock().snapshot()
    }

    /// Time since the last turn started or finished.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Whether a turn currently holds the turn lock.
    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    /// Run one turn to completion and return the final text.
    #[instrument(skip(self, prompt), fields(session_id = %self.session_id, model = %self.provider.model()))]
    pub async fn run(&self, prompt: &str) -> Result<RunOutput, SupervisorError> {
        let _turn = self.turn_lock.lock().await;
        let start = Instant::now();

        match self.execute(prompt, None).await {
            Ok(output) => {
                info!(elapsed_ms = start.elapsed().as_millis() as u64, "turn complete");
                Ok(RunOutput {
                    output,
                    model: self.provider.model().to_string(),
                })
            }
            Err(e) => {
                error!(error = %e, "turn failed");
                Err(e.into_supervisor(&self.session_id))
            }
        }
    }

    /// Run one turn on a background task, streaming normalized events.
    ///
    /// The stream ends after a `result` or `error` event. Dropping it stops
    /// the turn: the backend stream is dropped, the turn lock released and
    /// no assistant output is recorded.
    pub fn run_streaming(self: &Arc<Self>, prompt: impl Into<String>) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.stream_buffer);
        let runtime = Arc::clone(self);
        let prompt = prompt.into();

        tokio::spawn(async move {
            let start = Instant::now();
            let turn = async {
                let _turn = runtime.turn_lock.clone().lock_owned().await;
                runtime.execute(&prompt, Some(&tx)).await
            };

            let outcome = tokio::select! {
                _ = tx.closed() => None,
                result = turn => Some(result),
            };

            match outcome {
                Some(Ok(_)) => {
                    info!(
                        session_id = %runtime.session_id,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "streamed turn complete"
                    );
                }
                Some(Err(EngineError::Disconnected)) | None => {
                    info!(session_id = %runtime.session_id, "client disconnected, turn abandoned");
                }
                Some(Err(e)) => {
                    error!(session_id = %runtime.session_id, error = %e, "streamed turn failed");
                    let err = e.into_supervisor(&runtime.session_id);
                    let _ = tx.send(runtime.event(EventPayload::error(&err))).await;
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// The turn body shared by both modes. Caller holds the turn lock.
    async fn execute(
        &self,
        prompt: &str,
        tx: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<String, EngineError> {
        self.touch();
        self.record(vec![ConversationTurn::user(prompt)])?;

        let cancel = CancellationToken::new();
        let _abort_tools = cancel.clone().drop_guard();
        let tool_ctx = ToolContext {
            session_id: self.session_id.clone(),
            actor_id: self.actor_id.clone(),
            abort_signal: cancel,
        };

        for round in 0..self.max_tool_rounds {
            let context = self.build_context();
            let call_start = Instant::now();
            let mut stream = self.provider.stream(&context, &self.options).await?;

            let mut done = None;
            while let Some(event) = stream.next().await {
                match event {
                    BackendEvent::Done { message, .. } => {
                        done = Some(message);
                        break;
                    }
                    BackendEvent::Error { error } => return Err(error.into()),
                    other => {
                        if let Some(payload) = normalize(&other) {
                            self.emit(tx, payload).await?;
                        }
                    }
                }
            }
            let message = done.ok_or_else(|| {
                GatewayError::StreamInterrupted("stream ended without a final message".into())
            })?;
            debug!(
                round,
                elapsed_ms = call_start.elapsed().as_millis() as u64,
                tool_calls = message.tool_calls().len(),
                "backend call finished"
            );

            if message.has_tool_calls() {
                let calls: Vec<ToolCallBlock> = message.tool_calls().into_iter().cloned().collect();
                let mut turns = vec![ConversationTurn::new(Message::Assistant(message))];
                for call in &calls {
                    turns.push(ConversationTurn::new(self.invoke_tool(call, &tool_ctx).await));
                }
                // The call and its results land together so the window
                // never holds a tool call without its result.
                self.record(turns)?;
                continue;
            }

            let output = message.text_content();
            self.record(vec![ConversationTurn::new(Message::Assistant(message))])?;
            self.emit(tx, EventPayload::Result { result: output.clone() }).await?;
            self.touch();
            return Ok(output);
        }

        warn!(session_id = %self.session_id, rounds = self.max_tool_rounds, "tool round limit reached");
        Err(EngineError::MaxToolRoundsExceeded(self.max_tool_rounds))
    }

    fn build_context(&self) -> LlmContext {
        LlmContext {
            messages: context_messages(&self.snapshot()),
            system_blocks: vec![self.system.clone()],
            tools: self.tools.definitions(),
        }
    }

    #[instrument(skip(self, call, ctx), fields(tool = %call.name))]
    async fn invoke_tool(&self, call: &ToolCallBlock, ctx: &ToolContext) -> Message {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!("backend requested unknown tool");
            return Message::tool_result(call.id.clone(), format!("Unknown tool: {}", call.name), true);
        };

        let start = Instant::now();
        let result = tokio::time::timeout(
            self.tool_timeout,
            AssertUnwindSafe(tool.execute(call.arguments.clone(), ctx)).catch_unwind(),
        )
        .await;

        let (content, is_error) = match result {
            Ok(Ok(Ok(r))) => (r.content, r.is_error),
            Ok(Ok(Err(e))) => (e.to_string(), true),
            Ok(Err(_)) => {
                error!("tool panicked during execution");
                ("Internal error: tool crashed".to_string(), true)
            }
            Err(_) => {
                warn!(timeout_secs = self.tool_timeout.as_secs(), "tool timed out");
                (ToolError::Timeout(self.tool_timeout).to_string(), true)
            }
        };
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, is_error, "tool finished");

        let content = truncate_output(&content, self.max_tool_output_bytes);
        Message::tool_result(call.id.clone(), content, is_error)
    }

    /// Append to the history store, when attached, then the window. A
    /// failed store write leaves the window untouched.
    fn record(&self, turns: Vec<ConversationTurn>) -> Result<(), EngineError> {
        if let Some(store) = &self.history {
            store.append_batch(&turns)?;
        }
        self.window.lock().extend(turns);
        Ok(())
    }

    async fn emit(
        &self,
        tx: Option<&mpsc::Sender<StreamEvent>>,
        payload: EventPayload,
    ) -> Result<(), EngineError> {
        if let Some(tx) = tx {
            tx.send(self.event(payload))
                .await
                .map_err(|_| EngineError::Disconnected)?;
        }
        Ok(())
    }

    fn event(&self, payload: EventPayload) -> StreamEvent {
        StreamEvent::new(self.session_id.clone(), self.provider.model(), payload)
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }
}

/// Backend messages for a window snapshot. Turns before the first user
/// turn are dropped: truncation can leave an orphaned tool result or
/// assistant reply at the front.
pub fn context_messages(turns: &[ConversationTurn]) -> Vec<Message> {
    turns
        .iter()
        .skip_while(|t| t.role() != Role::User)
        .map(|t| t.message.clone())
        .collect()
}
