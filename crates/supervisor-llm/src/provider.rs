use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use supervisor_core::context::LlmContext;
use supervisor_core::errors::GatewayError;
use supervisor_core::provider::{BackendStream, GenerationOptions, LlmProvider};
use supervisor_core::stream::BackendEvent;

use crate::converter;
use crate::sse::{self, SseParser};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone)]
pub struct AnthropicConfig {
    pub api_key: SecretString,
    pub model: String,
    /// Base URL without the `/v1/messages` suffix.
    pub base_url: String,
    pub idle_timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: "https://api.anthropic.com".to_string(),
            idle_timeout: SSE_IDLE_TIMEOUT,
        }
    }
}

/// Anthropic Messages API backend, streaming over SSE.
pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request(
        &self,
        context: &LlmContext,
        options: &GenerationOptions,
    ) -> reqwest::RequestBuilder {
        let body = converter::build_request_body(context, options, &self.config.model);

        self.client
            .post(self.messages_url())
            .header("x-api-key", self.config.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("accept", "text/event-stream")
            .header("content-type", "application/json")
            .json(&body)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, context, options), fields(model = %self.config.model, messages = context.messages.len()))]
    async fn stream(
        &self,
        context: &LlmContext,
        options: &GenerationOptions,
    ) -> Result<BackendStream, GatewayError> {
        let resp = self
            .build_request(context, options)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, body));
        }
        debug!("backend stream opened");

        let stream = SseStream::with_idle_timeout(resp.bytes_stream(), self.config.idle_timeout);
        Ok(Box::pin(stream))
    }
}

/// Wraps a byte stream from reqwest and yields backend events.
/// If no data arrives within `idle_duration`, yields an error and ends.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    buffer: String,
    pending: VecDeque<BackendEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    finished: bool,
}

impl SseStream {
    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            buffer: String::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            finished: false,
        }
    }

    fn drain_buffer(&mut self, flush_tail: bool) {
        while let Some(pos) = self.buffer.find("\n\n") {
            let chunk: String = self.buffer.drain(..pos + 2).collect();
            self.parse_chunk(&chunk);
        }
        if flush_tail && !self.buffer.is_empty() {
            let remaining = std::mem::take(&mut self.buffer);
            self.parse_chunk(&remaining);
        }
    }

    fn parse_chunk(&mut self, chunk: &str) {
        for (event_type, data) in sse::parse_sse_lines(chunk) {
            self.pending
                .extend(self.parser.parse_event(&event_type, &data));
        }
    }

    /// Pop the next parsed event. Nothing is yielded after a terminal event.
    fn next_pending(&mut self) -> Option<BackendEvent> {
        let event = self.pending.pop_front()?;
        if event.is_terminal() {
            self.finished = true;
            self.pending.clear();
        }
        Some(event)
    }

    fn fail(&mut self, error: GatewayError) -> Poll<Option<BackendEvent>> {
        self.finished = true;
        Poll::Ready(Some(BackendEvent::Error { error }))
    }
}

impl Stream for SseStream {
    type Item = BackendEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.next_pending() {
            return Poll::Ready(Some(event));
        }
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    let text = String::from_utf8_lossy(&bytes);
                    self.buffer.push_str(&text.replace("\r\n", "\n"));
                    self.drain_buffer(false);

                    if let Some(event) = self.next_pending() {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return self.fail(GatewayError::StreamInterrupted(e.to_string()));
                }
                Poll::Ready(None) => {
                    self.drain_buffer(true);
                    self.finished = true;
                    return Poll::Ready(self.next_pending());
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        let secs = self.idle_duration.as_secs();
                        return self.fail(GatewayError::StreamInterrupted(format!(
                            "idle timeout after {secs}s"
                        )));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use supervisor_core::messages::StopReason;

    const TEXT_STREAM: &str = "event: message_start\n\
data: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":10}}}\n\n\
event: content_block_start\n\
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi \"}}\n\n\
event: content_block_delta\n\
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"there\"}}\n\n\
event: content_block_stop\n\
data: {\"type\":\"content_block_stop\",\"index\":0}\n\n\
event: message_delta\n\
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":2}}\n\n\
event: message_stop\n\
data: {\"type\":\"message_stop\"}\n\n";

    fn provider() -> AnthropicProvider {
        let config = AnthropicConfig::new(SecretString::from("test-key"), "claude-3-5-haiku-20241022");
        AnthropicProvider::new(config).unwrap()
    }

    #[test]
    fn provider_properties() {
        let p = provider();
        assert_eq!(p.name(), "anthropic");
        assert_eq!(p.model(), "claude-3-5-haiku-20241022");
        assert_eq!(p.messages_url(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let mut config = AnthropicConfig::new(SecretString::from("k"), "m");
        config.base_url = "http://127.0.0.1:9999/".into();
        let p = AnthropicProvider::new(config).unwrap();
        assert_eq!(p.messages_url(), "http://127.0.0.1:9999/v1/messages");
    }

    #[tokio::test]
    async fn sse_stream_handles_chunks_split_mid_event() {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, reqwest::Error>>(64);
        let stream = SseStream::with_idle_timeout(
            tokio_stream::wrappers::ReceiverStream::new(rx),
            Duration::from_secs(5),
        );

        for chunk in TEXT_STREAM.as_bytes().chunks(37) {
            tx.send(Ok(bytes::Bytes::copy_from_slice(chunk))).await.unwrap();
        }
        drop(tx);

        let events: Vec<BackendEvent> = stream.collect().await;
        let deltas: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::TextDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["Hi ", "there"]);
        match events.last() {
            Some(BackendEvent::Done { message, stop_reason }) => {
                assert_eq!(message.text_content(), "Hi there");
                assert_eq!(*stop_reason, StopReason::EndTurn);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sse_stream_idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Result<bytes::Bytes, reqwest::Error>>();
        let mut stream = Box::pin(SseStream::with_idle_timeout(byte_stream, Duration::from_secs(5)));

        tokio::time::advance(Duration::from_secs(6)).await;

        let event = stream.next().await;
        assert!(
            matches!(&event, Some(BackendEvent::Error { error: GatewayError::StreamInterrupted(msg) }) if msg.contains("idle timeout")),
            "expected idle timeout error, got: {event:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn sse_stream_ends_after_error_event() {
        let raw = "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"busy\"}}\n\n\
event: message_stop\ndata: {}\n\n";
        let byte_stream = futures::stream::iter(vec![Ok(bytes::Bytes::from(raw))]);
        let events: Vec<BackendEvent> =
            SseStream::with_idle_timeout(byte_stream, Duration::from_secs(5)).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            BackendEvent::Error { error: GatewayError::ProviderOverloaded }
        ));
    }

    #[tokio::test]
    async fn unreachable_backend_is_network_error() {
        let mut config = AnthropicConfig::new(SecretString::from("k"), "m");
        // Port 9 (discard) on localhost is closed in test environments.
        config.base_url = "http://127.0.0.1:9".into();
        let p = AnthropicProvider::new(config).unwrap();
        let result = p.stream(&LlmContext::empty(), &GenerationOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::NetworkError(_))));
    }
}
