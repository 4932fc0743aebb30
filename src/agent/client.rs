//! Chat completion client
//!
//! [`LlmProvider`] is the seam the orchestrator talks to; [`LlmClient`] is the
//! implementation for OpenAI-compatible endpoints (DeepSeek by default).

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use futures::{Stream, StreamExt};
use reqwest::{header, Client};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::agent::stream::{SseDecoder, SseLine, ToolCallAccumulator};
use crate::agent::types::*;
use crate::config::LlmConfig;
use crate::error::{Error, Result};

/// A provider-neutral completion request
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Conversation so far
    pub messages: Vec<Message>,
    /// Tools the model may call; empty disables tool calling
    pub tools: Vec<ToolDefinition>,
    /// Tool choice strategy, only sent when tools are present
    pub tool_choice: Option<ToolChoice>,
    /// Sampling overrides
    pub options: GenerationOptions,
}

/// A finished completion
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    /// Trimmed answer text, `None` when empty
    pub content: Option<String>,
    /// Tool calls requested by the model
    pub tool_calls: Vec<AssistantToolCall>,
    /// Reason the model stopped
    pub finish_reason: Option<String>,
    /// Token usage, when reported
    pub usage: Option<Usage>,
}

impl Completion {
    /// Whether the model asked for tools
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// An item of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionDelta {
    /// A fragment of answer text
    Content(String),
    /// A tool call whose arguments are complete
    ToolCall(AssistantToolCall),
    /// End of stream with the assembled completion
    Done(Completion),
}

/// Stream of completion deltas
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionDelta>> + Send>>;

/// Abstract interface for chat completion backends
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model used for completions
    fn model(&self) -> &str;

    /// Generate a complete response
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;

    /// Generate a streamed response
    ///
    /// The stream always ends with [`CompletionDelta::Done`] unless it
    /// yields an error first.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream>;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    config: LlmConfig,
    retry_interval: Duration,
}

impl LlmClient {
    /// Create a new client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();

        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!(
                "Bearer {}",
                config.api_key.expose_secret()
            ))
            .map_err(|e| Error::Config(format!("Invalid API key format: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(LlmClient {
            client,
            config,
            retry_interval: Duration::from_millis(500),
        })
    }

    /// Change the first retry delay
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: CompletionRequest, stream: bool) -> ChatCompletionRequest {
        let has_tools = !request.tools.is_empty();
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: request.messages,
            max_tokens: Some(request.options.max_tokens.unwrap_or(self.config.max_tokens)),
            temperature: Some(request.options.temperature.unwrap_or(self.config.temperature)),
            stream,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
            tools: has_tools.then_some(request.tools),
            tool_choice: if has_tools { request.tool_choice } else { None },
        }
    }

    /// Run `op` with exponential backoff until it succeeds, fails with a
    /// non-retryable error or exhausts `max_retries`
    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = self.config.max_retries;
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry_interval)
            .with_max_interval(self.retry_interval * 16)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        retry(policy, || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                fut.await.map_err(|e| {
                    if e.is_retryable() && current <= max_retries {
                        warn!(operation, attempt = current, error = %e, "LLM request failed, retrying");
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }

    async fn send(&self, body: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let response = self.client.post(self.endpoint()).json(body).send().await?;
        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 => Err(Error::Unauthorized("LLM API rejected the API key".to_string())),
            429 => {
                warn!("LLM rate limit exceeded: {}", error_text);
                Err(Error::RateLimit(error_text))
            }
            code if status.is_server_error() => Err(Error::LlmUpstream {
                status: code,
                message: error_text,
            }),
            _ => Err(Error::Llm(format!("API error ({}): {}", status, error_text))),
        }
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let body = self.build_body(request, false);
        debug!(
            model = %body.model,
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "Sending completion request"
        );

        let response: ChatCompletionResponse = self
            .with_retries("complete", || async {
                let response = self.send(&body).await?;
                let parsed = response.json::<ChatCompletionResponse>().await?;
                Ok::<_, Error>(parsed)
            })
            .await?;

        if let Some(ref usage) = response.usage {
            info!(model = %response.model, tokens = usage.total_tokens, "Completion finished");
        }

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("Response contained no choices".to_string()))?;

        let content = choice
            .message
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from);

        Ok(Completion {
            content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            usage: response.usage,
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let body = self.build_body(request, true);
        debug!(model = %body.model, messages = body.messages.len(), "Opening completion stream");

        // Only the connection is retried; once bytes flow, failures surface
        // as stream errors
        let response = self
            .with_retries("complete_stream", || self.send(&body))
            .await?;

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut acc = ToolCallAccumulator::new();

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(Error::Http(e));
                        return;
                    }
                };

                for line in decoder.push(&chunk) {
                    match line {
                        SseLine::Done => break 'read,
                        SseLine::Data(data) => {
                            for delta in apply_chunk(&mut acc, &data) {
                                yield Ok(delta);
                            }
                        }
                    }
                }
            }

            if let Some(SseLine::Data(data)) = decoder.finish() {
                for delta in apply_chunk(&mut acc, &data) {
                    yield Ok(delta);
                }
            }

            if let Some(call) = acc.flush_tool_call() {
                yield Ok(CompletionDelta::ToolCall(call));
            }

            let completion = acc.finish();
            if let Some(ref usage) = completion.usage {
                info!(tokens = usage.total_tokens, "Completion stream finished");
            }
            yield Ok(CompletionDelta::Done(completion));
        };

        Ok(Box::pin(stream))
    }
}

/// Fold one `data:` payload into the accumulator and return the deltas to
/// forward
fn apply_chunk(acc: &mut ToolCallAccumulator, data: &str) -> Vec<CompletionDelta> {
    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, "Skipping malformed stream chunk");
            return Vec::new();
        }
    };

    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                acc.push_content(&content);
                deltas.push(CompletionDelta::Content(content));
            }
        }
        for tool_delta in choice.delta.tool_calls.unwrap_or_default() {
            if let Some(call) = acc.push_tool_delta(&tool_delta) {
                deltas.push(CompletionDelta::ToolCall(call));
            }
        }
        if let Some(reason) = choice.finish_reason {
            acc.set_finish_reason(reason);
        }
    }
    if let Some(usage) = chunk.usage {
        acc.set_usage(usage);
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> LlmClient {
        let config = LlmConfig {
            api_key: SecretString::from("sk-test".to_string()),
            base_url: format!("{}/v1", server.uri()),
            max_retries: 2,
            ..LlmConfig::default()
        };
        LlmClient::new(config)
            .unwrap()
            .with_retry_interval(Duration::from_millis(5))
    }

    fn answer(content: &str) -> serde_json::Value {
        json!({
            "id": "cmpl-1",
            "model": "deepseek-chat",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        })
    }

    fn user_request() -> CompletionRequest {
        CompletionRequest {
            messages: vec![Message::user("hello")],
            ..CompletionRequest::default()
        }
    }

    #[test]
    fn body_omits_tool_choice_without_tools() {
        let config = LlmConfig {
            api_key: SecretString::from("sk-test".to_string()),
            ..LlmConfig::default()
        };
        let client = LlmClient::new(config).unwrap();
        let body = client.build_body(
            CompletionRequest {
                tool_choice: Some(ToolChoice::Required),
                ..user_request()
            },
            false,
        );

        assert!(body.tools.is_none());
        assert!(body.tool_choice.is_none());
        assert_eq!(body.temperature, Some(0.7));
        assert!(body.stream_options.is_none());
    }

    #[tokio::test]
    async fn complete_returns_trimmed_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "deepseek-chat", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("  Hi there \n")))
            .expect(1)
            .mount(&server)
            .await;

        let completion = client_for(&server).complete(user_request()).await.unwrap();
        assert_eq!(completion.content.as_deref(), Some("Hi there"));
        assert!(!completion.wants_tools());
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
    }

    #[tokio::test]
    async fn retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("recovered")))
            .with_priority(2)
            .mount(&server)
            .await;

        let completion = client_for(&server).complete(user_request()).await.unwrap();
        assert_eq!(completion.content.as_deref(), Some("recovered"));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server).complete(user_request()).await.unwrap_err();
        assert!(matches!(err, Error::LlmUpstream { status: 500, .. }));
    }

    #[tokio::test]
    async fn does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server).complete(user_request()).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn stream_yields_content_tool_calls_and_done() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Let me \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"check.\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"tavily_search\",\"arguments\":\"{\\\"query\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"rust\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":7,\"total_tokens\":12}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = client_for(&server).complete_stream(user_request()).await.unwrap();
        let deltas: Vec<CompletionDelta> = stream.map(|d| d.unwrap()).collect().await;

        assert_eq!(deltas[0], CompletionDelta::Content("Let me ".to_string()));
        assert_eq!(deltas[1], CompletionDelta::Content("check.".to_string()));
        match &deltas[2] {
            CompletionDelta::ToolCall(call) => {
                assert_eq!(call.function.name, "tavily_search");
                assert_eq!(call.function.arguments, "{\"query\":\"rust\"}");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
        match deltas.last().unwrap() {
            CompletionDelta::Done(completion) => {
                assert_eq!(completion.content.as_deref(), Some("Let me check."));
                assert_eq!(completion.tool_calls.len(), 1);
                assert_eq!(completion.finish_reason.as_deref(), Some("tool_calls"));
                assert_eq!(completion.usage.unwrap().total_tokens, 12);
            }
            other => panic!("expected done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn stream_connection_errors_are_returned_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let err = match client_for(&server).complete_stream(user_request()).await {
            Ok(_) => panic!("expected an error"),
            Err(e) => e,
        };
        assert!(matches!(err, Error::Llm(_)));
    }
}
