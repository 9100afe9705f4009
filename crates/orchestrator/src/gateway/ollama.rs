use std::time::Duration;

use async_trait::async_trait;
use council_core::TokenUsage;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    AgentRole, GatewayConfig, GatewayError, Generation, GenerationRequest, InferenceGateway,
};

/// Share of the context window above which a call reports memory pressure.
const CONTEXT_PRESSURE_RATIO: f64 = 0.9;

/// Gateway backed by an Ollama-compatible `/api/chat` endpoint.
pub struct OllamaGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl OllamaGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn model_for(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Worker => &self.config.worker_model,
            AgentRole::Synthesizer => &self.config.synthesizer_model,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl InferenceGateway for OllamaGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<Generation, GatewayError> {
        let limit = self.config.context_window;
        let needed = request.estimated_prompt_tokens() + request.max_tokens as usize;
        if needed > limit {
            return Err(GatewayError::ContextOverflow { needed, limit });
        }

        let memory_warning = if needed as f64 >= limit as f64 * CONTEXT_PRESSURE_RATIO {
            Some(format!(
                "{} call uses ~{} of {} context tokens",
                request.task.as_str(),
                needed,
                limit
            ))
        } else {
            None
        };

        let model = self.model_for(request.role());
        let mut body = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "stream": false,
            "options": {
                "num_predict": request.max_tokens,
                "temperature": self.config.temperature,
                "num_ctx": limit,
            },
        });
        if request.task.wants_json() {
            body["format"] = serde_json::Value::String("json".to_string());
        }

        debug!(
            model,
            task = request.task.as_str(),
            slot = ?request.slot_id,
            estimated_tokens = needed,
            "Sending generation request"
        );

        let response = self
            .client
            .post(self.chat_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(Duration::from_secs(self.config.timeout_secs))
                } else {
                    GatewayError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, model, "Generation backend returned an error");
            return Err(GatewayError::Status { status, body });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(Generation {
            text: chat.message.content,
            tokens: TokenUsage::new(chat.prompt_eval_count, chat.eval_count),
            memory_warning,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::AgentTask;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(server: &MockServer, context_window: usize) -> OllamaGateway {
        OllamaGateway::new(GatewayConfig {
            base_url: server.uri(),
            context_window,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_generate_reads_content_and_counts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3.2:3b",
                "format": "json",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "{\"summary\":\"ok\"}"},
                "prompt_eval_count": 42,
                "eval_count": 7
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generation = gateway(&server, 8192)
            .generate(GenerationRequest::new(AgentTask::Draft, "sys", "prompt"))
            .await
            .unwrap();

        assert_eq!(generation.text, "{\"summary\":\"ok\"}");
        assert_eq!(generation.tokens, TokenUsage::new(42, 7));
        assert!(generation.memory_warning.is_none());
    }

    #[tokio::test]
    async fn test_synthesizer_uses_its_model_without_json_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "qwen2.5:7b"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"content": "Final words"}
            })))
            .mount(&server)
            .await;

        let generation = gateway(&server, 8192)
            .generate(GenerationRequest::new(AgentTask::FinalAnswer, "sys", "prompt"))
            .await
            .unwrap();

        assert_eq!(generation.text, "Final words");
        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("format").is_none());
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let err = gateway(&server, 8192)
            .generate(GenerationRequest::new(AgentTask::Draft, "sys", "prompt"))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::Status {
                status: 500,
                body: "model not loaded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_overflow_is_rejected_before_sending() {
        let server = MockServer::start().await;
        let request = GenerationRequest::new(AgentTask::Draft, "", "x".repeat(4000))
            .with_max_tokens(100);

        let err = gateway(&server, 1000).generate(request).await.unwrap_err();

        assert_eq!(
            err,
            GatewayError::ContextOverflow {
                needed: 1100,
                limit: 1000
            }
        );
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_near_full_context_reports_pressure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"content": "{}"}
            })))
            .mount(&server)
            .await;

        let request = GenerationRequest::new(AgentTask::Draft, "", "x".repeat(3600))
            .with_max_tokens(50);
        let generation = gateway(&server, 1000).generate(request).await.unwrap();

        assert!(generation.memory_warning.is_some());
    }
}
