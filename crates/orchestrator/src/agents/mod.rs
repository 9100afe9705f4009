//! Worker and synthesizer calls.
//!
//! Each call builds a prompt from session state, sends it through the
//! gateway and turns the reply into domain values. Replies that do not parse
//! are absorbed with fallbacks; only gateway failures surface as errors.

mod synthesizer;
mod worker;

use std::sync::Arc;

use council_core::{OutputKind, Session, StageOutput, TokenUsage, WorkerSlot};

use crate::gateway::{
    estimate_tokens, GatewayError, Generation, GenerationRequest, InferenceGateway,
    CHARS_PER_TOKEN,
};
use crate::prompts::Contribution;

pub use synthesizer::Synthesizer;
pub use worker::WorkerAgent;

const TRUNCATION_MARKER: &str = "\n[... earlier context omitted ...]\n";
/// Tokens kept free for the reply when shrinking an oversized prompt.
const TRUNCATION_HEADROOM: usize = 64;

/// A parsed agent result plus what it cost.
#[derive(Debug, Clone)]
pub struct AgentReply<T> {
    pub value: T,
    pub raw: String,
    pub tokens: TokenUsage,
    pub memory_warning: Option<String>,
}

impl<T> AgentReply<T> {
    fn new(value: T, generation: Generation) -> Self {
        Self {
            value,
            raw: generation.text,
            tokens: generation.tokens,
            memory_warning: generation.memory_warning,
        }
    }
}

/// Send a request, refitting it to the context window and retrying once if
/// it overflows.
pub(crate) async fn generate(
    gateway: &Arc<dyn InferenceGateway>,
    request: GenerationRequest,
) -> Result<Generation, GatewayError> {
    match gateway.generate(request.clone()).await {
        Err(GatewayError::ContextOverflow { needed, limit }) => {
            let retry = fit_to_window(request, limit);
            tracing::warn!(
                task = retry.task.as_str(),
                needed,
                limit,
                max_tokens = retry.max_tokens,
                "Prompt exceeds context window, truncating and retrying"
            );
            gateway.generate(retry).await
        }
        other => other,
    }
}

/// Shrink a request so prompt, system text and reply budget fit in `limit`
/// tokens. A reply budget that cannot fit on its own is cut to a quarter of
/// the window, as is the system text.
pub(crate) fn fit_to_window(mut request: GenerationRequest, limit: usize) -> GenerationRequest {
    let usable = limit.saturating_sub(TRUNCATION_HEADROOM);
    let system = estimate_tokens(&request.system);
    if request.max_tokens as usize + system >= usable {
        let quarter = usable / 4;
        request.max_tokens = request.max_tokens.min(quarter.max(1) as u32);
        request.system = truncate_middle(&request.system, quarter * CHARS_PER_TOKEN);
    }
    let budget = usable
        .saturating_sub(request.max_tokens as usize)
        .saturating_sub(estimate_tokens(&request.system));
    request.prompt = truncate_middle(&request.prompt, budget * CHARS_PER_TOKEN);
    request
}

/// Keep the head and the tail of `text` within `max_chars` characters.
pub(crate) fn truncate_middle(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let marker = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker {
        return text.chars().take(max_chars).collect();
    }
    let keep = max_chars - marker;
    let head = keep / 3;
    let tail = keep - head;

    let mut out: String = text.chars().take(head).collect();
    out.push_str(TRUNCATION_MARKER);
    out.extend(text.chars().skip(total - tail));
    out
}

/// A slot's latest stance: its newest visible output other than an argument.
pub fn position(slot: &WorkerSlot) -> Option<&StageOutput> {
    slot.visible_outputs()
        .filter(|o| o.kind != OutputKind::Argument)
        .last()
}

/// Every slot's position except `except`, labelled for prompts.
pub(crate) fn positions<'a>(session: &'a Session, except: Option<&str>) -> Vec<Contribution<'a>> {
    session
        .slots
        .iter()
        .filter(|s| Some(s.id.as_str()) != except)
        .filter_map(|s| {
            position(s).map(|o| Contribution {
                slot_id: &s.id,
                persona: &s.persona.name,
                text: &o.summary,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{AgentTask, ScriptedGateway};

    #[test]
    fn test_truncate_middle_keeps_both_ends() {
        let text = format!("{}{}{}", "A".repeat(100), "m".repeat(1000), "Z".repeat(100));
        let cut = truncate_middle(&text, 400);
        assert!(cut.chars().count() <= 400);
        assert!(cut.starts_with('A'));
        assert!(cut.ends_with('Z'));
        assert!(cut.contains("earlier context omitted"));
        assert_eq!(truncate_middle(&text, 5), "AAAAA");

        assert_eq!(truncate_middle("short", 400), "short");
    }

    #[tokio::test]
    async fn test_overflow_retries_once_with_shorter_prompt() {
        let scripted = Arc::new(ScriptedGateway::new());
        scripted.fail_next(
            AgentTask::Commentary,
            GatewayError::ContextOverflow {
                needed: 9000,
                limit: 1000,
            },
        );
        scripted.reply(AgentTask::Commentary, "fits now");
        let gateway: Arc<dyn InferenceGateway> = scripted.clone();

        let request = GenerationRequest::new(AgentTask::Commentary, "sys", "x".repeat(20_000))
            .with_max_tokens(200);
        let generation = generate(&gateway, request).await.unwrap();

        assert_eq!(generation.text, "fits now");
        let calls = scripted.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].prompt.chars().count() < calls[0].prompt.chars().count());
        assert!(calls[1].prompt.chars().count() <= (1000 - 200 - 64 - 1) * CHARS_PER_TOKEN);
    }

    #[test]
    fn test_oversized_reply_budget_is_cut_to_fit() {
        let request = GenerationRequest::new(AgentTask::Draft, "s".repeat(400), "p".repeat(40_000))
            .with_max_tokens(9000);

        let fitted = fit_to_window(request, 8192);

        let needed = fitted.estimated_prompt_tokens() + fitted.max_tokens as usize;
        assert!(needed <= 8192, "still needs {} tokens", needed);
        assert_eq!(fitted.max_tokens as usize, (8192 - 64) / 4);
        assert_eq!(fitted.system, "s".repeat(400));
    }

    #[test]
    fn test_tiny_window_still_fits() {
        let request = GenerationRequest::new(AgentTask::Score, "x".repeat(2000), "p".repeat(2000))
            .with_max_tokens(512);

        let fitted = fit_to_window(request, 100);

        let needed = fitted.estimated_prompt_tokens() + fitted.max_tokens as usize;
        assert!(needed <= 100, "still needs {} tokens", needed);
        assert!(fitted.max_tokens >= 1);
    }
}
