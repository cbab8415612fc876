//! Scripted completion provider for tests in this and downstream crates.

use std::collections::VecDeque;
use std::sync::Mutex;
use parley_core::error::ProviderError;
use parley_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};

/// Returns scripted responses in order and records every request.
///
/// Once the script runs out each call fails with `NotConfigured`, which the
/// engine treats like any other provider failure.
pub struct SequentialMockProvider {
    responses: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// One successful text response per entry.
    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(texts.into_iter().map(|t| Ok(make_text_response(t.as_ref()))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or_else(|| Err(ProviderError::NotConfigured("script exhausted".into())))
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Gate answer JSON.
pub fn gate_json(should_respond: bool, confidence: f32) -> String {
    format!(r#"{{"should_respond": {should_respond}, "reason": "scripted", "confidence": {confidence}}}"#)
}

/// Tool selection JSON with no arguments.
pub fn tool_json(tool: &str) -> String {
    format!(r#"{{"tool": "{tool}", "reason": "scripted"}}"#)
}
