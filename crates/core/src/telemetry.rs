//! Error reporting.
//!
//! The main loop never dies on a cycle failure; it reports the error and
//! resumes. Reporting goes to the log by default, or additionally to a
//! webhook when one is configured.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, warn};

/// Sink for cycle-level failures. Reporting must never fail the caller.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    async fn report(&self, context: &str, error: &anyhow::Error);
}

/// Reporter that only writes to the structured log.
#[derive(Default)]
pub struct LogReporter;

#[async_trait]
impl ErrorReporter for LogReporter {
    async fn report(&self, context: &str, error: &anyhow::Error) {
        error!(context, error = %error, "cycle failed");
    }
}

/// Reporter that also posts a JSON payload to a webhook.
pub struct WebhookReporter {
    client: reqwest::Client,
    url: String,
}

impl WebhookReporter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ErrorReporter for WebhookReporter {
    async fn report(&self, context: &str, error: &anyhow::Error) {
        error!(context, error = %error, "cycle failed");

        let payload = serde_json::json!({
            "context": context,
            "error": format!("{error:#}"),
            "timestamp": Utc::now().to_rfc3339(),
        });

        if let Err(e) = self.client.post(&self.url).json(&payload).send().await {
            warn!(error = %e, "error webhook unreachable");
        }
    }
}
