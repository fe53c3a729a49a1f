//! AI Hook
//!
//! Fire-and-forget handoff of a completed upload to a downstream pipeline,
//! grounded on the teacher's OCR integration: a provider trait
//! (`AiPipeline`, in the shape of `OcrProviderTrait`) with a logging no-op
//! default and a `reqwest`-based implementation that posts a job
//! descriptor to a configured webhook (mirroring `OllamaProvider::recognize`'s
//! `reqwest::Client` + `serde_json::json!` usage), never awaiting the
//! downstream response body beyond a short timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct AsyncJobRef {
    pub status: String,
    pub estimated_time: Option<String>,
    pub job_id: Option<String>,
}

#[async_trait]
pub trait AiPipeline: Send + Sync {
    async fn submit(
        &self,
        session_id: Uuid,
        final_path: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> AsyncJobRef;
}

/// Default pipeline when no webhook is configured: logs and returns
/// immediately, no downstream dispatch.
pub struct NoopPipeline;

#[async_trait]
impl AiPipeline for NoopPipeline {
    async fn submit(
        &self,
        session_id: Uuid,
        final_path: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> AsyncJobRef {
        tracing::info!(session_id = %session_id, final_path, "no AI hook configured, skipping dispatch");
        AsyncJobRef {
            status: "skipped".to_string(),
            estimated_time: None,
            job_id: None,
        }
    }
}

/// Posts a job descriptor to a configured webhook. The dispatch itself
/// runs on a detached task so `submit` never blocks the completion
/// response on the downstream service's latency.
pub struct WebhookPipeline {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookPipeline {
    pub fn new(webhook_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, webhook_url }
    }

    fn purpose(metadata: &HashMap<String, serde_json::Value>) -> &'static str {
        match metadata.get("purpose").and_then(|v| v.as_str()) {
            Some("fine-tuning") => "fine-tuning",
            Some("embeddings") => "embeddings",
            Some("training") => "training",
            Some("indexing") => "indexing",
            _ => "default",
        }
    }
}

#[async_trait]
impl AiPipeline for WebhookPipeline {
    async fn submit(
        &self,
        session_id: Uuid,
        final_path: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> AsyncJobRef {
        let job_id = Uuid::new_v4().to_string();
        let purpose = Self::purpose(metadata);

        let payload = serde_json::json!({
            "sessionId": session_id,
            "jobId": job_id,
            "finalPath": final_path,
            "purpose": purpose,
            "metadata": metadata,
        });

        let client = self.client.clone();
        let url = self.webhook_url.clone();
        let job_id_for_task = job_id.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(job_id = %job_id_for_task, "AI hook dispatch accepted");
                }
                Ok(response) => {
                    tracing::warn!(
                        job_id = %job_id_for_task,
                        status = %response.status(),
                        "AI hook dispatch rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id_for_task, error = %e, "AI hook dispatch failed");
                }
            }
        });

        AsyncJobRef {
            status: "queued".to_string(),
            estimated_time: Some("unknown".to_string()),
            job_id: Some(job_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_pipeline_returns_skipped() {
        let pipeline = NoopPipeline;
        let job = pipeline
            .submit(Uuid::new_v4(), "final/s/f.json", &HashMap::new())
            .await;
        assert_eq!(job.status, "skipped");
        assert!(job.job_id.is_none());
    }

    #[test]
    fn purpose_defaults_when_unset() {
        assert_eq!(WebhookPipeline::purpose(&HashMap::new()), "default");
    }

    #[test]
    fn purpose_reads_metadata_field() {
        let mut metadata = HashMap::new();
        metadata.insert("purpose".to_string(), serde_json::json!("embeddings"));
        assert_eq!(WebhookPipeline::purpose(&metadata), "embeddings");
    }
}
