//! Document producer adapter — renders documents through the external
//! producer service and pushes them to destination devices. The engine
//! treats the producer as opaque; an unreachable producer or device is
//! a retryable provider failure.

use std::time::Duration;

use async_trait::async_trait;

use cadence_core::config::DocumentProducerConfig;
use cadence_core::{CadenceError, DocumentHandle, DocumentProducer, Result};

pub struct HttpDocumentProducer {
    config: DocumentProducerConfig,
    client: reqwest::Client,
}

impl HttpDocumentProducer {
    pub fn new(config: DocumentProducerConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DocumentProducer for HttpDocumentProducer {
    async fn generate(
        &self,
        tenant_id: &str,
        kind: &str,
        payload: &serde_json::Value,
    ) -> Result<DocumentHandle> {
        let resp = self
            .client
            .post(&self.config.render_url)
            .json(&serde_json::json!({
                "tenant_id": tenant_id,
                "kind": kind,
                "data": payload,
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| CadenceError::provider(format!("document producer unreachable: {e}")))?;

        if !resp.status().is_success() {
            return Err(CadenceError::provider(format!(
                "document producer error {}",
                resp.status()
            )));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CadenceError::provider(format!("document producer response: {e}")))?;
        let document_id = body["document_id"]
            .as_str()
            .ok_or_else(|| CadenceError::provider("document producer returned no document_id"))?
            .to_string();

        tracing::info!("📄 Document generated: {document_id} (kind={kind})");
        Ok(DocumentHandle {
            document_id,
            url: body["url"].as_str().map(String::from),
        })
    }

    async fn push(
        &self,
        tenant_id: &str,
        destination: &str,
        document: &DocumentHandle,
    ) -> Result<()> {
        let resp = self
            .client
            .post(&self.config.upload_url)
            .json(&serde_json::json!({
                "tenant_id": tenant_id,
                "destination": destination,
                "document_id": document.document_id,
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| CadenceError::provider(format!("document destination unreachable: {e}")))?;

        if !resp.status().is_success() {
            return Err(CadenceError::provider(format!(
                "document upload error {}",
                resp.status()
            )));
        }
        tracing::info!(
            "📤 Document {} delivered to {destination}",
            document.document_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_producer_is_retryable() {
        // Port 1 on loopback refuses immediately.
        let producer = HttpDocumentProducer::new(DocumentProducerConfig {
            render_url: "http://127.0.0.1:1/render".into(),
            upload_url: "http://127.0.0.1:1/upload".into(),
            enabled: true,
        });
        let err = producer
            .generate("t1", "meeting_summary", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Provider(_)));
        assert!(err.is_retryable());
    }
}
