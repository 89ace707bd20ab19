//! Provider seams — the external systems a data source syncs from.
//!
//! Credentials are re-resolved on every sync rather than cached: tokens
//! can expire between ticks, and refresh is the resolver's concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use cadence_core::Result;

use crate::registration::DataSourceRegistration;

/// One record fetched from a provider, keyed by its external id.
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalRecord {
    pub external_id: String,
    pub data: serde_json::Value,
}

/// Per-sync credentials, freshly resolved.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Resolves (and refreshes as needed) a tenant's provider credentials.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, tenant_id: &str, provider: &str) -> Result<ProviderCredentials>;
}

/// Fetches the current upstream state for a registration.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(
        &self,
        registration: &DataSourceRegistration,
        credentials: &ProviderCredentials,
    ) -> Result<Vec<ExternalRecord>>;
}
