//! # Cadence Sync
//!
//! The pull-clock half of the engine: a coarse-grained tick scans for
//! data-source registrations whose next run is due, executes each sync
//! under a bounded worker pool, and records delta / stage-transition
//! history for analytics.
//!
//! ```text
//! tick (every N minutes)
//!   → scan_due: active ∧ non-manual ∧ (next_run IS NULL ∨ ≤ now), capped
//!   → SyncExecutor.run_batch (Semaphore-bounded)
//!     → per source: SyncRun open → fetch → diff → upsert
//!       → stage transitions (close open interval, open next)
//!       → advance next_run on success; leave it on error (retry next tick)
//! ```

pub mod executor;
pub mod http;
pub mod provider;
pub mod registration;
pub mod scanner;
pub mod stages;
pub mod store;

pub use executor::{SyncCause, SyncExecutor, SyncReport, SyncRun, SyncRunStatus};
pub use http::{ConfigCredentialResolver, RestProviderAdapter};
pub use provider::{CredentialResolver, ExternalRecord, ProviderAdapter, ProviderCredentials};
pub use registration::{DataSourceRegistration, SyncFrequency};
pub use scanner::{scan_due, spawn_scheduler};
pub use stages::StageHistoryInterval;
pub use store::SyncStore;
