//! # Cadence Automation
//!
//! The event-driven half of the engine: domain events are matched
//! against tenant automation rules and dispatched to channel adapters.
//!
//! ## Architecture
//! ```text
//! DomainEvent (bus)
//!   → Orchestrator.handle_event
//!     → RuleMatcher: active rules for (tenant, event type)
//!     → per rule, independently:
//!       → ExecutionLog.begin — dedup on (rule id, event id)
//!       → ConditionEvaluator — skipped when conditions not met
//!       → ActionDispatcher — channel message / direct message /
//!         document push / outbound webhook
//!       → ExecutionLog.complete — success | skipped | error
//! ```
//!
//! One rule's failure never blocks the others; redelivery of the whole
//! event is safe because `begin` refuses to re-open a terminal record.

pub mod bus;
pub mod conditions;
pub mod dispatch;
pub mod log;
pub mod matcher;
pub mod orchestrator;

pub use bus::EventBus;
pub use dispatch::{ActionDispatcher, ActionOutcome};
pub use log::{ActionExecutionRecord, BeginOutcome, ExecutionLog, ExecutionStatus};
pub use matcher::{RuleStore, find_candidates};
pub use orchestrator::Orchestrator;
