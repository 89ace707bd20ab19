//! # Cadence Core
//!
//! Shared foundation for the Cadence engine: the error taxonomy, TOML
//! configuration, the domain event catalog, the automation rule model,
//! and the traits that seam the engine off from its external
//! collaborators (chat channels, user directory, document producer,
//! event redelivery).

pub mod config;
pub mod error;
pub mod events;
pub mod rules;
pub mod traits;

pub use config::CadenceConfig;
pub use error::{CadenceError, Result};
pub use events::{DomainEvent, TriggerEvent};
pub use rules::{ActionSpec, AutomationRule};
pub use traits::{
    ChannelClient, DirectoryUser, DocumentHandle, DocumentProducer, Redelivery, SendReceipt,
    UserDirectory,
};
