//! # Cadence Channels
//! Concrete channel adapters behind the core collaborator traits.
//!
//! The engine only ever sees `ChannelClient`, `UserDirectory`, and
//! `DocumentProducer`; credential storage and transport retries are the
//! adapters' business.

pub mod chat;
pub mod directory;
pub mod docs;

pub use chat::ChatClient;
pub use directory::FileUserDirectory;
pub use docs::HttpDocumentProducer;
