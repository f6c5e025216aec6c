//! Presence rewriting and fake-contact support for the Chat Interceptor.
//!
//! This crate owns everything that touches XMPP stanza bytes: the
//! regex-based `RewritePresence` transform, the synthetic fake-contact
//! stanza builders, and `ProxiedConnection`, the per-connection state
//! machine that ties them together.

pub mod connection;
pub mod error;
pub mod fake_contact;
pub mod rewrite;

pub use connection::{ManagedConnection, ProxiedConnection, SupervisorHandle};
pub use error::{Error, Result};
pub use rewrite::rewrite_presence;
