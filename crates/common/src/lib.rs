//! Shared types and error plumbing used across all `deceive` crates.

pub mod chat_target;
pub mod error;
pub mod presence_mode;

pub use {
    chat_target::{ChatTarget, ChatTargetCell},
    error::{DeceiveError, Error, FromMessage, Result},
    presence_mode::PresenceMode,
};
