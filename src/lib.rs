//! Sheet Courier: a chat bot that watches drive folders and delivers each
//! newly appearing spreadsheet to a mapped chat.
//!
//! The auto-fetch core in [`autofetch`] is transport-agnostic; it talks to
//! the outside world only through the [`services::StorageBackend`] and
//! [`services::ChatTransport`] traits.

pub mod autofetch;
pub mod commands;
pub mod config;
pub mod error;
pub mod owners;
pub mod services;
pub mod utils;
