//! Core of the anonymous pairing relay: session store, matchmaking, relay and
//! disconnect handling, premium flags and moderator blocks.
//!
//! This crate is framework-agnostic. Telegram lives behind the
//! [`messaging::port::MessagingPort`] trait, implemented in the adapter crate.

pub mod audit;
pub mod config;
pub mod disconnect;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod events;
pub mod formatting;
pub mod logging;
pub mod matchmaker;
pub mod messaging;
pub mod moderation;
pub mod notify;
pub mod premium;
pub mod relay;
pub mod security;
pub mod session;
pub mod store;

pub use errors::{Error, Result};
