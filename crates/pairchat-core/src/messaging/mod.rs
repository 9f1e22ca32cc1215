//! Outbound messenger abstraction (Telegram is the only adapter).

pub mod port;
pub mod throttled;
pub mod types;
