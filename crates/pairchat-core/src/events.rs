use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{domain::UserId, session::TranscriptEntry};

/// Why a chat was closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// User sent `/stop`.
    Stop,
    /// User sent `/next` and is searching again.
    Next,
    /// A relayed message could not be delivered to the partner.
    DeliveryFailed,
    /// A moderator blocked [`ChatLog::from`].
    Blocked,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisconnectReason::Stop => "stopped by user",
            DisconnectReason::Next => "user moved to next partner",
            DisconnectReason::DeliveryFailed => "partner unreachable",
            DisconnectReason::Blocked => "blocked by a moderator",
        };
        f.write_str(s)
    }
}

/// Transcript of a finished chat, handed to moderation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatLog {
    /// The user whose action closed the chat.
    pub from: UserId,
    pub to: UserId,
    pub reason: DisconnectReason,
    pub closed_at: DateTime<Utc>,
    pub transcript: Vec<TranscriptEntry>,
}

/// Commands from the transport / admin layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Search(UserId),
    Cancel(UserId),
    Message { user: UserId, text: String },
    Disconnect { user: UserId, reason: DisconnectReason },
    /// Leave the current chat (if any) and search again.
    Next(UserId),
    TogglePremium {
        user: UserId,
        expiry: Option<DateTime<Utc>>,
    },
    SetBlocked { user: UserId, blocked: bool },
}

/// Events for the transport / moderation layer, in the order they should be delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// User is queued (or was already queued).
    Waiting { user: UserId },
    SearchCancelled { user: UserId },
    /// Sent once per side of a new pair.
    Matched { user: UserId, partner: UserId },
    RelayMessage { target: UserId, text: String },
    ChatLogReady(ChatLog),
    PartnerLeft { user: UserId },
    /// Confirmation for the user who closed the chat.
    ChatEnded { user: UserId },
    PremiumChanged {
        user: UserId,
        premium: bool,
        expiry: Option<DateTime<Utc>>,
    },
    /// `/next` closed the chat but could not queue the user again.
    SearchFailed { user: UserId, error: String },
    BlockChanged { user: UserId, blocked: bool },
}
