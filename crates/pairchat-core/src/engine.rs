//! Command facade over the pairing components.
//!
//! The transport turns updates into [`Inbound`] commands and renders the returned
//! [`Outbound`] events in order. Nothing in here knows about Telegram.

use std::sync::Arc;

use chrono::TimeDelta;

use crate::{
    disconnect::{DisconnectHandler, Disconnected},
    domain::UserId,
    events::{Inbound, Outbound},
    matchmaker::{CancelOutcome, Matchmaker, SearchOutcome},
    moderation::Moderator,
    premium::PremiumGate,
    relay::Relay,
    store::{SessionStore, StoreStats},
    Result,
};

#[derive(Clone)]
pub struct PairingEngine {
    store: Arc<SessionStore>,
    matchmaker: Matchmaker,
    relay: Relay,
    disconnect: DisconnectHandler,
    premium: PremiumGate,
    moderator: Moderator,
}

impl PairingEngine {
    pub fn new(store: Arc<SessionStore>, premium_duration: Option<TimeDelta>) -> Self {
        let matchmaker = Matchmaker::new(store.clone());
        Self {
            relay: Relay::new(store.clone()),
            disconnect: DisconnectHandler::new(store.clone(), matchmaker.clone()),
            premium: PremiumGate::new(store.clone(), premium_duration),
            moderator: Moderator::new(store.clone()),
            matchmaker,
            store,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }

    pub async fn handle(&self, cmd: Inbound) -> Result<Vec<Outbound>> {
        let mut out = Vec::new();
        match cmd {
            Inbound::Search(user) => {
                let outcome = self.matchmaker.request_search(user).await?;
                push_search(&mut out, user, outcome);
            }
            Inbound::Cancel(user) => {
                if self.matchmaker.cancel_search(user).await? == CancelOutcome::Cancelled {
                    out.push(Outbound::SearchCancelled { user });
                }
            }
            Inbound::Message { user, text } => {
                let relayed = self.relay.relay(user, &text).await?;
                out.push(Outbound::RelayMessage {
                    target: relayed.target,
                    text,
                });
            }
            Inbound::Disconnect { user, reason } => {
                if let Some(closed) = self.disconnect.disconnect(user, reason).await? {
                    push_closed(&mut out, user, closed);
                }
            }
            Inbound::Next(user) => {
                let next = self.disconnect.next(user).await?;
                let Some(closed) = next.closed else {
                    push_search(&mut out, user, next.search?);
                    return Ok(out);
                };
                push_closed(&mut out, user, closed);
                match next.search {
                    Ok(outcome) => push_search(&mut out, user, outcome),
                    // The chat is gone either way; its events must still go out.
                    Err(e) => out.push(Outbound::SearchFailed {
                        user,
                        error: e.to_string(),
                    }),
                }
            }
            Inbound::TogglePremium { user, expiry } => {
                let s = self.premium.toggle_premium(user, expiry).await?;
                out.push(Outbound::PremiumChanged {
                    user,
                    premium: s.is_premium(),
                    expiry: s.premium_expiry(),
                });
            }
            Inbound::SetBlocked { user, blocked } => {
                let outcome = self.moderator.set_blocked(user, blocked).await?;
                if let Some(closed) = outcome.closed {
                    let partner = closed.partner;
                    out.push(Outbound::ChatLogReady(closed.log));
                    out.push(Outbound::PartnerLeft { user: partner });
                }
                if outcome.changed {
                    out.push(Outbound::BlockChanged { user, blocked });
                }
            }
        }
        Ok(out)
    }
}

fn push_search(out: &mut Vec<Outbound>, user: UserId, outcome: SearchOutcome) {
    match outcome {
        SearchOutcome::Queued | SearchOutcome::AlreadySearching => {
            out.push(Outbound::Waiting { user })
        }
        SearchOutcome::Matched { partner } => {
            out.push(Outbound::Matched { user, partner });
            out.push(Outbound::Matched {
                user: partner,
                partner: user,
            });
        }
    }
}

fn push_closed(out: &mut Vec<Outbound>, user: UserId, closed: Disconnected) {
    let partner = closed.partner;
    out.push(Outbound::ChatLogReady(closed.log));
    out.push(Outbound::PartnerLeft { user: partner });
    out.push(Outbound::ChatEnded { user });
}
