use crate::domain::UserId;

/// Callback data prefix of the moderation "toggle premium" buttons.
pub const PREMIUM_CALLBACK_PREFIX: &str = "premium:";
/// Callback data prefix of the moderation "block" buttons.
pub const BLOCK_CALLBACK_PREFIX: &str = "block:";

/// What a moderation button asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModerationAction {
    TogglePremium(UserId),
    Block(UserId),
}

/// Inline keyboard (buttons), one button per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    /// Chat-log footer buttons: premium toggle and block for each participant.
    pub fn moderation(users: &[UserId]) -> Self {
        let buttons = users
            .iter()
            .flat_map(|u| {
                [
                    InlineButton {
                        label: format!("⭐ Toggle premium: {u}"),
                        callback_data: format!("{PREMIUM_CALLBACK_PREFIX}{u}"),
                    },
                    InlineButton {
                        label: format!("🚫 Block: {u}"),
                        callback_data: format!("{BLOCK_CALLBACK_PREFIX}{u}"),
                    },
                ]
            })
            .collect();
        Self { buttons }
    }
}

/// Inverse of the callback data built by [`InlineKeyboard::moderation`].
pub fn parse_moderation_callback(data: &str) -> Option<ModerationAction> {
    let parse = |rest: &str| rest.trim().parse::<i64>().ok().map(UserId);
    if let Some(rest) = data.strip_prefix(PREMIUM_CALLBACK_PREFIX) {
        return parse(rest).map(ModerationAction::TogglePremium);
    }
    parse(data.strip_prefix(BLOCK_CALLBACK_PREFIX)?).map(ModerationAction::Block)
}

/// Limits of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub max_message_len: usize,
}
