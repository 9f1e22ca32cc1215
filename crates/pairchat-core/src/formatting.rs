//! Telegram HTML rendering for moderation output.

use crate::{
    events::{ChatLog, DisconnectReason},
    session::TranscriptEntry,
};

/// Smallest chunk we will render into; below this the entry prefix alone won't fit.
const MIN_CHUNK: usize = 64;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn escape_char(ch: char) -> Option<&'static str> {
    match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '"' => Some("&quot;"),
        _ => None,
    }
}

/// Render a finished chat as moderation messages: header, transcript chunks, footer.
///
/// Every returned message is at most `limit` bytes. Entries are kept in order and
/// an entry longer than a chunk is split on character boundaries, never inside an
/// HTML escape.
pub fn format_chat_log(log: &ChatLog, limit: usize) -> Vec<String> {
    let limit = limit.max(MIN_CHUNK);
    let closer = match log.reason {
        DisconnectReason::Blocked => "blocked",
        _ => "ended the chat",
    };

    let mut out = vec![format!(
        "<b>📋 Chat Log</b>\n\n\
         <b>Between:</b>\n\
         👤 <code>{}</code> ({})\n\
         👤 <code>{}</code>\n\
         <b>Reason:</b> {}\n\
         <b>Time:</b> {}\n\
         <b>Message Count:</b> {}\n\n\
         <b>--- Begin Chat Log ---</b>",
        log.from,
        closer,
        log.to,
        escape_html(&log.reason.to_string()),
        log.closed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        log.transcript.len(),
    )];

    let mut chunk = String::new();
    for piece in log.transcript.iter().flat_map(|e| render_entry(e, limit)) {
        if !chunk.is_empty() && chunk.len() + 1 + piece.len() > limit {
            out.push(std::mem::take(&mut chunk));
        }
        if !chunk.is_empty() {
            chunk.push('\n');
        }
        chunk.push_str(&piece);
    }
    if !chunk.is_empty() {
        out.push(chunk);
    }

    out.push("<b>--- End Chat Log ---</b>".to_string());
    out
}

fn render_entry(entry: &TranscriptEntry, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut cur = format!(
        "[{}] <code>{}</code>: ",
        entry.at.format("%H:%M:%S"),
        entry.sender
    );

    let mut buf = [0u8; 4];
    for ch in entry.text.chars() {
        let s = match escape_char(ch) {
            Some(esc) => esc,
            None => ch.encode_utf8(&mut buf),
        };
        if cur.len() + s.len() > limit {
            pieces.push(std::mem::take(&mut cur));
        }
        cur.push_str(s);
    }
    pieces.push(cur);
    pieces
}
