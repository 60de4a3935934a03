//! Whether to speak, evaluated once per chat per tick.
//!
//! [`decide`] is a pure function of the newest message, the recent history
//! and the current local time. Rules are checked top to bottom and the
//! first one that returns a verdict wins:
//!
//! 1. fresh human message (under 5 minutes, not suppressed): reply.
//! 2. bot spoke last (not suppressed):
//!    - silent for over 24h inside active hours: reply with a new story;
//!    - otherwise look at the four messages before it for the nearest human
//!      one. More than 30s apart means the human already saw the bot's
//!      answer, within 30s means they wrote while the bot was typing.
//! 3. quiet hours (outside 10:00 to 22:00): silent.
//! 4. human silent for over 24h: reply with a new story.
//! 5. suppressed: silent.
//! 6. otherwise: reply.

use chrono::{DateTime, Local, Timelike};

use crate::sessions::Message;

pub const FRESH_WINDOW_SECS: i64 = 5 * 60;
pub const REENGAGE_AFTER_SECS: i64 = 24 * 60 * 60;
/// Maximum gap between a human message and the bot's reply for the human
/// message to count as unread.
pub const UNREAD_GAP_SECS: i64 = 30;
/// Active hours, `[start, end)` in local time.
pub const ACTIVE_HOURS: std::ops::Range<u32> = 10..22;
/// How many messages before the bot's last one are checked for an unread
/// human message.
const UNREAD_SCAN_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    pub respond: bool,
    /// Open with something new instead of answering the last message.
    pub story: bool,
}

impl Decision {
    pub const SILENT: Decision = Decision {
        respond: false,
        story: false,
    };
    pub const REPLY: Decision = Decision {
        respond: true,
        story: false,
    };
    pub const STORY: Decision = Decision {
        respond: true,
        story: true,
    };
}

/// `history` is ascending and ends with `last`.
pub fn decide(last: &Message, history: &[Message], now: DateTime<Local>) -> Decision {
    let Some(sent_at) = last.sent_at() else {
        tracing::debug!(
            chat_id = last.chat_id,
            date = %last.date,
            "unparseable message date, replying"
        );
        return Decision::REPLY;
    };
    let elapsed = now.signed_duration_since(sent_at).num_seconds();
    let active = ACTIVE_HOURS.contains(&now.hour());

    if !last.is_bot && !last.suppressed && elapsed < FRESH_WINDOW_SECS {
        return Decision::REPLY;
    }

    if last.is_bot && !last.suppressed {
        if elapsed > REENGAGE_AFTER_SECS && active {
            return Decision::STORY;
        }
        return match nearest_human_before_last(history) {
            Some(human) if (last.timestamp - human.timestamp).abs() <= UNREAD_GAP_SECS => {
                Decision::REPLY
            }
            _ => Decision::SILENT,
        };
    }

    if !active {
        return Decision::SILENT;
    }
    if elapsed > REENGAGE_AFTER_SECS {
        return Decision::STORY;
    }
    if last.suppressed {
        return Decision::SILENT;
    }
    Decision::REPLY
}

fn nearest_human_before_last(history: &[Message]) -> Option<&Message> {
    history
        .iter()
        .rev()
        .skip(1)
        .take(UNREAD_SCAN_DEPTH)
        .find(|m| !m.is_bot)
}
