use anyhow::Result;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing::warn;

use room_session::{
    ChatMessage, ConnectionState, RestHistoryLoader, SessionContext, SessionController,
    SessionUpdate, WsConnector,
};

use crate::config::FileConfig;

/// Open a room and stream its conversation: history first, then live
/// messages; stdin lines are sent to the room, `/quit` leaves.
pub async fn open(config: &FileConfig, room_id: &str) -> Result<()> {
    let ctx = SessionContext {
        user_id: config.user.id.clone(),
        display_name: config.user.display_name.clone(),
    };
    let history = Arc::new(RestHistoryLoader::new(
        &config.backend.base_url,
        &config.backend.token,
        config.chat.history_limit,
    ));
    let connector = Arc::new(WsConnector::new(
        config.backend.ws_url(),
        &config.backend.token,
    ));

    let handle = SessionController::spawn(
        ctx.clone(),
        history,
        connector,
        config.chat.reconnect_policy(),
    );
    let mut updates = handle.subscribe();
    handle.open_room(room_id).await?;
    eprintln!("[opening {} -- type to send, /quit to leave]", room_id);

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(update) => render_update(&update, &ctx),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Fell behind the feed; re-render from a snapshot.
                    warn!(skipped, "update feed lagged; re-rendering");
                    let snapshot = handle.snapshot().await?;
                    render_timeline(&snapshot.messages, &ctx);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            line = lines.next_line() => match line? {
                Some(line) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if line == "/quit" {
                        break;
                    }
                    if let Err(e) = handle.send(line).await {
                        eprintln!("[not sent: {}]", e);
                    }
                }
                // stdin closed
                None => break,
            },
        }
    }

    handle.close_room().await?;
    eprintln!("[left {}]", room_id);
    Ok(())
}

fn render_update(update: &SessionUpdate, ctx: &SessionContext) {
    match update {
        SessionUpdate::StateChanged(state) => match state {
            ConnectionState::Live => eprintln!("[connected]"),
            ConnectionState::Disconnected => eprintln!("[disconnected -- reconnecting]"),
            _ => {}
        },
        SessionUpdate::HistoryMerged { messages } => render_timeline(messages, ctx),
        SessionUpdate::MessageMerged(msg) => println!("{}", format_line(msg, ctx)),
        SessionUpdate::HistoryFailed { reason } => {
            eprintln!("[history unavailable: {}]", reason)
        }
    }
}

fn render_timeline(messages: &[ChatMessage], ctx: &SessionContext) {
    for msg in messages {
        println!("{}", format_line(msg, ctx));
    }
}

fn format_line(msg: &ChatMessage, ctx: &SessionContext) -> String {
    let who = if !ctx.user_id.is_empty() && msg.sender_id == ctx.user_id {
        format!("{} (you)", msg.sender_name)
    } else {
        msg.sender_name.clone()
    };
    let edited = if msg.edited { " (edited)" } else { "" };
    format!("[{}] {}: {}{}", format_time(msg.sent_at), who, msg.text, edited)
}

fn format_time(millis: i64) -> String {
    match chrono::DateTime::from_timestamp_millis(millis) {
        Some(dt) => dt.with_timezone(&chrono::Local).format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> SessionContext {
        SessionContext {
            user_id: "u-1".to_string(),
            display_name: "Alice".to_string(),
        }
    }

    fn msg(sender_id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: 1,
            room_id: "room-7".to_string(),
            sender_id: sender_id.to_string(),
            sender_name: "Bob".to_string(),
            sender_avatar: None,
            text: text.to_string(),
            sent_at: 1700000000000,
            edited: false,
            edited_at: None,
        }
    }

    #[test]
    fn format_line_marks_own_messages() {
        let line = format_line(&msg("u-1", "hi"), &ctx());
        assert!(line.contains("Bob (you): hi"));
    }

    #[test]
    fn format_line_plain_for_others() {
        let line = format_line(&msg("u-2", "hello"), &ctx());
        assert!(line.contains("Bob: hello"));
        assert!(!line.contains("(you)"));
    }

    #[test]
    fn format_line_flags_edited_messages() {
        let mut m = msg("u-2", "fixed");
        m.edited = true;
        let line = format_line(&m, &ctx());
        assert!(line.ends_with("(edited)"));
    }

    #[test]
    fn format_line_without_user_id_never_marks_own() {
        let anon = SessionContext {
            user_id: String::new(),
            display_name: String::new(),
        };
        let line = format_line(&msg("", "hi"), &anon);
        assert!(!line.contains("(you)"));
    }

    #[test]
    fn format_time_renders_clock() {
        let time = format_time(1700000000000);
        assert_eq!(time.len(), 5);
        assert!(time.contains(':'));
    }

    #[test]
    fn format_time_out_of_range_is_placeholder() {
        assert_eq!(format_time(i64::MAX), "--:--");
    }
}
