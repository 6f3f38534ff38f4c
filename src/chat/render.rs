//! Plain-text rendering of the join form and the chat screen.

use chrono::{DateTime, Local, TimeZone, Utc};

use super::view::ChatView;
use crate::models::message::ChatMessage;

const DEFAULT_WIDTH: usize = 72;

/// Screen shown while Unjoined or Connecting.
pub fn render_join_form(connecting: bool) -> String {
    let button = if connecting { "Connecting..." } else { "Join Chat" };
    let mut out = String::new();
    out.push_str("Chat\n");
    out.push_str("Join the real-time conversation\n\n");
    out.push_str(&format!("[ {} ]\n\n", button));
    out.push_str("Note: Multiple users can join and chat simultaneously.\n");
    if !connecting {
        out.push_str("Enter your name: ");
    }
    out
}

pub fn users_online_label(count: usize) -> String {
    format!("{} {} online", count, if count == 1 { "user" } else { "users" })
}

/// `hh:mm AM` in the given time zone.
pub fn format_time_in<Tz: TimeZone>(timestamp: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    timestamp.with_timezone(tz).format("%I:%M %p").to_string()
}

pub fn format_time(timestamp: &DateTime<Utc>) -> String {
    format_time_in(timestamp, &Local)
}

/// Full chat screen: header, message log and online-user sidebar.
pub fn render_chat(view: &ChatView, me: &str, connected: bool) -> String {
    render_chat_with(view, me, connected, DEFAULT_WIDTH, format_time)
}

pub fn render_chat_with(
    view: &ChatView,
    me: &str,
    connected: bool,
    width: usize,
    time: impl Fn(&DateTime<Utc>) -> String,
) -> String {
    let rule = "-".repeat(width);
    let mut out = String::new();

    let status = if connected { "* Connected" } else { "x Disconnected" };
    let title = format!("Chat Room | {}", users_online_label(view.online_users().len()));
    out.push_str(&spread(&title, status, width));
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');

    if view.messages().is_empty() {
        out.push_str(&center("No messages yet", width));
        out.push('\n');
        out.push_str(&center("Be the first to send a message!", width));
        out.push('\n');
    }
    for message in view.messages() {
        render_message(&mut out, message, me, width, &time);
    }

    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!("Online Users ({})\n", view.online_users().len()));
    if view.online_users().is_empty() {
        out.push_str("  No users online\n");
    }
    for user in view.online_users() {
        if user == me {
            out.push_str(&format!("  * {} (You)\n", user));
        } else {
            out.push_str(&format!("  * {}\n", user));
        }
    }
    out.push_str(&rule);
    out.push('\n');
    out.push_str("Type a message... ");
    out
}

fn render_message(
    out: &mut String,
    message: &ChatMessage,
    me: &str,
    width: usize,
    time: &impl Fn(&DateTime<Utc>) -> String,
) {
    if message.is_system {
        out.push_str(&center(&format!("-- {} --", message.text), width));
        out.push('\n');
        return;
    }

    let meta = format!("{}  {}", message.username, time(&message.timestamp));
    if message.username == me {
        out.push_str(&right(&meta, width));
        out.push('\n');
        for line in message.text.lines() {
            out.push_str(&right(&format!("{} <", line), width));
            out.push('\n');
        }
    } else {
        out.push_str(&meta);
        out.push('\n');
        for line in message.text.lines() {
            out.push_str(&format!("> {}\n", line));
        }
    }
}

fn center(text: &str, width: usize) -> String {
    let len = text.chars().count();
    let pad = width.saturating_sub(len) / 2;
    format!("{}{}", " ".repeat(pad), text)
}

fn right(text: &str, width: usize) -> String {
    let len = text.chars().count();
    format!("{}{}", " ".repeat(width.saturating_sub(len)), text)
}

fn spread(left: &str, right_text: &str, width: usize) -> String {
    let used = left.chars().count() + right_text.chars().count();
    format!("{}{}{}", left, " ".repeat(width.saturating_sub(used).max(1)), right_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(_: &DateTime<Utc>) -> String {
        "10:30 AM".to_string()
    }

    fn message(username: &str, text: &str) -> ChatMessage {
        ChatMessage {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap(),
            ..ChatMessage::user(username, text)
        }
    }

    #[test]
    fn online_label_pluralizes() {
        assert_eq!(users_online_label(0), "0 users online");
        assert_eq!(users_online_label(1), "1 user online");
        assert_eq!(users_online_label(2), "2 users online");
    }

    #[test]
    fn formats_time_as_hours_and_minutes() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 14, 5, 0).unwrap();
        assert_eq!(format_time_in(&ts, &Utc), "02:05 PM");
    }

    #[test]
    fn join_form_shows_connecting_state() {
        assert!(render_join_form(false).contains("Join Chat"));
        let connecting = render_join_form(true);
        assert!(connecting.contains("Connecting..."));
        assert!(!connecting.contains("Enter your name"));
    }

    #[test]
    fn empty_room_placeholders() {
        let screen = render_chat_with(&ChatView::new(), "Alice", true, 40, fixed_time);
        assert!(screen.contains("No messages yet"));
        assert!(screen.contains("Be the first to send a message!"));
        assert!(screen.contains("No users online"));
        assert!(screen.contains("0 users online"));
    }

    #[test]
    fn distinguishes_own_other_and_system_messages() {
        let mut view = ChatView::new();
        view.seed_online(["Alice", "Bob"]);
        view.push_message(ChatMessage::joined("Bob"));
        view.push_message(message("Bob", "hi"));
        view.push_message(message("Alice", "hello"));

        let screen = render_chat_with(&view, "Alice", true, 40, fixed_time);
        let lines: Vec<&str> = screen.lines().collect();

        assert!(lines.iter().any(|l| l.trim() == "-- Bob joined the chat --" && l.starts_with(' ')));
        assert!(lines.contains(&"Bob  10:30 AM"));
        assert!(lines.contains(&"> hi"));
        assert!(lines.iter().any(|l| l.ends_with("hello <") && l.len() == 40));
        assert!(screen.contains("* Alice (You)"));
        assert!(screen.contains("  * Bob\n"));
        assert!(screen.contains("2 users online"));
    }

    #[test]
    fn message_order_is_preserved() {
        let mut view = ChatView::new();
        view.push_message(message("Bob", "first"));
        view.push_message(message("Bob", "second"));
        let screen = render_chat_with(&view, "Alice", false, 40, fixed_time);
        assert!(screen.find("first").unwrap() < screen.find("second").unwrap());
        assert!(screen.contains("Disconnected"));
    }
}
