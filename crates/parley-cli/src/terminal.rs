//! Line-oriented presenter writing to stdout.

use std::io::{self, Write};

use parley_client::{MessageSummary, Presenter};
use parley_core::{ConnectionStatus, RoomEvent};

/// Prints every presentation callback as one line.
#[derive(Debug, Default)]
pub struct TerminalPresenter;

impl TerminalPresenter {
    fn line(&self, text: &str) {
        // A closed stdout only loses output
        let _ = writeln!(io::stdout().lock(), "{text}");
    }
}

impl Presenter for TerminalPresenter {
    fn on_connection_status_change(&mut self, status: ConnectionStatus) {
        let badge = match status {
            ConnectionStatus::Idle => return,
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting...",
            ConnectionStatus::Error => "disconnected",
        };
        self.line(&format!("-- {badge}"));
    }

    fn on_message_ready(&mut self, message: MessageSummary) {
        self.line(&format_message(&message));
    }

    fn on_ready_barrier_crossed(&mut self) {
        self.line("-- up to date");
    }

    fn on_notice(&mut self, notice: &str) {
        self.line(&format!("-- {notice}"));
    }

    fn on_room_event(&mut self, event: &RoomEvent) {
        self.line(&format_room_event(event));
    }
}

fn format_message(message: &MessageSummary) -> String {
    let mut line = String::new();
    if !message.inline {
        line.push_str(&format!("[#{}] ", message.channel));
    }
    line.push_str(&format!("<{}> {}", message.sender, message.text));
    if let Some(reply_to) = &message.reply_to {
        line.push_str(&format!("  (re {reply_to})"));
    }
    if let Some(thread) = &message.thread {
        line.push_str(&format!("  [{} replies]", thread.reply_count));
    }
    line.push_str(&format!("  ({})", message.id));
    line
}

fn format_room_event(event: &RoomEvent) -> String {
    match event {
        RoomEvent::Joined { name } => format!("-- {name} joined"),
        RoomEvent::Quit { name } => format!("-- {name} left"),
        RoomEvent::RoomInfo { channels, members, topic } => {
            let mut line = format!("-- channels: {} | members: {}", channels.join(", "), members.join(", "));
            if let Some(topic) = topic {
                line.push_str(&format!(" | topic: {topic}"));
            }
            line
        },
        RoomEvent::DestructionScheduled { at } => format!("-- room scheduled for destruction at {at}"),
        RoomEvent::DestructionCancelled => "-- room destruction cancelled".to_string(),
        RoomEvent::Destroyed => "-- room destroyed".to_string(),
        RoomEvent::PinUpdate { channel, message_id, pinned } => {
            let verb = if *pinned { "pinned" } else { "unpinned" };
            format!("-- {message_id} {verb} in #{channel}")
        },
    }
}
