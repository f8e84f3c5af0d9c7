//! Уведомления для UI: тосты о статусе и сообщения чата

use crate::logger::log;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StatusKind {
    Searching,
    Connected,
    ChatEnded,
    Skipping,
    ConnectionLost,
    ConnectionFailed,
    MediaBlocked,
    MicrophoneOn,
    MicrophoneOff,
    CameraOn,
    CameraOff,
    SpeakerOn,
    SpeakerOff,
}

impl StatusKind {
    pub fn title(self) -> &'static str {
        match self {
            StatusKind::Searching => "Looking for a chat partner",
            StatusKind::Connected => "Connected!",
            StatusKind::ChatEnded => "Chat ended",
            StatusKind::Skipping => "Skipping to next person",
            StatusKind::ConnectionLost => "Connection lost",
            StatusKind::ConnectionFailed => "Could not connect",
            StatusKind::MediaBlocked => "Camera or microphone unavailable",
            StatusKind::MicrophoneOn => "Microphone turned on",
            StatusKind::MicrophoneOff => "Microphone turned off",
            StatusKind::CameraOn => "Camera turned on",
            StatusKind::CameraOff => "Camera turned off",
            StatusKind::SpeakerOn => "Speaker turned on",
            StatusKind::SpeakerOff => "Speaker turned off",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            StatusKind::Searching => {
                "Please wait while we connect you with someone nice to talk to."
            }
            StatusKind::Connected => "You're now chatting with a new friend. Say hello!",
            StatusKind::ChatEnded => {
                "Your chat has ended. We hope you had a nice conversation!"
            }
            StatusKind::Skipping => "Looking for someone new to talk with...",
            StatusKind::ConnectionLost => {
                "The call was interrupted. Press the yellow button to find someone new."
            }
            StatusKind::ConnectionFailed => {
                "We could not reach your chat partner. Press the yellow button to try again."
            }
            StatusKind::MediaBlocked => {
                "Please allow access to your camera and microphone, then start the chat again."
            }
            StatusKind::MicrophoneOn => "Others can now hear you",
            StatusKind::MicrophoneOff => "Others cannot hear you now",
            StatusKind::CameraOn => "Others can now see you",
            StatusKind::CameraOff => "Others cannot see you now",
            StatusKind::SpeakerOn => "You can now hear others",
            StatusKind::SpeakerOff => "You cannot hear others now",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusNotice {
    pub kind: StatusKind,
    pub title: &'static str,
    pub description: &'static str,
}

impl From<StatusKind> for StatusNotice {
    fn from(kind: StatusKind) -> Self {
        Self {
            kind,
            title: kind.title(),
            description: kind.description(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_sent_by_me: bool,
}

impl ChatMessage {
    pub fn new(content: impl Into<String>, is_sent_by_me: bool) -> Self {
        Self {
            content: content.into(),
            timestamp: Utc::now(),
            is_sent_by_me,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Notice {
    Status(StatusNotice),
    Chat(ChatMessage),
}

/// Отправитель уведомлений в UI
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notice>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Уведомления никуда не уходят
    pub fn silent() -> Self {
        Self { tx: None }
    }

    pub fn emit_state(&self, kind: StatusKind) {
        log(&format!("emit_state called with event: {:?}", kind));
        self.emit(Notice::Status(kind.into()));
    }

    pub fn emit_chat(&self, msg: ChatMessage) {
        self.emit(Notice::Chat(msg));
    }

    fn emit(&self, notice: Notice) {
        if let Some(tx) = &self.tx {
            if tx.send(notice).is_err() {
                log("Notice receiver dropped, notice discarded");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_notice_serializes_for_ui() {
        let value = serde_json::to_value(Notice::Status(StatusKind::Connected.into())).unwrap();
        assert_eq!(value["event"], "status");
        assert_eq!(value["kind"], "connected");
        assert_eq!(value["title"], "Connected!");
    }

    #[test]
    fn chat_message_uses_ui_field_names() {
        let value = serde_json::to_value(ChatMessage::new("hello", true)).unwrap();
        assert_eq!(value["content"], "hello");
        assert_eq!(value["isSentByMe"], true);
        assert!(value["timestamp"].is_string());
    }

    #[tokio::test]
    async fn channel_notifier_delivers() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.emit_state(StatusKind::Searching);
        match rx.recv().await {
            Some(Notice::Status(n)) => assert_eq!(n.kind, StatusKind::Searching),
            other => panic!("unexpected {other:?}"),
        }
    }
}
