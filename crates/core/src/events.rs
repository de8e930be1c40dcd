//! Gateway event vocabulary.
//!
//! The four event kinds an instance can emit towards a configured webhook.
//! Wire names are stable; `webhook_events` subscriptions and delivery rows
//! store them as strings.

use serde::{Deserialize, Serialize};

/// A typed occurrence originating from an instance's connection to the
/// external chat network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An inbound message arrived.
    Message,
    /// A previously sent message changed delivery status.
    MessageStatus,
    /// The instance's connection state changed.
    Connection,
    /// A fresh pairing QR code is available.
    QrUpdated,
}

impl EventKind {
    /// Stable wire / database name.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::MessageStatus => "message_status",
            EventKind::Connection => "connection",
            EventKind::QrUpdated => "qr_updated",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(EventKind::Message),
            "message_status" => Ok(EventKind::MessageStatus),
            "connection" => Ok(EventKind::Connection),
            "qr_updated" => Ok(EventKind::QrUpdated),
            other => Err(format!("Unknown event kind: {other}")),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
