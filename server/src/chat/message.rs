//! JSON wire forms for chat traffic.

use serde::{Deserialize, Serialize, Serializer};

/// A message as sent by a client.
///
/// No sender field is declared: whatever the client puts in `sender_user_id`
/// or `user_id` is ignored and replaced with the connection identity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "applicationId")]
    pub application_id: String,
    #[serde(default)]
    pub subscribers: Option<Vec<String>>,
}

/// A message as relayed to recipients and the broker.
///
/// Serialized with the sender under both `sender_user_id` and `user_id`, and
/// the application under both `application_id` and `applicationId`, so
/// consumers reading either spelling find them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: String,
    pub content: String,
    pub sender_user_id: String,
    pub application_id: String,
    #[serde(default)]
    pub subscribers: Vec<String>,
}

#[derive(Serialize)]
struct OutboundWire<'a> {
    chat_id: &'a str,
    content: &'a str,
    sender_user_id: &'a str,
    user_id: &'a str,
    application_id: &'a str,
    #[serde(rename = "applicationId")]
    application_id_camel: &'a str,
    #[serde(skip_serializing_if = "no_hints")]
    subscribers: &'a [String],
}

fn no_hints(subscribers: &&[String]) -> bool {
    subscribers.is_empty()
}

impl Serialize for OutboundMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        OutboundWire {
            chat_id: &self.chat_id,
            content: &self.content,
            sender_user_id: &self.sender_user_id,
            user_id: &self.sender_user_id,
            application_id: &self.application_id,
            application_id_camel: &self.application_id,
            subscribers: &self.subscribers,
        }
        .serialize(serializer)
    }
}

impl InboundMessage {
    /// The client-supplied chat id, if it is non-empty.
    pub fn requested_chat_id(&self) -> Option<&str> {
        self.chat_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn subscriber_hints(&self) -> &[String] {
        self.subscribers.as_deref().unwrap_or_default()
    }

    pub fn into_outbound(self, chat_id: String, sender_user_id: &str) -> OutboundMessage {
        OutboundMessage {
            chat_id,
            content: self.content,
            sender_user_id: sender_user_id.to_string(),
            application_id: self.application_id,
            subscribers: self.subscribers.unwrap_or_default(),
        }
    }
}

/// Error frame sent back to the originating connection only.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
}

impl ErrorFrame {
    pub fn encode(message: impl Into<String>) -> String {
        let frame = ErrorFrame {
            error: message.into(),
        };
        serde_json::to_string(&frame).unwrap_or_else(|_| r#"{"error":"internal error"}"#.to_string())
    }
}
