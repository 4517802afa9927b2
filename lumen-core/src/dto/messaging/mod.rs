//! Messaging DTOs for the emulated push channel

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::message::Message;

/// Body of `POST /ws/handshake`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub client_type: String,
    pub protocol_version: String,
}

/// Response of `POST /ws/handshake`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub client_id: Option<String>,
}

impl HandshakeResponse {
    /// Returns the assigned client id if the handshake was accepted
    pub fn accepted_client_id(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.client_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Response of `GET /ws/poll`
///
/// Messages stay raw until [`PollResponse::into_messages`] so one malformed
/// entry cannot fail the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollResponse {
    #[serde(default)]
    pub messages: Vec<Value>,
}

impl PollResponse {
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages
                .into_iter()
                .filter_map(|m| serde_json::to_value(m).ok())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Decodes each message on its own, in batch order
    pub fn into_messages(self) -> impl Iterator<Item = Result<Message, serde_json::Error>> {
        self.messages.into_iter().map(serde_json::from_value)
    }
}

/// Body of `POST /ws/send`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub client_id: String,
    pub message: Message,
}

/// Response of `POST /ws/send`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_acceptance() {
        let accepted: HandshakeResponse =
            serde_json::from_value(json!({"success": true, "client_id": "c-9"})).unwrap();
        assert_eq!(accepted.accepted_client_id(), Some("c-9"));

        let rejected: HandshakeResponse =
            serde_json::from_value(json!({"success": false, "client_id": "c-9"})).unwrap();
        assert_eq!(rejected.accepted_client_id(), None);

        let no_id: HandshakeResponse = serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(no_id.accepted_client_id(), None);
    }

    #[test]
    fn test_poll_response_preserves_order() {
        let response: PollResponse = serde_json::from_value(json!({
            "messages": [{"type": "pong"}, {"type": "job_created"}, {"type": "error", "message": "x"}]
        }))
        .unwrap();

        let kinds: Vec<Option<String>> = response
            .into_messages()
            .map(|m| m.unwrap().kind().map(str::to_string))
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some("pong".to_string()),
                Some("job_created".to_string()),
                Some("error".to_string())
            ]
        );

        let empty: PollResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_one_bad_message_does_not_spoil_the_batch() {
        let response: PollResponse = serde_json::from_str(
            r#"{"messages":[
                {"type":"pong","timestamp":1700000000.25},
                {"type":42},
                {"type":"job_created","job_id":"j1","timestamp":"2026-10-19T10:00:00Z"}
            ]}"#,
        )
        .unwrap();

        let decoded: Vec<_> = response.into_messages().collect();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].as_ref().unwrap().kind(), Some("pong"));
        assert!(decoded[1].is_err());
        let created = decoded[2].as_ref().unwrap();
        assert_eq!(created.kind(), Some("job_created"));
        assert_eq!(created.str_field("job_id"), Some("j1"));
    }
}
