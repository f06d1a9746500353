//! Message value types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::{Error, Result};

/// Upstream-assigned message id. Ids grow with time.
pub type MessageId = u64;

/// The account a message was posted by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Upstream account id
    pub id: u64,

    /// Unique handle (e.g. "monty")
    pub screen_name: String,

    /// Display name
    #[serde(default)]
    pub name: String,
}

impl Author {
    pub fn new(id: u64, screen_name: impl Into<String>) -> Self {
        let screen_name = screen_name.into();
        Self {
            id,
            name: screen_name.clone(),
            screen_name,
        }
    }
}

/// A link embedded in a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlEntity {
    /// Shortened url as it appears in the text
    pub url: String,

    /// Expanded target url
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expanded_url: Option<String>,
}

/// A media attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// Direct media url
    pub url: String,

    /// Media type ("photo", "video", "animated_gif")
    #[serde(rename = "type", default = "default_media_type")]
    pub media_type: String,
}

fn default_media_type() -> String {
    "photo".to_string()
}

/// Entities embedded in a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub urls: Vec<UrlEntity>,

    #[serde(default)]
    pub hashtags: Vec<String>,

    #[serde(default)]
    pub mentions: Vec<String>,

    #[serde(default)]
    pub media: Vec<Media>,
}

/// A single post fetched from an upstream feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique id
    pub id: MessageId,

    /// Posting account
    pub author: Author,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Body text
    pub text: String,

    /// Embedded entities
    #[serde(default)]
    pub entities: Entities,

    /// Id of the message this one replies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<MessageId>,
}

impl Message {
    pub fn new(id: MessageId, author: Author, created_at: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            id,
            author,
            created_at,
            text: text.into(),
            entities: Entities::default(),
            in_reply_to: None,
        }
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.entities.media.push(media);
        self
    }

    pub fn has_media(&self) -> bool {
        !self.entities.media.is_empty()
    }

    /// Convert to the raw payload stored in message caches.
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Materialize a message from a cached raw payload.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        Message::deserialize(payload)
            .map_err(|e| Error::Deserialization(format!("cached message payload: {}", e)))
    }
}

/// Merge messages from several sources into chronological order.
///
/// Duplicate ids are dropped, keeping the first occurrence in input order.
/// The sort on `(created_at, id)` is stable, so messages with identical keys
/// keep their input order.
pub fn merge_chronological(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Message> = messages
        .into_iter()
        .filter(|m| seen.insert(m.id))
        .collect();
    merged.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::message;
    use serde_json::json;

    #[test]
    fn test_payload_roundtrip_keeps_entities() {
        let original = message(7, "serval").with_media(Media {
            url: "https://example.org/a.jpg".to_string(),
            media_type: "photo".to_string(),
        });
        let payload = original.to_payload().unwrap();
        assert_eq!(payload["entities"]["media"][0]["type"], json!("photo"));
        assert_eq!(Message::from_payload(&payload).unwrap(), original);
    }

    #[test]
    fn test_from_payload_rejects_garbage() {
        let err = Message::from_payload(&json!({"id": "nope"})).unwrap_err();
        assert!(matches!(err, Error::Deserialization(_)));
    }

    #[test]
    fn test_payload_without_entities_defaults() {
        let payload = json!({
            "id": 1,
            "author": {"id": 1, "screen_name": "kaban"},
            "created_at": "2017-07-14T02:40:00Z",
            "text": "hello"
        });
        let parsed = Message::from_payload(&payload).unwrap();
        assert!(!parsed.has_media());
        assert_eq!(parsed.author.name, "");
    }

    #[test]
    fn test_merge_chronological_sorts_and_dedupes() {
        let merged = merge_chronological(vec![
            message(5, "a"),
            message(2, "b"),
            message(5, "c"),
            message(3, "a"),
        ]);
        let ids: Vec<_> = merged.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3, 5]);
        // first occurrence of id 5 wins
        assert_eq!(merged[2].author.screen_name, "a");
    }
}
