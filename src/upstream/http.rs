//! HTTP upstream for a Twitter-v1.1-compatible REST API.
//!
//! Requests are blocking (`ureq`) and authenticated with a bearer token.
//! Each feed maps to one endpoint:
//!
//! | Feed | Endpoint |
//! |---|---|
//! | home timeline | `statuses/home_timeline.json` |
//! | mentions | `statuses/mentions_timeline.json` |
//! | favourites | `favorites/list.json` |
//! | user posts | `statuses/user_timeline.json` |
//! | list | `lists/statuses.json` |
//!
//! List membership comes from `lists/members.json`.

use super::{Feed, FetchRequest, Upstream};
use crate::models::{Author, Entities, Media, Message, UrlEntity};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

/// Default API base URL
pub const DEFAULT_API_BASE: &str = "https://api.twitter.com/1.1";

/// User-Agent header sent with every request
const USER_AGENT: &str = concat!("tsubame/", env!("CARGO_PKG_VERSION"));

/// Timestamp format used by the v1.1 API ("Wed Oct 10 20:19:24 +0000 2018")
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// Blocking REST client for one account.
pub struct HttpUpstream {
    agent: ureq::Agent,
    api_base: String,
    token: String,
}

impl HttpUpstream {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn endpoint(feed: &Feed) -> (&'static str, Vec<(&'static str, String)>) {
        match feed {
            Feed::HomeTimeline => ("statuses/home_timeline.json", vec![]),
            Feed::Mentions => ("statuses/mentions_timeline.json", vec![]),
            Feed::Favourites { user: None } => ("favorites/list.json", vec![]),
            Feed::Favourites { user: Some(user) } => {
                ("favorites/list.json", vec![("screen_name", user.clone())])
            }
            Feed::UserPosts { user } => {
                ("statuses/user_timeline.json", vec![("screen_name", user.clone())])
            }
            Feed::List { list_id } => ("lists/statuses.json", vec![("list_id", list_id.clone())]),
        }
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ureq::Response> {
        let url = format!("{}/{}", self.api_base, path);
        let mut request = self
            .agent
            .get(&url)
            .set("Authorization", &format!("Bearer {}", self.token))
            .set("Accept", "application/json");
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(response) => Ok(response),
            Err(ureq::Error::Status(429, response)) => {
                let retry_after = response
                    .header("x-rate-limit-reset")
                    .or_else(|| response.header("retry-after"))
                    .and_then(|v| v.parse().ok());
                Err(Error::RateLimited { retry_after })
            }
            Err(ureq::Error::Status(401, _)) => Err(Error::Upstream(
                "invalid or expired token: upstream returned 401 Unauthorized".to_string(),
            )),
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(Error::Upstream(format!("HTTP {}: {}", code, body)))
            }
            Err(e) => Err(Error::Upstream(e.to_string())),
        }
    }
}

impl Upstream for HttpUpstream {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Message>> {
        let (path, mut query) = Self::endpoint(&request.feed);
        query.push(("tweet_mode", "extended".to_string()));
        if let Some(since_id) = request.since_id {
            query.push(("since_id", since_id.to_string()));
        }
        if let Some(count) = request.count {
            query.push(("count", count.to_string()));
        }

        tracing::debug!(feed = %request.feed, since_id = ?request.since_id, "fetching from upstream");
        let statuses: Vec<Status> = self
            .get(path, &query)?
            .into_json()
            .map_err(|e| Error::Upstream(format!("failed to parse {} response: {}", path, e)))?;

        statuses.into_iter().map(Status::into_message).collect()
    }

    fn list_members(&self, list_id: &str) -> Result<Vec<String>> {
        let members: ListMembers = self
            .get(
                "lists/members.json",
                &[("list_id", list_id.to_string()), ("count", "5000".to_string())],
            )?
            .into_json()
            .map_err(|e| Error::Upstream(format!("failed to parse list members: {}", e)))?;
        Ok(members.users.into_iter().map(|u| u.screen_name).collect())
    }
}

/// Status object as returned by the API (only fields we care about).
#[derive(Debug, Deserialize)]
struct Status {
    id: u64,
    created_at: String,
    #[serde(default)]
    full_text: Option<String>,
    #[serde(default)]
    text: Option<String>,
    user: StatusUser,
    #[serde(default)]
    entities: StatusEntities,
    #[serde(default)]
    extended_entities: Option<StatusEntities>,
    #[serde(default)]
    in_reply_to_status_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatusUser {
    id: u64,
    screen_name: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusEntities {
    #[serde(default)]
    urls: Vec<StatusUrl>,
    #[serde(default)]
    hashtags: Vec<StatusHashtag>,
    #[serde(default)]
    user_mentions: Vec<StatusMention>,
    #[serde(default)]
    media: Vec<StatusMedia>,
}

#[derive(Debug, Deserialize)]
struct StatusUrl {
    url: String,
    #[serde(default)]
    expanded_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusHashtag {
    text: String,
}

#[derive(Debug, Deserialize)]
struct StatusMention {
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct StatusMedia {
    media_url_https: String,
    #[serde(rename = "type", default)]
    media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListMembers {
    users: Vec<StatusUser>,
}

impl Status {
    fn into_message(self) -> Result<Message> {
        let created_at = DateTime::parse_from_str(&self.created_at, CREATED_AT_FORMAT)
            .map_err(|e| {
                Error::Upstream(format!("invalid created_at '{}': {}", self.created_at, e))
            })?
            .with_timezone(&Utc);

        // extended_entities carries every attachment, entities only the first
        let media = self
            .extended_entities
            .map(|e| e.media)
            .unwrap_or(self.entities.media);

        Ok(Message {
            id: self.id,
            author: Author {
                id: self.user.id,
                screen_name: self.user.screen_name,
                name: self.user.name,
            },
            created_at,
            text: self.full_text.or(self.text).unwrap_or_default(),
            entities: Entities {
                urls: self
                    .entities
                    .urls
                    .into_iter()
                    .map(|u| UrlEntity {
                        url: u.url,
                        expanded_url: u.expanded_url,
                    })
                    .collect(),
                hashtags: self.entities.hashtags.into_iter().map(|h| h.text).collect(),
                mentions: self
                    .entities
                    .user_mentions
                    .into_iter()
                    .map(|m| m.screen_name)
                    .collect(),
                media: media
                    .into_iter()
                    .map(|m| Media {
                        url: m.media_url_https,
                        media_type: m.media_type.unwrap_or_else(|| "photo".to_string()),
                    })
                    .collect(),
            },
            in_reply_to: self.in_reply_to_status_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_JSON: &str = r#"{
        "id": 1050118621198921728,
        "created_at": "Wed Oct 10 20:19:24 +0000 2018",
        "full_text": "To make room for more expression #hashtag",
        "user": {"id": 6253282, "screen_name": "TwitterAPI", "name": "Twitter API"},
        "entities": {
            "hashtags": [{"text": "hashtag", "indices": [33, 41]}],
            "urls": [{"url": "https://t.co/x", "expanded_url": "https://example.org"}],
            "user_mentions": [{"screen_name": "serval"}],
            "media": [{"media_url_https": "https://pbs.example/1.jpg", "type": "photo"}]
        },
        "extended_entities": {
            "media": [
                {"media_url_https": "https://pbs.example/1.jpg", "type": "photo"},
                {"media_url_https": "https://pbs.example/2.jpg", "type": "photo"}
            ]
        },
        "in_reply_to_status_id": null
    }"#;

    #[test]
    fn test_status_into_message() {
        let status: Status = serde_json::from_str(STATUS_JSON).unwrap();
        let message = status.into_message().unwrap();

        assert_eq!(message.id, 1050118621198921728);
        assert_eq!(message.author.screen_name, "TwitterAPI");
        assert_eq!(message.created_at.to_rfc3339(), "2018-10-10T20:19:24+00:00");
        assert_eq!(message.text, "To make room for more expression #hashtag");
        assert_eq!(message.entities.hashtags, vec!["hashtag"]);
        assert_eq!(message.entities.mentions, vec!["serval"]);
        assert_eq!(message.entities.media.len(), 2);
        assert_eq!(
            message.entities.urls[0].expanded_url.as_deref(),
            Some("https://example.org")
        );
        assert!(message.in_reply_to.is_none());
    }

    #[test]
    fn test_status_with_bad_timestamp() {
        let json = r#"{"id": 1, "created_at": "yesterday", "text": "x",
                       "user": {"id": 1, "screen_name": "a"}}"#;
        let status: Status = serde_json::from_str(json).unwrap();
        assert!(matches!(status.into_message(), Err(Error::Upstream(_))));
    }

    #[test]
    fn test_endpoint_mapping() {
        let (path, query) = HttpUpstream::endpoint(&Feed::UserPosts { user: "kaban".into() });
        assert_eq!(path, "statuses/user_timeline.json");
        assert_eq!(query, vec![("screen_name", "kaban".to_string())]);

        let (path, query) = HttpUpstream::endpoint(&Feed::Favourites { user: None });
        assert_eq!(path, "favorites/list.json");
        assert!(query.is_empty());
    }

    #[test]
    fn test_api_base_trailing_slash_is_trimmed() {
        let upstream = HttpUpstream::new("https://api.example/1.1/", "t", Duration::from_secs(1));
        assert_eq!(upstream.api_base, "https://api.example/1.1");
    }
}
