//! In-process upstream.
//!
//! Feeds are plain message lists filled with [`MemoryUpstream::post`]. Fetches
//! honour `since_id` and `count` the way a remote service would, and every
//! request is recorded so callers can assert on what was asked.

use super::{Feed, FetchRequest, Upstream};
use crate::models::Message;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MemoryUpstream {
    feeds: Mutex<HashMap<Feed, Vec<Message>>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
    requests: Mutex<Vec<FetchRequest>>,
    failure: Mutex<Option<Error>>,
}

impl MemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to a feed.
    pub fn post(&self, feed: Feed, message: Message) {
        self.feeds.lock().entry(feed).or_default().push(message);
    }

    pub fn set_list_members(&self, list_id: &str, members: &[&str]) {
        self.lists.lock().insert(
            list_id.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
    }

    /// Make the next fetch fail with the given error.
    pub fn fail_next(&self, error: Error) {
        *self.failure.lock() = Some(error);
    }

    /// Every fetch request received so far.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl Upstream for MemoryUpstream {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Message>> {
        self.requests.lock().push(request.clone());
        if let Some(error) = self.failure.lock().take() {
            return Err(error);
        }

        let mut messages: Vec<Message> = self
            .feeds
            .lock()
            .get(&request.feed)
            .map(|feed| {
                feed.iter()
                    .filter(|m| request.since_id.is_none_or(|since| m.id > since))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // newest first
        messages.sort_by(|a, b| b.id.cmp(&a.id));
        if let Some(count) = request.count {
            messages.truncate(count as usize);
        }
        Ok(messages)
    }

    fn list_members(&self, list_id: &str) -> Result<Vec<String>> {
        self.lists
            .lock()
            .get(list_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("remote list: {}", list_id)))
    }
}
