//! Data models for Tsubame messages.
//!
//! - `Message` - A single post fetched from an upstream feed
//! - `Author` - The account that posted it
//! - `Entities` - Urls, hashtags, mentions and media embedded in the body

pub mod message;

pub use message::{Author, Entities, Media, Message, MessageId, UrlEntity, merge_chronological};
