//! Stream, source and filter commands.

use super::{MessageView, Output, Session, StreamSummary, json_string};
use crate::entity::Persistent;
use crate::filter::Filter;
use crate::group::Member;
use crate::source::{MessageSource, SourceKind};
use crate::{Error, Result};
use serde::Serialize;
use std::sync::Arc;

// === Stream list / show ===

#[derive(Serialize)]
pub struct StreamListResult {
    pub streams: Vec<StreamSummary>,
}

impl Output for StreamListResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.streams.is_empty() {
            return "No streams. Create one with `tsb stream create` or run `tsb init`.".to_string();
        }
        self.streams
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{:>3}. {}", i, s.to_line()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn stream_list(session: &Session) -> Result<StreamListResult> {
    let manager = session.manager()?;
    Ok(StreamListResult {
        streams: manager
            .stream_list()
            .iter()
            .map(|s| StreamSummary::from(s.as_ref()))
            .collect(),
    })
}

#[derive(Serialize)]
pub struct StreamShowResult {
    #[serde(flatten)]
    pub summary: StreamSummary,
    pub source_list: Vec<String>,
    pub filter_list: Vec<String>,
    pub recent: Vec<MessageView>,
}

impl Output for StreamShowResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![self.summary.to_line()];
        lines.push(format!("  sources: {}", join_or_none(&self.source_list)));
        lines.push(format!("  filters: {}", join_or_none(&self.filter_list)));
        if !self.recent.is_empty() {
            lines.push(String::new());
            lines.extend(self.recent.iter().map(MessageView::to_line));
        }
        lines.join("\n")
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

/// Show a stream with its newest `limit` messages.
pub fn stream_show(session: &Session, name: &str, limit: usize) -> Result<StreamShowResult> {
    let stream = session.manager()?.get_stream(name)?;
    let messages = stream.messages();
    let skip = messages.len().saturating_sub(limit);
    Ok(StreamShowResult {
        summary: StreamSummary::from(stream.as_ref()),
        source_list: stream.inputs().members().iter().map(|s| s.describe()).collect(),
        filter_list: stream.filters().members().iter().map(|f| f.describe()).collect(),
        recent: messages[skip..].iter().map(MessageView::from).collect(),
    })
}

// === Stream create / delete / move ===

#[derive(Serialize)]
pub struct StreamChanged {
    pub name: String,
    pub action: &'static str,
}

impl Output for StreamChanged {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Stream {} {}", self.name, self.action)
    }
}

pub fn stream_create(session: &Session, name: &str, description: &str) -> Result<StreamChanged> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("stream name cannot be empty".to_string()));
    }
    let manager = session.manager()?;
    manager.create_stream(name, description)?;
    manager.save_all(true)?;
    Ok(StreamChanged {
        name: name.to_string(),
        action: "created",
    })
}

/// Delete a stream; with `purge` everything it owns goes too.
pub fn stream_delete(session: &Session, name: &str, purge: bool) -> Result<StreamChanged> {
    let manager = session.manager()?;
    let deleted = if purge {
        manager.purge_stream(name)?
    } else {
        manager.delete_stream(name)?
    };
    if !deleted {
        return Err(Error::NotFound(format!("stream: {}", name)));
    }
    session.ctx.store.commit()?;
    Ok(StreamChanged {
        name: name.to_string(),
        action: if purge { "purged" } else { "deleted" },
    })
}

pub fn stream_rename(session: &Session, name: &str, new_name: &str) -> Result<StreamChanged> {
    let manager = session.manager()?;
    manager.rename_stream(name, new_name)?;
    manager.get_stream(new_name)?.entity().save(true)?;
    Ok(StreamChanged {
        name: new_name.to_string(),
        action: "renamed",
    })
}

pub fn stream_move(session: &Session, name: &str, index: usize) -> Result<StreamChanged> {
    let manager = session.manager()?;
    manager.move_stream(name, index)?;
    manager.entity().save(true)?;
    Ok(StreamChanged {
        name: name.to_string(),
        action: "moved",
    })
}

// === Stream refresh ===

#[derive(Serialize)]
pub struct RefreshedStream {
    pub name: String,
    pub new_messages: Vec<MessageView>,
}

#[derive(Serialize)]
pub struct RefreshResult {
    pub streams: Vec<RefreshedStream>,
}

impl Output for RefreshResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.streams.is_empty() {
            return "No streams to refresh.".to_string();
        }
        let mut lines = Vec::new();
        for stream in &self.streams {
            lines.push(format!("{}: {} new", stream.name, stream.new_messages.len()));
            lines.extend(stream.new_messages.iter().map(MessageView::to_line));
        }
        lines.join("\n")
    }
}

/// Refresh one stream, or every stream in display order.
pub fn stream_refresh(session: &Session, name: Option<&str>) -> Result<RefreshResult> {
    let manager = session.manager()?;
    let streams = match name {
        Some(name) => vec![manager.get_stream(name)?],
        None => manager.stream_list(),
    };

    let mut refreshed = Vec::with_capacity(streams.len());
    for stream in streams {
        let fresh = stream.refresh()?;
        refreshed.push(RefreshedStream {
            name: stream.name(),
            new_messages: fresh.iter().map(MessageView::from).collect(),
        });
    }
    manager.save_all(true)?;
    Ok(RefreshResult { streams: refreshed })
}

// === Sources ===

#[derive(Serialize)]
pub struct MemberChanged {
    pub stream: String,
    pub index: usize,
    pub member: String,
    pub action: &'static str,
}

impl Output for MemberChanged {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!("{} {} at {} in {}", capitalize(self.action), self.member, self.index, self.stream)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Options for `source add`.
#[derive(Debug, Default)]
pub struct SourceOptions {
    pub kind: String,
    pub target: Option<String>,
    pub account: Option<String>,
    pub cache: bool,
    pub disabled: bool,
}

pub fn source_add(session: &Session, stream_name: &str, options: SourceOptions) -> Result<MemberChanged> {
    let stream = session.manager()?.get_stream(stream_name)?;
    let kind = SourceKind::from_label(&options.kind)
        .ok_or_else(|| Error::InvalidInput(format!("unknown source kind: {}", options.kind)))?;
    let account = session.account_or_default(options.account.as_deref())?;

    let source = MessageSource::create(&session.ctx, kind, &account, options.target.as_deref())?;
    source.set_cache_messages(options.cache);
    source.set_enabled(!options.disabled);
    let member = source.describe();
    stream.inputs().add(Arc::new(source));
    stream.save(true)?;

    Ok(MemberChanged {
        stream: stream_name.to_string(),
        index: stream.inputs().len() - 1,
        member,
        action: "added",
    })
}

#[derive(Serialize)]
pub struct SourceView {
    pub index: usize,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub account: Option<String>,
    pub enabled: bool,
    pub cached: bool,
}

#[derive(Serialize)]
pub struct SourceListResult {
    pub stream: String,
    pub sources: Vec<SourceView>,
}

impl Output for SourceListResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.sources.is_empty() {
            return format!("{} has no sources.", self.stream);
        }
        self.sources
            .iter()
            .map(|s| {
                let mut flags = Vec::new();
                if !s.enabled {
                    flags.push("disabled");
                }
                if s.cached {
                    flags.push("cached");
                }
                let target = s.target.as_deref().map(|t| format!(":{}", t)).unwrap_or_default();
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                format!(
                    "{:>3}. {}{} via {}{}",
                    s.index,
                    s.kind,
                    target,
                    s.account.as_deref().unwrap_or("?"),
                    flags
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn source_list(session: &Session, stream_name: &str) -> Result<SourceListResult> {
    let stream = session.manager()?.get_stream(stream_name)?;
    Ok(SourceListResult {
        stream: stream_name.to_string(),
        sources: stream
            .inputs()
            .members()
            .iter()
            .enumerate()
            .map(|(index, s)| SourceView {
                index,
                kind: s.source_kind().label().to_string(),
                target: s.target(),
                account: s.account(),
                enabled: s.enabled(),
                cached: s.cache_messages(),
            })
            .collect(),
    })
}

/// Remove a source and delete it together with its cache.
pub fn source_remove(session: &Session, stream_name: &str, index: usize) -> Result<MemberChanged> {
    let stream = session.manager()?.get_stream(stream_name)?;
    let removed = stream.inputs().remove(index)?;
    removed.purge()?;
    stream.save(true)?;
    Ok(MemberChanged {
        stream: stream_name.to_string(),
        index,
        member: removed.describe(),
        action: "removed",
    })
}

pub fn source_toggle(
    session: &Session,
    stream_name: &str,
    index: usize,
    enabled: bool,
) -> Result<MemberChanged> {
    let stream = session.manager()?.get_stream(stream_name)?;
    let source = stream.inputs().get(index).ok_or(Error::IndexOutOfRange {
        index,
        len: stream.inputs().len(),
    })?;
    source.set_enabled(enabled);
    source.save(true)?;
    Ok(MemberChanged {
        stream: stream_name.to_string(),
        index,
        member: source.describe(),
        action: if enabled { "enabled" } else { "disabled" },
    })
}

// === Filters ===

/// Options for `filter add`.
#[derive(Debug, Default)]
pub struct FilterOptions {
    pub kind: String,
    pub target: Option<String>,
    pub remote: bool,
    pub account: Option<String>,
    pub negative: bool,
    pub name: String,
}

pub fn filter_add(session: &Session, stream_name: &str, options: FilterOptions) -> Result<MemberChanged> {
    let stream = session.manager()?.get_stream(stream_name)?;
    let target = || required_target(&options.target, &options.kind);

    let filter = match options.kind.as_str() {
        "user" => Filter::user(&session.ctx, target()?),
        "user-list" if options.remote => {
            let account = session.account_or_default(options.account.as_deref())?;
            Filter::remote_list(&session.ctx, &account, target()?)
        }
        "user-list" => Filter::local_list(&session.ctx, target()?),
        "media" => Filter::media(&session.ctx),
        other => return Err(Error::InvalidInput(format!("unknown filter kind: {}", other))),
    };
    filter.set_positive(!options.negative);
    filter.set_name(&options.name);
    let member = filter.describe();
    stream.filters().add(Arc::new(filter));
    stream.save(true)?;

    Ok(MemberChanged {
        stream: stream_name.to_string(),
        index: stream.filters().len() - 1,
        member,
        action: "added",
    })
}

fn required_target<'a>(target: &'a Option<String>, kind: &str) -> Result<&'a str> {
    target
        .as_deref()
        .ok_or_else(|| Error::InvalidInput(format!("{} filter needs --target", kind)))
}

#[derive(Serialize)]
pub struct FilterView {
    pub index: usize,
    pub filter: String,
    pub name: String,
    pub positive: bool,
}

#[derive(Serialize)]
pub struct FilterListResult {
    pub stream: String,
    pub filters: Vec<FilterView>,
}

impl Output for FilterListResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.filters.is_empty() {
            return format!("{} has no filters.", self.stream);
        }
        self.filters
            .iter()
            .map(|f| {
                if f.name.is_empty() {
                    format!("{:>3}. {}", f.index, f.filter)
                } else {
                    format!("{:>3}. {} ({})", f.index, f.filter, f.name)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn filter_list(session: &Session, stream_name: &str) -> Result<FilterListResult> {
    let stream = session.manager()?.get_stream(stream_name)?;
    Ok(FilterListResult {
        stream: stream_name.to_string(),
        filters: stream
            .filters()
            .members()
            .iter()
            .enumerate()
            .map(|(index, f)| FilterView {
                index,
                filter: f.describe(),
                name: f.name(),
                positive: f.positive(),
            })
            .collect(),
    })
}

pub fn filter_remove(session: &Session, stream_name: &str, index: usize) -> Result<MemberChanged> {
    let stream = session.manager()?.get_stream(stream_name)?;
    let removed = stream.filters().remove(index)?;
    removed.purge()?;
    stream.save(true)?;
    Ok(MemberChanged {
        stream: stream_name.to_string(),
        index,
        member: removed.describe(),
        action: "removed",
    })
}
