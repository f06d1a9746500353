//! Users and user lists.
//!
//! [`User`] and [`LocalUserList`] are single-instance kinds: every handle to
//! the same username or list name obtained from one store shares the same
//! record, so an edit through any of them is seen by all.
//! [`RemoteUserList`] is not persisted; its membership is fetched from the
//! upstream once and kept in memory.

use crate::entity::{Entity, Persistent, Schema};
use crate::store::{Identity, Query, Store};
use crate::upstream::Upstream;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const USER_KIND: &str = "user";
pub const LOCAL_LIST_KIND: &str = "user-list-local";

/// A known account on the upstream service.
#[derive(Debug, Clone)]
pub struct User {
    entity: Entity,
}

impl User {
    pub fn schema() -> Schema {
        Schema::new()
            .field("username", "")
            .field("name", "")
            .field("description", "")
            .field("custom_note", "")
    }

    /// Create a user, or return the stored one if the username is taken.
    ///
    /// An existing user keeps its display name; `name` is only used for new
    /// records. New records are saved (not committed) so that every later
    /// lookup shares them.
    pub fn new(store: &Store, username: &str, name: &str) -> Result<Self> {
        match Self::from_store(store, username) {
            Ok(user) => Ok(user),
            Err(Error::NotFound(_)) => {
                let entity = Entity::create(store, USER_KIND, &Self::schema(), Identity::Shared);
                entity.set("username", username);
                entity.set("name", name);
                entity.save(false)?;
                Ok(Self { entity })
            }
            Err(e) => Err(e),
        }
    }

    pub fn from_store(store: &Store, username: &str) -> Result<Self> {
        let record = store.get(
            USER_KIND,
            &Query::all().field("username", username),
            Identity::Shared,
        )?;
        Ok(Self {
            entity: Entity::wrap(store, record, &Self::schema(), Identity::Shared),
        })
    }

    pub fn username(&self) -> String {
        self.entity.get_or_default("username")
    }

    pub fn name(&self) -> String {
        self.entity.get_or_default("name")
    }

    pub fn set_name(&self, name: &str) {
        self.entity.set("name", name);
    }

    pub fn description(&self) -> String {
        self.entity.get_or_default("description")
    }

    pub fn set_description(&self, description: &str) {
        self.entity.set("description", description);
    }

    /// Free-form local note about the user.
    pub fn custom_note(&self) -> String {
        self.entity.get_or_default("custom_note")
    }

    pub fn set_custom_note(&self, note: &str) {
        self.entity.set("custom_note", note);
    }
}

impl Persistent for User {
    fn entity(&self) -> &Entity {
        &self.entity
    }
}

/// A named set of usernames stored locally.
#[derive(Debug, Clone)]
pub struct LocalUserList {
    entity: Entity,
}

impl LocalUserList {
    pub fn schema() -> Schema {
        Schema::new()
            .field("name", "")
            .field("description", "")
            .field("usernames", json!([]))
    }

    /// Create and save (without committing) a new list.
    ///
    /// Fails with [`Error::NameCollision`] if a list of that name exists.
    pub fn new(store: &Store, name: &str, description: &str, users: &[User]) -> Result<Self> {
        match Self::from_store(store, name) {
            Ok(_) => return Err(Error::NameCollision(format!("user list: {}", name))),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let entity = Entity::create(store, LOCAL_LIST_KIND, &Self::schema(), Identity::Shared);
        entity.set("name", name);
        entity.set("description", description);
        let usernames: Vec<String> = users.iter().map(User::username).collect();
        entity.set("usernames", json!(usernames));
        entity.save(false)?;
        Ok(Self { entity })
    }

    pub fn from_store(store: &Store, name: &str) -> Result<Self> {
        let record = store.get(
            LOCAL_LIST_KIND,
            &Query::all().field("name", name),
            Identity::Shared,
        )?;
        Ok(Self {
            entity: Entity::wrap(store, record, &Self::schema(), Identity::Shared),
        })
    }

    /// Every stored local list, in creation order.
    pub fn all(store: &Store) -> Result<Vec<Self>> {
        Ok(store
            .filter(LOCAL_LIST_KIND, &Query::all(), Identity::Shared)?
            .into_iter()
            .map(|record| Self {
                entity: Entity::wrap(store, record, &Self::schema(), Identity::Shared),
            })
            .collect())
    }

    pub fn name(&self) -> String {
        self.entity.get_or_default("name")
    }

    pub fn description(&self) -> String {
        self.entity.get_or_default("description")
    }

    pub fn set_description(&self, description: &str) {
        self.entity.set("description", description);
    }

    pub fn usernames(&self) -> Vec<String> {
        self.entity.get_or_default("usernames")
    }

    pub fn contains(&self, username: &str) -> bool {
        self.usernames()
            .iter()
            .any(|u| u.eq_ignore_ascii_case(username))
    }

    /// Add a user and save the list. Adding a member twice is a no-op.
    pub fn add(&self, user: &User) -> Result<()> {
        let username = user.username();
        if !self.contains(&username) {
            let mut usernames = self.usernames();
            usernames.push(username);
            self.entity.set("usernames", json!(usernames));
        }
        self.entity.save(false)
    }

    /// Remove a username and save the list.
    pub fn remove(&self, username: &str) -> Result<()> {
        let mut usernames = self.usernames();
        let before = usernames.len();
        usernames.retain(|u| !u.eq_ignore_ascii_case(username));
        if usernames.len() == before {
            return Err(Error::NotFound(format!(
                "user '{}' in list '{}'",
                username,
                self.name()
            )));
        }
        self.entity.set("usernames", json!(usernames));
        self.entity.save(false)
    }

    /// Shared user handles keyed by username.
    ///
    /// Usernames without a stored user are skipped.
    pub fn users(&self) -> BTreeMap<String, User> {
        let mut users = BTreeMap::new();
        for username in self.usernames() {
            match User::from_store(self.entity.store(), &username) {
                Ok(user) => {
                    users.insert(username, user);
                }
                Err(e) => {
                    tracing::warn!(list = %self.name(), user = %username, "list member not stored: {}", e);
                }
            }
        }
        users
    }
}

impl Persistent for LocalUserList {
    fn entity(&self) -> &Entity {
        &self.entity
    }
}

/// A list maintained on the upstream service.
pub struct RemoteUserList {
    upstream: Arc<dyn Upstream>,
    list_id: String,
    members: Mutex<Option<Vec<String>>>,
}

impl RemoteUserList {
    pub fn new(upstream: Arc<dyn Upstream>, list_id: &str) -> Self {
        Self {
            upstream,
            list_id: list_id.to_string(),
            members: Mutex::new(None),
        }
    }

    pub fn list_id(&self) -> &str {
        &self.list_id
    }

    /// Member usernames, fetched on first call.
    pub fn usernames(&self) -> Result<Vec<String>> {
        let mut members = self.members.lock();
        if let Some(ref usernames) = *members {
            return Ok(usernames.clone());
        }
        let usernames = self.upstream.list_members(&self.list_id)?;
        tracing::debug!(list_id = %self.list_id, members = usernames.len(), "fetched remote list members");
        *members = Some(usernames.clone());
        Ok(usernames)
    }

    pub fn contains(&self, username: &str) -> Result<bool> {
        Ok(self
            .usernames()?
            .iter()
            .any(|u| u.eq_ignore_ascii_case(username)))
    }

    /// Forget the fetched membership so the next call fetches again.
    pub fn invalidate(&self) {
        *self.members.lock() = None;
    }
}

impl std::fmt::Debug for RemoteUserList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteUserList")
            .field("list_id", &self.list_id)
            .field("fetched", &self.members.lock().is_some())
            .finish()
    }
}

/// Either kind of user list.
#[derive(Debug, Clone)]
pub enum UserList {
    Local(LocalUserList),
    Remote(Arc<RemoteUserList>),
}

impl UserList {
    pub fn usernames(&self) -> Result<Vec<String>> {
        match self {
            UserList::Local(list) => Ok(list.usernames()),
            UserList::Remote(list) => list.usernames(),
        }
    }

    pub fn contains(&self, username: &str) -> Result<bool> {
        match self {
            UserList::Local(list) => Ok(list.contains(username)),
            UserList::Remote(list) => list.contains(username),
        }
    }
}
