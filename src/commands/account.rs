//! Account and local user list commands.
//!
//! Accounts live in `state.kdl` and never touch the record store; user lists
//! are records like everything else.

use super::{Output, Session, json_string};
use crate::config::{AccountState, ConfigPaths};
use crate::user::{LocalUserList, User};
use crate::{Error, Result};
use serde::Serialize;

// === Accounts ===

#[derive(Serialize)]
pub struct AccountView {
    pub username: String,
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
}

impl From<&AccountState> for AccountView {
    fn from(account: &AccountState) -> Self {
        Self {
            username: account.username.clone(),
            token: account.masked_token(),
            api_base: account.api_base.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct AccountChanged {
    pub username: String,
    pub action: &'static str,
}

impl Output for AccountChanged {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Account {} {}", self.username, self.action)
    }
}

/// Add an account, replacing the stored one of the same name.
pub fn account_add(
    paths: &ConfigPaths,
    username: &str,
    token: &str,
    api_base: Option<String>,
) -> Result<AccountChanged> {
    let username = username.trim_start_matches('@');
    if username.is_empty() {
        return Err(Error::InvalidInput("account username cannot be empty".to_string()));
    }
    if token.trim().is_empty() {
        return Err(Error::InvalidInput("account token cannot be empty".to_string()));
    }

    let mut state = paths.read_state()?;
    let replaced = state.upsert_account(AccountState {
        username: username.to_string(),
        token: token.trim().to_string(),
        api_base,
    });
    paths.write_state(&state)?;
    tracing::info!(account = %username, replaced, "account stored");
    Ok(AccountChanged {
        username: username.to_string(),
        action: if replaced { "updated" } else { "added" },
    })
}

#[derive(Serialize)]
pub struct AccountListResult {
    pub accounts: Vec<AccountView>,
}

impl Output for AccountListResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.accounts.is_empty() {
            return "No accounts. Add one with `tsb account add <username> --token <token>`."
                .to_string();
        }
        self.accounts
            .iter()
            .map(|a| match a.api_base {
                Some(ref base) => format!("{}  {}  {}", a.username, a.token, base),
                None => format!("{}  {}", a.username, a.token),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn account_list(paths: &ConfigPaths) -> Result<AccountListResult> {
    let state = paths.read_state()?;
    Ok(AccountListResult {
        accounts: state.accounts.iter().map(AccountView::from).collect(),
    })
}

pub fn account_remove(paths: &ConfigPaths, username: &str) -> Result<AccountChanged> {
    let mut state = paths.read_state()?;
    if !state.remove_account(username) {
        return Err(Error::NotFound(format!("account: {}", username)));
    }
    paths.write_state(&state)?;
    Ok(AccountChanged {
        username: username.to_string(),
        action: "removed",
    })
}

// === Local user lists ===

#[derive(Serialize)]
pub struct UserListView {
    pub name: String,
    pub description: String,
    pub users: Vec<String>,
}

impl From<&LocalUserList> for UserListView {
    fn from(list: &LocalUserList) -> Self {
        Self {
            name: list.name(),
            description: list.description(),
            users: list.usernames(),
        }
    }
}

impl UserListView {
    fn to_line(&self) -> String {
        let users = if self.users.is_empty() {
            "(empty)".to_string()
        } else {
            self.users.join(", ")
        };
        format!("{}: {}", self.name, users)
    }
}

#[derive(Serialize)]
pub struct UserListResult {
    pub lists: Vec<UserListView>,
}

impl Output for UserListResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.lists.is_empty() {
            return "No user lists.".to_string();
        }
        self.lists
            .iter()
            .map(UserListView::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn stored_user(session: &Session, username: &str) -> Result<User> {
    let username = username.trim_start_matches('@');
    User::new(&session.ctx.store, username, username)
}

pub fn list_create(
    session: &Session,
    name: &str,
    usernames: &[String],
    description: &str,
) -> Result<UserListResult> {
    let users = usernames
        .iter()
        .map(|u| stored_user(session, u))
        .collect::<Result<Vec<_>>>()?;
    let list = LocalUserList::new(&session.ctx.store, name, description, &users)?;
    session.ctx.store.commit()?;
    Ok(UserListResult {
        lists: vec![UserListView::from(&list)],
    })
}

pub fn list_show(session: &Session) -> Result<UserListResult> {
    Ok(UserListResult {
        lists: LocalUserList::all(&session.ctx.store)?
            .iter()
            .map(UserListView::from)
            .collect(),
    })
}

pub fn list_add(session: &Session, name: &str, username: &str) -> Result<UserListResult> {
    let list = LocalUserList::from_store(&session.ctx.store, name)?;
    list.add(&stored_user(session, username)?)?;
    session.ctx.store.commit()?;
    Ok(UserListResult {
        lists: vec![UserListView::from(&list)],
    })
}

pub fn list_remove(session: &Session, name: &str, username: &str) -> Result<UserListResult> {
    let list = LocalUserList::from_store(&session.ctx.store, name)?;
    list.remove(username.trim_start_matches('@'))?;
    session.ctx.store.commit()?;
    Ok(UserListResult {
        lists: vec![UserListView::from(&list)],
    })
}
