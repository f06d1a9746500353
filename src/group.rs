//! Ordered, persisted groups of polymorphic members.
//!
//! An [`OrderedGroup`] keeps two sequences in lockstep: the `members` field of
//! its own record (a list of [`MemberRef`]s) and the in-memory list of
//! materialized member wrappers. Every mutation updates both while holding the
//! group's reentrant lock.
//!
//! Members are materialized lazily on first access. Each member type supplies
//! a kind → constructor table through [`Member::registry`]; a stored
//! reference whose kind has no entry, or whose record is gone, is logged,
//! skipped, and reported by [`OrderedGroup::unresolved`]. Skipped references
//! are dropped from the in-memory persisted list, so the next save makes the
//! pruning durable.

use crate::context::AppContext;
use crate::entity::{Entity, Persistent, Schema};
use crate::store::{Identity, Query, RecordRef};
use crate::{Error, Result};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cell::RefCell;
use std::sync::Arc;

/// Record field holding the persisted member list.
pub const MEMBERS_FIELD: &str = "members";

/// Persisted reference to a member record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberRef {
    pub kind: String,
    pub pk: String,
}

impl MemberRef {
    pub fn of(member: &impl Persistent) -> Self {
        Self {
            kind: member.kind(),
            pk: member.pk(),
        }
    }
}

impl std::fmt::Display for MemberRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.pk)
    }
}

/// Builds a typed member from its record.
pub type Constructor<M> = fn(&AppContext, RecordRef) -> Result<M>;

/// A type that can live in an [`OrderedGroup`].
pub trait Member: Persistent + Send + Sync + Sized + 'static {
    /// Record kinds this type can materialize, with their constructors.
    fn registry() -> &'static [(&'static str, Constructor<Self>)];

    /// Identity mode used when loading member records.
    fn identity() -> Identity {
        Identity::Detached
    }

    /// Delete this member and anything it exclusively owns.
    ///
    /// Does not commit.
    fn purge(&self) -> Result<()> {
        self.delete(false)
    }
}

/// Materialize one member reference through the registry of `M`.
pub fn resolve<M: Member>(ctx: &AppContext, member: &MemberRef) -> Result<M> {
    let constructor = M::registry()
        .iter()
        .find(|(kind, _)| *kind == member.kind)
        .map(|(_, constructor)| *constructor)
        .ok_or_else(|| Error::UnresolvableMemberKind(member.kind.clone()))?;
    let record = ctx
        .store
        .get(&member.kind, &Query::pk(&member.pk), M::identity())?;
    constructor(ctx, record)
}

struct GroupState<M> {
    loaded: bool,
    members: Vec<Arc<M>>,
    unresolved: Vec<MemberRef>,
}

/// Lock-guarded ordered collection of persisted members.
pub struct OrderedGroup<M: Member> {
    ctx: AppContext,
    entity: Entity,
    state: ReentrantMutex<RefCell<GroupState<M>>>,
}

impl<M: Member> OrderedGroup<M> {
    pub fn schema() -> Schema {
        Schema::new().field(MEMBERS_FIELD, json!([]))
    }

    /// Create a new, empty group record of the given kind (not yet saved).
    pub fn create(ctx: &AppContext, kind: &str) -> Self {
        let entity = Entity::create(&ctx.store, kind, &Self::schema(), Identity::Detached);
        Self::from_entity(ctx, entity, true)
    }

    /// Wrap an existing group record. Members load on first access.
    pub fn wrap(ctx: &AppContext, record: RecordRef) -> Self {
        let entity = Entity::wrap(&ctx.store, record, &Self::schema(), Identity::Detached);
        Self::from_entity(ctx, entity, false)
    }

    /// Load a group record by kind and primary key.
    pub fn load(ctx: &AppContext, kind: &str, pk: &str) -> Result<Self> {
        let record = ctx.store.get(kind, &Query::pk(pk), Identity::Detached)?;
        Ok(Self::wrap(ctx, record))
    }

    fn from_entity(ctx: &AppContext, entity: Entity, loaded: bool) -> Self {
        Self {
            ctx: ctx.clone(),
            entity,
            state: ReentrantMutex::new(RefCell::new(GroupState {
                loaded,
                members: Vec::new(),
                unresolved: Vec::new(),
            })),
        }
    }

    /// Run `f` on the loaded state under the group lock.
    fn with_state<R>(&self, f: impl FnOnce(&mut GroupState<M>) -> R) -> R {
        let guard = self.state.lock();
        self.ensure_loaded(&guard);
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Run a mutation under the group lock and write the resulting member
    /// list back to the record before releasing it.
    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Arc<M>>) -> R) -> R {
        self.with_state(|state| {
            let result = f(&mut state.members);
            self.persist_refs(&state.members);
            result
        })
    }

    fn ensure_loaded(&self, cell: &RefCell<GroupState<M>>) {
        if cell.borrow().loaded {
            return;
        }

        let stored: Vec<MemberRef> = self.entity.get_or_default(MEMBERS_FIELD);
        let mut members = Vec::with_capacity(stored.len());
        let mut unresolved = Vec::new();
        for member_ref in stored {
            match resolve::<M>(&self.ctx, &member_ref) {
                Ok(member) => members.push(Arc::new(member)),
                Err(e) => {
                    tracing::warn!(
                        group = %self.entity.pk(),
                        member = %member_ref,
                        "skipping group member: {}",
                        e
                    );
                    unresolved.push(member_ref);
                }
            }
        }

        if !unresolved.is_empty() {
            self.persist_refs(&members);
        }
        let mut state = cell.borrow_mut();
        state.members = members;
        state.unresolved = unresolved;
        state.loaded = true;
    }

    fn persist_refs(&self, members: &[Arc<M>]) {
        let refs: Vec<MemberRef> = members.iter().map(|m| MemberRef::of(m.as_ref())).collect();
        self.entity.set(MEMBERS_FIELD, json!(refs));
    }

    /// Append a member.
    pub fn add(&self, member: Arc<M>) {
        self.mutate(|members| members.push(member));
    }

    /// Remove and return the member at `index`.
    pub fn remove(&self, index: usize) -> Result<Arc<M>> {
        self.mutate(|members| {
            if index < members.len() {
                Ok(members.remove(index))
            } else {
                Err(Error::IndexOutOfRange {
                    index,
                    len: members.len(),
                })
            }
        })
    }

    pub fn clear(&self) {
        self.mutate(|members| members.clear());
    }

    /// Replace every member at once.
    pub fn replace(&self, new_members: Vec<Arc<M>>) {
        self.mutate(|members| *members = new_members);
    }

    /// Swap the members at two indices.
    pub fn swap(&self, a: usize, b: usize) -> Result<()> {
        self.mutate(|members| {
            let len = members.len();
            for index in [a, b] {
                if index >= len {
                    return Err(Error::IndexOutOfRange { index, len });
                }
            }
            members.swap(a, b);
            Ok(())
        })
    }

    /// Move the member at `from` so it ends up at index `to`.
    pub fn move_member(&self, from: usize, to: usize) -> Result<()> {
        self.mutate(|members| {
            let len = members.len();
            for index in [from, to] {
                if index >= len {
                    return Err(Error::IndexOutOfRange { index, len });
                }
            }
            let member = members.remove(from);
            members.insert(to, member);
            Ok(())
        })
    }

    /// Snapshot of the current members.
    pub fn members(&self) -> Vec<Arc<M>> {
        self.with_state(|state| state.members.clone())
    }

    pub fn get(&self, index: usize) -> Option<Arc<M>> {
        self.with_state(|state| state.members.get(index).cloned())
    }

    pub fn len(&self) -> usize {
        self.with_state(|state| state.members.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored references that could not be materialized on load.
    pub fn unresolved(&self) -> Vec<MemberRef> {
        self.with_state(|state| state.unresolved.clone())
    }

    /// The persisted member list as currently held by the record.
    pub fn member_refs(&self) -> Vec<MemberRef> {
        self.with_state(|_| self.entity.get_or_default(MEMBERS_FIELD))
    }

    /// Save every member, then the group record.
    pub fn save_all(&self, commit: bool) -> Result<()> {
        let _guard = self.state.lock();
        for member in self.members() {
            member.save(false)?;
        }
        self.entity.save(commit)
    }

    /// Delete every member (through [`Member::purge`]) and the group record.
    pub fn purge(&self, commit: bool) -> Result<()> {
        let _guard = self.state.lock();
        for member in self.members() {
            member.purge()?;
        }
        self.entity.delete(commit)
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }
}

impl<M: Member> Persistent for OrderedGroup<M> {
    fn entity(&self) -> &Entity {
        &self.entity
    }
}

impl<M: Member> std::fmt::Debug for OrderedGroup<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedGroup")
            .field("kind", &self.entity.kind())
            .field("pk", &self.entity.pk())
            .field("members", &self.entity.value(MEMBERS_FIELD))
            .finish()
    }
}
