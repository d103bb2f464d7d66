//! Named broadcast groups of WebSocket connections.
//!
//! # Responsibilities
//! - Register groups by unique name
//! - Track membership by connection id
//! - Fan a message out to every member, isolating failing members
//! - Reap a group when its last member leaves
//!
//! # Design Decisions
//! - Broadcast works on a snapshot of members; no map guard is held while sending
//! - Broadcast goes through the registry so members dropped on failure reap the group too
//! - Join and reap both run under the registry entry lock, so a join never
//!   lands in a group that is being removed
//! - Visibility is advisory: callers decide whether a private group may be joined

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::net::connection::ConnectionId;
use crate::observability::metrics;
use crate::websocket::connection::{encode, EncoderSettings, WebSocketConnection};
use crate::websocket::frame::Opcode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl std::str::FromStr for Visibility {
    type Err = GroupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            _ => Err(GroupError::InvalidVisibility(s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupError {
    #[error("Group '{0}' already exists")]
    AlreadyExists(String),
    #[error("Unknown visibility '{0}'")]
    InvalidVisibility(String),
}

/// A broadcast group.
#[derive(Debug)]
pub struct Group {
    name: String,
    visibility: Visibility,
    key: String,
    owner: Option<String>,
    members: DashMap<ConnectionId, WebSocketConnection>,
}

impl Group {
    pub fn new(name: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            name: name.into(),
            visibility,
            key: Uuid::new_v4().simple().to_string(),
            owner: None,
            members: DashMap::new(),
        }
    }

    /// A group named after its generated key.
    pub fn keyed(visibility: Visibility) -> Self {
        let group = Self::new(String::new(), visibility);
        Self {
            name: group.key.clone(),
            ..group
        }
    }

    /// Record the session that created the group.
    pub fn with_owner(mut self, session_id: impl Into<String>) -> Self {
        self.owner = Some(session_id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Returns false if the connection was already a member.
    pub fn add_client(&self, connection: WebSocketConnection) -> bool {
        self.members.insert(connection.id(), connection).is_none()
    }

    /// Membership only shrinks through [`GroupRegistry`], which reaps empty groups.
    fn remove_client(&self, id: ConnectionId) -> bool {
        self.members.remove(&id).is_some()
    }

    pub fn client_exists(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member_ids(&self) -> Vec<ConnectionId> {
        self.members.iter().map(|m| *m.key()).collect()
    }

    /// Queue one message for every member except `except`.
    ///
    /// The message is encoded once per distinct encoder setting. Members whose
    /// send fails are closed and dropped. Returns the number of deliveries.
    fn deliver(&self, opcode: Opcode, payload: &[u8], except: Option<ConnectionId>) -> usize {
        let snapshot: Vec<WebSocketConnection> =
            self.members.iter().map(|m| m.value().clone()).collect();

        let mut encoded: Option<(EncoderSettings, Arc<[u8]>)> = None;
        let mut delivered = 0;
        let mut failed = 0;
        for member in snapshot {
            if Some(member.id()) == except {
                continue;
            }
            let settings = member.encoder();
            let frames = match &encoded {
                Some((cached, frames)) if *cached == settings => Arc::clone(frames),
                _ => match encode(opcode, payload, settings) {
                    Ok(frames) => {
                        encoded = Some((settings, Arc::clone(&frames)));
                        frames
                    }
                    Err(e) => {
                        tracing::warn!(group = %self.name, error = %e, "Broadcast message not encodable");
                        return delivered;
                    }
                },
            };
            match member.send_frames(frames) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(
                        group = %self.name,
                        connection_id = %member.id(),
                        error = %e,
                        "Dropping group member after failed send"
                    );
                    member.close();
                    self.remove_client(member.id());
                    failed += 1;
                }
            }
        }
        metrics::record_broadcast_failures(failed);
        delivered
    }
}

/// Outcome of [`GroupRegistry::join`].
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Joined(Arc<Group>),
    NoSuchGroup,
}

/// Outcome of [`GroupRegistry::leave`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub was_member: bool,
    pub group_removed: bool,
}

/// Process-wide registry of groups by name.
#[derive(Debug, Clone, Default)]
pub struct GroupRegistry {
    groups: Arc<DashMap<String, Arc<Group>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group under its name.
    pub fn add_group(&self, group: Group) -> Result<Arc<Group>, GroupError> {
        let group = match self.groups.entry(group.name.clone()) {
            Entry::Occupied(_) => return Err(GroupError::AlreadyExists(group.name)),
            Entry::Vacant(slot) => Arc::clone(slot.insert(Arc::new(group)).value()),
        };
        tracing::debug!(group = %group.name(), visibility = ?group.visibility(), "Group added");
        metrics::record_group_count(self.groups.len());
        Ok(group)
    }

    pub fn remove_group(&self, name: &str) -> Option<Arc<Group>> {
        let removed = self.groups.remove(name).map(|(_, g)| g);
        if removed.is_some() {
            tracing::debug!(group = %name, "Group removed");
            metrics::record_group_count(self.groups.len());
        }
        removed
    }

    pub fn get_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.get(name).map(|g| Arc::clone(g.value()))
    }

    pub fn group_exists(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Group names, sorted.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.iter().map(|g| g.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Send binary `data` to every member of `name` except `except`.
    ///
    /// Returns the number of members the message was queued for.
    pub fn broadcast(&self, name: &str, data: &[u8], except: Option<ConnectionId>) -> usize {
        self.broadcast_message(name, Opcode::Binary, data, except)
    }

    pub fn broadcast_text(&self, name: &str, text: &str, except: Option<ConnectionId>) -> usize {
        self.broadcast_message(name, Opcode::Text, text.as_bytes(), except)
    }

    /// Members dropped for a failed send count as leaving: the group is
    /// reaped if none remain.
    pub fn broadcast_message(
        &self,
        name: &str,
        opcode: Opcode,
        payload: &[u8],
        except: Option<ConnectionId>,
    ) -> usize {
        let Some(group) = self.get_group(name) else {
            return 0;
        };
        let delivered = group.deliver(opcode, payload, except);
        if group.is_empty() {
            self.reap(name);
        }
        delivered
    }

    /// Add `connection` to an existing group.
    pub fn join(&self, name: &str, connection: WebSocketConnection) -> JoinOutcome {
        match self.groups.get(name) {
            Some(group) => {
                group.add_client(connection);
                JoinOutcome::Joined(Arc::clone(group.value()))
            }
            None => JoinOutcome::NoSuchGroup,
        }
    }

    /// Add `connection` to a group, creating a public one if missing.
    pub fn join_or_create(&self, name: &str, connection: WebSocketConnection) -> Arc<Group> {
        let entry = self
            .groups
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Group::new(name, Visibility::Public)));
        entry.add_client(connection);
        let group = Arc::clone(entry.value());
        drop(entry);
        metrics::record_group_count(self.groups.len());
        group
    }

    /// Remove a member, reaping the group if it is now empty.
    pub fn leave(&self, name: &str, id: ConnectionId) -> LeaveOutcome {
        let was_member = self
            .groups
            .get(name)
            .is_some_and(|group| group.remove_client(id));

        LeaveOutcome {
            was_member,
            group_removed: self.reap(name),
        }
    }

    /// Remove `name` if it has no members.
    fn reap(&self, name: &str) -> bool {
        let removed = self
            .groups
            .remove_if(name, |_, group| group.is_empty())
            .is_some();
        if removed {
            tracing::debug!(group = %name, "Empty group reaped");
            metrics::record_group_count(self.groups.len());
        }
        removed
    }
}
