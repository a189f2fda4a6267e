//! Session and room bookkeeping owned by the hub task.
//!
//! Three indexes kept in lockstep: session id → entry, user id → session
//! ids, and room id → session ids. Nothing here is shared; the hub is the
//! only caller, so plain `HashMap`s suffice.

use std::collections::{HashMap, HashSet};

use super::session::SessionHandle;

struct SessionEntry {
    handle: SessionHandle,
    rooms: HashSet<String>,
}

/// A session taken out of the registry, with the rooms it was in.
pub struct RemovedSession {
    pub handle: SessionHandle,
    pub rooms: HashSet<String>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, SessionEntry>,
    by_user: HashMap<String, HashSet<String>>,
    rooms: HashMap<String, HashSet<String>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. Returns `false` (and changes nothing) if the id is
    /// already registered.
    pub fn insert(&mut self, handle: SessionHandle) -> bool {
        if self.sessions.contains_key(&handle.id) {
            return false;
        }
        self.by_user
            .entry(handle.user_id.clone())
            .or_default()
            .insert(handle.id.clone());
        self.sessions.insert(
            handle.id.clone(),
            SessionEntry {
                handle,
                rooms: HashSet::new(),
            },
        );
        true
    }

    /// Remove a session from every index. Rooms left empty are dropped.
    pub fn remove(&mut self, session_id: &str) -> Option<RemovedSession> {
        let entry = self.sessions.remove(session_id)?;

        for room in &entry.rooms {
            self.detach(room, session_id);
        }
        if let Some(ids) = self.by_user.get_mut(&entry.handle.user_id) {
            ids.remove(session_id);
            if ids.is_empty() {
                self.by_user.remove(&entry.handle.user_id);
            }
        }

        Some(RemovedSession {
            handle: entry.handle,
            rooms: entry.rooms,
        })
    }

    /// Returns `true` if the session was added to the room; `false` if it
    /// was already there or is not registered.
    pub fn subscribe(&mut self, session_id: &str, room: &str) -> bool {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if !entry.rooms.insert(room.to_string()) {
            return false;
        }
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(session_id.to_string());
        true
    }

    /// Returns `true` if the session was in the room.
    pub fn unsubscribe(&mut self, session_id: &str, room: &str) -> bool {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if !entry.rooms.remove(room) {
            return false;
        }
        self.detach(room, session_id);
        true
    }

    fn detach(&mut self, room: &str, session_id: &str) {
        if let Some(members) = self.rooms.get_mut(room) {
            members.remove(session_id);
            if members.is_empty() {
                self.rooms.remove(room);
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionHandle> {
        self.sessions.get(session_id).map(|e| &e.handle)
    }

    /// Handles of every session subscribed to `room`.
    pub fn room_members(&self, room: &str) -> Vec<SessionHandle> {
        self.rooms
            .get(room)
            .into_iter()
            .flatten()
            .filter_map(|id| self.sessions.get(id))
            .map(|e| e.handle.clone())
            .collect()
    }

    pub fn is_subscribed(&self, session_id: &str, room: &str) -> bool {
        self.sessions
            .get(session_id)
            .is_some_and(|e| e.rooms.contains(room))
    }

    /// Whether any of the user's sessions is subscribed to `room`.
    pub fn user_in_room(&self, user_id: &str, room: &str) -> bool {
        self.by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .any(|id| self.is_subscribed(id, room))
    }

    /// The username cached on any of the user's live sessions.
    pub fn username_of(&self, user_id: &str) -> Option<&str> {
        let id = self.by_user.get(user_id)?.iter().next()?;
        self.sessions.get(id).map(|e| e.handle.username.as_str())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Take every session out, leaving the registry empty.
    pub fn drain(&mut self) -> Vec<SessionHandle> {
        self.by_user.clear();
        self.rooms.clear();
        self.sessions.drain().map(|(_, e)| e.handle).collect()
    }
}
