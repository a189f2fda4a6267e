//! Per-user presence counting.
//!
//! Presence is per-**user**, not per-session: a user is online while at
//! least one of their sessions is registered. Only the 0→1 and 1→0
//! transitions are reported. The hub serializes every call, so there is no
//! locking here.

use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct PresenceIndex {
    /// Active session count per user. Entries never hold zero.
    counts: HashMap<String, usize>,
    /// Users who asked to appear offline. An entry outlives the user's
    /// sessions, so a reconnect stays hidden; only a visible toggle clears
    /// it. Bounded by the number of users who ever went invisible.
    hidden: HashSet<String>,
}

impl PresenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new session. Returns `true` if it is the user's first.
    pub fn increment(&mut self, user_id: &str) -> bool {
        let count = self.counts.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Uncount a session. Returns `true` if it was the user's last. Unknown
    /// users are ignored.
    pub fn decrement(&mut self, user_id: &str) -> bool {
        let Some(count) = self.counts.get_mut(user_id) else {
            return false;
        };
        *count -= 1;
        if *count == 0 {
            self.counts.remove(user_id);
            return true;
        }
        false
    }

    pub fn count(&self, user_id: &str) -> usize {
        self.counts.get(user_id).copied().unwrap_or(0)
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.counts.contains_key(user_id)
    }

    /// Record whether the user wants their presence announced. Returns `true`
    /// if the setting changed.
    pub fn set_visible(&mut self, user_id: &str, visible: bool) -> bool {
        if visible {
            self.hidden.remove(user_id)
        } else {
            self.hidden.insert(user_id.to_string())
        }
    }

    pub fn is_visible(&self, user_id: &str) -> bool {
        !self.hidden.contains(user_id)
    }

    /// Number of users with at least one session.
    pub fn online_users(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_session_reports_transition() {
        let mut presence = PresenceIndex::new();
        assert!(presence.increment("u1"));
        assert!(presence.is_online("u1"));
        assert_eq!(presence.count("u1"), 1);
    }

    #[test]
    fn multi_session_no_offline_until_all_disconnect() {
        let mut presence = PresenceIndex::new();

        assert!(presence.increment("u1"));
        assert!(!presence.increment("u1"));
        assert_eq!(presence.count("u1"), 2);

        // First session disconnects, still online.
        assert!(!presence.decrement("u1"));
        assert!(presence.is_online("u1"));

        // Last session disconnects.
        assert!(presence.decrement("u1"));
        assert!(!presence.is_online("u1"));
        assert_eq!(presence.online_users(), 0);
    }

    #[test]
    fn decrement_unknown_user_is_ignored() {
        let mut presence = PresenceIndex::new();
        assert!(!presence.decrement("ghost"));
        assert_eq!(presence.count("ghost"), 0);
    }

    #[test]
    fn hidden_survives_going_offline() {
        let mut presence = PresenceIndex::new();
        presence.increment("u1");
        assert!(presence.set_visible("u1", false));
        assert!(presence.decrement("u1"));

        presence.increment("u1");
        assert!(!presence.is_visible("u1"));

        assert!(presence.set_visible("u1", true));
        assert!(!presence.set_visible("u1", true));
        assert!(presence.is_visible("u1"));
    }

    #[test]
    fn reconnect_after_offline_is_a_new_transition() {
        let mut presence = PresenceIndex::new();
        presence.increment("u1");
        presence.decrement("u1");
        assert!(presence.increment("u1"));
    }

    #[test]
    fn count_matches_live_sessions_over_any_sequence() {
        let mut presence = PresenceIndex::new();
        let mut live = 0usize;
        let mut online_events = 0;
        let mut offline_events = 0;

        // +, +, -, +, -, -, +, -
        for step in [1, 1, -1, 1, -1, -1, 1, -1] {
            if step > 0 {
                live += 1;
                if presence.increment("u1") {
                    online_events += 1;
                }
            } else {
                live -= 1;
                if presence.decrement("u1") {
                    offline_events += 1;
                }
            }
            assert_eq!(presence.count("u1"), live);
        }
        assert_eq!(online_events, 2);
        assert_eq!(offline_events, 2);
    }

    #[test]
    fn visibility_is_independent_of_count() {
        let mut presence = PresenceIndex::new();
        presence.increment("u1");

        assert!(presence.set_visible("u1", false));
        assert!(!presence.set_visible("u1", false));
        assert!(!presence.is_visible("u1"));
        assert_eq!(presence.count("u1"), 1);

        assert!(presence.set_visible("u1", true));
        assert!(presence.is_visible("u1"));
        assert!(presence.is_visible("never-seen"));
    }
}
