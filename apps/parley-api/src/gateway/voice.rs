//! In-memory voice-channel membership.
//!
//! Each (user, guild) pair is either absent or present with a muted and a
//! deafened flag. Every mutation reports the transition it caused so the
//! hub can emit exactly one event per real change.

use std::collections::HashMap;

use super::events::{ServerEvent, VoiceMemberView};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceFlags {
    pub muted: bool,
    pub deafened: bool,
}

/// A partial flag update (`muteUser`, `undeafenUser`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoicePatch {
    pub muted: Option<bool>,
    pub deafened: Option<bool>,
}

impl VoicePatch {
    pub fn full(flags: VoiceFlags) -> Self {
        Self {
            muted: Some(flags.muted),
            deafened: Some(flags.deafened),
        }
    }

    fn apply(self, flags: VoiceFlags) -> VoiceFlags {
        VoiceFlags {
            muted: self.muted.unwrap_or(flags.muted),
            deafened: self.deafened.unwrap_or(flags.deafened),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceTransition {
    Added(VoiceFlags),
    Updated(VoiceFlags),
    Removed(VoiceFlags),
}

impl VoiceTransition {
    /// The guild-room event announcing this transition.
    pub fn to_event(self, user_id: &str, username: &str) -> ServerEvent {
        let view = |flags: VoiceFlags| VoiceMemberView {
            id: user_id.to_string(),
            username: username.to_string(),
            is_muted: flags.muted,
            is_deafened: flags.deafened,
        };
        match self {
            Self::Added(flags) => ServerEvent::VcAddMember(view(flags)),
            Self::Updated(flags) => ServerEvent::VcUpdateMember(view(flags)),
            Self::Removed(flags) => ServerEvent::VcRemoveMember(view(flags)),
        }
    }
}

#[derive(Default)]
pub struct VoiceStates {
    /// (user id, guild id) → flags
    members: HashMap<(String, String), VoiceFlags>,
}

impl VoiceStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a guild's voice channel. Joining again with the same flags is a
    /// no-op; with different flags it is an update.
    pub fn join(&mut self, user_id: &str, guild_id: &str, flags: VoiceFlags) -> Option<VoiceTransition> {
        let key = (user_id.to_string(), guild_id.to_string());
        match self.members.insert(key, flags) {
            None => Some(VoiceTransition::Added(flags)),
            Some(previous) if previous == flags => None,
            Some(_) => Some(VoiceTransition::Updated(flags)),
        }
    }

    /// Change flags on a present member. Absent members and unchanged flags
    /// produce nothing.
    pub fn update(&mut self, user_id: &str, guild_id: &str, patch: VoicePatch) -> Option<VoiceTransition> {
        let flags = self
            .members
            .get_mut(&(user_id.to_string(), guild_id.to_string()))?;
        let next = patch.apply(*flags);
        if next == *flags {
            return None;
        }
        *flags = next;
        Some(VoiceTransition::Updated(next))
    }

    pub fn leave(&mut self, user_id: &str, guild_id: &str) -> Option<VoiceTransition> {
        self.members
            .remove(&(user_id.to_string(), guild_id.to_string()))
            .map(VoiceTransition::Removed)
    }

    pub fn get(&self, user_id: &str, guild_id: &str) -> Option<VoiceFlags> {
        self.members
            .get(&(user_id.to_string(), guild_id.to_string()))
            .copied()
    }

    /// Guilds whose voice channel the user is in.
    pub fn guilds_of(&self, user_id: &str) -> Vec<String> {
        self.members
            .keys()
            .filter(|(u, _)| u == user_id)
            .map(|(_, g)| g.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MUTED: VoiceFlags = VoiceFlags {
        muted: true,
        deafened: false,
    };

    #[test]
    fn join_then_rejoin_same_state_is_idempotent() {
        let mut voice = VoiceStates::new();
        assert_eq!(
            voice.join("u1", "g1", VoiceFlags::default()),
            Some(VoiceTransition::Added(VoiceFlags::default()))
        );
        assert_eq!(voice.join("u1", "g1", VoiceFlags::default()), None);
        assert_eq!(voice.len(), 1);
    }

    #[test]
    fn rejoin_with_new_flags_is_an_update() {
        let mut voice = VoiceStates::new();
        voice.join("u1", "g1", VoiceFlags::default());
        assert_eq!(
            voice.join("u1", "g1", MUTED),
            Some(VoiceTransition::Updated(MUTED))
        );
        assert_eq!(voice.get("u1", "g1"), Some(MUTED));
    }

    #[test]
    fn update_only_reports_real_changes() {
        let mut voice = VoiceStates::new();
        assert_eq!(voice.update("u1", "g1", VoicePatch::full(MUTED)), None);

        voice.join("u1", "g1", VoiceFlags::default());
        let mute = VoicePatch {
            muted: Some(true),
            deafened: None,
        };
        assert_eq!(
            voice.update("u1", "g1", mute),
            Some(VoiceTransition::Updated(MUTED))
        );
        assert_eq!(voice.update("u1", "g1", mute), None);

        let deafen = VoicePatch {
            muted: None,
            deafened: Some(true),
        };
        assert_eq!(
            voice.update("u1", "g1", deafen),
            Some(VoiceTransition::Updated(VoiceFlags {
                muted: true,
                deafened: true
            }))
        );
    }

    #[test]
    fn leave_removes_and_is_noop_when_absent() {
        let mut voice = VoiceStates::new();
        voice.join("u1", "g1", MUTED);
        assert_eq!(voice.leave("u1", "g1"), Some(VoiceTransition::Removed(MUTED)));
        assert_eq!(voice.leave("u1", "g1"), None);
        assert!(voice.is_empty());
    }

    #[test]
    fn state_is_per_user_and_guild() {
        let mut voice = VoiceStates::new();
        voice.join("u1", "g1", VoiceFlags::default());
        voice.join("u1", "g2", MUTED);
        voice.join("u2", "g1", VoiceFlags::default());

        let mut guilds = voice.guilds_of("u1");
        guilds.sort();
        assert_eq!(guilds, vec!["g1".to_string(), "g2".to_string()]);
        assert_eq!(voice.len(), 3);
    }

    #[test]
    fn transition_maps_to_guild_event() {
        let event = VoiceTransition::Removed(MUTED).to_event("u1", "alice");
        assert_eq!(
            event,
            ServerEvent::VcRemoveMember(VoiceMemberView {
                id: "u1".into(),
                username: "alice".into(),
                is_muted: true,
                is_deafened: false,
            })
        );
    }
}
