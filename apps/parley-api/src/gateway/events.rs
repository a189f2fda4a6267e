//! Wire formats: client actions in, server events out.
//!
//! Inbound frames are `{action, room, message?}`; outbound frames are
//! `{action, data}`. Both tag sets are closed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// A control frame sent by a connected client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientAction {
    /// Subscribe to the caller's personal room (`room` = own user id).
    JoinUser { room: String },
    JoinGuild { room: String },
    LeaveGuild { room: String },
    JoinChannel { room: String },
    LeaveChannel { room: String },
    StartTyping { room: String },
    StopTyping { room: String },
    GetRequestCount {
        #[serde(default)]
        room: Option<String>,
    },
    JoinVoice {
        room: String,
        #[serde(default)]
        message: Option<VoiceStatePayload>,
    },
    LeaveVoice { room: String },
    MuteUser { room: String },
    UnmuteUser { room: String },
    DeafenUser { room: String },
    UndeafenUser { room: String },
}

/// Optional initial flags carried by `joinVoice`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStatePayload {
    #[serde(default)]
    pub is_muted: bool,
    #[serde(default)]
    pub is_deafened: bool,
}

/// Why an inbound frame was not turned into a [`ClientAction`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ClientAction {
    /// Every action tag a client may send.
    pub const TAGS: &'static [&'static str] = &[
        "joinUser",
        "joinGuild",
        "leaveGuild",
        "joinChannel",
        "leaveChannel",
        "startTyping",
        "stopTyping",
        "getRequestCount",
        "joinVoice",
        "leaveVoice",
        "muteUser",
        "unmuteUser",
        "deafenUser",
        "undeafenUser",
    ];

    /// Parse a text frame, separating unknown tags from malformed payloads.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let tag = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !Self::TAGS.contains(&tag) {
            return Err(FrameError::UnknownAction(tag.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// An event pushed to subscribed sessions. Serializes directly to the
/// outbound frame `{action, data}`.
///
/// Views produced by the REST layer (messages, channels, guilds, members,
/// friend requests) are opaque JSON here; the hub never looks inside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    NewMessage(Value),
    EditMessage(Value),
    /// Message id.
    DeleteMessage(String),
    NewChannel(Value),
    EditChannel(Value),
    /// Channel id.
    DeleteChannel(String),
    NewPrivateChannel(Value),
    EditGuild(Value),
    /// Guild id.
    DeleteGuild(String),
    /// Guild id the receiving user was kicked or banned from.
    RemoveFromGuild(String),
    AddMember(Value),
    /// Member user id.
    RemoveMember(String),
    AddFriend(Value),
    /// Former friend's user id.
    RemoveFriend(String),
    AddRequest(Value),
    SendRequest(Value),
    UserOnline(String),
    UserOffline(String),
    NewNotification(NotificationView),
    NewDmNotification(NotificationView),
    #[serde(rename = "addToTyping")]
    AddToTyping(String),
    #[serde(rename = "removeFromTyping")]
    RemoveFromTyping(String),
    VcAddMember(VoiceMemberView),
    VcUpdateMember(VoiceMemberView),
    VcRemoveMember(VoiceMemberView),
    ToggleOnline(bool),
    #[serde(rename = "requestCount")]
    RequestCount(i64),
}

impl ServerEvent {
    /// The wire tag of this event.
    pub fn action(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => "new_message",
            Self::EditMessage(_) => "edit_message",
            Self::DeleteMessage(_) => "delete_message",
            Self::NewChannel(_) => "new_channel",
            Self::EditChannel(_) => "edit_channel",
            Self::DeleteChannel(_) => "delete_channel",
            Self::NewPrivateChannel(_) => "new_private_channel",
            Self::EditGuild(_) => "edit_guild",
            Self::DeleteGuild(_) => "delete_guild",
            Self::RemoveFromGuild(_) => "remove_from_guild",
            Self::AddMember(_) => "add_member",
            Self::RemoveMember(_) => "remove_member",
            Self::AddFriend(_) => "add_friend",
            Self::RemoveFriend(_) => "remove_friend",
            Self::AddRequest(_) => "add_request",
            Self::SendRequest(_) => "send_request",
            Self::UserOnline(_) => "user_online",
            Self::UserOffline(_) => "user_offline",
            Self::NewNotification(_) => "new_notification",
            Self::NewDmNotification(_) => "new_dm_notification",
            Self::AddToTyping(_) => "addToTyping",
            Self::RemoveFromTyping(_) => "removeFromTyping",
            Self::VcAddMember(_) => "vc_add_member",
            Self::VcUpdateMember(_) => "vc_update_member",
            Self::VcRemoveMember(_) => "vc_remove_member",
            Self::ToggleOnline(_) => "toggle_online",
            Self::RequestCount(_) => "requestCount",
        }
    }
}

/// Unread marker pushed when a message lands in a channel the receiver is
/// not looking at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub channel_id: String,
    /// Whatever triggered the notification (usually the channel or message
    /// view).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
}

/// A user's voice-channel state as shown to the guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMemberView {
    pub id: String,
    pub username: String,
    pub is_muted: bool,
    pub is_deafened: bool,
}
