//! Push notifications for the REST layer.
//!
//! One method per outbound action. Each builds the event and hands it to the
//! hub; failures are logged here and never reach the calling handler.

use serde::Serialize;
use serde_json::Value;

use super::events::{NotificationView, ServerEvent};
use super::hub::HubHandle;

#[derive(Clone)]
pub struct Emitter {
    hub: HubHandle,
}

impl Emitter {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    async fn emit(&self, room: &str, event: ServerEvent) {
        let action = event.action();
        if let Err(err) = self.hub.broadcast(room, event).await {
            tracing::warn!(room = %room, action, error = %err, "event not emitted");
        }
    }

    async fn emit_each(&self, rooms: &[String], event: ServerEvent) {
        for room in rooms {
            self.emit(room, event.clone()).await;
        }
    }

    fn view<T: Serialize>(action: &str, view: &T) -> Option<Value> {
        match serde_json::to_value(view) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(action, error = %err, "failed to serialize event view");
                None
            }
        }
    }

    // -- messages (channel room) ----------------------------------------------

    pub async fn new_message<T: Serialize>(&self, channel_id: &str, message: &T) {
        if let Some(data) = Self::view("new_message", message) {
            self.emit(channel_id, ServerEvent::NewMessage(data)).await;
        }
    }

    pub async fn edit_message<T: Serialize>(&self, channel_id: &str, message: &T) {
        if let Some(data) = Self::view("edit_message", message) {
            self.emit(channel_id, ServerEvent::EditMessage(data)).await;
        }
    }

    pub async fn delete_message(&self, channel_id: &str, message_id: &str) {
        self.emit(channel_id, ServerEvent::DeleteMessage(message_id.to_string()))
            .await;
    }

    // -- channels (guild room) ------------------------------------------------

    pub async fn new_channel<T: Serialize>(&self, guild_id: &str, channel: &T) {
        if let Some(data) = Self::view("new_channel", channel) {
            self.emit(guild_id, ServerEvent::NewChannel(data)).await;
        }
    }

    pub async fn edit_channel<T: Serialize>(&self, guild_id: &str, channel: &T) {
        if let Some(data) = Self::view("edit_channel", channel) {
            self.emit(guild_id, ServerEvent::EditChannel(data)).await;
        }
    }

    pub async fn delete_channel(&self, guild_id: &str, channel_id: &str) {
        self.emit(guild_id, ServerEvent::DeleteChannel(channel_id.to_string()))
            .await;
    }

    /// A new DM or private channel, pushed to each member's own room.
    pub async fn new_private_channel<T: Serialize>(&self, member_ids: &[String], channel: &T) {
        if let Some(data) = Self::view("new_private_channel", channel) {
            self.emit_each(member_ids, ServerEvent::NewPrivateChannel(data))
                .await;
        }
    }

    // -- guilds ---------------------------------------------------------------

    pub async fn edit_guild<T: Serialize>(&self, guild_id: &str, guild: &T) {
        if let Some(data) = Self::view("edit_guild", guild) {
            self.emit(guild_id, ServerEvent::EditGuild(data)).await;
        }
    }

    /// Goes to every member's user room: members not currently looking at
    /// the guild still need to drop it from their list.
    pub async fn delete_guild(&self, guild_id: &str, member_ids: &[String]) {
        self.emit_each(member_ids, ServerEvent::DeleteGuild(guild_id.to_string()))
            .await;
    }

    /// Tell a kicked or banned user they are out.
    pub async fn remove_from_guild(&self, user_id: &str, guild_id: &str) {
        self.emit(user_id, ServerEvent::RemoveFromGuild(guild_id.to_string()))
            .await;
    }

    pub async fn add_member<T: Serialize>(&self, guild_id: &str, member: &T) {
        if let Some(data) = Self::view("add_member", member) {
            self.emit(guild_id, ServerEvent::AddMember(data)).await;
        }
    }

    pub async fn remove_member(&self, guild_id: &str, user_id: &str) {
        self.emit(guild_id, ServerEvent::RemoveMember(user_id.to_string()))
            .await;
    }

    // -- friends (user room) --------------------------------------------------

    pub async fn add_friend<T: Serialize>(&self, user_id: &str, friend: &T) {
        if let Some(data) = Self::view("add_friend", friend) {
            self.emit(user_id, ServerEvent::AddFriend(data)).await;
        }
    }

    pub async fn remove_friend(&self, user_id: &str, friend_id: &str) {
        self.emit(user_id, ServerEvent::RemoveFriend(friend_id.to_string()))
            .await;
    }

    /// An incoming friend request, to the receiver.
    pub async fn add_request<T: Serialize>(&self, user_id: &str, request: &T) {
        if let Some(data) = Self::view("add_request", request) {
            self.emit(user_id, ServerEvent::AddRequest(data)).await;
        }
    }

    /// An outgoing friend request, to the sender's other devices.
    pub async fn send_request<T: Serialize>(&self, user_id: &str, request: &T) {
        if let Some(data) = Self::view("send_request", request) {
            self.emit(user_id, ServerEvent::SendRequest(data)).await;
        }
    }

    // -- notifications --------------------------------------------------------

    /// Unread marker for a guild channel. `room` is the guild id, or a user
    /// id to reach a single member.
    pub async fn new_notification(&self, room: &str, channel_id: &str, source: Option<Value>) {
        let view = NotificationView {
            channel_id: channel_id.to_string(),
            source,
        };
        self.emit(room, ServerEvent::NewNotification(view)).await;
    }

    pub async fn new_dm_notification(&self, user_id: &str, channel_id: &str, source: Option<Value>) {
        let view = NotificationView {
            channel_id: channel_id.to_string(),
            source,
        };
        self.emit(user_id, ServerEvent::NewDmNotification(view)).await;
    }

    // -- presence -------------------------------------------------------------

    /// Appear online or invisible. Session counting is unaffected; only the
    /// announcements to friends and guilds are suppressed.
    pub async fn toggle_online(&self, user_id: &str, visible: bool) {
        if let Err(err) = self.hub.set_visibility(user_id, visible).await {
            tracing::warn!(user_id = %user_id, error = %err, "visibility not updated");
        }
    }
}
