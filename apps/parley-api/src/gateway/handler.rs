//! Inbound frame dispatch: turn client actions into hub commands.
//!
//! Authorization for room subscriptions happens here, against the relation
//! store, before the hub is asked to do anything. Refusals and bad frames
//! are logged and dropped; they never end the session.

use crate::db::relations::RelationStore;

use super::events::{ClientAction, FrameError, ServerEvent};
use super::hub::{HubGone, HubHandle};
use super::session::SessionHandle;
use super::voice::{VoiceFlags, VoicePatch};

/// Parse and act on one text frame. Only a dead hub is reported back.
pub async fn handle_frame(
    hub: &HubHandle,
    relations: &dyn RelationStore,
    session: &SessionHandle,
    text: &str,
) -> Result<(), HubGone> {
    match ClientAction::parse(text) {
        Ok(action) => handle_action(hub, relations, session, action).await,
        Err(FrameError::UnknownAction(tag)) => {
            tracing::warn!(session_id = %session.id, action = %tag, "unknown action ignored");
            Ok(())
        }
        Err(FrameError::Malformed(err)) => {
            tracing::warn!(session_id = %session.id, error = %err, "malformed frame ignored");
            Ok(())
        }
    }
}

pub async fn handle_action(
    hub: &HubHandle,
    relations: &dyn RelationStore,
    session: &SessionHandle,
    action: ClientAction,
) -> Result<(), HubGone> {
    match action {
        ClientAction::JoinUser { room } => {
            if room != session.user_id {
                tracing::warn!(
                    session_id = %session.id,
                    user_id = %session.user_id,
                    room = %room,
                    "joinUser for another user refused"
                );
                return Ok(());
            }
            hub.subscribe(&session.id, &room).await
        }

        ClientAction::JoinGuild { room } => {
            match relations.is_guild_member(&session.user_id, &room).await {
                Ok(true) => hub.subscribe(&session.id, &room).await,
                Ok(false) => {
                    tracing::warn!(
                        session_id = %session.id,
                        user_id = %session.user_id,
                        guild_id = %room,
                        "joinGuild by non-member refused"
                    );
                    Ok(())
                }
                Err(err) => {
                    tracing::error!(guild_id = %room, ?err, "guild membership check failed");
                    Ok(())
                }
            }
        }
        ClientAction::LeaveGuild { room } => hub.unsubscribe(&session.id, &room).await,

        ClientAction::JoinChannel { room } => {
            match relations.can_view_channel(&session.user_id, &room).await {
                Ok(true) => {
                    hub.subscribe(&session.id, &room).await?;
                    if let Err(err) = relations.touch_last_seen(&session.user_id, &room).await {
                        tracing::error!(channel_id = %room, ?err, "last-seen update failed");
                    }
                    Ok(())
                }
                Ok(false) => {
                    tracing::warn!(
                        session_id = %session.id,
                        user_id = %session.user_id,
                        channel_id = %room,
                        "joinChannel without access refused"
                    );
                    Ok(())
                }
                Err(err) => {
                    tracing::error!(channel_id = %room, ?err, "channel access check failed");
                    Ok(())
                }
            }
        }
        ClientAction::LeaveChannel { room } => hub.unsubscribe(&session.id, &room).await,

        ClientAction::StartTyping { room } => {
            let event = ServerEvent::AddToTyping(session.username.clone());
            hub.relay(&session.id, &room, event).await
        }
        ClientAction::StopTyping { room } => {
            let event = ServerEvent::RemoveFromTyping(session.username.clone());
            hub.relay(&session.id, &room, event).await
        }

        ClientAction::GetRequestCount { .. } => {
            match relations.pending_request_count(&session.user_id).await {
                Ok(count) => {
                    hub.send_to(&session.id, ServerEvent::RequestCount(count))
                        .await
                }
                Err(err) => {
                    tracing::error!(user_id = %session.user_id, ?err, "request count lookup failed");
                    Ok(())
                }
            }
        }

        ClientAction::JoinVoice { room, message } => {
            let flags = message
                .map(|m| VoiceFlags {
                    muted: m.is_muted,
                    deafened: m.is_deafened,
                })
                .unwrap_or_default();
            hub.vc_join(&session.user_id, &room, flags).await
        }
        ClientAction::LeaveVoice { room } => hub.vc_leave(&session.user_id, &room).await,
        ClientAction::MuteUser { room } => {
            hub.vc_patch(&session.user_id, &room, muted(true)).await
        }
        ClientAction::UnmuteUser { room } => {
            hub.vc_patch(&session.user_id, &room, muted(false)).await
        }
        ClientAction::DeafenUser { room } => {
            hub.vc_patch(&session.user_id, &room, deafened(true)).await
        }
        ClientAction::UndeafenUser { room } => {
            hub.vc_patch(&session.user_id, &room, deafened(false)).await
        }
    }
}

fn muted(value: bool) -> VoicePatch {
    VoicePatch {
        muted: Some(value),
        deafened: None,
    }
}

fn deafened(value: bool) -> VoicePatch {
    VoicePatch {
        muted: None,
        deafened: Some(value),
    }
}
