//! The hub: one task that owns every room, session, presence count and voice
//! entry, driven by commands on a single intake channel.
//!
//! Callers talk to it through [`HubHandle`]. Nothing outside the hub task
//! ever touches its state, so none of it is locked.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bridge::envelope::BusEnvelope;
use crate::db::relations::RelationStore;

use super::events::ServerEvent;
use super::presence::PresenceIndex;
use super::registry::SessionRegistry;
use super::session::{EnqueueError, SessionHandle};
use super::voice::{VoiceFlags, VoicePatch, VoiceStates, VoiceTransition};

/// Where a broadcast came from. Only local broadcasts are republished to the
/// bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceOp {
    Join(VoiceFlags),
    Leave,
    Update(VoicePatch),
}

#[derive(Debug)]
pub enum HubCommand {
    Register {
        session: SessionHandle,
    },
    Unregister {
        session_id: String,
    },
    Subscribe {
        session_id: String,
        room: String,
    },
    Unsubscribe {
        session_id: String,
        room: String,
    },
    Broadcast {
        room: String,
        event: Arc<ServerEvent>,
        /// Session that must not receive this event.
        exclude: Option<String>,
        origin: Origin,
    },
    /// Broadcast on behalf of a session, which must be in the room and is
    /// left out of the fan-out.
    Relay {
        session_id: String,
        room: String,
        event: ServerEvent,
    },
    /// Deliver to one session only.
    Direct {
        session_id: String,
        event: ServerEvent,
    },
    Voice {
        user_id: String,
        guild_id: String,
        op: VoiceOp,
    },
    SetVisibility {
        user_id: String,
        visible: bool,
    },
    Snapshot {
        resp: oneshot::Sender<HubSnapshot>,
    },
    Shutdown,
}

/// Point-in-time counts of the hub's state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubSnapshot {
    pub sessions: usize,
    pub rooms: usize,
    pub online_users: usize,
    pub voice_members: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("hub is no longer running")]
pub struct HubGone;

impl<T> From<mpsc::error::SendError<T>> for HubGone {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        HubGone
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    async fn send(&self, cmd: HubCommand) -> Result<(), HubGone> {
        self.tx.send(cmd).await?;
        Ok(())
    }

    pub async fn register(&self, session: SessionHandle) -> Result<(), HubGone> {
        self.send(HubCommand::Register { session }).await
    }

    pub async fn unregister(&self, session_id: &str) -> Result<(), HubGone> {
        self.send(HubCommand::Unregister {
            session_id: session_id.to_string(),
        })
        .await
    }

    pub async fn subscribe(&self, session_id: &str, room: &str) -> Result<(), HubGone> {
        self.send(HubCommand::Subscribe {
            session_id: session_id.to_string(),
            room: room.to_string(),
        })
        .await
    }

    pub async fn unsubscribe(&self, session_id: &str, room: &str) -> Result<(), HubGone> {
        self.send(HubCommand::Unsubscribe {
            session_id: session_id.to_string(),
            room: room.to_string(),
        })
        .await
    }

    /// Fan an event out to a room and republish it to the bus.
    pub async fn broadcast(&self, room: &str, event: ServerEvent) -> Result<(), HubGone> {
        self.send(HubCommand::Broadcast {
            room: room.to_string(),
            event: Arc::new(event),
            exclude: None,
            origin: Origin::Local,
        })
        .await
    }

    /// Fan out an event that arrived from the bus. Never republished.
    pub async fn broadcast_remote(
        &self,
        room: &str,
        event: ServerEvent,
        exclude: Option<String>,
    ) -> Result<(), HubGone> {
        self.send(HubCommand::Broadcast {
            room: room.to_string(),
            event: Arc::new(event),
            exclude,
            origin: Origin::Remote,
        })
        .await
    }

    pub async fn relay(
        &self,
        session_id: &str,
        room: &str,
        event: ServerEvent,
    ) -> Result<(), HubGone> {
        self.send(HubCommand::Relay {
            session_id: session_id.to_string(),
            room: room.to_string(),
            event,
        })
        .await
    }

    pub async fn send_to(&self, session_id: &str, event: ServerEvent) -> Result<(), HubGone> {
        self.send(HubCommand::Direct {
            session_id: session_id.to_string(),
            event,
        })
        .await
    }

    async fn voice(&self, user_id: &str, guild_id: &str, op: VoiceOp) -> Result<(), HubGone> {
        self.send(HubCommand::Voice {
            user_id: user_id.to_string(),
            guild_id: guild_id.to_string(),
            op,
        })
        .await
    }

    pub async fn vc_join(
        &self,
        user_id: &str,
        guild_id: &str,
        flags: VoiceFlags,
    ) -> Result<(), HubGone> {
        self.voice(user_id, guild_id, VoiceOp::Join(flags)).await
    }

    pub async fn vc_leave(&self, user_id: &str, guild_id: &str) -> Result<(), HubGone> {
        self.voice(user_id, guild_id, VoiceOp::Leave).await
    }

    /// Replace both flags on a present member.
    pub async fn vc_update(
        &self,
        user_id: &str,
        guild_id: &str,
        flags: VoiceFlags,
    ) -> Result<(), HubGone> {
        self.vc_patch(user_id, guild_id, VoicePatch::full(flags))
            .await
    }

    pub async fn vc_patch(
        &self,
        user_id: &str,
        guild_id: &str,
        patch: VoicePatch,
    ) -> Result<(), HubGone> {
        self.voice(user_id, guild_id, VoiceOp::Update(patch)).await
    }

    pub async fn set_visibility(&self, user_id: &str, visible: bool) -> Result<(), HubGone> {
        self.send(HubCommand::SetVisibility {
            user_id: user_id.to_string(),
            visible,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<HubSnapshot, HubGone> {
        let (resp, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot { resp }).await?;
        rx.await.map_err(|_| HubGone)
    }

    /// Ask the hub to stop. Commands already queued are still processed,
    /// then every session is closed.
    pub async fn shutdown(&self) {
        let _ = self.send(HubCommand::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Hub task
// ---------------------------------------------------------------------------

/// A presence change waiting for its relationship rooms to be looked up.
struct Announcement {
    user_id: String,
    event: ServerEvent,
}

pub struct Hub {
    node_id: String,
    registry: SessionRegistry,
    presence: PresenceIndex,
    voice: VoiceStates,
    announcer: mpsc::UnboundedSender<Announcement>,
    bus: Option<mpsc::Sender<BusEnvelope>>,
}

impl Hub {
    /// Start the hub task and its presence announcer.
    ///
    /// Local broadcasts are pushed to `bus` (if any) for the bridge to
    /// publish; a full bus queue drops the publication, never the local
    /// delivery.
    pub fn spawn(
        node_id: impl Into<String>,
        capacity: usize,
        relations: Arc<dyn RelationStore>,
        bus: Option<mpsc::Sender<BusEnvelope>>,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        // Unbounded: the hub task must never wait on the announcer, which in
        // turn waits on the relation store. A stalled store grows this queue
        // by one entry per presence transition.
        let (announce_tx, announce_rx) = mpsc::unbounded_channel();

        tokio::spawn(announce_presence(announce_rx, relations, tx.downgrade()));

        let hub = Hub {
            node_id: node_id.into(),
            registry: SessionRegistry::new(),
            presence: PresenceIndex::new(),
            voice: VoiceStates::new(),
            announcer: announce_tx,
            bus,
        };
        let task = tokio::spawn(hub.run(rx));
        (HubHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        tracing::info!(node_id = %self.node_id, "hub started");

        while let Some(cmd) = rx.recv().await {
            tracing::trace!(?cmd, "hub command");
            match cmd {
                HubCommand::Register { session } => self.register(session),
                HubCommand::Unregister { session_id } => self.drop_session(&session_id),
                HubCommand::Subscribe { session_id, room } => {
                    if self.registry.subscribe(&session_id, &room) {
                        tracing::debug!(session_id = %session_id, room = %room, "subscribed");
                    }
                }
                HubCommand::Unsubscribe { session_id, room } => {
                    self.unsubscribe(&session_id, &room)
                }
                HubCommand::Broadcast {
                    room,
                    event,
                    exclude,
                    origin,
                } => match origin {
                    Origin::Local => self.emit(&room, event, exclude),
                    Origin::Remote => {
                        // `toggle_online` only ever targets the user's own
                        // room, so the room is the user id.
                        if let ServerEvent::ToggleOnline(visible) = *event {
                            self.apply_visibility(&room, visible);
                        }
                        self.dispatch(&room, &event, exclude.as_deref());
                    }
                },
                HubCommand::Relay {
                    session_id,
                    room,
                    event,
                } => {
                    if !self.registry.is_subscribed(&session_id, &room) {
                        tracing::debug!(
                            session_id = %session_id,
                            room = %room,
                            action = event.action(),
                            "relay from outside room ignored"
                        );
                        continue;
                    }
                    self.emit(&room, Arc::new(event), Some(session_id));
                }
                HubCommand::Direct { session_id, event } => {
                    self.direct(&session_id, Arc::new(event))
                }
                HubCommand::Voice {
                    user_id,
                    guild_id,
                    op,
                } => self.apply_voice(&user_id, &guild_id, op),
                HubCommand::SetVisibility { user_id, visible } => {
                    self.set_visibility(&user_id, visible)
                }
                HubCommand::Snapshot { resp } => {
                    let _ = resp.send(self.snapshot());
                }
                HubCommand::Shutdown => {
                    tracing::info!("hub shutting down");
                    rx.close();
                }
            }
        }

        let sessions = self.registry.drain();
        for session in &sessions {
            session.close();
        }
        tracing::info!(closed = sessions.len(), "hub stopped");
    }

    fn register(&mut self, session: SessionHandle) {
        let user_id = session.user_id.clone();
        let session_id = session.id.clone();
        if !self.registry.insert(session) {
            tracing::debug!(session_id = %session_id, "duplicate register ignored");
            return;
        }

        if self.presence.increment(&user_id) && self.presence.is_visible(&user_id) {
            self.announce(&user_id, ServerEvent::UserOnline(user_id.clone()));
        }
        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            sessions = self.presence.count(&user_id),
            "session registered"
        );
    }

    /// Take a session out of every index, exactly once. Used for explicit
    /// unregisters and for evictions.
    fn drop_session(&mut self, session_id: &str) {
        let Some(removed) = self.registry.remove(session_id) else {
            return;
        };
        removed.handle.close();
        let user_id = removed.handle.user_id.clone();

        for guild_id in self.voice.guilds_of(&user_id) {
            if !self.registry.user_in_room(&user_id, &guild_id) {
                self.leave_voice(&user_id, &removed.handle.username, &guild_id);
            }
        }

        if self.presence.decrement(&user_id) && self.presence.is_visible(&user_id) {
            self.announce(&user_id, ServerEvent::UserOffline(user_id.clone()));
        }
        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            rooms = removed.rooms.len(),
            "session unregistered"
        );
    }

    fn unsubscribe(&mut self, session_id: &str, room: &str) {
        if !self.registry.unsubscribe(session_id, room) {
            return;
        }
        let Some(session) = self.registry.get(session_id) else {
            return;
        };
        let (user_id, username) = (session.user_id.clone(), session.username.clone());

        // A voice entry cannot outlive the user's presence in its guild room.
        if self.voice.get(&user_id, room).is_some() && !self.registry.user_in_room(&user_id, room)
        {
            self.leave_voice(&user_id, &username, room);
        }
    }

    fn apply_voice(&mut self, user_id: &str, guild_id: &str, op: VoiceOp) {
        let transition = match op {
            VoiceOp::Join(flags) => {
                if !self.registry.user_in_room(user_id, guild_id) {
                    tracing::debug!(
                        user_id = %user_id,
                        guild_id = %guild_id,
                        "voice join without guild subscription ignored"
                    );
                    return;
                }
                self.voice.join(user_id, guild_id, flags)
            }
            VoiceOp::Leave => self.voice.leave(user_id, guild_id),
            VoiceOp::Update(patch) => self.voice.update(user_id, guild_id, patch),
        };
        if let Some(transition) = transition {
            let username = self
                .registry
                .username_of(user_id)
                .unwrap_or(user_id)
                .to_string();
            self.emit_voice(user_id, &username, guild_id, transition);
        }
    }

    fn leave_voice(&mut self, user_id: &str, username: &str, guild_id: &str) {
        if let Some(transition) = self.voice.leave(user_id, guild_id) {
            self.emit_voice(user_id, username, guild_id, transition);
        }
    }

    fn emit_voice(
        &mut self,
        user_id: &str,
        username: &str,
        guild_id: &str,
        transition: VoiceTransition,
    ) {
        tracing::debug!(user_id = %user_id, guild_id = %guild_id, ?transition, "voice state changed");
        let event = transition.to_event(user_id, username);
        self.emit(guild_id, Arc::new(event), None);
    }

    fn set_visibility(&mut self, user_id: &str, visible: bool) {
        self.apply_visibility(user_id, visible);
        self.emit(user_id, Arc::new(ServerEvent::ToggleOnline(visible)), None);
    }

    /// Record the setting and announce the change if the user has sessions
    /// on this node. Runs for local toggles and for toggles relayed from
    /// other nodes.
    fn apply_visibility(&mut self, user_id: &str, visible: bool) {
        if self.presence.set_visible(user_id, visible) && self.presence.is_online(user_id) {
            let event = if visible {
                ServerEvent::UserOnline(user_id.to_string())
            } else {
                ServerEvent::UserOffline(user_id.to_string())
            };
            self.announce(user_id, event);
        }
    }

    fn announce(&self, user_id: &str, event: ServerEvent) {
        let announcement = Announcement {
            user_id: user_id.to_string(),
            event,
        };
        if self.announcer.send(announcement).is_err() {
            tracing::warn!(user_id = %user_id, "presence announcer is gone");
        }
    }

    /// Deliver locally and hand the event to the bridge.
    fn emit(&mut self, room: &str, event: Arc<ServerEvent>, exclude: Option<String>) {
        self.dispatch(room, &event, exclude.as_deref());

        let Some(bus) = &self.bus else {
            return;
        };
        let envelope = BusEnvelope::new(&self.node_id, room, exclude, (*event).clone());
        if let Err(err) = bus.try_send(envelope) {
            tracing::warn!(room = %room, error = %err, "bus publish dropped");
        }
    }

    /// Enqueue on every session in the room. Sessions that cannot take the
    /// event are evicted; the rest are unaffected.
    fn dispatch(&mut self, room: &str, event: &Arc<ServerEvent>, exclude: Option<&str>) {
        let mut evicted = Vec::new();

        for session in self.registry.room_members(room) {
            if exclude == Some(session.id.as_str()) {
                continue;
            }
            match session.enqueue(event.clone()) {
                Ok(()) => {}
                Err(EnqueueError::Full) => {
                    tracing::warn!(
                        session_id = %session.id,
                        user_id = %session.user_id,
                        room = %room,
                        "slow consumer evicted"
                    );
                    evicted.push(session.id);
                }
                Err(EnqueueError::Closed) => evicted.push(session.id),
            }
        }

        for session_id in evicted {
            self.drop_session(&session_id);
        }
    }

    fn direct(&mut self, session_id: &str, event: Arc<ServerEvent>) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };
        if let Err(err) = session.enqueue(event) {
            tracing::warn!(session_id = %session_id, ?err, "direct send failed, closing session");
            self.drop_session(session_id);
        }
    }

    fn snapshot(&self) -> HubSnapshot {
        HubSnapshot {
            sessions: self.registry.session_count(),
            rooms: self.registry.room_count(),
            online_users: self.presence.online_users(),
            voice_members: self.voice.len(),
        }
    }
}

/// Look up each user's relationship rooms and feed the presence event back
/// into the hub as a local broadcast per room. Runs in order so a user's
/// online/offline pair is never reordered.
async fn announce_presence(
    mut rx: mpsc::UnboundedReceiver<Announcement>,
    relations: Arc<dyn RelationStore>,
    hub: mpsc::WeakSender<HubCommand>,
) {
    while let Some(Announcement { user_id, event }) = rx.recv().await {
        let rooms = match relations.presence_rooms(&user_id).await {
            Ok(rooms) => rooms,
            Err(err) => {
                tracing::error!(user_id = %user_id, ?err, "presence rooms lookup failed");
                continue;
            }
        };

        let Some(tx) = hub.upgrade() else {
            break;
        };
        let event = Arc::new(event);
        for room in rooms {
            let cmd = HubCommand::Broadcast {
                room,
                event: event.clone(),
                exclude: None,
                origin: Origin::Local,
            };
            if tx.send(cmd).await.is_err() {
                return;
            }
        }
    }
}
