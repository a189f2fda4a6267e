//! The gateway's window onto the relational store.
//!
//! The hub never walks the user/guild graph itself. Every question it needs
//! answered at runtime is one call on [`RelationStore`].

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use parking_lot::RwLock;

use crate::db::pool::DbPool;
use crate::db::schema::{
    channel_members, channels, friend_requests, friends, members, read_states, users,
};
use crate::error::StoreError;

/// The minimum the gateway needs to know about a connected user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
}

#[async_trait]
pub trait RelationStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserSummary>, StoreError>;

    /// Every room interested in this user's presence: the ids of their
    /// friends and of the guilds they belong to.
    async fn presence_rooms(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    async fn is_guild_member(&self, user_id: &str, guild_id: &str) -> Result<bool, StoreError>;

    async fn can_view_channel(&self, user_id: &str, channel_id: &str)
        -> Result<bool, StoreError>;

    async fn touch_last_seen(&self, user_id: &str, channel_id: &str) -> Result<(), StoreError>;

    /// Number of friend requests waiting for this user's answer.
    async fn pending_request_count(&self, user_id: &str) -> Result<i64, StoreError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgRelationStore {
    pool: DbPool,
}

impl PgRelationStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RelationStore for PgRelationStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserSummary>, StoreError> {
        let mut conn = self.pool.get().await?;

        let row: Option<(String, String)> = diesel_async::RunQueryDsl::get_result(
            users::table
                .find(user_id)
                .select((users::id, users::username)),
            &mut conn,
        )
        .await
        .optional()?;

        Ok(row.map(|(id, username)| UserSummary { id, username }))
    }

    async fn presence_rooms(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rooms: Vec<String> = diesel_async::RunQueryDsl::load(
            friends::table
                .filter(friends::user_id.eq(user_id))
                .select(friends::friend_id)
                .union(
                    members::table
                        .filter(members::user_id.eq(user_id))
                        .select(members::guild_id),
                ),
            &mut conn,
        )
        .await?;

        Ok(rooms)
    }

    async fn is_guild_member(&self, user_id: &str, guild_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;

        let count: i64 = diesel_async::RunQueryDsl::get_result(
            members::table.find((guild_id, user_id)).count(),
            &mut conn,
        )
        .await?;

        Ok(count > 0)
    }

    async fn can_view_channel(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;

        let channel: Option<(Option<String>, bool)> = diesel_async::RunQueryDsl::get_result(
            channels::table
                .find(channel_id)
                .select((channels::guild_id, channels::is_public)),
            &mut conn,
        )
        .await
        .optional()?;

        let Some((guild_id, is_public)) = channel else {
            return Ok(false);
        };

        // Public guild channels are visible to every member; private channels
        // and DMs only to the listed members.
        let count: i64 = match guild_id {
            Some(guild_id) if is_public => {
                diesel_async::RunQueryDsl::get_result(
                    members::table.find((guild_id, user_id)).count(),
                    &mut conn,
                )
                .await?
            }
            _ => {
                diesel_async::RunQueryDsl::get_result(
                    channel_members::table.find((channel_id, user_id)).count(),
                    &mut conn,
                )
                .await?
            }
        };

        Ok(count > 0)
    }

    async fn touch_last_seen(&self, user_id: &str, channel_id: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;

        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(read_states::table)
                .values((
                    read_states::user_id.eq(user_id),
                    read_states::channel_id.eq(channel_id),
                    read_states::last_seen.eq(diesel::dsl::now),
                ))
                .on_conflict((read_states::user_id, read_states::channel_id))
                .do_update()
                .set(read_states::last_seen.eq(diesel::dsl::now)),
            &mut conn,
        )
        .await?;

        Ok(())
    }

    async fn pending_request_count(&self, user_id: &str) -> Result<i64, StoreError> {
        let mut conn = self.pool.get().await?;

        let count: i64 = diesel_async::RunQueryDsl::get_result(
            friend_requests::table
                .filter(friend_requests::receiver_id.eq(user_id))
                .count(),
            &mut conn,
        )
        .await?;

        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (local dev / tests)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryRelations {
    users: HashMap<String, String>,
    guild_members: HashSet<(String, String)>,
    friends: HashSet<(String, String)>,
    requests: HashSet<(String, String)>,
    /// channel id → (guild id, is public)
    channels: HashMap<String, (Option<String>, bool)>,
    channel_members: HashSet<(String, String)>,
    last_seen: HashMap<(String, String), DateTime<Utc>>,
}

/// A relational store held in memory. Builder methods seed it; the trait
/// methods answer the same questions the Postgres store does.
#[derive(Default)]
pub struct MemoryRelationStore {
    inner: RwLock<MemoryRelations>,
}

impl MemoryRelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: &str, username: &str) {
        self.inner
            .write()
            .users
            .insert(user_id.to_string(), username.to_string());
    }

    pub fn add_guild_member(&self, guild_id: &str, user_id: &str) {
        self.inner
            .write()
            .guild_members
            .insert((guild_id.to_string(), user_id.to_string()));
    }

    pub fn remove_guild_member(&self, guild_id: &str, user_id: &str) {
        self.inner
            .write()
            .guild_members
            .remove(&(guild_id.to_string(), user_id.to_string()));
    }

    /// Friendship is symmetric.
    pub fn add_friendship(&self, a: &str, b: &str) {
        let mut inner = self.inner.write();
        inner.friends.insert((a.to_string(), b.to_string()));
        inner.friends.insert((b.to_string(), a.to_string()));
    }

    pub fn add_friend_request(&self, sender_id: &str, receiver_id: &str) {
        self.inner
            .write()
            .requests
            .insert((sender_id.to_string(), receiver_id.to_string()));
    }

    pub fn add_channel(&self, channel_id: &str, guild_id: Option<&str>, is_public: bool) {
        self.inner.write().channels.insert(
            channel_id.to_string(),
            (guild_id.map(str::to_string), is_public),
        );
    }

    pub fn add_channel_member(&self, channel_id: &str, user_id: &str) {
        self.inner
            .write()
            .channel_members
            .insert((channel_id.to_string(), user_id.to_string()));
    }

    pub fn last_seen(&self, user_id: &str, channel_id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .read()
            .last_seen
            .get(&(user_id.to_string(), channel_id.to_string()))
            .copied()
    }
}

#[async_trait]
impl RelationStore for MemoryRelationStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserSummary>, StoreError> {
        Ok(self.inner.read().users.get(user_id).map(|username| UserSummary {
            id: user_id.to_string(),
            username: username.clone(),
        }))
    }

    async fn presence_rooms(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read();
        let friends = inner
            .friends
            .iter()
            .filter(|(a, _)| a == user_id)
            .map(|(_, b)| b.clone());
        let guilds = inner
            .guild_members
            .iter()
            .filter(|(_, u)| u == user_id)
            .map(|(g, _)| g.clone());

        let rooms: BTreeSet<String> = friends.chain(guilds).collect();
        Ok(rooms.into_iter().collect())
    }

    async fn is_guild_member(&self, user_id: &str, guild_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .read()
            .guild_members
            .contains(&(guild_id.to_string(), user_id.to_string())))
    }

    async fn can_view_channel(
        &self,
        user_id: &str,
        channel_id: &str,
    ) -> Result<bool, StoreError> {
        let inner = self.inner.read();
        let Some((guild_id, is_public)) = inner.channels.get(channel_id) else {
            return Ok(false);
        };

        let visible = match guild_id {
            Some(guild_id) if *is_public => inner
                .guild_members
                .contains(&(guild_id.clone(), user_id.to_string())),
            _ => inner
                .channel_members
                .contains(&(channel_id.to_string(), user_id.to_string())),
        };
        Ok(visible)
    }

    async fn touch_last_seen(&self, user_id: &str, channel_id: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .last_seen
            .insert((user_id.to_string(), channel_id.to_string()), Utc::now());
        Ok(())
    }

    async fn pending_request_count(&self, user_id: &str) -> Result<i64, StoreError> {
        let count = self
            .inner
            .read()
            .requests
            .iter()
            .filter(|(_, receiver)| receiver == user_id)
            .count();
        Ok(count as i64)
    }
}
