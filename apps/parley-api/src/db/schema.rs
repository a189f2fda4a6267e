// Read-only view of the tables owned by the REST collaborators. Migrations
// live with those services; the gateway only queries.

diesel::table! {
    users (id) {
        id -> Text,
        username -> Text,
        image -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    members (guild_id, user_id) {
        guild_id -> Text,
        user_id -> Text,
        nickname -> Nullable<Text>,
        last_seen -> Timestamptz,
    }
}

diesel::table! {
    friends (user_id, friend_id) {
        user_id -> Text,
        friend_id -> Text,
    }
}

diesel::table! {
    friend_requests (sender_id, receiver_id) {
        sender_id -> Text,
        receiver_id -> Text,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    channels (id) {
        id -> Text,
        guild_id -> Nullable<Text>,
        name -> Text,
        is_public -> Bool,
        is_dm -> Bool,
    }
}

diesel::table! {
    /// Private-channel and DM membership.
    channel_members (channel_id, user_id) {
        channel_id -> Text,
        user_id -> Text,
    }
}

diesel::table! {
    read_states (user_id, channel_id) {
        user_id -> Text,
        channel_id -> Text,
        last_seen -> Timestamptz,
    }
}

diesel::joinable!(members -> users (user_id));
diesel::joinable!(channel_members -> channels (channel_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    members,
    friends,
    friend_requests,
    channels,
    channel_members,
    read_states,
);
