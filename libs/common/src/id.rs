use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = parley_common::id::prefixed_ulid("ses");
/// assert!(id.starts_with("ses_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Returns `true` if `id` looks like an ID minted with `prefix`.
pub fn has_prefix(id: &str, prefix: &str) -> bool {
    id.len() == prefix.len() + 1 + 26
        && id.starts_with(prefix)
        && id.as_bytes()[prefix.len()] == b'_'
        && Ulid::from_string(&id[prefix.len() + 1..]).is_ok()
}

/// Well-known ID prefixes.
pub mod prefix {
    /// A live gateway session (one websocket).
    pub const SESSION: &str = "ses";
    /// A server instance participating in the event bus.
    pub const NODE: &str = "node";
    pub const EVENT: &str = "evt";
    /// A signed-in browser session, the key behind the session cookie.
    pub const LOGIN: &str = "sess";
}
