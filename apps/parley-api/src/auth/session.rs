//! Signed session cookies backed by the key-value store.
//!
//! Cookie value: `{sid}.{sig}` where `sig` is the unpadded base64url
//! HMAC-SHA256 of `sid` under the server secret. The session body lives in
//! the store at `sess:{sid}`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use parley_common::id::{has_prefix, prefix};

use crate::db::kv::KeyValueStore;
use crate::error::StoreError;

/// Name of the session cookie.
pub const COOKIE_NAME: &str = "parley";

/// Session lifetime in seconds (30 days).
pub const SESSION_TTL_SECS: u64 = 30 * 24 * 3600;

type HmacSha256 = Hmac<Sha256>;

/// Data stored alongside a session id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: String,
}

fn session_key(sid: &str) -> String {
    format!("sess:{sid}")
}

fn mac_for(secret: &str, sid: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(sid.as_bytes());
    mac
}

/// Produce the cookie value for a session id.
pub fn sign(secret: &str, sid: &str) -> String {
    let sig = mac_for(secret, sid).finalize().into_bytes();
    format!("{sid}.{}", URL_SAFE_NO_PAD.encode(sig))
}

/// Check a cookie value's signature and return the session id it carries.
pub fn verify<'a>(secret: &str, cookie_value: &'a str) -> Option<&'a str> {
    let (sid, sig) = cookie_value.rsplit_once('.')?;
    let sig = URL_SAFE_NO_PAD.decode(sig).ok()?;
    mac_for(secret, sid).verify_slice(&sig).ok()?;
    Some(sid)
}

/// Create a session for `user_id` and return the signed cookie value.
pub async fn issue_session(
    kv: &dyn KeyValueStore,
    secret: &str,
    user_id: &str,
) -> Result<String, StoreError> {
    let sid = parley_common::id::prefixed_ulid(prefix::LOGIN);
    let value = serde_json::to_string(&SessionData {
        user_id: user_id.to_string(),
    })?;
    kv.set_ex(&session_key(&sid), &value, SESSION_TTL_SECS).await?;
    Ok(sign(secret, &sid))
}

/// Resolve a cookie value to its session. `Ok(None)` covers a bad signature,
/// a session id this service never minted, and an unknown or expired
/// session.
pub async fn resolve_session(
    kv: &dyn KeyValueStore,
    secret: &str,
    cookie_value: &str,
) -> Result<Option<SessionData>, StoreError> {
    let Some(sid) = verify(secret, cookie_value) else {
        return Ok(None);
    };
    if !has_prefix(sid, prefix::LOGIN) {
        return Ok(None);
    }
    match kv.get(&session_key(sid)).await? {
        Some(v) => Ok(Some(serde_json::from_str(&v)?)),
        None => Ok(None),
    }
}
