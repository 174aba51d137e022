//! # Credgate (Token & Credential Lifecycle Engine)
//!
//! `credgate` issues, validates, rotates and revokes the credentials used by the
//! admin API, mobile API, Telegram bot and background worker.
//!
//! ## Persistent tokens
//!
//! Access and refresh tokens are compact HMAC-signed JWTs. The algorithm is
//! restricted to an allow-list configured at startup, so `alg=none` and any
//! algorithm outside the list are rejected before the signature is looked at.
//! Every `jti` is tracked in a per-user index so that "log out everywhere" can
//! revoke all live sessions, and revoked `jti`s sit in a denylist only for the
//! remaining lifetime of the token.
//!
//! ## Single-use credentials
//!
//! Invites, `OAuth` state (+ `PKCE`), WebSocket tickets, magic links and bot
//! deep-link tokens all share one primitive, [`ephemeral::EphemeralTokenStore`].
//! Redemption is one atomic get-and-delete on the store: under concurrent
//! redemption exactly one caller gets the payload.
//!
//! ## Third-party signatures
//!
//! Telegram Login Widget and Mini-App `initData` payloads are verified with
//! HMAC-SHA256 over the canonical check-string, compared in constant time,
//! and bounded by a replay window.
//!
//! ## Admission control
//!
//! A sliding-window rate limiter and a process-local circuit breaker guard the
//! key-value store. Each caller decides between failing open and failing closed
//! when the store is unavailable.

pub mod admission;
pub mod api;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod ephemeral;
pub mod error;
pub mod external;
pub mod revocation;
pub mod store;
pub mod token;
pub mod topics;

pub use config::{ConfigError, EngineConfig, Environment};
pub use engine::{Engine, SessionOptions, TokenPair};
pub use error::Error;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }
}
