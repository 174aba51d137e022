//! Errors that cross the engine boundary.
//!
//! The set is closed on purpose: store failures, codec details and backend
//! messages are logged where they happen and mapped to one of these kinds.
//! Only the outermost request layer turns them into status codes.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    ExpiredToken,
    #[error("token revoked")]
    RevokedToken,
    #[error("token type mismatch")]
    TokenTypeMismatch,
    /// Covers "never existed", "expired" and "already consumed".
    #[error("token unavailable")]
    EphemeralTokenUnavailable,
    #[error("invalid external signature")]
    ExternalSignatureInvalid,
    #[error("external auth expired")]
    ExternalAuthExpired,
    #[error("rate limited: retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("circuit open")]
    CircuitOpen,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
