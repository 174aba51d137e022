use std::sync::Arc;
use uuid::Uuid;

use super::claims::{AuthMethod, Claims, Role, TokenType};
use super::codec::TokenCodec;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;

/// A freshly minted token plus the bookkeeping callers need to track it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: i64,
}

/// Optional claims for access tokens.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessExtra {
    pub fingerprint: Option<String>,
    pub auth_method: Option<AuthMethod>,
}

/// Random UUIDv4 used as the token id.
#[must_use]
pub fn new_jti() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Clone)]
pub struct TokenIssuer {
    codec: Arc<TokenCodec>,
    clock: Arc<dyn Clock>,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    refresh_remember_ttl_seconds: i64,
    two_factor_ttl_seconds: i64,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(codec: Arc<TokenCodec>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            codec,
            clock,
            access_ttl_seconds: config.access_ttl_seconds(),
            refresh_ttl_seconds: config.refresh_ttl_seconds(),
            refresh_remember_ttl_seconds: config.refresh_remember_ttl_seconds(),
            two_factor_ttl_seconds: config.two_factor_ttl_seconds(),
        }
    }

    /// # Errors
    /// Returns `Error::InvalidToken` if signing fails.
    pub fn create_access_token(
        &self,
        subject: &str,
        role: Role,
        extra: Option<AccessExtra>,
    ) -> Result<IssuedToken, Error> {
        let extra = extra.unwrap_or_default();
        self.issue(
            subject,
            TokenType::Access,
            self.access_ttl_seconds,
            Some(role),
            extra.fingerprint,
            extra.auth_method,
        )
    }

    /// Refresh tokens live 7 days, or 30 with `remember_me`.
    ///
    /// `fingerprint` binds the token to a client device id; enforcement is up
    /// to whoever redeems it.
    ///
    /// # Errors
    /// Returns `Error::InvalidToken` if signing fails.
    pub fn create_refresh_token(
        &self,
        subject: &str,
        remember_me: bool,
        fingerprint: Option<String>,
    ) -> Result<IssuedToken, Error> {
        let ttl = if remember_me {
            self.refresh_remember_ttl_seconds
        } else {
            self.refresh_ttl_seconds
        };
        self.issue(subject, TokenType::Refresh, ttl, None, fingerprint, None)
    }

    /// Short-lived token proving the first factor passed.
    ///
    /// # Errors
    /// Returns `Error::InvalidToken` if signing fails.
    pub fn create_two_factor_pending_token(&self, subject: &str) -> Result<IssuedToken, Error> {
        self.issue(
            subject,
            TokenType::TwoFactorPending,
            self.two_factor_ttl_seconds,
            None,
            None,
            None,
        )
    }

    fn issue(
        &self,
        subject: &str,
        token_type: TokenType,
        ttl_seconds: i64,
        role: Option<Role>,
        fingerprint: Option<String>,
        auth_method: Option<AuthMethod>,
    ) -> Result<IssuedToken, Error> {
        let iat = self.clock.now_unix();
        let exp = iat.saturating_add(ttl_seconds);
        let claims = Claims {
            sub: subject.to_string(),
            token_type,
            jti: new_jti(),
            iat,
            exp,
            role,
            fingerprint,
            auth_method,
        };
        let token = self.codec.encode(&claims)?;
        Ok(IssuedToken {
            token,
            jti: claims.jti,
            expires_at: exp,
        })
    }
}
