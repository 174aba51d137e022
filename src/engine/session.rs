//! Session lifecycle: issue, authenticate, rotate and revoke token pairs.

use tracing::{info, instrument, warn};

use super::Engine;
use crate::error::Error;
use crate::token::{AccessExtra, AuthMethod, Claims, IssuedToken, Role, TokenType};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Issue the long-lived refresh token.
    pub remember_me: bool,
    /// Client device id bound into both tokens.
    pub fingerprint: Option<String>,
    pub auth_method: Option<AuthMethod>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

impl Engine {
    /// Mint an access and refresh token and track both in the user's index.
    ///
    /// # Errors
    /// `Error::CircuitOpen` if the tokens could not be registered.
    #[instrument(skip(self, options), fields(remember_me = options.remember_me))]
    pub async fn start_session(
        &self,
        subject: &str,
        role: Role,
        options: SessionOptions,
    ) -> Result<TokenPair, Error> {
        let access = self.issuer.create_access_token(
            subject,
            role,
            Some(AccessExtra {
                fingerprint: options.fingerprint.clone(),
                auth_method: options.auth_method,
            }),
        )?;
        let refresh =
            self.issuer
                .create_refresh_token(subject, options.remember_me, options.fingerprint)?;

        self.revocation
            .register_token(&access.jti, subject, access.expires_at)
            .await?;
        self.revocation
            .register_token(&refresh.jti, subject, refresh.expires_at)
            .await?;

        info!(subject, role = %role, "Session started");
        Ok(TokenPair { access, refresh })
    }

    /// Decode `token`, check its type and make sure it is not revoked.
    ///
    /// # Errors
    /// `InvalidToken`, `ExpiredToken`, `TokenTypeMismatch` or `RevokedToken`.
    /// A revocation lookup that cannot be answered follows the configured
    /// failure policy.
    pub async fn authenticate(&self, token: &str, expected: TokenType) -> Result<Claims, Error> {
        let claims = self.codec.decode_expecting(token, expected, self.now())?;
        if self.revocation.is_revoked(&claims.jti).await {
            return Err(Error::RevokedToken);
        }
        Ok(claims)
    }

    /// Rotate a refresh token: the presented one is revoked and a new pair
    /// is issued with the same lifetime class and fingerprint.
    ///
    /// With strict fingerprint binding, a fingerprint-bound token is only
    /// accepted together with the same fingerprint.
    ///
    /// # Errors
    /// Any [`Engine::authenticate`] error, `InvalidToken` on a fingerprint
    /// mismatch, or `CircuitOpen` if the old token could not be revoked.
    #[instrument(skip(self, refresh_token, fingerprint))]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        role: Role,
        fingerprint: Option<&str>,
    ) -> Result<TokenPair, Error> {
        let claims = self.authenticate(refresh_token, TokenType::Refresh).await?;

        if self.config.strict_fingerprint() {
            if let Some(bound) = claims.fingerprint.as_deref() {
                if fingerprint != Some(bound) {
                    warn!(subject = %claims.sub, "Refresh token fingerprint mismatch");
                    return Err(Error::InvalidToken);
                }
            }
        }

        self.retire(&claims).await?;

        let remember_me = claims.exp.saturating_sub(claims.iat) > self.config.refresh_ttl_seconds();
        let fingerprint = claims
            .fingerprint
            .clone()
            .or_else(|| fingerprint.map(str::to_string));
        self.start_session(
            &claims.sub,
            role,
            SessionOptions {
                remember_me,
                fingerprint,
                auth_method: Some(AuthMethod::Refresh),
            },
        )
        .await
    }

    /// Revoke the presented access token and, if given, its refresh token.
    ///
    /// An expired refresh token is skipped; one issued to a different
    /// subject is rejected.
    ///
    /// # Errors
    /// Decoding errors for either token, or `CircuitOpen` if revocation failed.
    pub async fn logout(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), Error> {
        let now = self.now();
        let access = self
            .codec
            .decode_expecting(access_token, TokenType::Access, now)?;

        let refresh = match refresh_token {
            None => None,
            Some(token) => match self.codec.decode_expecting(token, TokenType::Refresh, now) {
                Ok(claims) if claims.sub == access.sub => Some(claims),
                Ok(_) => {
                    warn!(subject = %access.sub, "Logout with another subject's refresh token");
                    return Err(Error::InvalidToken);
                }
                Err(Error::ExpiredToken) => None,
                Err(err) => return Err(err),
            },
        };

        self.retire(&access).await?;
        if let Some(claims) = refresh {
            self.retire(&claims).await?;
        }
        info!(subject = %access.sub, "Logged out");
        Ok(())
    }

    /// # Errors
    /// `CircuitOpen` if the store is unavailable.
    pub async fn revoke_all_sessions(&self, user_id: &str) -> Result<usize, Error> {
        self.revocation.revoke_all_user_tokens(user_id).await
    }

    /// # Errors
    /// `CircuitOpen` if the store is unavailable.
    pub async fn active_sessions(&self, user_id: &str) -> Result<usize, Error> {
        self.revocation.get_active_sessions(user_id).await
    }

    /// Token proving the first factor passed; redeemable once through
    /// [`Engine::complete_two_factor`].
    ///
    /// # Errors
    /// `InvalidToken` if signing fails.
    pub fn create_two_factor_pending_token(&self, subject: &str) -> Result<IssuedToken, Error> {
        self.issuer.create_two_factor_pending_token(subject)
    }

    /// Exchange a pending 2FA token for a session. The second factor itself is
    /// checked by the caller before this is called.
    ///
    /// # Errors
    /// Any [`Engine::authenticate`] error, or `CircuitOpen`. A pending token
    /// that was already redeemed, including by a concurrent call, is
    /// `RevokedToken`.
    pub async fn complete_two_factor(
        &self,
        pending_token: &str,
        role: Role,
        options: SessionOptions,
    ) -> Result<TokenPair, Error> {
        let claims = self
            .authenticate(pending_token, TokenType::TwoFactorPending)
            .await?;
        if !self.revocation.consume_once(&claims.jti, claims.exp).await? {
            warn!(subject = %claims.sub, "Pending 2FA token already redeemed");
            return Err(Error::RevokedToken);
        }
        self.start_session(&claims.sub, role, options).await
    }

    async fn retire(&self, claims: &Claims) -> Result<(), Error> {
        self.revocation.revoke_token(&claims.jti, claims.exp).await?;
        if let Err(err) = self.revocation.forget_token(&claims.sub, &claims.jti).await {
            // The denylist entry already blocks the token.
            warn!(subject = %claims.sub, "Failed to drop token from index: {err}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use secrecy::SecretString;
    use std::sync::Arc;

    const NOW: i64 = 1_700_000_000;

    fn engine(config: EngineConfig) -> Result<(Engine, Arc<ManualClock>)> {
        let clock = Arc::new(ManualClock::new(NOW));
        let engine = Engine::new(config, Arc::new(MemoryStore::new()), clock.clone())?;
        Ok((engine, clock))
    }

    fn config() -> EngineConfig {
        EngineConfig::new(SecretString::from(
            "0f1e2d3c4b5a69788796a5b4c3d2e1f0-session".to_string(),
        ))
    }

    #[tokio::test]
    async fn access_token_authenticates_until_logout() -> Result<()> {
        let (engine, _) = engine(config())?;
        let pair = engine
            .start_session("u1", Role::Admin, SessionOptions::default())
            .await?;
        let claims = engine
            .authenticate(&pair.access.token, TokenType::Access)
            .await?;
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, Some(Role::Admin));
        assert_eq!(engine.active_sessions("u1").await?, 2);

        assert_eq!(
            engine
                .authenticate(&pair.refresh.token, TokenType::Access)
                .await,
            Err(Error::TokenTypeMismatch)
        );

        engine
            .logout(&pair.access.token, Some(&pair.refresh.token))
            .await?;
        assert_eq!(
            engine
                .authenticate(&pair.access.token, TokenType::Access)
                .await,
            Err(Error::RevokedToken)
        );
        assert_eq!(engine.active_sessions("u1").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn expiry_is_enforced_at_the_boundary() -> Result<()> {
        let (engine, clock) = engine(config())?;
        let pair = engine
            .start_session("u1", Role::User, SessionOptions::default())
            .await?;
        clock.advance_secs(engine.config().access_ttl_seconds() - 1);
        assert!(
            engine
                .authenticate(&pair.access.token, TokenType::Access)
                .await
                .is_ok()
        );
        clock.advance_secs(1);
        assert_eq!(
            engine
                .authenticate(&pair.access.token, TokenType::Access)
                .await,
            Err(Error::ExpiredToken)
        );
        Ok(())
    }

    #[tokio::test]
    async fn refresh_rotates() -> Result<()> {
        let (engine, _) = engine(config())?;
        let pair = engine
            .start_session(
                "u1",
                Role::User,
                SessionOptions {
                    remember_me: true,
                    ..SessionOptions::default()
                },
            )
            .await?;
        let rotated = engine.refresh(&pair.refresh.token, Role::User, None).await?;
        assert_ne!(rotated.refresh.jti, pair.refresh.jti);
        assert_eq!(
            rotated.refresh.expires_at,
            NOW + engine.config().refresh_remember_ttl_seconds()
        );

        assert_eq!(
            engine.refresh(&pair.refresh.token, Role::User, None).await,
            Err(Error::RevokedToken)
        );
        let claims = engine
            .authenticate(&rotated.access.token, TokenType::Access)
            .await?;
        assert_eq!(claims.auth_method, Some(AuthMethod::Refresh));
        Ok(())
    }

    #[tokio::test]
    async fn strict_fingerprint_binding() -> Result<()> {
        let (engine, _) = engine(config().with_strict_fingerprint(true))?;
        let options = SessionOptions {
            fingerprint: Some("device-a".into()),
            ..SessionOptions::default()
        };
        let pair = engine.start_session("u1", Role::User, options).await?;

        assert_eq!(
            engine
                .refresh(&pair.refresh.token, Role::User, Some("device-b"))
                .await,
            Err(Error::InvalidToken)
        );
        assert_eq!(
            engine.refresh(&pair.refresh.token, Role::User, None).await,
            Err(Error::InvalidToken)
        );
        let rotated = engine
            .refresh(&pair.refresh.token, Role::User, Some("device-a"))
            .await?;
        let claims = engine
            .authenticate(&rotated.refresh.token, TokenType::Refresh)
            .await?;
        assert_eq!(claims.fingerprint.as_deref(), Some("device-a"));
        Ok(())
    }

    #[tokio::test]
    async fn lenient_fingerprint_allows_mismatch() -> Result<()> {
        let (engine, _) = engine(config())?;
        let options = SessionOptions {
            fingerprint: Some("device-a".into()),
            ..SessionOptions::default()
        };
        let pair = engine.start_session("u1", Role::User, options).await?;
        assert!(
            engine
                .refresh(&pair.refresh.token, Role::User, Some("device-b"))
                .await
                .is_ok()
        );
        Ok(())
    }

    #[tokio::test]
    async fn two_factor_pending_token_is_single_use() -> Result<()> {
        let (engine, _) = engine(config())?;
        let pending = engine.create_two_factor_pending_token("u1")?;
        assert_eq!(
            engine
                .authenticate(&pending.token, TokenType::Access)
                .await,
            Err(Error::TokenTypeMismatch)
        );

        let pair = engine
            .complete_two_factor(&pending.token, Role::Support, SessionOptions::default())
            .await?;
        assert_eq!(
            engine
                .authenticate(&pair.access.token, TokenType::Access)
                .await?
                .role,
            Some(Role::Support)
        );
        assert_eq!(
            engine
                .complete_two_factor(&pending.token, Role::Support, SessionOptions::default())
                .await,
            Err(Error::RevokedToken)
        );
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_sessions_logs_out_everywhere() -> Result<()> {
        let (engine, _) = engine(config())?;
        let first = engine
            .start_session("u1", Role::User, SessionOptions::default())
            .await?;
        let second = engine
            .start_session("u1", Role::User, SessionOptions::default())
            .await?;
        assert_eq!(engine.revoke_all_sessions("u1").await?, 4);
        for token in [&first.access.token, &second.access.token] {
            assert_eq!(
                engine.authenticate(token, TokenType::Access).await,
                Err(Error::RevokedToken)
            );
        }
        assert_eq!(engine.active_sessions("u1").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn logout_rejects_foreign_refresh_token() -> Result<()> {
        let (engine, _) = engine(config())?;
        let mine = engine
            .start_session("u1", Role::User, SessionOptions::default())
            .await?;
        let theirs = engine
            .start_session("u2", Role::User, SessionOptions::default())
            .await?;
        assert_eq!(
            engine
                .logout(&mine.access.token, Some(&theirs.refresh.token))
                .await,
            Err(Error::InvalidToken)
        );
        Ok(())
    }
}
