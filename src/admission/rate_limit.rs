//! Rate limiting primitives for credential flows.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::{KeyValueStore, StoreError};

/// What happens when the limiter cannot reach its store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailurePolicy {
    FailOpen,
    FailClosed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u32,
    pub window: Duration,
    pub failure_policy: FailurePolicy,
}

impl RateLimitRule {
    #[must_use]
    pub const fn new(limit: u32, window: Duration, failure_policy: FailurePolicy) -> Self {
        Self {
            limit,
            window,
            failure_policy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Register,
    Login,
    RefreshToken,
    MagicLink,
    OAuthStart,
    WsTicket,
    BotLink,
    InviteRedeem,
    TelegramAuth,
}

impl RateLimitAction {
    pub const ALL: [Self; 9] = [
        Self::Register,
        Self::Login,
        Self::RefreshToken,
        Self::MagicLink,
        Self::OAuthStart,
        Self::WsTicket,
        Self::BotLink,
        Self::InviteRedeem,
        Self::TelegramAuth,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::RefreshToken => "refresh_token",
            Self::MagicLink => "magic_link",
            Self::OAuthStart => "oauth_start",
            Self::WsTicket => "ws_ticket",
            Self::BotLink => "bot_link",
            Self::InviteRedeem => "invite_redeem",
            Self::TelegramAuth => "telegram_auth",
        }
    }

    /// Built-in limits. Account-creating and credential-checking routes fail
    /// closed, everything else fails open.
    #[must_use]
    pub const fn default_rule(self) -> RateLimitRule {
        const MINUTE: u64 = 60;
        match self {
            Self::Register => {
                RateLimitRule::new(5, Duration::from_secs(60 * MINUTE), FailurePolicy::FailClosed)
            }
            Self::Login => {
                RateLimitRule::new(10, Duration::from_secs(15 * MINUTE), FailurePolicy::FailClosed)
            }
            Self::InviteRedeem => {
                RateLimitRule::new(10, Duration::from_secs(60 * MINUTE), FailurePolicy::FailClosed)
            }
            Self::TelegramAuth => {
                RateLimitRule::new(20, Duration::from_secs(MINUTE), FailurePolicy::FailClosed)
            }
            Self::RefreshToken => {
                RateLimitRule::new(30, Duration::from_secs(MINUTE), FailurePolicy::FailOpen)
            }
            Self::MagicLink => {
                RateLimitRule::new(5, Duration::from_secs(15 * MINUTE), FailurePolicy::FailOpen)
            }
            Self::OAuthStart => {
                RateLimitRule::new(20, Duration::from_secs(MINUTE), FailurePolicy::FailOpen)
            }
            Self::WsTicket => {
                RateLimitRule::new(30, Duration::from_secs(MINUTE), FailurePolicy::FailOpen)
            }
            Self::BotLink => {
                RateLimitRule::new(10, Duration::from_secs(MINUTE), FailurePolicy::FailOpen)
            }
        }
    }
}

impl fmt::Display for RateLimitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity a window is counted against.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    Device(String),
    Ip(String),
    User(String),
}

impl RateLimitKey {
    fn storage_suffix(&self) -> String {
        match self {
            Self::Device(id) => format!("device:{id}"),
            Self::Ip(ip) => format!("ip:{ip}"),
            Self::User(id) => format!("user:{id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after_seconds: u64 },
}

impl RateLimitDecision {
    /// # Errors
    /// Returns `Error::RateLimited` for a limited decision.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Self::Allowed => Ok(()),
            Self::Limited {
                retry_after_seconds,
            } => Err(Error::RateLimited {
                retry_after_seconds,
            }),
        }
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, key: &RateLimitKey, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check(&self, _key: &RateLimitKey, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Store-backed sliding window: one sorted set per `(action, identity)`.
///
/// Every hit is recorded, including rejected ones, so a client hammering a
/// limited route stays limited until it backs off for a full window.
#[derive(Clone)]
pub struct SlidingWindowRateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    rules: HashMap<RateLimitAction, RateLimitRule>,
}

impl fmt::Debug for SlidingWindowRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowRateLimiter")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

impl SlidingWindowRateLimiter {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let rules = RateLimitAction::ALL
            .into_iter()
            .map(|action| (action, config.rate_limit_rule(action)))
            .collect();
        Self {
            store,
            clock,
            rules,
        }
    }

    #[must_use]
    pub fn rule(&self, action: RateLimitAction) -> RateLimitRule {
        self.rules
            .get(&action)
            .copied()
            .unwrap_or_else(|| action.default_rule())
    }

    fn on_store_error(
        action: RateLimitAction,
        rule: RateLimitRule,
        err: &StoreError,
    ) -> RateLimitDecision {
        match rule.failure_policy {
            FailurePolicy::FailOpen => {
                warn!(action = %action, "Rate limit store unavailable, allowing: {err}");
                RateLimitDecision::Allowed
            }
            FailurePolicy::FailClosed => {
                error!(action = %action, "Rate limit store unavailable, rejecting: {err}");
                RateLimitDecision::Limited {
                    retry_after_seconds: rule.window.as_secs().max(1),
                }
            }
        }
    }
}

fn window_key(action: RateLimitAction, key: &RateLimitKey) -> String {
    format!("rate_limit:{}:{}", action.as_str(), key.storage_suffix())
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn check(&self, key: &RateLimitKey, action: RateLimitAction) -> RateLimitDecision {
        let rule = self.rule(action);
        let now_millis = self.clock.now_millis();
        // Two hits in the same millisecond must stay distinct set members.
        let member = format!("{now_millis}-{:016x}", rand::thread_rng().gen::<u64>());

        let count = match self
            .store
            .sliding_window_hit(&window_key(action, key), now_millis, rule.window, &member)
            .await
        {
            Ok(count) => count,
            Err(err) => return Self::on_store_error(action, rule, &err),
        };

        if count > u64::from(rule.limit) {
            debug!(action = %action, count, limit = rule.limit, "Rate limited");
            RateLimitDecision::Limited {
                retry_after_seconds: rule.window.as_secs().max(1),
            }
        } else {
            RateLimitDecision::Allowed
        }
    }
}
