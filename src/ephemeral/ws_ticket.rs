//! WebSocket tickets.
//!
//! Clients trade their access token for a ticket over HTTPS and put the
//! ticket in the WebSocket URL instead, so no bearer token ends up in proxy
//! or access logs.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{EphemeralTokenStore, IdScheme};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::store::KeyValueStore;
use crate::token::Role;

const NAMESPACE: &str = "ws_ticket";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsTicket {
    pub user_id: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub created_at: i64,
}

#[derive(Clone, Debug)]
pub struct WsTicketStore {
    tokens: EphemeralTokenStore<WsTicket>,
    clock: Arc<dyn Clock>,
}

impl WsTicketStore {
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let ttl = Duration::from_secs(config.ws_ticket_ttl_seconds());
        Self {
            tokens: EphemeralTokenStore::new(store, NAMESPACE, ttl, IdScheme::UrlSafe),
            clock,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.tokens.ttl()
    }

    /// # Errors
    /// `Error::CircuitOpen` or `Error::EphemeralTokenUnavailable` if the
    /// ticket could not be stored.
    pub async fn issue(
        &self,
        user_id: &str,
        role: Role,
        ip: Option<&str>,
    ) -> Result<String, Error> {
        let ticket = WsTicket {
            user_id: user_id.to_string(),
            role,
            ip: ip.map(str::to_string),
            created_at: self.clock.now_unix(),
        };
        self.tokens.generate(&ticket).await
    }

    /// Redeem at WebSocket upgrade. An IP change is logged, not rejected.
    ///
    /// # Errors
    /// `Error::EphemeralTokenUnavailable` if the ticket is unknown, expired or
    /// already used.
    pub async fn redeem(&self, ticket: &str, ip: Option<&str>) -> Result<WsTicket, Error> {
        let record = self
            .tokens
            .validate_and_consume(ticket)
            .await?
            .ok_or(Error::EphemeralTokenUnavailable)?;
        if let (Some(original), Some(current)) = (record.ip.as_deref(), ip) {
            if original != current {
                warn!(
                    user_id = %record.user_id,
                    original_ip = original,
                    current_ip = current,
                    "WebSocket ticket redeemed from a different IP"
                );
            }
        }
        Ok(record)
    }
}
