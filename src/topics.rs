//! Role-based access to WebSocket topics.

use tracing::{info, warn};

use crate::token::Role;

const STAFF: &[Role] = &[Role::Support, Role::Admin, Role::SuperAdmin];
const ADMINS: &[Role] = &[Role::Admin, Role::SuperAdmin];
const EVERYONE: &[Role] = &Role::ALL;

/// Topic -> roles allowed to subscribe.
const MATRIX: &[(&str, &[Role])] = &[
    ("notifications", EVERYONE),
    ("subscription.status", EVERYONE),
    ("balance.updates", EVERYONE),
    ("partner.referrals", &[Role::Partner, Role::Admin, Role::SuperAdmin]),
    ("partner.earnings", &[Role::Partner, Role::Admin, Role::SuperAdmin]),
    ("support.tickets", STAFF),
    ("admin.users", ADMINS),
    ("admin.payments", ADMINS),
    ("admin.servers", ADMINS),
    ("admin.analytics", ADMINS),
    ("system.health", &[Role::SuperAdmin]),
    ("system.audit", &[Role::SuperAdmin]),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionDecision {
    pub allowed: bool,
    pub reason: Option<&'static str>,
}

/// Static topic capability matrix. Lookups are pure.
#[derive(Clone, Copy, Debug, Default)]
pub struct TopicAuthorizer;

impl TopicAuthorizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn topics(&self) -> impl Iterator<Item = &'static str> {
        MATRIX.iter().map(|(topic, _)| *topic)
    }

    /// Roles allowed on `topic`, or `None` for an unknown topic.
    #[must_use]
    pub fn allowed_roles(&self, topic: &str) -> Option<&'static [Role]> {
        MATRIX
            .iter()
            .find(|(name, _)| *name == topic)
            .map(|(_, roles)| *roles)
    }

    /// Unknown topics are open only to [`Role::highest`].
    #[must_use]
    pub fn can_subscribe(&self, topic: &str, role: Role) -> bool {
        match self.allowed_roles(topic) {
            Some(roles) => roles.contains(&role),
            None => role == Role::highest(),
        }
    }

    /// Same as [`Self::can_subscribe`], with a reason and an audit event.
    pub fn authorize_subscription(
        &self,
        user_id: &str,
        role: Role,
        topic: &str,
    ) -> SubscriptionDecision {
        let known = self.allowed_roles(topic).is_some();
        let allowed = self.can_subscribe(topic, role);
        let reason = match (allowed, known) {
            (true, _) => None,
            (false, true) => Some("role not permitted for topic"),
            (false, false) => Some("unknown topic"),
        };
        if allowed {
            info!(user_id, role = %role, topic, "Topic subscription granted");
        } else {
            warn!(
                user_id,
                role = %role,
                topic,
                reason = reason.unwrap_or_default(),
                "Topic subscription denied"
            );
        }
        SubscriptionDecision { allowed, reason }
    }
}
