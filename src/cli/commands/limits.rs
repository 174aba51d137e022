use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

use crate::admission::{FailurePolicy, RateLimitAction, RateLimitRule};
use crate::config::{
    DEFAULT_BOT_LINK_TTL_SECONDS, DEFAULT_INVITE_TTL_SECONDS, DEFAULT_MAGIC_LINK_TTL_SECONDS,
    DEFAULT_OAUTH_STATE_TTL_SECONDS, DEFAULT_WS_TICKET_TTL_SECONDS, EngineConfig,
};

pub const ARG_INVITE_TTL: &str = "invite-ttl-seconds";
pub const ARG_OAUTH_STATE_TTL: &str = "oauth-state-ttl-seconds";
pub const ARG_WS_TICKET_TTL: &str = "ws-ticket-ttl-seconds";
pub const ARG_MAGIC_LINK_TTL: &str = "magic-link-ttl-seconds";
pub const ARG_BOT_LINK_TTL: &str = "bot-link-ttl-seconds";
pub const ARG_RATE_LIMIT: &str = "rate-limit";

/// A `--rate-limit` override: `action=limit/window_seconds[/open|/closed]`.
///
/// The failure policy keeps the action's default when omitted.
///
/// # Errors
/// Returns a message naming the malformed part.
pub fn parse_rate_limit(value: &str) -> Result<(RateLimitAction, RateLimitRule), String> {
    let (action, rule) = value
        .split_once('=')
        .ok_or_else(|| format!("expected action=limit/window_seconds, got: {value}"))?;

    let action = RateLimitAction::ALL
        .into_iter()
        .find(|candidate| candidate.as_str() == action.trim())
        .ok_or_else(|| format!("unknown rate limit action: {action}"))?;

    let mut parts = rule.trim().split('/');
    let limit = parts
        .next()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| format!("invalid limit in: {value}"))?;
    let window = parts
        .next()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| format!("invalid window in: {value}"))?;
    let failure_policy = match parts.next() {
        None => action.default_rule().failure_policy,
        Some("open") => FailurePolicy::FailOpen,
        Some("closed") => FailurePolicy::FailClosed,
        Some(other) => return Err(format!("invalid failure policy: {other}")),
    };
    if parts.next().is_some() {
        return Err(format!("trailing data in: {value}"));
    }

    Ok((
        action,
        RateLimitRule::new(limit, Duration::from_secs(window), failure_policy),
    ))
}

#[derive(Debug, Clone)]
pub struct Options {
    pub invite_ttl_seconds: u64,
    pub oauth_state_ttl_seconds: u64,
    pub ws_ticket_ttl_seconds: u64,
    pub magic_link_ttl_seconds: u64,
    pub bot_link_ttl_seconds: u64,
    pub rate_limits: Vec<(RateLimitAction, RateLimitRule)>,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let get = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        Self {
            invite_ttl_seconds: get(ARG_INVITE_TTL, DEFAULT_INVITE_TTL_SECONDS),
            oauth_state_ttl_seconds: get(ARG_OAUTH_STATE_TTL, DEFAULT_OAUTH_STATE_TTL_SECONDS),
            ws_ticket_ttl_seconds: get(ARG_WS_TICKET_TTL, DEFAULT_WS_TICKET_TTL_SECONDS),
            magic_link_ttl_seconds: get(ARG_MAGIC_LINK_TTL, DEFAULT_MAGIC_LINK_TTL_SECONDS),
            bot_link_ttl_seconds: get(ARG_BOT_LINK_TTL, DEFAULT_BOT_LINK_TTL_SECONDS),
            rate_limits: matches
                .get_many::<(RateLimitAction, RateLimitRule)>(ARG_RATE_LIMIT)
                .map(|values| values.copied().collect())
                .unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn apply(&self, config: EngineConfig) -> EngineConfig {
        let config = config
            .with_invite_ttl_seconds(self.invite_ttl_seconds)
            .with_oauth_state_ttl_seconds(self.oauth_state_ttl_seconds)
            .with_ws_ticket_ttl_seconds(self.ws_ticket_ttl_seconds)
            .with_magic_link_ttl_seconds(self.magic_link_ttl_seconds)
            .with_bot_link_ttl_seconds(self.bot_link_ttl_seconds);

        self.rate_limits
            .iter()
            .fold(config, |config, (action, rule)| {
                config.with_rate_limit_rule(*action, *rule)
            })
    }
}

fn ttl_arg(id: &'static str, env: &'static str, default: u64, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .default_value(default.to_string())
        .env(env)
        .value_parser(clap::value_parser!(u64).range(1..))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(ttl_arg(
            ARG_INVITE_TTL,
            "CREDGATE_INVITE_TTL_SECONDS",
            DEFAULT_INVITE_TTL_SECONDS,
            "Invite token lifetime in seconds",
        ))
        .arg(ttl_arg(
            ARG_OAUTH_STATE_TTL,
            "CREDGATE_OAUTH_STATE_TTL_SECONDS",
            DEFAULT_OAUTH_STATE_TTL_SECONDS,
            "OAuth state lifetime in seconds",
        ))
        .arg(ttl_arg(
            ARG_WS_TICKET_TTL,
            "CREDGATE_WS_TICKET_TTL_SECONDS",
            DEFAULT_WS_TICKET_TTL_SECONDS,
            "WebSocket ticket lifetime in seconds",
        ))
        .arg(ttl_arg(
            ARG_MAGIC_LINK_TTL,
            "CREDGATE_MAGIC_LINK_TTL_SECONDS",
            DEFAULT_MAGIC_LINK_TTL_SECONDS,
            "Magic link lifetime in seconds",
        ))
        .arg(ttl_arg(
            ARG_BOT_LINK_TTL,
            "CREDGATE_BOT_LINK_TTL_SECONDS",
            DEFAULT_BOT_LINK_TTL_SECONDS,
            "Bot deep-link token lifetime in seconds",
        ))
        .arg(
            Arg::new(ARG_RATE_LIMIT)
                .long(ARG_RATE_LIMIT)
                .help("Override a rate limit rule: action=limit/window_seconds[/open|/closed]")
                .long_help(
                    "Override a rate limit rule, e.g. `login=20/900` or `magic_link=3/900/closed`.\n\nRepeat the flag, or comma separate values in the environment variable.",
                )
                .env("CREDGATE_RATE_LIMITS")
                .value_delimiter(',')
                .action(clap::ArgAction::Append)
                .value_parser(parse_rate_limit),
        )
}
