use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

use crate::config::{
    DEFAULT_BREAKER_COOLDOWN, DEFAULT_BREAKER_FAILURE_THRESHOLD, DEFAULT_STORE_TIMEOUT,
    EngineConfig,
};
use crate::store::duration_millis;

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";
pub const ARG_BREAKER_THRESHOLD: &str = "breaker-failure-threshold";
pub const ARG_BREAKER_COOLDOWN: &str = "breaker-cooldown-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub redis_url: String,
    pub timeout: Duration,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl Options {
    /// Parse store arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the Redis URL is missing or empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let redis_url = match matches.get_one::<String>(ARG_REDIS_URL) {
            Some(value) if !value.trim().is_empty() => value.clone(),
            _ => anyhow::bail!("missing required argument: --{ARG_REDIS_URL}"),
        };

        Ok(Self {
            redis_url,
            timeout: Duration::from_millis(
                matches
                    .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
                    .copied()
                    .unwrap_or(duration_millis(DEFAULT_STORE_TIMEOUT)),
            ),
            breaker_failure_threshold: matches
                .get_one::<u32>(ARG_BREAKER_THRESHOLD)
                .copied()
                .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD),
            breaker_cooldown: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_BREAKER_COOLDOWN)
                    .copied()
                    .unwrap_or(DEFAULT_BREAKER_COOLDOWN.as_secs()),
            ),
        })
    }

    #[must_use]
    pub fn apply(&self, config: EngineConfig) -> EngineConfig {
        config
            .with_store_timeout(self.timeout)
            .with_breaker(self.breaker_failure_threshold, self.breaker_cooldown)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis connection URL for revocation, one-shot tokens and rate limits")
                .default_value("redis://127.0.0.1:6379")
                .env("CREDGATE_REDIS_URL"),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Per-operation store timeout in milliseconds")
                .default_value(duration_millis(DEFAULT_STORE_TIMEOUT).to_string())
                .env("CREDGATE_STORE_TIMEOUT_MS")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_BREAKER_THRESHOLD)
                .long(ARG_BREAKER_THRESHOLD)
                .help("Consecutive store failures before the circuit opens")
                .default_value(DEFAULT_BREAKER_FAILURE_THRESHOLD.to_string())
                .env("CREDGATE_BREAKER_FAILURE_THRESHOLD")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_BREAKER_COOLDOWN)
                .long(ARG_BREAKER_COOLDOWN)
                .help("Seconds the circuit stays open before a trial call")
                .default_value(DEFAULT_BREAKER_COOLDOWN.as_secs().to_string())
                .env("CREDGATE_BREAKER_COOLDOWN_SECONDS")
                .value_parser(clap::value_parser!(u64)),
        )
}
