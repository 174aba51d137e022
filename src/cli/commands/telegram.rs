use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::config::{
    DEFAULT_MINIAPP_FUTURE_TOLERANCE_SECONDS, DEFAULT_TELEGRAM_MAX_AGE_SECONDS, EngineConfig,
};

pub const ARG_TELEGRAM_BOT_TOKEN: &str = "telegram-bot-token";
pub const ARG_TELEGRAM_MAX_AGE: &str = "telegram-max-age-seconds";
pub const ARG_MINIAPP_FUTURE_TOLERANCE: &str = "telegram-miniapp-future-tolerance-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub bot_token: Option<SecretString>,
    pub max_age_seconds: i64,
    pub future_tolerance_seconds: i64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            // An empty env var disables Telegram the same way an unset one does.
            bot_token: matches
                .get_one::<String>(ARG_TELEGRAM_BOT_TOKEN)
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::from(v.clone())),
            max_age_seconds: matches
                .get_one::<i64>(ARG_TELEGRAM_MAX_AGE)
                .copied()
                .unwrap_or(DEFAULT_TELEGRAM_MAX_AGE_SECONDS),
            future_tolerance_seconds: matches
                .get_one::<i64>(ARG_MINIAPP_FUTURE_TOLERANCE)
                .copied()
                .unwrap_or(DEFAULT_MINIAPP_FUTURE_TOLERANCE_SECONDS),
        }
    }

    #[must_use]
    pub fn apply(&self, config: EngineConfig) -> EngineConfig {
        let config = config
            .with_telegram_max_age_seconds(self.max_age_seconds)
            .with_miniapp_future_tolerance_seconds(self.future_tolerance_seconds);
        match &self.bot_token {
            Some(token) => config.with_telegram_bot_token(token.clone()),
            None => config,
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TELEGRAM_BOT_TOKEN)
                .long(ARG_TELEGRAM_BOT_TOKEN)
                .help("Telegram bot token; Login Widget and Mini-App validation are off without it")
                .env("CREDGATE_TELEGRAM_BOT_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_TELEGRAM_MAX_AGE)
                .long(ARG_TELEGRAM_MAX_AGE)
                .help("Maximum age of a Telegram auth_date in seconds")
                .default_value(DEFAULT_TELEGRAM_MAX_AGE_SECONDS.to_string())
                .env("CREDGATE_TELEGRAM_MAX_AGE_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MINIAPP_FUTURE_TOLERANCE)
                .long(ARG_MINIAPP_FUTURE_TOLERANCE)
                .help("How far a Mini-App auth_date may sit in the future, in seconds")
                .default_value(DEFAULT_MINIAPP_FUTURE_TOLERANCE_SECONDS.to_string())
                .env("CREDGATE_TELEGRAM_MINIAPP_FUTURE_TOLERANCE_SECONDS")
                .value_parser(clap::value_parser!(i64).range(0..)),
        )
}
