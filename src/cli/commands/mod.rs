pub mod limits;
pub mod logging;
pub mod store;
pub mod telegram;
pub mod tokens;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("credgate")
        .about("Token and credential lifecycle engine")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("CREDGATE_PORT")
                .value_parser(clap::value_parser!(u16)),
        );

    let command = tokens::with_args(command);
    let command = store::with_args(command);
    let command = telegram::with_args(command);
    let command = limits::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{RateLimitAction, RateLimitRule};
    use crate::config;

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "credgate");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Token and credential lifecycle engine".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_command_is_consistent() {
        new().debug_assert();
    }

    #[test]
    fn test_check_args() {
        let matches = new().get_matches_from(vec![
            "credgate",
            "--port",
            "9090",
            "--jwt-secret",
            "0f9c2b7e4d1a8c3f6b5e2d9a7c4f1e8b",
            "--jwt-algorithm",
            "HS512",
            "--jwt-allowed-algorithms",
            "HS256,HS512",
            "--redis-url",
            "redis://cache:6379/1",
            "--rate-limit",
            "login=20/900",
            "--strict-fingerprint",
            "-vv",
        ]);

        assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9090));
        assert_eq!(
            matches.get_one::<String>(store::ARG_REDIS_URL).cloned(),
            Some("redis://cache:6379/1".to_string())
        );
        assert_eq!(
            matches
                .get_many::<crate::token::Algorithm>(tokens::ARG_JWT_ALLOWED_ALGORITHMS)
                .map(|v| v.count()),
            Some(2)
        );
        assert!(matches.get_flag(tokens::ARG_STRICT_FINGERPRINT));
        assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(2));
    }

    #[test]
    fn test_check_env() {
        temp_env::with_vars(
            [
                ("CREDGATE_PORT", Some("443")),
                ("CREDGATE_JWT_SECRET", Some("0f9c2b7e4d1a8c3f6b5e2d9a7c4f1e8b")),
                ("CREDGATE_REDIS_URL", Some("redis://cache:6379")),
                ("CREDGATE_ENVIRONMENT", Some("production")),
                ("CREDGATE_BREAKER_FAILURE_THRESHOLD", Some("3")),
                ("CREDGATE_RATE_LIMITS", Some("login=20/900,magic_link=3/60")),
                ("CREDGATE_LOG_LEVEL", Some("debug")),
            ],
            || {
                let matches = new().get_matches_from(vec!["credgate"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<crate::config::Environment>(tokens::ARG_ENVIRONMENT),
                    Some(&crate::config::Environment::Production)
                );
                assert_eq!(
                    matches.get_one::<u32>(store::ARG_BREAKER_THRESHOLD).copied(),
                    Some(3)
                );
                assert_eq!(
                    matches
                        .get_many::<(RateLimitAction, RateLimitRule)>(limits::ARG_RATE_LIMIT)
                        .map(|v| v.count()),
                    Some(2)
                );
                assert_eq!(matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(), Some(3));
            },
        );
    }

    #[test]
    fn test_defaults_match_engine_config() -> anyhow::Result<()> {
        temp_env::with_vars_unset(
            [
                "CREDGATE_ACCESS_TOKEN_TTL_SECONDS",
                "CREDGATE_MAX_TOKENS_PER_USER",
                "CREDGATE_STORE_TIMEOUT_MS",
                "CREDGATE_BREAKER_FAILURE_THRESHOLD",
                "CREDGATE_BREAKER_COOLDOWN_SECONDS",
                "CREDGATE_TELEGRAM_MAX_AGE_SECONDS",
                "CREDGATE_INVITE_TTL_SECONDS",
                "CREDGATE_WS_TICKET_TTL_SECONDS",
            ],
            || {
                let matches = new().get_matches_from(vec![
                    "credgate",
                    "--jwt-secret",
                    "0f9c2b7e4d1a8c3f6b5e2d9a7c4f1e8b",
                ]);

                let tokens = tokens::Options::parse(&matches)?;
                assert_eq!(tokens.access_ttl_seconds, config::DEFAULT_ACCESS_TTL_SECONDS);
                assert_eq!(tokens.max_tokens_per_user, config::DEFAULT_MAX_TOKENS_PER_USER);

                let store = store::Options::parse(&matches)?;
                assert_eq!(store.timeout, config::DEFAULT_STORE_TIMEOUT);
                assert_eq!(
                    store.breaker_failure_threshold,
                    config::DEFAULT_BREAKER_FAILURE_THRESHOLD
                );
                assert_eq!(store.breaker_cooldown, config::DEFAULT_BREAKER_COOLDOWN);

                let telegram = telegram::Options::parse(&matches);
                assert_eq!(
                    telegram.max_age_seconds,
                    config::DEFAULT_TELEGRAM_MAX_AGE_SECONDS
                );

                let limits = limits::Options::parse(&matches);
                assert_eq!(limits.invite_ttl_seconds, config::DEFAULT_INVITE_TTL_SECONDS);
                assert_eq!(limits.ws_ticket_ttl_seconds, config::DEFAULT_WS_TICKET_TTL_SECONDS);
                Ok(())
            },
        )
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let result = new().try_get_matches_from(vec!["credgate", "--jwt-algorithm", "none"]);
        assert!(result.is_err());
    }
}
