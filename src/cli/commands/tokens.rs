use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

use crate::admission::FailurePolicy;
use crate::config::{
    DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_MAX_TOKENS_PER_USER, DEFAULT_REFRESH_REMEMBER_TTL_SECONDS,
    DEFAULT_REFRESH_TTL_SECONDS, DEFAULT_TWO_FACTOR_TTL_SECONDS, EngineConfig, Environment,
};
use crate::token::Algorithm;

pub const ARG_ENVIRONMENT: &str = "environment";
pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ALGORITHM: &str = "jwt-algorithm";
pub const ARG_JWT_ALLOWED_ALGORITHMS: &str = "jwt-allowed-algorithms";
pub const ARG_ACCESS_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_REFRESH_REMEMBER_TTL: &str = "refresh-token-remember-ttl-seconds";
pub const ARG_TWO_FACTOR_TTL: &str = "two-factor-ttl-seconds";
pub const ARG_MAX_TOKENS_PER_USER: &str = "max-tokens-per-user";
pub const ARG_STRICT_FINGERPRINT: &str = "strict-fingerprint";
pub const ARG_REVOCATION_FAIL_OPEN: &str = "revocation-fail-open";

#[derive(Debug, Clone)]
pub struct Options {
    pub environment: Environment,
    pub jwt_secret: SecretString,
    pub jwt_algorithm: Algorithm,
    pub allowed_algorithms: Vec<Algorithm>,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub refresh_remember_ttl_seconds: i64,
    pub two_factor_ttl_seconds: i64,
    pub max_tokens_per_user: usize,
    pub strict_fingerprint: bool,
    pub revocation_fail_open: bool,
}

impl Options {
    /// Parse token arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = match matches.get_one::<String>(ARG_JWT_SECRET) {
            Some(value) if !value.trim().is_empty() => SecretString::from(value.clone()),
            _ => anyhow::bail!("missing required argument: --{ARG_JWT_SECRET}"),
        };

        let jwt_algorithm = matches
            .get_one::<Algorithm>(ARG_JWT_ALGORITHM)
            .copied()
            .unwrap_or(Algorithm::HS256);

        // Without an explicit allow-list only the signing algorithm is accepted.
        let allowed_algorithms = matches
            .get_many::<Algorithm>(ARG_JWT_ALLOWED_ALGORITHMS)
            .map(|values| values.copied().collect::<Vec<_>>())
            .filter(|values| !values.is_empty())
            .unwrap_or_else(|| vec![jwt_algorithm]);

        let get_i64 =
            |id: &str, default: i64| matches.get_one::<i64>(id).copied().unwrap_or(default);

        Ok(Self {
            environment: matches
                .get_one::<Environment>(ARG_ENVIRONMENT)
                .copied()
                .unwrap_or_default(),
            jwt_secret,
            jwt_algorithm,
            allowed_algorithms,
            access_ttl_seconds: get_i64(ARG_ACCESS_TTL, DEFAULT_ACCESS_TTL_SECONDS),
            refresh_ttl_seconds: get_i64(ARG_REFRESH_TTL, DEFAULT_REFRESH_TTL_SECONDS),
            refresh_remember_ttl_seconds: get_i64(
                ARG_REFRESH_REMEMBER_TTL,
                DEFAULT_REFRESH_REMEMBER_TTL_SECONDS,
            ),
            two_factor_ttl_seconds: get_i64(ARG_TWO_FACTOR_TTL, DEFAULT_TWO_FACTOR_TTL_SECONDS),
            max_tokens_per_user: matches
                .get_one::<usize>(ARG_MAX_TOKENS_PER_USER)
                .copied()
                .unwrap_or(DEFAULT_MAX_TOKENS_PER_USER),
            strict_fingerprint: matches.get_flag(ARG_STRICT_FINGERPRINT),
            revocation_fail_open: matches.get_flag(ARG_REVOCATION_FAIL_OPEN),
        })
    }

    /// Start an [`EngineConfig`] from the token settings.
    #[must_use]
    pub fn into_config(self) -> EngineConfig {
        let policy = if self.revocation_fail_open {
            FailurePolicy::FailOpen
        } else {
            FailurePolicy::FailClosed
        };

        EngineConfig::new(self.jwt_secret)
            .with_environment(self.environment)
            .with_jwt_algorithm(self.jwt_algorithm)
            .with_allowed_algorithms(self.allowed_algorithms)
            .with_access_ttl_seconds(self.access_ttl_seconds)
            .with_refresh_ttl_seconds(self.refresh_ttl_seconds)
            .with_refresh_remember_ttl_seconds(self.refresh_remember_ttl_seconds)
            .with_two_factor_ttl_seconds(self.two_factor_ttl_seconds)
            .with_max_tokens_per_user(self.max_tokens_per_user)
            .with_strict_fingerprint(self.strict_fingerprint)
            .with_revocation_failure_policy(policy)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ENVIRONMENT)
                .long(ARG_ENVIRONMENT)
                .help("Deployment environment: development or production")
                .long_help(
                    "Deployment environment. In production a short or well-known signing secret\nis fatal at startup; in development it only logs a warning.",
                )
                .default_value("development")
                .env("CREDGATE_ENVIRONMENT")
                .value_parser(|value: &str| value.parse::<Environment>()),
        )
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign access and refresh tokens (min 32 bytes)")
                .env("CREDGATE_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_JWT_ALGORITHM)
                .long(ARG_JWT_ALGORITHM)
                .help("Signing algorithm: HS256, HS384 or HS512")
                .default_value("HS256")
                .env("CREDGATE_JWT_ALGORITHM")
                .value_parser(|value: &str| value.parse::<Algorithm>()),
        )
        .arg(
            Arg::new(ARG_JWT_ALLOWED_ALGORITHMS)
                .long(ARG_JWT_ALLOWED_ALGORITHMS)
                .help("Comma separated algorithms accepted on decode")
                .long_help(
                    "Comma separated algorithms accepted on decode.\n\nDefaults to the signing algorithm alone.",
                )
                .env("CREDGATE_JWT_ALLOWED_ALGORITHMS")
                .value_delimiter(',')
                .value_parser(|value: &str| value.trim().parse::<Algorithm>()),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token lifetime in seconds")
                .default_value(DEFAULT_ACCESS_TTL_SECONDS.to_string())
                .env("CREDGATE_ACCESS_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token lifetime in seconds")
                .default_value(DEFAULT_REFRESH_TTL_SECONDS.to_string())
                .env("CREDGATE_REFRESH_TOKEN_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_REMEMBER_TTL)
                .long(ARG_REFRESH_REMEMBER_TTL)
                .help("Refresh token lifetime in seconds when remember-me is set")
                .default_value(DEFAULT_REFRESH_REMEMBER_TTL_SECONDS.to_string())
                .env("CREDGATE_REFRESH_TOKEN_REMEMBER_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TWO_FACTOR_TTL)
                .long(ARG_TWO_FACTOR_TTL)
                .help("Lifetime of the 2fa_pending token in seconds")
                .default_value(DEFAULT_TWO_FACTOR_TTL_SECONDS.to_string())
                .env("CREDGATE_TWO_FACTOR_TTL_SECONDS")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_MAX_TOKENS_PER_USER)
                .long(ARG_MAX_TOKENS_PER_USER)
                .help("Active token cap per user; the earliest-expiring tokens are revoked past it")
                .default_value(DEFAULT_MAX_TOKENS_PER_USER.to_string())
                .env("CREDGATE_MAX_TOKENS_PER_USER")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_STRICT_FINGERPRINT)
                .long(ARG_STRICT_FINGERPRINT)
                .help("Reject refresh when the device fingerprint does not match the token")
                .env("CREDGATE_STRICT_FINGERPRINT")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_REVOCATION_FAIL_OPEN)
                .long(ARG_REVOCATION_FAIL_OPEN)
                .help("Treat tokens as not revoked when the store is unavailable")
                .env("CREDGATE_REVOCATION_FAIL_OPEN")
                .action(ArgAction::SetTrue),
        )
}
