//! Command-line argument dispatch.
//!
//! Parses validated CLI matches into an action carrying a fully built
//! [`EngineConfig`]. The config is validated by the engine, not here.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_PORT, limits, store, telegram, tokens};
use anyhow::Result;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);

    let store_opts = store::Options::parse(matches)?;
    let telegram_opts = telegram::Options::parse(matches);
    let limits_opts = limits::Options::parse(matches);

    let config = tokens::Options::parse(matches)?.into_config();
    let config = store_opts.apply(config);
    let config = telegram_opts.apply(config);
    let config = limits_opts.apply(config);

    Ok(Action::Server(Args {
        port,
        redis_url: store_opts.redis_url,
        config,
    }))
}
