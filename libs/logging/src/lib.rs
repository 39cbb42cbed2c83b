//! Global `tracing` subscriber setup.
//!
//! Every binary in this workspace calls [`init`] once at startup instead of
//! reaching for `println!`/`eprintln!`. Per-module log callsites then use the
//! ordinary `tracing` macros.

use anyhow::{Context as _, Result};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Crates that are noisy at `debug`/`trace` and rarely what you want when
/// chasing a bug in this proxy.
const IRRELEVANT_CRATES: &str = "reqwest=info,hyper=info,rustls=warn,h2=info";

/// Installs the global subscriber. `directives` is an `EnvFilter` string
/// (e.g. `"info"`, `"packet_engine=debug"`); pass an empty string to fall
/// back to `RUST_LOG`, then `info`.
pub fn init(directives: &str, json: bool) -> Result<()> {
    let filter = build_filter(directives).context("failed to parse log filter")?;

    let fmt_layer = if json {
        fmt::layer().json().flatten_event(true).boxed()
    } else {
        fmt::layer().boxed()
    };

    Registry::default()
        .with(fmt_layer)
        .with(filter)
        .try_init()
        .context("failed to install global tracing subscriber")?;

    Ok(())
}

fn build_filter(directives: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    if directives.is_empty() {
        if let Ok(from_env) = std::env::var("RUST_LOG") {
            return EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{from_env}"));
        }
        return EnvFilter::try_new(format!("{IRRELEVANT_CRATES},info"));
    }

    EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
}

/// Installs a test-scoped subscriber that writes to the test harness's
/// captured output. Returns a guard; logging reverts when it is dropped.
pub fn test(directives: &str) -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directives_still_parse() {
        build_filter("").expect("default filter should always parse");
    }

    #[test]
    fn custom_directive_parses() {
        build_filter("packet_engine=debug").expect("custom filter should parse");
    }
}
