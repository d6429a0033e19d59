//! CLI subcommand implementations.

pub mod connect;
pub mod endpoint;

use anyhow::{Context, Result};
use shellmux_client::{EndpointResolver, HttpConfigFetcher, PageLocation};

use crate::config::Settings;

/// Endpoint resolver for the configured page and config URL.
fn resolver(settings: &Settings) -> Result<EndpointResolver> {
    let page = PageLocation::parse(&settings.page_url)
        .with_context(|| format!("invalid page URL '{}'", settings.page_url))?;
    Ok(EndpointResolver::new(
        Box::new(HttpConfigFetcher::new(settings.config_url.clone())),
        page,
    ))
}
