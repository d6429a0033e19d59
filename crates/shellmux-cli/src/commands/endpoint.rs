//! `shellmux endpoint` — print the socket endpoint a connect would use.

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::Settings;

pub async fn run(settings: &Settings, token: Option<&str>) -> Result<()> {
    let token = token
        .filter(|t| !t.is_empty())
        .context("no auth token; pass --token or set SHELLMUX_TOKEN")?;
    debug!(config_url = %settings.config_url, "resolving endpoint");

    let resolver = super::resolver(settings)?;
    let endpoint = resolver
        .resolve(token)
        .await
        .context("failed to resolve socket endpoint")?;

    // Display redacts the token.
    println!("{endpoint}");
    Ok(())
}
