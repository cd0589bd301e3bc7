use std::sync::Arc;

use anyhow::{Context, Result};
use content_loader::{IdentityAuthenticator, LoadReport, Loader, RestClient, SourceContent};

use crate::config::Config;

/// Build the loader for `config`: admin client, optional identity
/// authentication, and the definition registry.
pub fn build_loader(config: &Config) -> Result<Loader> {
    let admin_url = config.admin_url()?;
    let mut client = RestClient::with_base_url(admin_url)
        .context("invalid admin URL")?
        .with_timeout(config.timeout()?);

    match config
        .credentials()
        .context("invalid identity configuration")?
    {
        Some(credentials) => {
            tracing::info!(
                user = credentials.username(),
                identity_url = %config.identity_url,
                "authenticating admin requests"
            );
            let authenticator = IdentityAuthenticator::new(&config.identity_url, credentials)
                .context("invalid identity configuration")?;
            client.add_interceptor(Arc::new(authenticator));
        }
        None => tracing::info!("identity authentication disabled"),
    }

    Ok(Loader::new(client)
        .with_definitions(config.definitions())
        .with_max_pages(config.max_pages))
}

/// Prepare `source`, load everything under it, then clean it up.
pub async fn load_from(loader: &Loader, source: &mut dyn SourceContent) -> Result<LoadReport> {
    let root = source
        .prepare()
        .await
        .with_context(|| format!("failed to prepare source content from {}", source.label()))?;

    tracing::info!(source = source.label(), "loading source content");
    let report = loader.load_all(&root).await;
    source.cleanup();

    Ok(report)
}

/// Run a one-shot load and print the statistics as a JSON line.
pub async fn run(config: &Config, mut source: impl SourceContent) -> Result<LoadReport> {
    let loader = build_loader(config)?;
    let report = load_from(&loader, &mut source).await?;

    println!("{}", serde_json::to_string(&report.stats)?);
    Ok(report)
}

/// Turn a finished report into the command's result.
pub fn check(report: &LoadReport) -> Result<()> {
    match report.last_error() {
        None => Ok(()),
        Some(failure) => anyhow::bail!(
            "{} definition(s) failed to load, last: {}: {}",
            report.failures.len(),
            failure.definition,
            failure.error
        ),
    }
}
