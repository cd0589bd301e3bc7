mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use content_loader::DirSourceContent;
use content_loader_github::GitHubSourceContent;
use tracing_subscriber::EnvFilter;

use crate::commands::webhook::{WebhookState, github_sources};
use crate::config::{Config, Overrides};

#[derive(Parser)]
#[command(name = "data-loader")]
#[command(about = "Load content definitions into the admin API, creating only what is missing")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct GlobalArgs {
    /// Config file (defaults to <config dir>/data-loader/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity service base URL
    #[arg(long, env = "IDENTITY_URL", global = true)]
    identity_url: Option<String>,

    /// Identity username; leave unset to send admin requests unauthenticated
    #[arg(long, env = "IDENTITY_USERNAME", global = true)]
    identity_username: Option<String>,

    /// Identity password
    #[arg(long, env = "IDENTITY_PASSWORD", global = true, hide_env_values = true)]
    identity_password: Option<String>,

    /// Identity API key, instead of a password
    #[arg(long, env = "IDENTITY_APIKEY", global = true, hide_env_values = true)]
    identity_apikey: Option<String>,

    /// Base URL of the admin API
    #[arg(long, env = "ADMIN_URL", global = true)]
    admin_url: Option<String>,

    /// Enable debug logging
    #[arg(long, env = "DEBUG", global = true)]
    debug: bool,
}

impl From<GlobalArgs> for Overrides {
    fn from(args: GlobalArgs) -> Self {
        Self {
            identity_url: args.identity_url,
            identity_username: args.identity_username,
            identity_password: args.identity_password,
            identity_apikey: args.identity_apikey,
            admin_url: args.admin_url,
            debug: args.debug,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Load content from a local directory
    LoadFromLocal {
        /// Directory holding one sub-directory per content type
        content_dir: PathBuf,
    },
    /// Load content from a GitHub repository
    LoadFromGit {
        /// Repository URL, https or ssh form
        repository_url: String,
        /// Commit SHA, branch, or tag to check out
        #[arg(long)]
        sha: Option<String>,
        /// Access token for private repositories
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,
    },
    /// Run a web server that loads content on GitHub push webhooks
    WebhookServer {
        /// Port to bind
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
        /// Access token for private repositories
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        github_token: Option<String>,
        /// Secret shared with the webhook declaration in GitHub
        #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true, default_value = "")]
        webhook_secret: String,
        /// Only handle pushes whose ref matches one of these regexes
        #[arg(long = "matching-ref")]
        matching_refs: Vec<String>,
    },
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = config::load_config(cli.global.config.as_deref())?;
    config.apply(Overrides::from(cli.global));
    tracing::debug!(?config, "resolved configuration");

    match cli.command {
        Command::LoadFromLocal { content_dir } => {
            let source = DirSourceContent::new(content_dir);
            let report = commands::load::run(&config, source).await?;
            commands::load::check(&report)
        }
        Command::LoadFromGit {
            repository_url,
            sha,
            github_token,
        } => {
            let source = GitHubSourceContent::new(&repository_url)
                .context("invalid repository URL")?
                .with_ref(sha.unwrap_or_default())
                .with_client(github_token, None);
            let report = commands::load::run(&config, source).await?;
            commands::load::check(&report)
        }
        Command::WebhookServer {
            port,
            github_token,
            webhook_secret,
            matching_refs,
        } => {
            let loader = commands::load::build_loader(&config)?;
            let state = WebhookState::new(
                loader,
                github_sources(github_token),
                &webhook_secret,
                &matching_refs,
            )?;
            commands::webhook::serve(state, port).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // The config file may also turn on debug, but logging has to exist
    // before it is read.
    let debug = cli.global.debug || peek_debug(cli.global.config.as_deref());
    init_logging(debug);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "data loading failed");
            ExitCode::FAILURE
        }
    }
}

/// Best-effort read of `debug` from the config file; errors surface later
/// when the config is loaded for real.
fn peek_debug(explicit: Option<&std::path::Path>) -> bool {
    config::load_config(explicit)
        .map(|c: Config| c.debug)
        .unwrap_or(false)
}
