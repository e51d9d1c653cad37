//! Scry auth - manage provider credentials for the Scry CLI.

use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use scry_auth::auth::{AuthMethod, AuthStatus, AuthenticationManager, BrowserOpener, OAuthManager, SystemBrowser};
use scry_auth::config::Config;
use scry_auth::ProviderId;

#[derive(Debug, Parser)]
#[command(name = "scry-auth", version, about = "Manage Scry CLI provider credentials")]
struct Cli {
    /// Config file (defaults to ~/.config/scry-cli/auth.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Log in to a provider through the browser
    Login { provider: ProviderId },
    /// Revoke and forget stored OAuth tokens
    Logout {
        provider: Option<ProviderId>,
        /// Log out of every provider
        #[arg(long, conflicts_with = "provider")]
        all: bool,
    },
    /// Show how each provider would authenticate
    Status { provider: Option<ProviderId> },
    /// Print a usable credential for a provider
    Token { provider: ProviderId },
}

/// Prints the URL before handing it to the system browser, so it can be
/// opened by hand when no browser is available.
struct TerminalBrowser;

impl BrowserOpener for TerminalBrowser {
    fn open(&self, url: &str) -> io::Result<()> {
        eprintln!("Opening your browser to authorize. If it does not open, visit:\n\n  {}\n", url);
        SystemBrowser.open(url)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SCRY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(Config::load()),
    }
}

fn build_manager(config: &Config) -> Result<AuthenticationManager> {
    let store = config
        .credential_store()
        .context("Failed to open credential store")?;
    let oauth = OAuthManager::new(store, config.adapter_registry())
        .with_browser(Arc::new(TerminalBrowser))
        .with_settings(config.oauth_settings());

    let manager = AuthenticationManager::new(Arc::new(oauth));
    for (provider, auth_config) in config.auth_configs() {
        manager.configure_provider(provider, auth_config);
    }
    Ok(manager)
}

fn print_status(status: &AuthStatus) {
    let state = if status.authenticated {
        format!("authenticated via {}", status.current_method)
    } else {
        "not authenticated".to_string()
    };
    println!("{}: {}", status.provider.display_name(), state);

    if let Some(oauth) = &status.oauth_status {
        match oauth.expires_at {
            Some(expires_at) if oauth.needs_refresh => {
                println!("  OAuth token expires {} (refresh due)", expires_at.to_rfc3339())
            }
            Some(expires_at) => println!("  OAuth token expires {}", expires_at.to_rfc3339()),
            None => println!("  No OAuth tokens stored"),
        }
    }
    println!(
        "  API key: {}, fallback: {}",
        if status.has_api_key { "present" } else { "absent" },
        if status.fallback_available { "available" } else { "unavailable" }
    );
}

fn init_config(path: Option<&std::path::Path>, force: bool) -> Result<()> {
    let target = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path().context("Could not determine config directory")?,
    };
    if target.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", target.display());
    }

    let config = Config::default();
    match path {
        Some(path) => config.save_to_path(path)?,
        None => config.save()?,
    }
    println!("Wrote {}", target.display());
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Init { force } = cli.command {
        return init_config(cli.config.as_deref(), force);
    }

    let config = load_config(cli.config.as_deref())?;
    let manager = build_manager(&config)?;

    match cli.command {
        Command::Init { .. } => {}
        Command::Login { provider } => {
            manager
                .login(provider)
                .await
                .with_context(|| format!("Login to {} failed", provider.display_name()))?;
            println!("Logged in to {}.", provider.display_name());
        }
        Command::Logout { all: true, .. } => {
            let providers = manager.logout_all().await?;
            if providers.is_empty() {
                println!("No stored credentials.");
            }
            for provider in providers {
                println!("Logged out of {}.", provider.display_name());
            }
        }
        Command::Logout { provider: Some(provider), .. } => {
            manager.logout(provider).await?;
            println!("Logged out of {}.", provider.display_name());
        }
        Command::Logout { provider: None, .. } => {
            bail!("Specify a provider or pass --all");
        }
        Command::Status { provider } => {
            let providers = match provider {
                Some(provider) => vec![provider],
                None => manager.configured_providers(),
            };
            if providers.is_empty() {
                println!("No providers configured.");
            }
            for provider in providers {
                let status = manager.get_provider_auth_status(provider).await?;
                print_status(&status);
                let methods: Vec<_> = manager
                    .get_available_auth_methods(provider)
                    .iter()
                    .map(AuthMethod::as_str)
                    .collect();
                println!("  Available methods: {}", methods.join(", "));
            }
        }
        Command::Token { provider } => {
            let result = manager.ensure_valid_authentication(provider).await;
            match (result.success, result.credential) {
                (true, Some(credential)) => {
                    if result.used_fallback {
                        eprintln!("Using {} (fallback)", result.method);
                    }
                    println!("{}", credential);
                }
                _ => {
                    let error = result.error.unwrap_or_else(|| "authentication failed".to_string());
                    bail!("{}", error);
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse()).await
}
