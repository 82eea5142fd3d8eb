use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info};

use oidc_fetch::security::{
    role_digest_hex, AuthSession, MemorySession, Navigation, OidcRefresher, RoleAuthorizer,
    TokenSet,
};
use oidc_fetch::utils;
use oidc_fetch::{ClientConfig, FetchClient, FetchOptions, Params};

#[derive(Parser)]
#[command(name = "oidc-fetch", version, about = "Authenticated API fetch client")]
struct AppCli {
    /// Config file path; falls back to environment variables when absent
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TokenArgs {
    /// Bearer token to start the session with
    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Refresh token used for silent renewal
    #[arg(long, env = "REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch an API resource and print the JSON response
    Fetch {
        /// Path relative to the configured API URL
        #[arg(long, default_value = "/")]
        path: String,
        /// Request parameter as key=value; repeatable
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
        #[command(flatten)]
        tokens: TokenArgs,
    },
    /// Print the SHA-256 hex digest of a role name
    RoleHash { role: String },
    /// Show the signed-in user and whether the required role is held
    Whoami {
        #[command(flatten)]
        tokens: TokenArgs,
    },
}

/// `key=value`; the value is taken as JSON when it parses, else as a string.
fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    if key.is_empty() {
        return Err("parameter name is empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn load_config(path: Option<&str>) -> Result<ClientConfig> {
    match path {
        Some(path) if Path::new(path).exists() => ClientConfig::from_file(path),
        Some(path) => bail!("config file {path} not found"),
        None => ClientConfig::from_env().context("no config file given and environment incomplete"),
    }
}

fn build_session(config: &ClientConfig, tokens: &TokenArgs) -> Result<Arc<MemorySession>> {
    let mut session = MemorySession::new();
    if let Some(oidc) = config.oidc.clone() {
        let refresher = OidcRefresher::new(oidc.clone())?;
        session = session.with_oidc(oidc).with_refresher(Arc::new(refresher));
    }
    if let Some(access_token) = tokens.token.clone() {
        session.sign_in(&TokenSet {
            access_token,
            refresh_token: tokens.refresh_token.clone(),
            expires_in: None,
        });
    }
    Ok(Arc::new(session))
}

fn report_navigation(nav: &mut Receiver<Navigation>) {
    while let Ok(event) = nav.try_recv() {
        match event {
            Navigation::Login { url } => {
                eprintln!("login required: {}", url.as_deref().unwrap_or("(no identity provider configured)"))
            }
            Navigation::Logout { url } => {
                eprintln!("signed out: {}", url.as_deref().unwrap_or("-"))
            }
        }
    }
}

async fn run_fetch(config: ClientConfig, path: String, params: Params, tokens: TokenArgs) -> Result<()> {
    let session = build_session(&config, &tokens)?;
    let mut nav = session.navigation();
    let client = FetchClient::from_config(&config, session)?;

    let url = config.endpoint(&path);
    info!("Fetching {url}");
    let controller = client.controller::<Value>(url, FetchOptions::new().manual());
    let state = controller.fetch(params).await;
    report_navigation(&mut nav);

    match (state.data, state.error) {
        (Some(data), _) => {
            println!("{}", serde_json::to_string_pretty(&data)?);
            Ok(())
        }
        (None, Some(error)) => bail!(error),
        (None, None) => bail!("authentication required"),
    }
}

async fn run_whoami(config: ClientConfig, tokens: TokenArgs) -> Result<()> {
    let session = build_session(&config, &tokens)?;
    let authorizer = RoleAuthorizer::spawn(session.clone(), config.required_role_hash_hex.clone());
    let identity = session.identity();
    debug!(age_seconds = session.age_seconds(), "session loaded");

    println!("user:          {}", identity.username.as_deref().unwrap_or("(anonymous)"));
    println!("authenticated: {}", session.is_authenticated());
    println!("expired:       {}", session.is_expired());
    println!("roles:         {}", identity.roles.join(", "));
    println!("authorized:    {}", authorizer.is_authorized());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = AppCli::parse();
    utils::logging::init(args.verbose);

    match args.command {
        Commands::RoleHash { role } => {
            println!("{}", role_digest_hex(&role));
        }
        Commands::Fetch {
            path,
            params,
            tokens,
        } => {
            let config = load_config(args.config.as_deref())?;
            run_fetch(config, path, params.into_iter().collect(), tokens).await?;
        }
        Commands::Whoami { tokens } => {
            let config = load_config(args.config.as_deref())?;
            run_whoami(config, tokens).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("page=2").unwrap(), ("page".to_string(), Value::from(2)));
        assert_eq!(
            parse_param("city=Oslo").unwrap(),
            ("city".to_string(), Value::from("Oslo"))
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[test]
    fn test_cli_parses_repeated_params() {
        let cli = AppCli::try_parse_from([
            "oidc-fetch",
            "fetch",
            "--path",
            "/WeatherForecast",
            "--param",
            "a=1",
            "--param",
            "b=x",
        ])
        .unwrap();
        match cli.command {
            Commands::Fetch { path, params, .. } => {
                assert_eq!(path, "/WeatherForecast");
                assert_eq!(params.len(), 2);
            }
            _ => panic!("expected fetch"),
        }
    }
}
