use std::env;

use anyhow::{anyhow, bail, Context, Result};
use bearer_core::auth::{AuthError, Credentials, OAuthConfig, OAuthEndpoints};
use bearer_core::http::{Method, RequestDescriptor};
use bearer_core::AuthClient;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_PROFILE: &str = "default";

#[derive(Parser, Debug)]
#[command(author, version, about = "OAuth 2.0 bearer client")]
struct Cli {
    #[command(flatten)]
    provider: ProviderArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ProviderArgs {
    /// Profile name for stored tokens
    #[arg(long, global = true, default_value = DEFAULT_PROFILE)]
    profile: String,
    /// OAuth client id (defaults to BEARER_CLIENT_ID)
    #[arg(long, global = true)]
    client_id: Option<String>,
    /// OAuth client secret (defaults to BEARER_CLIENT_SECRET)
    #[arg(long, global = true)]
    client_secret: Option<String>,
    /// Redirect URI registered with the provider (defaults to BEARER_REDIRECT_URI)
    #[arg(long, global = true)]
    redirect_uri: Option<String>,
    /// Authorization endpoint (defaults to BEARER_AUTH_URL)
    #[arg(long, global = true)]
    auth_url: Option<String>,
    /// Token endpoint (defaults to BEARER_TOKEN_URL)
    #[arg(long, global = true)]
    token_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the authorization flow and print the URL to visit
    Login(LoginArgs),
    /// Complete the authorization flow with the provider's redirect
    Callback(CallbackArgs),
    /// Show whether tokens are stored and still valid
    Status,
    /// Exchange the stored refresh token for a new access token
    Refresh,
    /// Forget stored tokens
    Logout,
    /// Call an API endpoint with the stored bearer token
    Request(RequestArgs),
}

#[derive(Args, Debug)]
struct LoginArgs {
    /// Scopes to request (defaults to BEARER_SCOPES)
    #[arg(long = "scope")]
    scopes: Vec<String>,
    /// Open the authorization URL in the system browser
    #[arg(long)]
    open: bool,
}

#[derive(Args, Debug)]
struct CallbackArgs {
    /// Full redirect URL the browser landed on
    #[arg(long, conflicts_with_all = ["code", "state"])]
    url: Option<String>,
    /// Authorization code from the redirect
    #[arg(long, requires = "state")]
    code: Option<String>,
    /// State value from the redirect
    #[arg(long, requires = "code")]
    state: Option<String>,
}

#[derive(Args, Debug)]
struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, ...)
    method: String,
    /// Absolute endpoint URL
    endpoint: String,
    /// JSON body for POST/PUT/PATCH
    #[arg(long)]
    data: Option<String>,
    /// Extra header as NAME:VALUE (repeatable)
    #[arg(long = "header", short = 'H')]
    headers: Vec<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        if let Some(auth) = err.downcast_ref::<AuthError>() {
            eprintln!("next step: {}", auth.next_action());
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("BEARER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let client = build_client(&cli.provider)?;
    match cli.command {
        Commands::Login(args) => login(&client, args),
        Commands::Callback(args) => callback(&client, args).await,
        Commands::Status => status(&client),
        Commands::Refresh => refresh(&client).await,
        Commands::Logout => logout(&client, &cli.provider.profile),
        Commands::Request(args) => request(&client, args).await,
    }
}

fn login(client: &AuthClient, args: LoginArgs) -> Result<()> {
    let scopes = if args.scopes.is_empty() {
        env_scopes()
    } else {
        args.scopes
    };
    let url = client.build_authorization_url(&scopes)?;
    println!("\nAuthorize the application by visiting:\n  {url}\n");
    println!("Then run `bearer callback --url '<redirect URL>'` with the address you land on.");

    if args.open {
        if let Err(err) = open::that(url.as_str()) {
            eprintln!("Failed to launch browser ({err}); open the URL above manually.");
        }
    }
    Ok(())
}

async fn callback(client: &AuthClient, args: CallbackArgs) -> Result<()> {
    let tokens = match (args.url, args.code, args.state) {
        (Some(url), _, _) => {
            let redirect = Url::parse(&url).context("invalid redirect URL")?;
            client.complete_from_redirect(&redirect).await?
        }
        (None, Some(code), Some(state)) => client.consume_callback(&code, &state).await?,
        _ => bail!("pass either --url or both --code and --state"),
    };
    println!("Authorization complete.");
    if let Some(expiry) = tokens.expires_at {
        println!("Access token expires at {expiry} (UTC).");
    }
    Ok(())
}

fn status(client: &AuthClient) -> Result<()> {
    println!("Status: {}", client.status()?);
    if let Some(tokens) = client.tokens()? {
        println!("Access token valid: {}", client.is_authenticated()?);
        if let Some(expiry) = tokens.expires_at {
            println!("Expires at: {expiry} (UTC)");
        }
        println!(
            "Refresh token stored: {}",
            if tokens.refresh_token.is_some() { "yes" } else { "no" }
        );
    }
    Ok(())
}

async fn refresh(client: &AuthClient) -> Result<()> {
    let tokens = client.refresh().await?;
    println!("Access token refreshed.");
    if let Some(expiry) = tokens.expires_at {
        println!("Expires at: {expiry} (UTC)");
    }
    Ok(())
}

fn logout(client: &AuthClient, profile: &str) -> Result<()> {
    client
        .clear_tokens()
        .context("failed to remove stored tokens")?;
    println!("Deleted tokens for profile '{profile}'.");
    Ok(())
}

async fn request(client: &AuthClient, args: RequestArgs) -> Result<()> {
    let method: Method = args
        .method
        .to_ascii_uppercase()
        .parse()
        .map_err(|_| anyhow!("invalid HTTP method '{}'", args.method))?;
    let mut descriptor = RequestDescriptor::new(method, args.endpoint);
    if let Some(data) = args.data {
        let body = serde_json::from_str(&data).context("--data must be valid JSON")?;
        descriptor = descriptor.with_json(body);
    }
    for header in args.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("header '{header}' must look like NAME:VALUE"))?;
        descriptor = descriptor.with_header(name.trim(), value.trim());
    }

    let value = client.make_request(&descriptor).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn build_client(args: &ProviderArgs) -> Result<AuthClient> {
    let (config, endpoints) = build_oauth_config(args)?;
    let client = AuthClient::builder(config, endpoints)
        .profile_stores(&args.profile)?
        .build()
        .context("failed to build OAuth client")?;
    Ok(client)
}

fn build_oauth_config(args: &ProviderArgs) -> Result<(OAuthConfig, OAuthEndpoints)> {
    let client_id = setting(&args.client_id, "BEARER_CLIENT_ID")?;
    let client_secret = setting(&args.client_secret, "BEARER_CLIENT_SECRET")?;
    let redirect = setting(&args.redirect_uri, "BEARER_REDIRECT_URI")?;
    let auth_url = setting(&args.auth_url, "BEARER_AUTH_URL")?;
    let token_url = setting(&args.token_url, "BEARER_TOKEN_URL")?;

    let redirect_uri = Url::parse(&redirect).context("invalid redirect URI")?;
    let endpoints =
        OAuthEndpoints::parse(&auth_url, &token_url).context("invalid provider endpoint")?;
    let config = OAuthConfig::new(Credentials::new(client_id, client_secret), redirect_uri)
        .with_scopes(env_scopes());
    Ok((config, endpoints))
}

/// Flag value if given, otherwise the non-empty environment variable.
fn setting(flag: &Option<String>, var: &str) -> Result<String> {
    if let Some(value) = flag {
        return Ok(value.clone());
    }
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(anyhow!("missing configuration: set {var} or pass the matching flag")),
    }
}

fn env_scopes() -> Vec<String> {
    env::var("BEARER_SCOPES")
        .map(|scopes| scopes.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}
