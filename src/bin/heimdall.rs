//! heimdall: run requests through the gateway from the command line.

use std::io::Read;
use std::net::IpAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use heimdall::{
    CallerIdentity, ChatRequest, ClientMeta, Config, HeimdallBuilder, Provider, Role, Secrets,
};

/// Heimdall AI request gateway
#[derive(Parser)]
#[command(name = "heimdall")]
#[command(version)]
#[command(about = "Admission-controlled gateway for chat-completion AI providers")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "HEIMDALL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one chat request through the full pipeline
    Chat {
        /// Prompt text (or omit to read from stdin)
        prompt: Option<String>,
        /// Provider to call
        #[arg(short, long, default_value = "claude")]
        provider: Provider,
        /// Model (defaults to the provider's default)
        #[arg(short, long)]
        model: Option<String>,
        /// System prompt
        #[arg(short, long)]
        system: Option<String>,
        /// Maximum completion tokens
        #[arg(long)]
        max_tokens: Option<i64>,
        /// Sampling temperature
        #[arg(short, long)]
        temperature: Option<f64>,
        /// Caller identity used for rate limits and quotas
        #[arg(short, long, default_value = "cli")]
        user: String,
        /// Client address to report
        #[arg(long)]
        ip: Option<IpAddr>,
    },

    /// Print the resolved configuration as TOML
    CheckConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("heimdall=info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::CheckConfig => {
            print!("{}", config.to_toml()?);
        }
        Command::Chat {
            prompt,
            provider,
            model,
            system,
            max_tokens,
            temperature,
            user,
            ip,
        } => {
            let prompt = match prompt {
                Some(p) => p,
                None => {
                    let mut buf = String::new();
                    std::io::stdin().read_to_string(&mut buf)?;
                    buf
                }
            };

            let secrets = Secrets::load()?;
            let gateway = HeimdallBuilder::from_config(&config, &secrets).build()?;

            let mut request = ChatRequest::new(provider, CallerIdentity::user(user));
            if let Some(system) = system {
                request = request.message(Role::System, system);
            }
            request = request.message(Role::User, prompt.trim());
            if let Some(model) = model {
                request = request.model(model);
            }
            if let Some(n) = max_tokens {
                request = request.max_tokens(n);
            }
            if let Some(t) = temperature {
                request = request.temperature(t);
            }

            let mut client = ClientMeta::new().user_agent(concat!("heimdall-cli/", env!("CARGO_PKG_VERSION")));
            if let Some(ip) = ip {
                client = client.ip(ip);
            }

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let response = gateway.handle(request, &client, &cancel).await;
            info!(status = response.status, cached = response.cached, "request finished");
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
