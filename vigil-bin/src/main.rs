use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_config::ConfigLoader;
use vigil_core::{Result, VigilError};
use vigil_runtime::{
    BrowserProvider, Collaborators, Runtime, SearchProvider, SocialProvider, WalletProvider,
};

#[derive(Parser)]
#[command(name = "vigil", about = "Autonomous agent runtime", version)]
struct Cli {
    /// Path to vigil.toml (defaults to $VIGIL_CONFIG or ~/.vigil/vigil.toml).
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Placeholder collaborator used until a real integration is wired in.
/// Every call fails with a clear message the agent can relay.
struct Unconfigured(&'static str);

impl Unconfigured {
    fn err(&self) -> VigilError {
        VigilError::ToolExecution {
            tool: self.0.to_string(),
            reason: "no provider configured".into(),
        }
    }
}

#[async_trait]
impl WalletProvider for Unconfigured {
    async fn address(&self) -> Result<String> {
        Err(self.err())
    }
    async fn balance(&self) -> Result<String> {
        Err(self.err())
    }
}

#[async_trait]
impl SearchProvider for Unconfigured {
    async fn search(&self, _query: &str, _max_results: u32) -> Result<String> {
        Err(self.err())
    }
}

#[async_trait]
impl SocialProvider for Unconfigured {
    async fn post(&self, _text: &str) -> Result<String> {
        Err(self.err())
    }
    async fn mentions(&self) -> Result<String> {
        Err(self.err())
    }
}

#[async_trait]
impl BrowserProvider for Unconfigured {
    async fn fetch(&self, _url: &str) -> Result<String> {
        Err(self.err())
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load(cli.config.as_deref())?.into_config();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let collaborators = Collaborators {
        wallet: Arc::new(Unconfigured("wallet")),
        search: Arc::new(Unconfigured("search")),
        social: Arc::new(Unconfigured("social")),
        browser: Arc::new(Unconfigured("browser")),
    };

    let runtime = Runtime::build(config, collaborators)?;
    runtime.start();
    info!("vigil runtime started; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    runtime.stop();
    info!("vigil runtime stopped");
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
