//! lbtags: load balancer backend reconciler.
//!
//! `lbtags create` converges the target pool (and the address, firewall rule,
//! health checks and forwarding rule around it) onto the instances matching a
//! tag or label selector, once or on a fixed interval. `lbtags destroy`
//! deletes them again.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lbtags::config::expand_zones;
use lbtags::provider::gce::TokenSource;
use lbtags::{
    GceProvider, LbConfig, LoadBalancerController, OperationPoller, PollSettings, ReconcileLoop,
    Selector,
};

/// Keep a load balancer's backends in sync with tagged instances
#[derive(Parser, Debug)]
#[command(name = "lbtags", version, about)]
struct Cli {
    /// Load balancer name
    #[arg(short, long, global = true, env = "LBTAGS_NAME", default_value = "")]
    name: String,

    /// Project ID
    #[arg(short, long, global = true, env = "LBTAGS_PROJECT", default_value = "")]
    project: String,

    /// VPC network name or URL
    #[arg(long, global = true, env = "LBTAGS_NETWORK", default_value = "default")]
    network: String,

    /// Region of the target pool, address and forwarding rule
    #[arg(short, long, global = true, env = "LBTAGS_REGION", default_value = "us-central1")]
    region: String,

    /// Instances must carry exactly these network tags
    #[arg(short, long, global = true, value_delimiter = ',')]
    tags: Vec<String>,

    /// Instances must carry these labels (key=value). Ignored when tags are given
    #[arg(short, long, global = true, value_delimiter = ',')]
    labels: Vec<String>,

    /// Name of the reserved external address (defaults to the load balancer name)
    #[arg(long, global = true, env = "LBTAGS_ADDRESS")]
    address: Option<String>,

    /// Ports to open and forward
    #[arg(long, global = true, value_delimiter = ',', default_value = "8443")]
    ports: Vec<u16>,

    /// Zones to search, as suffixes (a) or full names (us-central1-a).
    /// Defaults to every zone of the region
    #[arg(short, long, global = true, value_delimiter = ',')]
    zones: Vec<String>,

    /// Also maintain one unmanaged instance group per zone
    #[arg(long, global = true)]
    instance_groups: bool,

    /// Maintain one HTTP health check per port
    #[arg(long, global = true)]
    health_check: bool,

    /// Seconds between operation status polls
    #[arg(long, global = true, default_value = "3")]
    poll_interval: u64,

    /// Seconds to wait for one operation before giving up
    #[arg(long, global = true, default_value = "1800")]
    poll_timeout: u64,

    /// OAuth access token (defaults to Application Default Credentials)
    #[arg(long, global = true, env = "GOOGLE_OAUTH_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or update the load balancer
    Create {
        /// Keep reconciling until interrupted
        #[arg(long = "loop")]
        repeat: bool,

        /// Seconds between passes in loop mode
        #[arg(long, default_value = "120")]
        seconds: u64,
    },

    /// Delete the load balancer
    Destroy {
        /// Also release the external address
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn lb_config(&self) -> Result<LbConfig> {
        let selector = match (&self.command, Selector::from_parts(&self.tags, &self.labels)) {
            // Teardown never consults the selector.
            (Commands::Destroy { .. }, Err(_)) => Selector::Tags(Default::default()),
            (_, selector) => selector?,
        };
        let release_address = matches!(self.command, Commands::Destroy { force: true });
        let config = LbConfig {
            name: self.name.clone(),
            project: self.project.clone(),
            network: self.network.clone(),
            region: self.region.clone(),
            zones: expand_zones(&self.region, &self.zones),
            ports: self.ports.clone(),
            address_name: self.address.clone().unwrap_or_else(|| self.name.clone()),
            selector,
            instance_groups: self.instance_groups,
            health_check: self.health_check,
            release_address,
        };
        config.validate()?;
        Ok(config)
    }

    fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(self.poll_interval),
            timeout: Duration::from_secs(self.poll_timeout),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lbtags=info,reqwest=warn,hyper=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    if cli.project.is_empty() {
        anyhow::bail!("--project is required");
    }
    let config = cli.lb_config().context("invalid load balancer configuration")?;

    let tokens = TokenSource::resolve(cli.access_token.clone())
        .await
        .context("no Google Cloud credentials")?;
    let provider = GceProvider::new(&config.project, tokens)?;
    let poller = OperationPoller::new(cli.poll_settings());
    let controller = LoadBalancerController::new(provider, poller);

    info!("lbtags {} (project {})", env!("CARGO_PKG_VERSION"), config.project);

    match cli.command {
        Commands::Create { repeat: false, .. } => {
            let report = ReconcileLoop::run_once(&controller, &config)
                .await
                .with_context(|| format!("failed to converge load balancer {}", config.name))?;
            info!(
                "Load balancer {} serving {} instances on {}",
                config.name,
                report.desired.len(),
                report.address
            );
        }
        Commands::Create {
            repeat: true,
            seconds,
        } => {
            let summary = ReconcileLoop::new(Duration::from_secs(seconds))
                .run(&controller, &config, shutdown_signal())
                .await;
            info!(
                "Stopped after {} passes ({} failed)",
                summary.passes, summary.failures
            );
        }
        Commands::Destroy { .. } => {
            let report = controller
                .teardown(&config)
                .await
                .with_context(|| format!("failed to destroy load balancer {}", config.name))?;
            info!(
                "Load balancer {} destroyed ({} resources deleted)",
                config.name,
                report.deleted.len()
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, finishing current pass");
}
