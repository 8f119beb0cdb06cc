use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "imotscrape", about = "Resilient distributed scraping pipeline for BG real-estate listings")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Full lifecycle: coordination store -> proxy refresh -> dispatch -> wait
    Run {
        /// Site to dispatch (must have a [sites.NAME] config table)
        #[arg(short, long)]
        site: String,

        /// Seed URLs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        seeds: Vec<String>,

        /// Minimum usable proxy count before dispatch starts
        #[arg(long, default_value = "5")]
        min_proxies: usize,
    },
    /// Trigger RefreshChain and exit when complete
    RefreshProxies,
    /// Print the scraping:{job_id}:* snapshot
    Status {
        job_id: String,
    },
    /// Admin reset of a circuit breaker to CLOSED
    ResetCircuit {
        domain: String,
    },
}
