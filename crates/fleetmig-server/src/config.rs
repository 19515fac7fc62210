use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "fleetmig-server")]
#[command(about = "Fleetmig - schema migration orchestration for branch fleets")]
#[command(version)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "4000")]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Directory for durable orchestration state
    #[arg(long, default_value = "fleetmig-data")]
    pub data_dir: PathBuf,

    /// Fleet definition file (JSON list of branches)
    #[arg(long)]
    pub fleet: Option<PathBuf>,

    /// Seconds between automatic scheduler passes (0 disables them)
    #[arg(long, default_value_t = 60)]
    pub pass_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub fleet: Option<PathBuf>,
    pub pass_interval: Option<Duration>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            data_dir: args.data_dir,
            fleet: args.fleet,
            pass_interval: (args.pass_interval > 0)
                .then(|| Duration::from_secs(args.pass_interval)),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
