use clap::Parser;
use stevedore_common::args::{
    CloudArgs, DatabaseArgs, RetentionArgs, RuntimeArgs, UpstreamArgs, WebSocketArgs,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "stevedore", about = "Local AWS-compatible container control plane")]
pub struct Cli {
    /// Listen address
    #[arg(long, env = "STEVEDORE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port
    #[arg(long, env = "STEVEDORE_PORT", default_value_t = 8080)]
    pub port: u16,

    #[clap(flatten)]
    pub cloud: CloudArgs,

    #[clap(flatten)]
    pub runtime: RuntimeArgs,

    #[clap(flatten)]
    pub database: DatabaseArgs,

    #[clap(flatten)]
    pub websocket: WebSocketArgs,

    #[clap(flatten)]
    pub retention: RetentionArgs,

    #[clap(flatten)]
    pub upstream: UpstreamArgs,
}
