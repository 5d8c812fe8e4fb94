use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct CloudArgs {
    /// Region stamped into every allocated ARN
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    pub region: String,

    /// Simulated account identity
    #[arg(long, env = "AWS_ACCOUNT_ID", default_value = "000000000000")]
    pub account_id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct RuntimeArgs {
    /// Drive task lifecycles with the in-process worker instead of Kubernetes
    #[arg(long, env = "TEST_MODE", default_value_t = false)]
    pub test_mode: bool,

    /// Defer Kubernetes client creation until the first workload needs it
    #[arg(long, env = "CONTAINER_MODE", default_value_t = false)]
    pub container_mode: bool,

    /// Path to a kubeconfig; in-cluster configuration is tried first
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct DatabaseArgs {
    /// Storage backend: "memory" or "postgres"
    #[arg(long, env = "STEVEDORE_DB", default_value = "memory")]
    pub db: String,

    #[clap(flatten)]
    pub postgres: PostgresArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DATABASE", default_value = "postgres")]
    pub postgres_database: String,

    #[arg(long, env = "POSTGRES_USERNAME", default_value = "postgres")]
    pub postgres_username: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct WebSocketArgs {
    /// Allowed WebSocket origins; exact values or `*.domain` wildcards
    #[arg(long, env = "WS_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub ws_allowed_origins: Vec<String>,

    /// Max inbound messages per connection per minute
    #[arg(long, env = "WS_RATE_LIMIT_PER_MINUTE", default_value_t = 600)]
    pub ws_rate_limit_per_minute: u32,

    #[arg(long, env = "WS_MAX_CONNECTIONS_PER_USER", default_value_t = 16)]
    pub ws_max_connections_per_user: u32,

    #[arg(long, env = "WS_MAX_CONNECTIONS_PER_IP", default_value_t = 32)]
    pub ws_max_connections_per_ip: u32,
}

#[derive(Parser, Debug, Clone)]
pub struct RetentionArgs {
    /// Task logs older than this many hours are pruned
    #[arg(long, env = "LOG_RETENTION_HOURS", default_value_t = 72)]
    pub log_retention_hours: i64,
}

#[derive(Parser, Debug, Clone)]
pub struct UpstreamArgs {
    /// Simulated-cloud service that unrecognised requests are proxied to
    #[arg(
        long,
        env = "UPSTREAM_ENDPOINT",
        default_value = "http://localhost:4566"
    )]
    pub upstream_endpoint: String,
}
