use checkin_bot::daemon;
use checkin_bot::db;
use checkin_bot::error::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "checkin-botd")]
#[command(about = "Check-in scheduling daemon")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 7878)]
    port: u16,

    #[arg(long, default_value = "./data/checkin-bot.db")]
    db: String,

    #[arg(long, env = "CHECKIN_BOT_TOKEN", default_value = "")]
    token: String,

    /// JSON config to import into the database before starting.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,checkin_bot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    db::configure_sqlcipher_logging();
    let cli = Cli::parse();

    daemon::run(&cli.host, cli.port, &cli.db, &cli.token, cli.config.as_deref()).await
}
