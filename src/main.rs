use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use checkin_bot::client::DaemonClient;
use checkin_bot::config::Config;
use checkin_bot::config_store;
use checkin_bot::error::{CheckinError, Result};

#[derive(Parser, Debug)]
#[command(name = "checkin-bot")]
#[command(about = "Command-line client for the check-in daemon")]
struct Cli {
    #[arg(long, default_value = "./data/checkin-bot.db")]
    db: String,

    #[arg(long, default_value = "http://127.0.0.1:7878")]
    daemon: String,

    #[arg(long, env = "CHECKIN_BOT_TOKEN", default_value = "")]
    token: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    Status,
    Preferences {
        user_id: String,

        /// JSON patch, e.g. '{"whatsapp_enabled": true, "whatsapp_number": "+33..."}'.
        #[arg(long)]
        set: Option<String>,
    },
    Schedule {
        user_id: String,
    },
    /// Ask a check-in now.
    Trigger {
        user_id: String,

        #[arg(long = "type")]
        check_in_type: Option<String>,
    },
    History {
        user_id: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Checkins {
        user_id: String,

        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    ConfigImport {
        #[arg(long)]
        path: String,
    },
    ConfigShow,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,checkin_bot=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    match &cli.command {
        Commands::ConfigImport { path } => {
            let config = Config::from_file(path)?;
            config_store::save_config(&cli.db, &config)?;
            println!("Config imported into {}", cli.db);
            return Ok(());
        }
        Commands::ConfigShow => {
            let config = config_store::load_or_init(&cli.db)?;
            print_json(&redacted_config_value(&config)?);
            return Ok(());
        }
        _ => {}
    }

    let client = DaemonClient::new(cli.daemon.clone(), cli.token.clone())?;
    let response = match cli.command {
        Commands::Status => client.health().await?,
        Commands::Preferences { user_id, set } => match set {
            Some(raw) => {
                let patch: Value = serde_json::from_str(&raw)
                    .map_err(|e| CheckinError::Validation(format!("--set is not JSON: {e}")))?;
                client.update_preferences(&user_id, &patch).await?
            }
            None => client.preferences(&user_id).await?,
        },
        Commands::Schedule { user_id } => client.schedule(&user_id).await?,
        Commands::Trigger {
            user_id,
            check_in_type,
        } => client.trigger(&user_id, check_in_type.as_deref()).await?,
        Commands::History { user_id, limit } => client.history(&user_id, limit).await?,
        Commands::Checkins { user_id, days } => client.checkins(&user_id, days).await?,
        Commands::ConfigImport { .. } | Commands::ConfigShow => return Ok(()),
    };
    print_json(&response);
    Ok(())
}

fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

fn redacted_config_value(config: &Config) -> Result<Value> {
    let mut value =
        serde_json::to_value(config).map_err(|e| CheckinError::Config(e.to_string()))?;
    for (section, key) in [
        ("whatsapp", "access_token"),
        ("whatsapp", "verify_token"),
        ("notifier", "token"),
    ] {
        if let Some(obj) = value.get_mut(section).and_then(Value::as_object_mut) {
            obj.remove(key);
        }
    }
    Ok(value)
}
