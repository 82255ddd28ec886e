//! RBS command-line client: sign in, run actions, and follow the realtime socket.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rbs_client::{ActionRequest, ConnectionState, RbsClient, RealtimeEvent, CONNECT_SOCKET};
use rbs_config_and_utils::{init_logging_with_config, Config, LogConfig, Paths};
use rbs_storage::FileStorage;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// RBS client command-line interface.
#[derive(Parser)]
#[command(name = "rbs")]
#[command(about = "Command-line client for an RBS project")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, credentials and logs. Defaults to ~/.rbs
    #[arg(long, global = true, env = "RBS_BASE_DIR")]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current sign-in status
    Status,
    /// Sign in anonymously, or exchange a custom token
    SignIn {
        #[arg(long)]
        custom_token: Option<String>,
    },
    /// Sign out and forget stored credentials
    SignOut,
    /// Run an action and print the response body
    Action {
        name: String,
        /// JSON payload
        #[arg(long)]
        data: Option<String>,
        #[arg(long)]
        culture: Option<String>,
    },
    /// Print a GET URL for an action
    Url {
        name: String,
        /// JSON payload
        #[arg(long)]
        data: Option<String>,
        /// Build an unauthenticated URL
        #[arg(long)]
        public: bool,
    },
    /// Connect the realtime socket and print incoming messages until ctrl-c
    Listen,
}

/// The `--log-level` flag wins over the configured level.
fn log_level(flag: Option<&str>, config: &Config) -> String {
    flag.unwrap_or(&config.log_level).to_string()
}

fn parse_payload(data: Option<&str>) -> Result<Value, serde_json::Error> {
    match data {
        Some(raw) => serde_json::from_str(raw),
        None => Ok(Value::Object(Default::default())),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let mut config = Config::load(&paths)?;

    init_logging_with_config(LogConfig {
        default_level: log_level(cli.log_level.as_deref(), &config),
        also_stderr: true,
        json_file: Some(paths.log_file()),
    });
    if matches!(cli.command, Commands::Listen) {
        config.socket_enabled = true;
    }

    let storage = Arc::new(FileStorage::new(paths.credentials_file()));
    let client = RbsClient::start(config, storage)?;

    match cli.command {
        Commands::Status => print_status(&client),
        Commands::SignIn { custom_token } => {
            match custom_token {
                Some(token) => client.sign_in_with_custom_token(&token).await?,
                None => client.sign_in_anonymously().await?,
            };
            print_status(&client);
        }
        Commands::SignOut => {
            let status = client.sign_out();
            println!("{:?}", status);
        }
        Commands::Action {
            name,
            data,
            culture,
        } => {
            let payload = parse_payload(data.as_deref())?;
            let mut request = ActionRequest::new(name).with_payload(payload);
            if let Some(culture) = culture {
                request = request.with_culture(culture);
            }
            let body = client.execute(request).await?;
            println!("{}", body);
        }
        Commands::Url { name, data, public } => {
            let payload = parse_payload(data.as_deref())?;
            let url = if public {
                client.generate_public_action_url(&name, &payload)?
            } else {
                client.generate_action_url(&name, payload).await?
            };
            println!("{}", url);
        }
        Commands::Listen => listen(&client).await?,
    }

    client.shutdown();
    Ok(())
}

fn print_status(client: &RbsClient) {
    let status = client.current_auth_status();
    match client.current_user().and_then(|user| user.user_id) {
        Some(user_id) => println!("{:?} ({})", status, user_id),
        None => println!("{:?}", status),
    }
}

async fn listen(client: &RbsClient) -> Result<(), Box<dyn std::error::Error>> {
    let Some(mut events) = client.subscribe_realtime() else {
        return Err("realtime is not enabled".into());
    };
    client.execute(ActionRequest::new(CONNECT_SOCKET)).await?;
    info!("Listening for realtime messages");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing socket");
                break;
            }
            event = events.recv() => match event {
                Ok(RealtimeEvent::Message(text)) => println!("{}", text),
                Ok(RealtimeEvent::StateChanged(ConnectionState::Disconnected))
                    if client.session().current_tokens().is_none() =>
                {
                    warn!("Signed out, stopping");
                    break;
                }
                Ok(RealtimeEvent::Closed { code, reason }) => {
                    warn!(code, reason = %reason, "Socket closed by server");
                    break;
                }
                Ok(event) => info!(?event, "Realtime event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped realtime events"),
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}
