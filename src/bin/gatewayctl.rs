use clap::{Parser, Subcommand};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gatewayctl")]
#[command(about = "Management CLI for the ComfyUI gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway health
    Health,
    /// Show host CPU, memory and GPU usage
    Stats {
        /// Skip the server-side cache
        #[arg(long)]
        fresh: bool,
    },
    /// Show live WebSocket sessions and HTTP connections
    Connections,
    /// Show or change the persisted UI settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings
    Show,
    /// Replace the settings
    Set {
        /// Upstream URL the UI should talk to
        #[arg(long)]
        upstream_url: String,
        /// Optional backend URL
        #[arg(long)]
        backend_url: Option<String>,
        /// Disable connecting on page load
        #[arg(long)]
        no_auto_connect: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Health => client.get(format!("{}/api/health", base)).send().await?,
        Commands::Stats { fresh } => {
            let mut request = client.get(format!("{}/api/system/stats", base));
            if fresh {
                request = request.query(&[("nocache", "true")]);
            }
            request.send().await?
        }
        Commands::Connections => {
            client
                .get(format!("{}/api/system/connections", base))
                .send()
                .await?
        }
        Commands::Config { action: ConfigAction::Show } => {
            client.get(format!("{}/api/config", base)).send().await?
        }
        Commands::Config {
            action:
                ConfigAction::Set {
                    upstream_url,
                    backend_url,
                    no_auto_connect,
                },
        } => {
            client
                .post(format!("{}/api/config", base))
                .json(&json!({
                    "upstreamUrl": upstream_url,
                    "backendUrl": backend_url,
                    "autoConnect": !no_auto_connect,
                }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if !text.is_empty() {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
