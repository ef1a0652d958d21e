use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "lbctl")]
#[command(about = "Management CLI for backend-lb", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pool summary
    Status,
    /// List backend liveness and connections
    Backends,
    /// Register a backend
    Add {
        address: String,
        #[arg(long, default_value_t = 1)]
        weight: u32,
        #[arg(long, default_value_t = 100)]
        max_connections: usize,
    },
    /// Remove a backend
    Remove { address: String },
    /// Mark a backend alive
    Up { address: String },
    /// Mark a backend dead
    Down { address: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Backends => client.get(format!("{}/admin/backends", base)),
        Commands::Add {
            address,
            weight,
            max_connections,
        } => client.post(format!("{}/admin/backends", base)).json(&json!({
            "address": address,
            "weight": weight,
            "max_connections": max_connections,
        })),
        Commands::Remove { address } => client
            .delete(format!("{}/admin/backends", base))
            .json(&json!({ "address": address })),
        Commands::Up { address } => client
            .post(format!("{}/admin/backends/up", base))
            .json(&json!({ "address": address })),
        Commands::Down { address } => client
            .post(format!("{}/admin/backends/down", base))
            .json(&json!({ "address": address })),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;

    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
