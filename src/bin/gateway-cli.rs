use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Command-line client for the search gateway", long_about = None)]
struct Cli {
    /// Gateway base URL, including any configured prefix for commands.
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Path prefix the command routes are mounted under.
    #[arg(short, long, default_value = "")]
    prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway liveness
    Health,
    /// Send a raw Droonga command, e.g. `droonga search '{"queries":{...}}'`
    Droonga {
        /// Command type
        message_type: String,
        /// JSON body
        body: Option<String>,
    },
    /// Search a table
    Search {
        table: String,
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = format!("{}{}", cli.url.trim_end_matches('/'), cli.prefix);

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{}/health", cli.url.trim_end_matches('/')))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Droonga { message_type, body } => {
            let body: Value = match body {
                Some(text) => serde_json::from_str(&text)?,
                None => Value::Object(Default::default()),
            };
            let res = client.post(format!("{}/droonga/{}", base, message_type))
                .json(&body)
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Search { table, query } => {
            let mut req = client.get(format!("{}/tables/{}", base, table));
            if let Some(query) = query {
                req = req.query(&[("query", query)]);
            }
            let res = req.send().await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let cached = res.headers().contains_key("x-droonga-cached");
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    if cached {
        eprintln!("(served from cache)");
    }
    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
