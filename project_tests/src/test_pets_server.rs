use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Polls a running pet tracker and prints what it serves", long_about = None)]
struct Args {
    /// Base URL of the server
    #[clap(short, long, default_value = "http://127.0.0.1:8080")]
    base_url: String,

    /// Poll interval in seconds
    #[clap(short, long, default_value_t = 30)]
    interval_seconds: u64,

    /// Number of polls before exiting (0 = forever)
    #[clap(short, long, default_value_t = 1)]
    count: u64,
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value> {
    let response = client.get(url).send().await.with_context(|| format!("GET {}", url))?;
    let status = response.status();
    anyhow::ensure!(status.is_success(), "GET {} returned {}", url, status);
    Ok(response.json::<Value>().await?)
}

async fn poll(client: &reqwest::Client, base: &str) -> Result<()> {
    let health = get_json(client, &format!("{}/health", base)).await?;
    let stats = get_json(client, &format!("{}/stats", base)).await?;
    let recent = get_json(client, &format!("{}/recent-pets", base)).await?;

    println!(
        "[{}] ready={} tracked={} channel={}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        health["ready"],
        stats["totalTracked"],
        stats["sourceChannel"]
    );

    for pet in recent.as_array().map(Vec::as_slice).unwrap_or_default() {
        println!(
            "  {} {} | {} | job {} | found {}",
            pet["emoji"].as_str().unwrap_or(" "),
            pet["name"].as_str().unwrap_or("?"),
            pet["dpsMetric"].as_str().or(pet["generationMetric"].as_str()).unwrap_or("-"),
            pet["jobId"].as_str().unwrap_or("?"),
            pet["foundAt"].as_str().unwrap_or("-"),
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
    let base = args.base_url.trim_end_matches('/').to_string();

    let mut polls = 0;
    loop {
        if let Err(e) = poll(&client, &base).await {
            eprintln!("Poll failed: {:#}", e);
        }
        polls += 1;
        if args.count != 0 && polls >= args.count {
            break;
        }
        sleep(Duration::from_secs(args.interval_seconds)).await;
    }
    Ok(())
}
