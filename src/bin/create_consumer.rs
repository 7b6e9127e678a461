//! Provision a consumer and print its API key.
//!
//! The key is shown once; only its SHA-256 digest is stored.
//!
//! Usage:
//!   cargo run --bin create_consumer -- "Merchant name"

use anyhow::{Context, Result};
use rand::RngCore;
use rand::rngs::OsRng;

use mobile_money_gateway::app::api_key_hash;
use mobile_money_gateway::infra::{PostgresClient, PostgresConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let name = std::env::args()
        .nth(1)
        .filter(|n| !n.trim().is_empty())
        .context("usage: create_consumer <name>")?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

    let client = PostgresClient::new(&database_url, PostgresConfig::default()).await?;
    client.run_migrations().await?;

    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let api_key = format!("mmg_{}", hex::encode(bytes));

    let consumer = client.create_consumer(name.trim(), &api_key_hash(&api_key)).await?;

    println!("Consumer created");
    println!("  id:      {}", consumer.id);
    println!("  name:    {}", consumer.name);
    println!("  api key: {}", api_key);
    println!("\nStore the key now; it cannot be recovered.");
    Ok(())
}
