//! Discover receivers on the local network and print them as JSON.
//!
//! Run with: `cargo run --example discover`

use std::error::Error;
use std::time::Duration;

use eiscp::{discover, DiscoveryOptions};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let options = DiscoveryOptions {
        device_count: 8,
        timeout: Duration::from_secs(5),
        ..DiscoveryOptions::default()
    };
    info!("probing {} for up to {:?}", options.address, options.timeout);

    let devices = discover(options).await?;
    if devices.is_empty() {
        info!("no devices answered");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}
