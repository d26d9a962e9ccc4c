//! Connect to a receiver, query its power state and watch the event stream.
//!
//! Run with: `cargo run --example control [host]`
//! Without a host argument the device is located via discovery.

use std::error::Error;
use std::time::Duration;

use eiscp::{ConnectOptions, EiscpSession, Event};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let session = EiscpSession::new();
    let mut events = session.subscribe();

    let options = match std::env::args().nth(1) {
        Some(host) => ConnectOptions::host(host),
        None => ConnectOptions::default(),
    };
    session.connect(options).await?;

    let watch = tokio::time::timeout(Duration::from_secs(10), async {
        while let Ok(event) = events.recv().await {
            match event {
                Event::Connect { host, port, model } => {
                    info!(%host, port, ?model, "connected");
                    // Query power and master volume; answers arrive as events.
                    session.command("PWR", "QSTN").await?;
                    session.command("MVL", "QSTN").await?;
                }
                Event::Data(msg) => {
                    println!("{} -> {}", msg.code, msg.argument);
                }
                Event::Error(text) => {
                    eprintln!("error: {text}");
                }
                Event::Close => break,
                Event::Debug(_) => {}
            }
        }
        Ok::<(), eiscp::EiscpError>(())
    });
    if let Ok(result) = watch.await {
        result?;
    }

    session.disconnect();
    Ok(())
}
