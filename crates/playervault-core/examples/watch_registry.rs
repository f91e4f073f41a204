//! Watch a server directory and print the player registry as it grows.

use playervault_core::{RegistryManager, Result};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let root = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());

    println!("Building registry from: {}", root);
    let mut registry = RegistryManager::initialize(&root).await?;

    for world in registry.worlds() {
        println!("  world {} -> {}", world.name(), world.record_dir().display());
    }
    for failed in registry.failed_worlds() {
        println!("  (no live updates for {})", failed);
    }

    let mut last = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(Duration::from_secs(2)) => {
                let status = registry.status().await;
                if status.known_players != last {
                    last = status.known_players;
                    let mut players: Vec<_> = registry.store().snapshot().await.into_iter().collect();
                    players.sort();
                    println!("{} known players: {}", last, players.join(", "));
                }
            }
        }
    }

    registry.shutdown().await;
    Ok(())
}
