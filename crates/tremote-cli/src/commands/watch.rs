//! `tremote watch`: keep the session in the foreground and print changes.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use super::Target;

pub async fn run(target: &Target, duration: Option<u64>) -> Result<()> {
    let session = target.open_session()?;

    session.add_speed_listener(|down, up| {
        println!("speed: down {} / up {}", human_rate(down), human_rate(up));
    });
    session.add_torrent_list_listener(|delta| {
        println!(
            "torrents: {} updated, {} removed",
            delta.added.len(),
            delta.removed.len()
        );
    });

    super::ready(&session).await?;
    info!(profile = %session.id(), "watching");
    session.resumed();

    match duration {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?,
    }

    session.lost_foreground();
    session.destroy();
    Ok(())
}

fn human_rate(bytes_per_sec: i64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];
    let mut value = bytes_per_sec as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes_per_sec} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
