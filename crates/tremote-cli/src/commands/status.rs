//! `tremote status`: bind once and print what the daemon reports.

use std::time::Duration;

use anyhow::{bail, Result};
use tremote_core::capabilities::names;

use super::Target;

pub async fn run(target: &Target, timeout_secs: u64) -> Result<()> {
    let session = target.open_session()?;

    let waited = tokio::time::timeout(Duration::from_secs(timeout_secs), super::ready(&session)).await;
    let Ok(ready) = waited else {
        session.destroy();
        bail!("timed out waiting for the remote client");
    };
    ready?;

    let profile = session.profile();
    println!("{:<16} {}", "PROFILE", profile.nick);
    println!("{:<16} {}", "URL", session.rpc_url().unwrap_or_default());
    println!("{:<16} {}", "BASE URL", session.base_url().unwrap_or_default());
    println!(
        "{:<16} {} (az {})",
        "RPC VERSION",
        session.rpc_version(),
        session.rpc_version_az()
    );
    if let Some(client) = session.client_version() {
        println!("{:<16} {client}", "CLIENT");
    }
    if session.content_port() > 0 {
        println!("{:<16} {}", "CONTENT PORT", session.content_port());
    }

    if let Some(settings) = session.settings_clone() {
        println!("{:<16} {}", "DOWNLOAD DIR", settings.download_dir.as_deref().unwrap_or("-"));
        println!("{:<16} {}", "DOWN LIMIT", limit(settings.download_limited, settings.download_limit));
        println!("{:<16} {}", "UP LIMIT", limit(settings.upload_limited, settings.upload_limit));
        println!("{:<16} {}", "PEER PORT", settings.peer_port);
    }

    let supported: Vec<&str> = [
        names::TAGS,
        names::SUBSCRIPTIONS,
        names::RCM,
        names::FIELD_ID_BY_HASH,
        names::METHOD_TORRENT_RENAME,
    ]
    .into_iter()
    .filter(|name| session.supports(name))
    .collect();
    println!("{:<16} {}", "SUPPORTS", if supported.is_empty() { "-".to_string() } else { supported.join(", ") });

    session.destroy();
    Ok(())
}

fn limit(enabled: bool, kbps: i64) -> String {
    if enabled {
        format!("{kbps} KB/s")
    } else {
        "unlimited".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_formatted() {
        assert_eq!(limit(true, 250), "250 KB/s");
        assert_eq!(limit(false, 250), "unlimited");
    }
}
