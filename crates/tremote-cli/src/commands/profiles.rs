//! `tremote profiles`: list saved remotes.

use anyhow::{Context, Result};
use tremote_client::store::PREF_LAST_REMOTE;
use tremote_client::ProfileStore;

use super::Target;

pub fn run(target: &Target) -> Result<()> {
    let store = target.open_store()?;
    let profiles = store.list().context("failed to list profiles")?;

    if profiles.is_empty() {
        println!("No saved profiles. Connect once with `tremote --host <host> status`.");
        return Ok(());
    }

    let last = store
        .get(PREF_LAST_REMOTE)
        .context("failed to read preferences")?
        .and_then(|v| v.as_str().map(str::to_string));

    println!("  {:<24} {:<10} {}", "ID", "TYPE", "ENDPOINT");
    for profile in &profiles {
        let marker = if last.as_deref() == Some(profile.id.as_str()) { "*" } else { " " };
        let endpoint = match (&profile.last_binding_info, profile.host()) {
            (Some(info), _) => format!("{}://{}:{}", info.protocol, info.ip, info.port),
            (None, Some(host)) => format!("{}://{}:{}", profile.protocol, host, profile.port),
            (None, None) => "-".to_string(),
        };
        let kind = format!("{:?}", profile.remote_type).to_lowercase();
        println!("{marker} {:<24} {:<10} {endpoint}", profile.id, kind);
    }
    println!("\n{} profile(s).", profiles.len());

    Ok(())
}
