//! CLI subcommand implementations.

pub mod profiles;
pub mod status;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tracing::debug;
use tremote_client::store::PREF_LAST_REMOTE;
use tremote_client::{FileProfileStore, ProfileStore, Session, SessionDeps};
use tremote_core::{RemoteProfile, SessionConfig};

/// Which remote to talk to and where settings live.
pub struct Target {
    pub config: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub profile: Option<String>,
    pub host: Option<String>,
    pub port: u16,
}

impl Target {
    pub fn load_config(&self) -> Result<SessionConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => dirs::home_dir()
                .context("cannot determine home directory")?
                .join(".tremote")
                .join("config.toml"),
        };
        SessionConfig::load(&path).with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn open_store(&self) -> Result<FileProfileStore> {
        match &self.store {
            Some(path) => Ok(FileProfileStore::new(path)),
            None => FileProfileStore::default_location().context("failed to locate profile store"),
        }
    }

    /// The profile named on the command line, an ad-hoc one for `--host`,
    /// or the last used remote.
    pub fn resolve_profile(&self, store: &dyn ProfileStore) -> Result<RemoteProfile> {
        if let Some(host) = &self.host {
            let id = self
                .profile
                .clone()
                .unwrap_or_else(|| format!("{host}:{}", self.port));
            let mut profile = store
                .load(&id)
                .context("failed to read profile store")?
                .unwrap_or_else(|| RemoteProfile::direct(id.as_str(), host.as_str(), self.port));
            profile.host = Some(host.clone());
            profile.port = self.port;
            return Ok(profile);
        }

        let id = match &self.profile {
            Some(id) => id.clone(),
            None => match store.get(PREF_LAST_REMOTE).context("failed to read preferences")? {
                Some(serde_json::Value::String(id)) => id,
                _ => bail!("no profile given and no last remote recorded; use --profile or --host"),
            },
        };
        debug!(profile = %id, "loading profile");
        store
            .load(&id)
            .context("failed to read profile store")?
            .with_context(|| format!("unknown profile '{id}'"))
    }

    /// Open a session over HTTP. Bind failures surface through `wait_ready`.
    pub fn open_session(&self) -> Result<Session> {
        let config = self.load_config()?;
        let store = Arc::new(self.open_store()?);
        let profile = self.resolve_profile(store.as_ref())?;
        let deps = SessionDeps::http(&config, store);

        let session = Session::open(profile, deps, config).context("failed to open session")?;
        session.add_server_message_listener(|msg| println!("Message from remote client: {msg}"));
        Ok(session)
    }
}

/// Wait for `session` to become ready, destroying it if binding fails.
pub async fn ready(session: &Session) -> Result<()> {
    if let Err(e) = session.wait_ready().await {
        session.destroy();
        return Err(anyhow!("could not connect: {}", e.user_message()));
    }
    Ok(())
}
