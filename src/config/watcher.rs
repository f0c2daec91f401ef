//! Hot reload of the session configuration
//!
//! File system notifications arrive on notify's own thread. Each content
//! change schedules a debounced re-read on the tokio runtime; configs that
//! parse and validate are queued for the session, broken ones are logged and
//! dropped so the running pages stay untouched.

use anyhow::{Context, Result};
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Editors often write a file in several steps
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Pending reloads kept while the session is busy
const RELOAD_QUEUE: usize = 4;

/// Delivers every valid new version of a config file
pub struct ConfigWatcher {
    path: PathBuf,
    updates: mpsc::Receiver<AppConfig>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Load the config at `path` and start watching it.
    ///
    /// Fails when the initial config is unreadable or invalid; later broken
    /// edits only produce a warning.
    pub async fn new(path: impl Into<PathBuf>) -> Result<(Self, AppConfig)> {
        let path = path.into();
        let initial = AppConfig::load(&path.to_string_lossy())
            .await
            .with_context(|| format!("Failed to load initial config: {}", path.display()))?;

        let (tx, updates) = mpsc::channel(RELOAD_QUEUE);
        let runtime = Handle::current();
        let reload_path = path.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if is_content_change(&event.kind) => {
                    debug!("{} changed ({:?})", reload_path.display(), event.kind);
                    runtime.spawn(reload(reload_path.clone(), tx.clone()));
                }
                Ok(_) => {}
                Err(e) => error!("Config watch error: {}", e),
            }
        })
        .context("Failed to create config watcher")?;

        watcher
            .watch(&path, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", path.display()))?;
        info!("Watching {} for changes", path.display());

        let watcher = Self {
            path,
            updates,
            _watcher: watcher,
        };
        Ok((watcher, initial))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next valid config, or None once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.updates.recv().await
    }
}

/// Writes and re-creations change content; metadata and access events do not
fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

async fn reload(path: PathBuf, tx: mpsc::Sender<AppConfig>) {
    tokio::time::sleep(RELOAD_DEBOUNCE).await;

    match AppConfig::load(&path.to_string_lossy()).await {
        Ok(config) => {
            info!(
                "Reloaded {}: {} page(s){}",
                path.display(),
                config.pages.len(),
                if config.overlay.is_some() { " + overlay" } else { "" }
            );
            if tx.send(config).await.is_err() {
                debug!("Session stopped, dropping reloaded config");
            }
        }
        Err(e) => warn!("Ignoring broken config edit: {:#}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind};
    use tempfile::TempDir;

    const MIXER: &str = r#"
pages:
  - name: "Mixer"
    bindings:
      - kind: fader
        count: 8
        action: "volume"
"#;

    const MIXER_AND_TRANSPORT: &str = r#"
overlay:
  name: "Transport"
  transparent: true
  bindings:
    - control: "play"
      action: "transport.play"
pages:
  - name: "Mixer"
    bindings:
      - kind: fader
        count: 8
        action: "volume"
  - name: "Sends"
"#;

    #[test]
    fn test_content_change_filter() {
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(!is_content_change(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::WriteTime
        ))));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Read)));
    }

    #[tokio::test]
    async fn test_reload_delivers_new_pages() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, MIXER)?;

        let (mut watcher, initial) = ConfigWatcher::new(&path).await?;
        assert_eq!(watcher.path(), path.as_path());
        assert_eq!(initial.pages.len(), 1);
        assert!(initial.overlay.is_none());

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, MIXER_AND_TRANSPORT)?;

        // Some platforms coalesce or drop events; only check what arrives
        if let Ok(Some(config)) =
            tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await
        {
            assert_eq!(config.pages.len(), 2);
            assert_eq!(config.overlay.map(|o| o.name).as_deref(), Some("Transport"));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_broken_edit_is_not_delivered() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("session.yaml");
        std::fs::write(&path, MIXER)?;

        let (tx, mut rx) = mpsc::channel(1);
        std::fs::write(&path, "pages: []\n")?;
        reload(path.clone(), tx).await;

        assert!(rx.recv().await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_initial_config_fails() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "pages: []\n")?;

        assert!(ConfigWatcher::new(&path).await.is_err());
        Ok(())
    }
}
