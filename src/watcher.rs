use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::configuration::{Configuration, Error};

pub trait ConfigNotifier: Send + Sync {
    fn notify_config_change(&self, config: &Configuration);
}

/// Reloads the configuration when the file itself or one of the Kerberos files it points
/// at (keytab, krb5 configuration, login configuration) changes.
pub struct ConfigWatcher {
    _handle: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    pub fn new(config_path: &str, notifier: Arc<dyn ConfigNotifier>) -> Result<Self, Error> {
        info!("Setting up config watcher for: {config_path}");

        let config_file_path = PathBuf::from(config_path);
        if !config_file_path.exists() {
            let msg = format!("Config file does not exist: {config_path}");
            return Err(Error::NotReadable(msg));
        }

        let handle = tokio::spawn(async move {
            if let Err(e) = watch_config_loop(config_file_path, notifier).await {
                error!("Config watcher failed: {e}");
            }
        });

        Ok(Self { _handle: handle })
    }
}

fn get_kerberos_dirs(config: &Configuration, config_dir: &Path) -> HashSet<PathBuf> {
    config
        .watched_files()
        .into_iter()
        .filter_map(|p| {
            let full = if p.is_absolute() {
                p.to_path_buf()
            } else {
                config_dir.join(p)
            };
            full.parent().map(Path::to_path_buf)
        })
        .collect()
}

async fn watch_config_loop(
    config_path: PathBuf,
    notifier: Arc<dyn ConfigNotifier>,
) -> Result<(), Error> {
    let (tx, mut rx) = mpsc::channel::<Event>(100);
    let config_dir = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let canonical_config_path =
        std::fs::canonicalize(&config_path).unwrap_or_else(|_| config_path.clone());
    let canonical_config_dir =
        std::fs::canonicalize(&config_dir).unwrap_or_else(|_| config_dir.clone());

    loop {
        let kerberos_dirs = match Configuration::load(&config_path) {
            Ok(config) => get_kerberos_dirs(&config, &config_dir),
            Err(e) => {
                warn!("Failed to load configuration, watching for changes: {e}");
                HashSet::new()
            }
        };
        let canonical_kerberos_dirs: HashSet<PathBuf> = kerberos_dirs
            .iter()
            .map(|d| std::fs::canonicalize(d).unwrap_or_else(|_| d.clone()))
            .collect();

        let tx_clone = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx_clone.blocking_send(event);
            }
        })?;

        watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;
        for dir in &kerberos_dirs {
            if *dir == config_dir {
                continue;
            }
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!("Failed to watch Kerberos directory {:?}: {e}", dir);
            }
        }

        loop {
            let Some(event) = rx.recv().await else {
                error!("Config watcher channel closed");
                return Ok(());
            };

            if !matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) {
                continue;
            }

            let is_data_symlink = |p: &PathBuf| {
                p.file_name().is_some_and(|n| n == "..data")
                    && p.parent() == Some(canonical_config_dir.as_path())
            };
            let affects_config = event
                .paths
                .iter()
                .any(|p| p == &canonical_config_path || is_data_symlink(p));
            let affects_kerberos = event
                .paths
                .iter()
                .any(|p| p.parent().is_some_and(|d| canonical_kerberos_dirs.contains(d)));

            if !affects_config && !affects_kerberos {
                continue;
            }

            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

            if affects_config {
                info!("Configuration change detected, reloading");
            } else {
                info!("Kerberos file change detected, rebuilding server context");
            }

            // A broken file keeps the previous snapshot in place.
            match Configuration::load(&config_path) {
                Ok(ref cfg) => {
                    notifier.notify_config_change(cfg);
                    info!("Configuration reloaded");
                }
                Err(e) => warn!("Failed to reload configuration: {e}"),
            }

            break;
        }
    }
}
