//! World discovery and registry lifecycle.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::record::{NbtRecordDecoder, RecordDecoder};
use super::scanner::{ScanReport, WorldDirectory, WorldScanner};
use super::store::RegistryStore;
use super::watcher::{WatcherState, WorldWatcher};
use crate::config::RegistryOptions;
use crate::error::{Result, VaultError};

/// Point-in-time registry status.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatus {
    pub known_players: usize,
    pub worlds: usize,
    pub active_watchers: usize,
    /// Worlds whose watcher could not be started.
    pub failed_worlds: Vec<String>,
    pub decode_failures: u64,
}

/// Owns the registry: discovers worlds, performs the initial scan, and runs
/// one [`WorldWatcher`] per world.
///
/// The [`RegistryStore`] is handed out as an `Arc` for readers (see
/// [`store`](Self::store)) but only this manager and its watchers write to it.
pub struct RegistryManager {
    root: PathBuf,
    options: RegistryOptions,
    scanner: WorldScanner,
    store: Arc<RegistryStore>,
    /// Keyed by world path; failed watchers stay here in the idle state.
    watchers: BTreeMap<PathBuf, WorldWatcher>,
    decode_failures: Arc<AtomicU64>,
}

impl RegistryManager {
    /// Build the registry from `root` with default layout and decoder.
    pub async fn initialize(root: impl Into<PathBuf>) -> Result<Self> {
        Self::initialize_with(
            root,
            RegistryOptions::default(),
            Arc::new(NbtRecordDecoder::default()),
        )
        .await
    }

    /// Build the registry from `root`.
    ///
    /// Every world is scanned before this returns; watchers are started
    /// afterwards. A world whose watcher fails to start keeps its initial
    /// scan and is reported in [`status`](Self::status). A missing root or
    /// an unreadable record directory fails initialization.
    pub async fn initialize_with(
        root: impl Into<PathBuf>,
        options: RegistryOptions,
        decoder: Arc<dyn RecordDecoder>,
    ) -> Result<Self> {
        let root = root.into();
        let scanner = WorldScanner::new(decoder, &options);
        let mut manager = Self {
            root,
            options,
            scanner,
            store: Arc::new(RegistryStore::new()),
            watchers: BTreeMap::new(),
            decode_failures: Arc::new(AtomicU64::new(0)),
        };

        let worlds = discover_worlds(&manager.root, &manager.options)?;
        info!(
            "Found {} world(s) under {}",
            worlds.len(),
            manager.root.display()
        );

        for world in &worlds {
            manager.scan_into_store(world).await?;
        }
        for world in worlds {
            manager.start_watcher(world);
        }

        info!(
            "Registry initialized with {} known players",
            manager.store.len().await
        );
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared handle to the identity set.
    pub fn store(&self) -> Arc<RegistryStore> {
        Arc::clone(&self.store)
    }

    pub async fn is_known(&self, id: &str) -> bool {
        self.store.contains(id).await
    }

    pub fn worlds(&self) -> impl Iterator<Item = &WorldDirectory> + '_ {
        self.watchers.values().map(WorldWatcher::world)
    }

    /// Look up the watcher for a world by directory name.
    pub fn watcher(&self, world_name: &str) -> Option<&WorldWatcher> {
        self.watchers.values().find(|w| w.world().name() == world_name)
    }

    pub fn active_watchers(&self) -> usize {
        self.watchers
            .values()
            .filter(|w| w.state() == WatcherState::Watching)
            .count()
    }

    pub fn failed_worlds(&self) -> Vec<String> {
        self.watchers
            .values()
            .filter(|w| w.state() == WatcherState::Idle)
            .map(|w| w.world().name().to_string())
            .collect()
    }

    pub async fn status(&self) -> RegistryStatus {
        RegistryStatus {
            known_players: self.store.len().await,
            worlds: self.watchers.len(),
            active_watchers: self.active_watchers(),
            failed_worlds: self.failed_worlds(),
            decode_failures: self.decode_failures.load(Ordering::SeqCst),
        }
    }

    /// Scan and start watching a world that appeared after initialization.
    ///
    /// Returns `false` if the world is already tracked.
    pub async fn add_world(&mut self, path: impl Into<PathBuf>) -> Result<bool> {
        let world = WorldDirectory::new(path, &self.options.record_dir_name);
        if self.watchers.contains_key(world.path()) {
            debug!("World {} is already tracked", world.name());
            return Ok(false);
        }
        self.scan_into_store(&world).await?;
        info!("Added world {}", world.name());
        self.start_watcher(world);
        Ok(true)
    }

    /// Re-enumerate the root and add any world directories not yet tracked.
    ///
    /// Returns the names of the worlds that were added.
    pub async fn discover_new_worlds(&mut self) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for world in discover_worlds(&self.root, &self.options)? {
            if self.watchers.contains_key(world.path()) {
                continue;
            }
            let name = world.name().to_string();
            if self.add_world(world.path().to_path_buf()).await? {
                added.push(name);
            }
        }
        Ok(added)
    }

    /// Try again to start watchers that failed earlier.
    ///
    /// A world whose watcher starts is re-scanned so records written while
    /// it was unwatched are picked up. Returns how many watchers started.
    pub async fn retry_failed_watchers(&mut self) -> Result<usize> {
        let failed: Vec<PathBuf> = self
            .watchers
            .iter()
            .filter(|(_, w)| w.state() == WatcherState::Idle)
            .map(|(path, _)| path.clone())
            .collect();

        let mut started = 0;
        for path in failed {
            let Some(watcher) = self.watchers.get_mut(&path) else {
                continue;
            };
            match watcher.start() {
                Ok(()) => {
                    let world = watcher.world().clone();
                    self.scan_into_store(&world).await?;
                    started += 1;
                }
                Err(e) => debug!("Watcher for {} still unavailable: {}", path.display(), e),
            }
        }
        Ok(started)
    }

    /// Stop every watcher and release their subscriptions.
    pub async fn shutdown(&mut self) {
        futures::future::join_all(self.watchers.values_mut().map(|w| w.stop())).await;
        info!("Registry watchers stopped");
    }

    async fn scan_into_store(&self, world: &WorldDirectory) -> Result<()> {
        let report = self.scan_world(world).await?;
        self.decode_failures
            .fetch_add(report.skipped.len() as u64, Ordering::SeqCst);
        let added = self.store.union(report.identities).await;
        debug!("World {}: {} players merged", world.name(), added);
        Ok(())
    }

    async fn scan_world(&self, world: &WorldDirectory) -> Result<ScanReport> {
        let scanner = self.scanner.clone();
        let world = world.clone();
        tokio::task::spawn_blocking(move || scanner.scan(&world))
            .await
            .map_err(|e| VaultError::Scan {
                path: self.root.clone(),
                message: format!("scan task failed: {}", e),
                source: None,
            })?
    }

    fn start_watcher(&mut self, world: WorldDirectory) {
        let path = world.path().to_path_buf();
        let mut watcher = WorldWatcher::new(
            world,
            self.scanner.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.decode_failures),
        );
        if let Err(e) = watcher.start() {
            warn!(
                "No live updates for world {}: {}",
                watcher.world().name(),
                e
            );
        }
        self.watchers.insert(path, watcher);
    }
}

/// List immediate subdirectories of `root` whose name starts with the world prefix.
fn discover_worlds(root: &Path, options: &RegistryOptions) -> Result<Vec<WorldDirectory>> {
    let entries = std::fs::read_dir(root).map_err(|e| match e.kind() {
        ErrorKind::NotFound => VaultError::Config {
            message: format!("World root does not exist: {}", root.display()),
        },
        _ => VaultError::scan(e, root),
    })?;

    let mut worlds = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| VaultError::scan(e, root))?;
        let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
        let name = entry.file_name();
        if is_dir && name.to_string_lossy().starts_with(&options.world_prefix) {
            worlds.push(WorldDirectory::new(entry.path(), &options.record_dir_name));
        }
    }
    worlds.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(worlds)
}
