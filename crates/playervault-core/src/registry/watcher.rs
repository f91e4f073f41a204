//! File system watcher for one world's player records.
//!
//! Watches a world's record directory and re-scans the world whenever a
//! record is created or its content changes, merging the result into the
//! shared [`RegistryStore`].

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::scanner::{WorldDirectory, WorldScanner};
use super::store::RegistryStore;
use crate::error::{Result, VaultError};

type EventResult = notify::Result<Event>;

/// Lifecycle of a [`WorldWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    /// Created, no subscription yet.
    Idle,
    /// Subscription active and events being consumed.
    Watching,
    /// Shut down. Terminal.
    Stopped,
}

/// Everything the background task needs to re-scan a world.
struct RescanContext {
    world: WorldDirectory,
    scanner: WorldScanner,
    store: Arc<RegistryStore>,
    decode_failures: Arc<AtomicU64>,
    rescans: AtomicU64,
}

impl RescanContext {
    /// Whether an event should trigger a re-scan.
    fn is_relevant(&self, event: &Event) -> bool {
        is_content_change(&event.kind)
            && event.paths.iter().any(|p| self.scanner.is_record_path(p))
    }

    async fn rescan(&self) {
        let scanner = self.scanner.clone();
        let world = self.world.clone();
        let result = tokio::task::spawn_blocking(move || scanner.scan(&world)).await;
        self.rescans.fetch_add(1, Ordering::SeqCst);

        match result {
            Ok(Ok(report)) => {
                self.decode_failures
                    .fetch_add(report.skipped.len() as u64, Ordering::SeqCst);
                let added = self.store.union(report.identities).await;
                if added > 0 {
                    info!("World {}: {} new players", self.world.name(), added);
                } else {
                    debug!("World {}: re-scan found no new players", self.world.name());
                }
            }
            Ok(Err(e)) => warn!("Re-scan of world {} failed: {}", self.world.name(), e),
            Err(e) => warn!("Re-scan task for world {} panicked: {}", self.world.name(), e),
        }
    }
}

/// Watches one world's record directory and feeds the registry.
pub struct WorldWatcher {
    ctx: Arc<RescanContext>,
    state: WatcherState,
    /// The OS-level subscription
    watcher: Option<RecommendedWatcher>,
    /// Sender half of the event channel, shared with the OS callback
    event_tx: Option<mpsc::UnboundedSender<EventResult>>,
    /// Channel to stop the event loop
    stop_tx: Option<mpsc::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WorldWatcher {
    /// Create an idle watcher for `world`.
    ///
    /// `decode_failures` is incremented by the number of skipped records on
    /// every re-scan.
    pub fn new(
        world: WorldDirectory,
        scanner: WorldScanner,
        store: Arc<RegistryStore>,
        decode_failures: Arc<AtomicU64>,
    ) -> Self {
        Self {
            ctx: Arc::new(RescanContext {
                world,
                scanner,
                store,
                decode_failures,
                rescans: AtomicU64::new(0),
            }),
            state: WatcherState::Idle,
            watcher: None,
            event_tx: None,
            stop_tx: None,
            task: None,
        }
    }

    pub fn world(&self) -> &WorldDirectory {
        &self.ctx.world
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Number of re-scans completed so far.
    pub fn rescan_count(&self) -> u64 {
        self.ctx.rescans.load(Ordering::SeqCst)
    }

    /// Subscribe to the record directory and start consuming events.
    ///
    /// Returns immediately; no scan is performed here. Fails with
    /// [`VaultError::WatchSetup`] if the subscription cannot be established
    /// (directory missing, permission denied, no async runtime), leaving the
    /// watcher idle so the caller can retry.
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            WatcherState::Watching => return Ok(()),
            WatcherState::Stopped => {
                return Err(self.not_running("has been stopped"));
            }
            WatcherState::Idle => {}
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| self.setup_error(&format!("no async runtime: {}", e), None))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel::<EventResult>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>(1);

        let os_tx = event_tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: EventResult| {
            // Receiver gone means the watcher is shutting down.
            let _ = os_tx.send(res);
        })
        .map_err(|e| self.setup_error("failed to create file watcher", Some(e)))?;

        let record_dir = self.ctx.world.record_dir().to_path_buf();
        watcher
            .watch(&record_dir, RecursiveMode::NonRecursive)
            .map_err(|e| self.setup_error("failed to watch directory", Some(e)))?;

        info!("Started watching world {} at {:?}", self.ctx.world.name(), record_dir);

        let ctx = Arc::clone(&self.ctx);
        self.task = Some(runtime.spawn(run_event_loop(ctx, event_rx, stop_rx)));
        self.watcher = Some(watcher);
        self.event_tx = Some(event_tx);
        self.stop_tx = Some(stop_tx);
        self.state = WatcherState::Watching;
        Ok(())
    }

    /// Feed an event into the watcher as if the OS had delivered it.
    pub fn inject(&self, event: Event) -> Result<()> {
        match (&self.state, &self.event_tx) {
            (WatcherState::Watching, Some(tx)) => tx
                .send(Ok(event))
                .map_err(|_| self.not_running("event loop has exited")),
            _ => Err(self.not_running("is not running")),
        }
    }

    /// Stop the event loop and release the OS subscription.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Watcher task for world {} ended abnormally: {}", self.ctx.world.name(), e);
            }
        }
        self.watcher = None;
        self.event_tx = None;
        if self.state == WatcherState::Watching {
            debug!("Stopped watching world {}", self.ctx.world.name());
        }
        self.state = WatcherState::Stopped;
    }

    /// Misuse of a watcher that is not consuming events.
    fn not_running(&self, detail: &str) -> VaultError {
        VaultError::Config {
            message: format!("watcher for world {} {}", self.ctx.world.name(), detail),
        }
    }

    fn setup_error(&self, message: &str, source: Option<notify::Error>) -> VaultError {
        let message = match &source {
            Some(e) => format!("{}: {}", message, e),
            None => message.to_string(),
        };
        VaultError::WatchSetup {
            path: self.ctx.world.record_dir().to_path_buf(),
            message,
            source,
        }
    }
}

async fn run_event_loop(
    ctx: Arc<RescanContext>,
    mut events: mpsc::UnboundedReceiver<EventResult>,
    mut stop_rx: mpsc::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                debug!("Watcher for world {} stopping", ctx.world.name());
                break;
            }
            received = events.recv() => {
                let Some(result) = received else {
                    warn!("Watcher channel for world {} disconnected", ctx.world.name());
                    break;
                };
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Watch error in world {}: {}", ctx.world.name(), e);
                        continue;
                    }
                };
                if !ctx.is_relevant(&event) {
                    continue;
                }

                // Anything already queued is covered by the scan we are about to run.
                let mut coalesced = 0usize;
                while events.try_recv().is_ok() {
                    coalesced += 1;
                }
                debug!(
                    "Record change in world {} ({:?}), {} queued events coalesced",
                    ctx.world.name(),
                    event.kind,
                    coalesced
                );
                ctx.rescan().await;
            }
        }
    }
}

/// Whether an event kind means a record was created or its content changed.
///
/// A rename into place counts as creation since that is how the game commits
/// record files. Removals, reads and metadata-only changes do not qualify.
fn is_content_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(CreateKind::File | CreateKind::Any | CreateKind::Other) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both | RenameMode::Any)) => {
            true
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryOptions;
    use crate::registry::record::{encode_player_record, NbtRecordDecoder};
    use notify::event::{DataChange, MetadataKind, RemoveKind};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn make_watcher(temp: &TempDir) -> (WorldWatcher, Arc<RegistryStore>) {
        let world = WorldDirectory::new(temp.path().join("world"), "playerdata");
        std::fs::create_dir_all(world.record_dir()).unwrap();
        let scanner = WorldScanner::new(
            Arc::new(NbtRecordDecoder::default()),
            &RegistryOptions::default(),
        );
        let store = Arc::new(RegistryStore::new());
        let watcher = WorldWatcher::new(
            world,
            scanner,
            Arc::clone(&store),
            Arc::new(AtomicU64::new(0)),
        );
        (watcher, store)
    }

    fn event(kind: EventKind, path: &Path) -> Event {
        Event::new(kind).add_path(path.to_path_buf())
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .is_ok()
    }

    #[test]
    fn test_content_change_classification() {
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Data(
            DataChange::Content
        ))));
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Name(
            RenameMode::To
        ))));
        assert!(is_content_change(&EventKind::Access(AccessKind::Close(
            AccessMode::Write
        ))));

        assert!(!is_content_change(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_content_change(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));
        assert!(!is_content_change(&EventKind::Modify(ModifyKind::Name(
            RenameMode::From
        ))));
        assert!(!is_content_change(&EventKind::Create(CreateKind::Folder)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Read)));
    }

    #[tokio::test]
    async fn test_injected_event_adds_new_player() {
        let temp = TempDir::new().unwrap();
        let (mut watcher, store) = make_watcher(&temp);
        watcher.start().unwrap();
        assert_eq!(watcher.state(), WatcherState::Watching);

        let record = watcher.world().record_dir().join("steve.dat");
        std::fs::write(&record, encode_player_record("Steve").unwrap()).unwrap();
        watcher
            .inject(event(EventKind::Create(CreateKind::File), &record))
            .unwrap();

        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while !store.contains("Steve").await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(found.is_ok(), "Steve should become known after the event");

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_irrelevant_events_do_not_rescan() {
        let temp = TempDir::new().unwrap();
        let (mut watcher, _store) = make_watcher(&temp);
        watcher.start().unwrap();
        let dir = watcher.world().record_dir().to_path_buf();

        watcher
            .inject(event(EventKind::Remove(RemoveKind::File), &dir.join("a.dat")))
            .unwrap();
        watcher
            .inject(event(EventKind::Create(CreateKind::File), &dir.join("a.txt")))
            .unwrap();
        watcher
            .inject(event(
                EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)),
                &dir.join("a.dat"),
            ))
            .unwrap();
        // Sentinel: the only event that should trigger a scan.
        watcher
            .inject(event(EventKind::Create(CreateKind::File), &dir.join("b.dat")))
            .unwrap();

        assert!(wait_for(|| watcher.rescan_count() >= 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(watcher.rescan_count(), 1);

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_missing_record_dir_fails_setup() {
        let temp = TempDir::new().unwrap();
        let world = WorldDirectory::new(temp.path().join("world_new"), "playerdata");
        let scanner = WorldScanner::new(
            Arc::new(NbtRecordDecoder::default()),
            &RegistryOptions::default(),
        );
        let mut watcher = WorldWatcher::new(
            world,
            scanner,
            Arc::new(RegistryStore::new()),
            Arc::new(AtomicU64::new(0)),
        );

        let result = watcher.start();
        assert!(matches!(result, Err(VaultError::WatchSetup { .. })));
        assert_eq!(watcher.state(), WatcherState::Idle);
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let temp = TempDir::new().unwrap();
        let (mut watcher, _store) = make_watcher(&temp);
        watcher.start().unwrap();
        watcher.stop().await;

        assert_eq!(watcher.state(), WatcherState::Stopped);
        let record = watcher.world().record_dir().join("x.dat");
        assert!(matches!(
            watcher.inject(event(EventKind::Create(CreateKind::File), &record)),
            Err(VaultError::Config { .. })
        ));
        assert!(matches!(watcher.start(), Err(VaultError::Config { .. })));
    }

    #[tokio::test]
    async fn test_inject_before_start_fails() {
        let temp = TempDir::new().unwrap();
        let (watcher, _store) = make_watcher(&temp);
        let record = watcher.world().record_dir().join("x.dat");
        let err = watcher
            .inject(event(EventKind::Create(CreateKind::File), &record))
            .unwrap_err();
        assert!(matches!(err, VaultError::Config { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_queued_events_coalesce_into_one_rescan() {
        let temp = TempDir::new().unwrap();
        let (mut watcher, _store) = make_watcher(&temp);
        watcher.start().unwrap();
        let dir = watcher.world().record_dir().to_path_buf();

        // The loop cannot run until this task yields, so all of these queue up.
        let queued = 10;
        for i in 0..queued {
            watcher
                .inject(event(
                    EventKind::Create(CreateKind::File),
                    &dir.join(format!("{}.dat", i)),
                ))
                .unwrap();
        }

        assert!(wait_for(|| watcher.rescan_count() >= 1).await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(watcher.rescan_count() < queued);
        assert_eq!(watcher.rescan_count(), 1);

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_failed_rescan_keeps_watching() {
        let temp = TempDir::new().unwrap();
        let (mut watcher, store) = make_watcher(&temp);
        watcher.start().unwrap();
        let dir = watcher.world().record_dir().to_path_buf();

        // Listing a file instead of a directory fails the scan.
        std::fs::remove_dir(&dir).unwrap();
        std::fs::write(&dir, b"not a directory").unwrap();
        watcher
            .inject(event(EventKind::Create(CreateKind::File), &dir.join("a.dat")))
            .unwrap();
        assert!(wait_for(|| watcher.rescan_count() >= 1).await);
        assert_eq!(watcher.state(), WatcherState::Watching);

        std::fs::remove_file(&dir).unwrap();
        std::fs::create_dir(&dir).unwrap();
        let record = dir.join("alex.dat");
        std::fs::write(&record, encode_player_record("Alex").unwrap()).unwrap();
        watcher
            .inject(event(EventKind::Create(CreateKind::File), &record))
            .unwrap();

        let found = tokio::time::timeout(Duration::from_secs(5), async {
            while !store.contains("Alex").await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(found.is_ok(), "Alex should become known after the directory returns");

        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_decode_failures_counted_on_rescan() {
        let temp = TempDir::new().unwrap();
        let world = WorldDirectory::new(temp.path().join("world"), "playerdata");
        std::fs::create_dir_all(world.record_dir()).unwrap();
        let failures = Arc::new(AtomicU64::new(0));
        let mut watcher = WorldWatcher::new(
            world,
            WorldScanner::new(
                Arc::new(NbtRecordDecoder::default()),
                &RegistryOptions::default(),
            ),
            Arc::new(RegistryStore::new()),
            Arc::clone(&failures),
        );
        watcher.start().unwrap();

        let broken = watcher.world().record_dir().join("broken.dat");
        std::fs::write(&broken, b"garbage").unwrap();
        watcher
            .inject(event(
                EventKind::Modify(ModifyKind::Data(DataChange::Any)),
                &broken,
            ))
            .unwrap();

        assert!(wait_for(|| failures.load(Ordering::SeqCst) >= 1).await);
        watcher.stop().await;
    }
}
