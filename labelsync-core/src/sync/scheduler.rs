//! Background sync scheduling driven by wallet lifecycle hooks.
//!
//! The host calls [`SyncScheduler::on_wallet_opened`],
//! [`SyncScheduler::on_label_set`] and [`SyncScheduler::on_wallet_closed`].
//! Network work runs on spawned Tokio tasks that are never awaited by the
//! host; each task logs its own failure and ends. Hooks may be called from
//! any thread: tasks go to the runtime the scheduler was built with.

use crate::crypto::{derive_key_material, SyncKeyMaterial};
use crate::sync::client::{LabelService, SyncClient};
use crate::sync::config::SyncConfig;
use crate::sync::engine::{MergeOutcome, ReconcileEngine};
use crate::sync::nonce::NonceStore;
use crate::wallet::{lock_wallet, SharedWallet, WalletHandle};
use crate::{Result, SyncError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Sync lifecycle of a wallet as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not registered: never opened, closed, or without public keys
    Closed,
    /// Registered and idle
    Registered,
    Pushing,
    Pulling,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A pull merged remote labels into the wallet
    LabelsChanged(WalletHandle),
}

/// A registered wallet and its key material.
struct SyncedWallet {
    wallet: SharedWallet,
    material: SyncKeyMaterial,
    pushes: AtomicUsize,
    pulls: AtomicUsize,
}

#[derive(Clone, Copy)]
enum Activity {
    Push,
    Pull,
}

/// Counts an in-flight unit of work for [`SyncScheduler::state`].
struct ActivityGuard {
    entry: Arc<SyncedWallet>,
    activity: Activity,
}

impl ActivityGuard {
    fn start(entry: &Arc<SyncedWallet>, activity: Activity) -> Self {
        Self::counter(entry, activity).fetch_add(1, Ordering::SeqCst);
        Self {
            entry: entry.clone(),
            activity,
        }
    }

    fn counter(entry: &SyncedWallet, activity: Activity) -> &AtomicUsize {
        match activity {
            Activity::Push => &entry.pushes,
            Activity::Pull => &entry.pulls,
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        Self::counter(&self.entry, self.activity).fetch_sub(1, Ordering::SeqCst);
    }
}

/// Dispatches background pushes and pulls for open wallets.
#[derive(Clone)]
pub struct SyncScheduler {
    engine: ReconcileEngine,
    registry: Arc<RwLock<HashMap<WalletHandle, Arc<SyncedWallet>>>>,
    events: broadcast::Sender<SyncEvent>,
    runtime: Handle,
}

impl SyncScheduler {
    /// Scheduler spawning onto the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; use
    /// [`SyncScheduler::with_runtime`] there.
    pub fn new(service: Arc<dyn LabelService>) -> Self {
        Self::with_runtime(service, Handle::current())
    }

    /// Scheduler spawning its background tasks onto `runtime`
    pub fn with_runtime(service: Arc<dyn LabelService>, runtime: Handle) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            engine: ReconcileEngine::new(service),
            registry: Arc::new(RwLock::new(HashMap::new())),
            events,
            runtime,
        }
    }

    /// Scheduler talking to the HTTPS label service in `config`
    pub fn from_config(config: &SyncConfig, runtime: Handle) -> Result<Self> {
        Ok(Self::with_runtime(
            Arc::new(SyncClient::new(config)?),
            runtime,
        ))
    }

    /// Receive [`SyncEvent`]s
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_registered(&self, handle: WalletHandle) -> bool {
        self.lookup(handle).is_some()
    }

    /// Wallet id the service knows an open wallet by
    pub fn wallet_id(&self, handle: WalletHandle) -> Option<String> {
        self.lookup(handle)
            .map(|entry| entry.material.wallet_id().to_string())
    }

    pub fn state(&self, handle: WalletHandle) -> SyncState {
        match self.lookup(handle) {
            None => SyncState::Closed,
            Some(entry) if entry.pulls.load(Ordering::SeqCst) > 0 => SyncState::Pulling,
            Some(entry) if entry.pushes.load(Ordering::SeqCst) > 0 => SyncState::Pushing,
            Some(_) => SyncState::Registered,
        }
    }

    /// Register a freshly opened wallet and start a background pull.
    ///
    /// Returns `None` when the wallet cannot be synced; the host carries on
    /// without sync in that case.
    pub fn on_wallet_opened(
        &self,
        handle: WalletHandle,
        wallet: SharedWallet,
    ) -> Option<JoinHandle<()>> {
        match self.insert(handle, wallet) {
            Ok(entry) => Some(self.spawn_pull(handle, entry, false)),
            Err(SyncError::Crypto(e)) => {
                info!("Label sync disabled for {}: {}", handle, e);
                None
            }
            Err(e) => {
                error!("Cannot register {}: {}", handle, e);
                None
            }
        }
    }

    /// Register a wallet without pulling.
    ///
    /// Fails with [`SyncError::Crypto`] when the wallet has no master
    /// public keys.
    pub fn register(&self, handle: WalletHandle, wallet: SharedWallet) -> Result<()> {
        self.insert(handle, wallet).map(|_| ())
    }

    fn insert(&self, handle: WalletHandle, wallet: SharedWallet) -> Result<Arc<SyncedWallet>> {
        let keys = {
            let mut guard = lock_wallet(&wallet, "wallet open")?;
            match NonceStore::get_nonce(&mut *guard) {
                Ok(nonce) => info!("wallet {} nonce is {}", guard.basename(), nonce),
                Err(e) => warn!("Cannot read nonce of {}: {}", guard.basename(), e),
            }
            guard.master_public_keys()
        };
        let material = derive_key_material(keys)?;

        let entry = Arc::new(SyncedWallet {
            wallet,
            material,
            pushes: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
        });
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, entry.clone());
        debug!("Registered {} for label sync", handle);
        Ok(entry)
    }

    /// Forget a closed wallet and its key material.
    ///
    /// Tasks still in flight for it finish without touching its labels.
    pub fn on_wallet_closed(&self, handle: WalletHandle) -> bool {
        let removed = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle)
            .is_some();
        if removed {
            debug!("Unregistered {} from label sync", handle);
        }
        removed
    }

    /// Push a label the host has just set.
    ///
    /// The nonce is reserved before this returns; the upload itself runs in
    /// the background. Returns `None` for wallets that are not synced.
    pub fn on_label_set(
        &self,
        handle: WalletHandle,
        key: &str,
        value: &str,
    ) -> Option<JoinHandle<()>> {
        let entry = self.lookup(handle)?;

        let bundle = {
            let mut guard = match lock_wallet(&entry.wallet, "label set") {
                Ok(guard) => guard,
                Err(e) => {
                    error!("Cannot push label for {}: {}", handle, e);
                    return None;
                }
            };
            match NonceStore::reserve(&mut *guard) {
                Ok(nonce) => ReconcileEngine::build_label_bundle(&entry.material, nonce, key, value),
                Err(e) => {
                    error!("Cannot reserve nonce for {}: {}", handle, e);
                    return None;
                }
            }
        };

        let service = self.engine.service().clone();
        let activity = ActivityGuard::start(&entry, Activity::Push);
        Some(self.runtime.spawn(async move {
            let _activity = activity;
            match service.push_one(&bundle).await {
                Ok(()) => debug!("pushed label for {} at nonce {}", handle, bundle.wallet_nonce),
                Err(e) => error!("could not push label for {}: {}", handle, e),
            }
        }))
    }

    /// Upload every label of an open wallet and wait for the result.
    pub async fn force_upload(&self, handle: WalletHandle) -> Result<usize> {
        let entry = self.lookup(handle).ok_or(SyncError::NotRegistered(handle))?;
        let _activity = ActivityGuard::start(&entry, Activity::Push);
        self.engine.push_all(&entry.wallet, &entry.material).await
    }

    /// Fetch labels changed since the last sync and wait for the merge.
    pub async fn pull(&self, handle: WalletHandle) -> Result<MergeOutcome> {
        self.pull_registered(handle, false).await
    }

    /// Re-download every label, overwriting local ones, and wait for it.
    pub async fn force_download(&self, handle: WalletHandle) -> Result<MergeOutcome> {
        self.pull_registered(handle, true).await
    }

    async fn pull_registered(&self, handle: WalletHandle, force: bool) -> Result<MergeOutcome> {
        let entry = self.lookup(handle).ok_or(SyncError::NotRegistered(handle))?;
        self.run_pull(handle, &entry, force)
            .await?
            .ok_or(SyncError::NotRegistered(handle))
    }

    fn lookup(&self, handle: WalletHandle) -> Option<Arc<SyncedWallet>> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
    }

    /// Whether `entry` is still the live registration for `handle`
    fn is_current(&self, handle: WalletHandle, entry: &Arc<SyncedWallet>) -> bool {
        self.lookup(handle)
            .is_some_and(|live| Arc::ptr_eq(&live, entry))
    }

    fn spawn_pull(
        &self,
        handle: WalletHandle,
        entry: Arc<SyncedWallet>,
        force: bool,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        self.runtime.spawn(async move {
            if let Err(e) = scheduler.run_pull(handle, &entry, force).await {
                error!("could not retrieve labels for {}: {}", handle, e);
            }
        })
    }

    /// Fetch, then merge if the wallet is still open.
    ///
    /// `Ok(None)` means the wallet was closed while the request was running.
    async fn run_pull(
        &self,
        handle: WalletHandle,
        entry: &Arc<SyncedWallet>,
        force: bool,
    ) -> Result<Option<MergeOutcome>> {
        let _activity = ActivityGuard::start(entry, Activity::Pull);
        let response = self
            .engine
            .fetch(&entry.wallet, &entry.material, force)
            .await?;

        if !self.is_current(handle, entry) {
            debug!("{} closed during pull; discarding response", handle);
            return Ok(None);
        }

        let outcome = {
            let mut guard = lock_wallet(&entry.wallet, "apply pull")?;
            ReconcileEngine::apply_pull_response(&mut *guard, &entry.material, &response, force)?
        };

        if outcome.nonce.is_some() {
            // No subscribers is fine
            let _ = self.events.send(SyncEvent::LabelsChanged(handle));
        }
        Ok(Some(outcome))
    }
}
