//! Connectivity-aware access to the machine list.
//!
//! [`MachineRepository`] is the single source of truth for the machines the app
//! currently knows about. Online, it reads from the [`RemoteSource`] and writes
//! every fresh list through to the [`CacheStore`]; offline, or when the backend
//! fails, it serves the cached snapshot instead.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::connectivity::{ConnectivityMonitor, Subscription};
use crate::error::{PreconditionUnmet, RepositoryError, StoreError};
use crate::local_cache_store::CacheStore;
use crate::machine_model::{MachineDraft, User, UserLocation, VendingMachine, ALL_CATEGORIES};
use crate::remote::RemoteSource;

/// Where the current machine list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepositoryMode {
    Uninitialized,
    Online,
    OfflineFallback,
}

/// Outcome of looking up a single machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(VendingMachine),
    /// The authoritative source was consulted and has no such id.
    NotFound,
    /// Only the cache could be consulted and it has no such id.
    Unavailable,
}

impl Lookup {
    pub fn found(self) -> Option<VendingMachine> {
        match self {
            Lookup::Found(machine) => Some(machine),
            _ => None,
        }
    }
}

/// Read-only view of the repository handed to the UI layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryState {
    pub mode: RepositoryMode,
    pub connected: bool,
    pub offline_mode: bool,
    pub loading: bool,
    pub machine_count: usize,
    pub filter: String,
    pub search: String,
    pub signed_in: bool,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Shared flag that reads true while a fetch or create is in flight.
#[derive(Clone, Default)]
pub struct LoadingFlag(Arc<AtomicBool>);

impl LoadingFlag {
    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn raise(&self) -> LoadingGuard<'_> {
        self.0.store(true, Ordering::SeqCst);
        LoadingGuard(self)
    }
}

struct LoadingGuard<'a>(&'a LoadingFlag);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0 .0.store(false, Ordering::SeqCst);
    }
}

pub struct MachineRepository {
    remote: Arc<dyn RemoteSource>,
    store: Arc<dyn CacheStore>,
    monitor: ConnectivityMonitor,
    _subscription: Subscription,

    machines: Vec<VendingMachine>,
    loaded: bool,
    filter: String,
    search: String,
    user: Option<User>,
    favorite_ids: BTreeSet<String>,
    loading: LoadingFlag,
}

impl MachineRepository {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: Arc<dyn CacheStore>,
        monitor: ConnectivityMonitor,
    ) -> Self {
        let subscription = monitor.subscribe(|is_connected| {
            debug!("Repository sees connectivity change: connected={is_connected}");
        });

        Self {
            remote,
            store,
            monitor,
            _subscription: subscription,
            machines: Vec::new(),
            loaded: false,
            filter: ALL_CATEGORIES.to_string(),
            search: String::new(),
            user: None,
            favorite_ids: BTreeSet::new(),
            loading: LoadingFlag::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn monitor(&self) -> &ConnectivityMonitor {
        &self.monitor
    }

    pub fn mode(&self) -> RepositoryMode {
        match (self.loaded, self.is_connected()) {
            (false, _) => RepositoryMode::Uninitialized,
            (true, true) => RepositoryMode::Online,
            (true, false) => RepositoryMode::OfflineFallback,
        }
    }

    /// Disconnected and with something cached to show.
    pub fn is_offline_mode(&self) -> bool {
        !self.is_connected() && !self.cached_machines().is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.get()
    }

    pub fn loading_flag(&self) -> LoadingFlag {
        self.loading.clone()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.store.read_last_sync().unwrap_or_else(|e| {
            warn!("Could not read last sync time: {e}");
            None
        })
    }

    pub fn current_user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    fn cached_machines(&self) -> Vec<VendingMachine> {
        self.store.read_entities().unwrap_or_else(|e| {
            warn!("Could not read cached machines: {e}");
            Vec::new()
        })
    }

    fn write_through(&self, machines: &[VendingMachine]) -> Result<(), StoreError> {
        self.store.write_entities(machines).map(|_| ())
    }

    /// Refreshes the machine list.
    ///
    /// Never fails: a backend error or being offline degrades to the cached snapshot.
    pub fn fetch_all(&mut self) -> Vec<VendingMachine> {
        let loading = self.loading.clone();
        let _guard = loading.raise();

        let machines = if self.is_connected() {
            match self.remote.list() {
                Ok(fresh) => {
                    if let Err(e) = self.write_through(&fresh) {
                        warn!("Fetched {} machines but caching failed: {e}", fresh.len());
                    }
                    info!("Fetched {} machines from backend", fresh.len());
                    fresh
                }
                Err(e) => {
                    warn!("Backend fetch failed, serving cache: {e}");
                    self.cached_machines()
                }
            }
        } else {
            debug!("Offline, serving cached machines");
            self.cached_machines()
        };

        self.machines = machines;
        self.loaded = true;
        self.machines.clone()
    }

    /// Looks up one machine, telling apart "does not exist" from "could not check".
    pub fn lookup(&mut self, id: &str) -> Lookup {
        let connected = self.is_connected();
        self.loaded = true;

        if connected {
            match self.remote.get_by_id(id) {
                Ok(Some(machine)) => return Lookup::Found(machine),
                Ok(None) => return Lookup::NotFound,
                Err(e) => warn!("Backend lookup of {id} failed, checking cache: {e}"),
            }
        }

        match self.cached_machines().into_iter().find(|m| m.id == id) {
            Some(machine) => Lookup::Found(machine),
            None => Lookup::Unavailable,
        }
    }

    pub fn fetch_by_id(&mut self, id: &str) -> Option<VendingMachine> {
        self.lookup(id).found()
    }

    /// Adds a machine on behalf of the signed-in user.
    ///
    /// Fails without touching the backend when offline or signed out, offline
    /// taking precedence. If the backend accepts the machine but the cache write
    /// fails, the machine is kept in memory and the storage error is returned.
    pub fn create(&mut self, draft: MachineDraft) -> Result<VendingMachine, RepositoryError> {
        if !self.is_connected() {
            return Err(PreconditionUnmet::Offline.into());
        }
        let user_id = match &self.user {
            Some(user) => user.id.clone(),
            None => return Err(PreconditionUnmet::Unauthenticated.into()),
        };

        let loading = self.loading.clone();
        let _guard = loading.raise();

        let mut machine = self.remote.insert(&user_id, &draft)?;
        machine.rating = 0.0;
        machine.review_count = 0;

        info!("Created machine {} ({})", machine.id, machine.name);
        self.machines.insert(0, machine.clone());
        self.write_through(&self.machines)?;

        Ok(machine)
    }

    pub fn machines(&self) -> &[VendingMachine] {
        &self.machines
    }

    /// Sets the category filter; [`ALL_CATEGORIES`] clears it.
    pub fn set_filter(&mut self, category: &str) {
        self.filter = category.trim().to_string();
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Machines matching the category filter, in list order.
    pub fn filtered(&self) -> Vec<VendingMachine> {
        if self.filter.eq_ignore_ascii_case(ALL_CATEGORIES) {
            return self.machines.clone();
        }
        self.machines
            .iter()
            .filter(|m| m.category.matches_label(&self.filter))
            .cloned()
            .collect()
    }

    pub fn set_search(&mut self, query: &str) {
        self.search = query.to_string();
    }

    /// The filtered view narrowed further by the search query.
    pub fn displayed(&self) -> Vec<VendingMachine> {
        self.filtered()
            .into_iter()
            .filter(|m| m.matches_query(&self.search))
            .collect()
    }

    /// Starts a session and loads that user's favorites.
    pub fn sign_in(&mut self, user: User) {
        self.sign_in_with_token(user, None);
    }

    /// Like [`sign_in`](Self::sign_in), also handing the user's access token to
    /// the backend so its requests run as that user.
    pub fn sign_in_with_token(&mut self, user: User, access_token: Option<String>) {
        self.remote.set_access_token(access_token);
        self.favorite_ids = self.store.read_favorites(&user.id).unwrap_or_else(|e| {
            warn!("Could not load favorites for {}: {e}", user.id);
            BTreeSet::new()
        });
        info!("User {} signed in with {} favorites", user.id, self.favorite_ids.len());
        self.user = Some(user);
    }

    /// Ends the session. Stored favorites are left on disk.
    pub fn sign_out(&mut self) {
        if let Some(user) = self.user.take() {
            info!("User {} signed out", user.id);
        }
        self.remote.set_access_token(None);
        self.favorite_ids.clear();
    }

    /// Flips `id` in the signed-in user's favorites and persists the set.
    /// Returns the new membership.
    ///
    /// A storage failure is logged; the in-memory set still reflects the toggle.
    pub fn toggle_favorite(&mut self, id: &str) -> Result<bool, RepositoryError> {
        let user_id = match &self.user {
            Some(user) => user.id.clone(),
            None => return Err(PreconditionUnmet::Unauthenticated.into()),
        };

        let now_favorite = if self.favorite_ids.remove(id) {
            false
        } else {
            self.favorite_ids.insert(id.to_string());
            true
        };

        if let Err(e) = self.store.write_favorites(&user_id, &self.favorite_ids) {
            warn!("Could not persist favorites for {user_id}: {e}");
        }

        Ok(now_favorite)
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorite_ids.contains(id)
    }

    /// Known machines that are in the favorite set, in list order.
    pub fn favorites(&self) -> Vec<VendingMachine> {
        self.machines
            .iter()
            .filter(|m| self.favorite_ids.contains(&m.id))
            .cloned()
            .collect()
    }

    pub fn remember_location(&self, location: UserLocation) {
        if let Err(e) = self.store.write_user_location(&location) {
            warn!("Could not cache user location: {e}");
        }
    }

    pub fn last_known_location(&self) -> Option<UserLocation> {
        self.store.read_user_location().unwrap_or_else(|e| {
            warn!("Could not read cached user location: {e}");
            None
        })
    }

    /// Wipes the durable cache and the in-memory favorite set.
    pub fn clear_cache(&mut self) -> Result<(), RepositoryError> {
        self.store.clear_all()?;
        self.favorite_ids.clear();
        Ok(())
    }

    pub fn state(&self) -> RepositoryState {
        RepositoryState {
            mode: self.mode(),
            connected: self.is_connected(),
            offline_mode: self.is_offline_mode(),
            loading: self.is_loading(),
            machine_count: self.machines.len(),
            filter: self.filter.clone(),
            search: self.search.clone(),
            signed_in: self.user.is_some(),
            last_sync: self.last_sync(),
        }
    }
}
