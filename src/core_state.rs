use std::sync::{Arc, Mutex, MutexGuard};

use log::{info, warn};

use crate::app_response::AppResponse;
use crate::config::CoreConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::local_cache_store::{CacheStore, LocalCacheStore};
use crate::notifications::NotificationCenter;
use crate::remote::RemoteSource;
use crate::repository::{LoadingFlag, MachineRepository};

/// Everything one app session needs, wired together from a [`CoreConfig`].
///
/// This is what the FFI layer hands out as an opaque pointer.
pub struct AppCoreState {
    pub monitor: ConnectivityMonitor,
    pub notifications: NotificationCenter,
    loading: LoadingFlag,
    repository: Mutex<MachineRepository>,
}

impl AppCoreState {
    pub fn init(config: CoreConfig) -> Result<Self, AppResponse> {
        let store: Arc<dyn CacheStore> =
            Arc::new(LocalCacheStore::open(&config.db_path, config.map_size_mb)?);
        let remote = config.backend.build()?;
        info!("Core initialized with cache at {}", config.db_path);

        Ok(Self::assemble(remote, store))
    }

    pub fn assemble(remote: Arc<dyn RemoteSource>, store: Arc<dyn CacheStore>) -> Self {
        let monitor = ConnectivityMonitor::new();
        let repository = MachineRepository::new(remote, store.clone(), monitor.clone());

        Self {
            monitor,
            notifications: NotificationCenter::new(store),
            loading: repository.loading_flag(),
            repository: Mutex::new(repository),
        }
    }

    /// True while a fetch or create holds the repository. Does not wait for the lock.
    pub fn is_loading(&self) -> bool {
        self.loading.get()
    }

    /// Locks the repository. A poisoned lock is recovered; repository state is
    /// only ever replaced wholesale so it stays usable.
    pub fn repository(&self) -> MutexGuard<'_, MachineRepository> {
        match self.repository.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("Repository lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}
