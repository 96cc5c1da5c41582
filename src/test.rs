//! # End-to-end Test Suite for VendingFinder Core
//!
//! Module-level unit tests live next to the code they cover. This suite drives
//! the pieces together, the way the app does, and exercises the FFI surface.
//!
//! ## Test Categories
//!
//! ### 1. Offline Scenarios
//! - Fallback to the cached snapshot while offline
//! - Filtering a cached list
//!
//! ### 2. Online Scenarios
//! - Write-through of the sample data set
//! - Favorites for a signed-in user
//! - Creation refused without a user
//!
//! ### 3. Cache Lifecycle
//! - Clearing every record, for every user
//! - Persistence across sessions
//!
//! ### 4. FFI Function Tests
//! - Every `extern "C"` function with success and error scenarios
//! - Null pointer handling, invalid UTF-8, malformed JSON
//!
//! ## Running the Tests
//!
//! ```bash
//! cargo test
//! cargo test test_ffi_       # FFI tests only
//! cargo test test_scenario_  # app scenarios only
//! ```

#[cfg(test)]
pub mod tests {
    use std::collections::BTreeSet;
    use std::ffi::{CStr, CString};
    use std::os::raw::c_char;
    use std::path::Path;
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use log::info;
    use serde_json::Value;

    use crate::app_response::AppResponse;
    use crate::connectivity::ConnectivityMonitor;
    use crate::error::{PreconditionUnmet, RemoteError};
    use crate::local_cache_store::{CacheStore, LocalCacheStore};
    use crate::machine_model::{sample_machines, Category, MachineDraft, User, VendingMachine};
    use crate::remote::{InMemoryRemote, RemoteSource};
    use crate::repository::MachineRepository;
    use crate::*;

    struct Session {
        _dir: tempfile::TempDir,
        store: Arc<LocalCacheStore>,
        remote: Arc<InMemoryRemote>,
        monitor: ConnectivityMonitor,
        repo: MachineRepository,
    }

    fn open_session() -> Session {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalCacheStore::open(dir.path().join("session.lmdb"), 8).unwrap());
        let remote = Arc::new(InMemoryRemote::default());
        let monitor = ConnectivityMonitor::new();
        let repo = MachineRepository::new(remote.clone(), store.clone(), monitor.clone());
        Session {
            _dir: dir,
            store,
            remote,
            monitor,
            repo,
        }
    }

    fn test_user(id: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{id}@example.com"),
        }
    }

    fn valid_draft() -> MachineDraft {
        MachineDraft {
            name: "Distributeur de miel".to_string(),
            address: "3 Chemin des Ruches, 84000 Avignon".to_string(),
            description: "Miel de lavande".to_string(),
            category: Category::ProduitsLocaux,
            average_price: 7.0,
            image_url: Some("file:///miel.jpg".to_string()),
            latitude: 43.9493,
            longitude: 4.8055,
        }
    }

    // ===============================
    // OFFLINE SCENARIOS
    // ===============================

    #[test]
    fn test_scenario_offline_filter_on_cached_list() {
        let mut s = open_session();
        s.store.write_entities(&sample_machines()[..3]).unwrap();
        s.monitor.set_connected(false);

        s.repo.fetch_all();
        s.repo.set_filter("Pain");

        let filtered = s.repo.filtered();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].category, Category::Pain);
        assert_eq!(s.remote.call_count(), 0);
    }

    #[test]
    fn test_offline_fetch_returns_exactly_the_cache() {
        let mut s = open_session();
        s.monitor.set_connected(false);

        for cached in [Vec::new(), sample_machines()[2..].to_vec(), sample_machines()] {
            s.store.write_entities(&cached).unwrap();
            assert_eq!(s.repo.fetch_all(), s.store.read_entities().unwrap());
        }
        assert_eq!(s.remote.call_count(), 0);
    }

    #[test]
    fn test_filter_matches_every_category() {
        let mut s = open_session();
        s.repo.fetch_all();

        for category in Category::ALL {
            s.repo.set_filter(&category.label().to_uppercase());
            let expected: Vec<_> = sample_machines()
                .into_iter()
                .filter(|m| m.category == category)
                .collect();
            assert_eq!(s.repo.filtered(), expected, "filter {category}");
        }
    }

    // ===============================
    // ONLINE SCENARIOS
    // ===============================

    #[test]
    fn test_scenario_online_fetch_populates_cache() {
        let mut s = open_session();

        let fetched = s.repo.fetch_all();

        assert_eq!(fetched.len(), 6);
        assert_eq!(s.repo.machines().len(), 6);
        assert_eq!(s.store.read_entities().unwrap(), fetched);

        let last_sync = s.store.read_last_sync().unwrap().unwrap();
        let age = Utc::now() - last_sync;
        assert!(age.num_milliseconds() >= 0 && age.num_milliseconds() < 1000);
    }

    #[test]
    fn test_scenario_favorite_toggle() {
        let mut s = open_session();
        s.repo.fetch_all();
        s.repo.sign_in(test_user("fav-user"));
        assert!(s.repo.favorites().is_empty());

        s.repo.toggle_favorite("3").unwrap();
        let ids: Vec<_> = s.repo.favorites().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["3"]);
        assert!(s.repo.is_favorite("3"));

        s.repo.toggle_favorite("3").unwrap();
        assert!(s.repo.favorites().is_empty());
        assert!(!s.repo.is_favorite("3"));
    }

    #[test]
    fn test_scenario_create_unauthenticated() {
        let mut s = open_session();
        s.repo.fetch_all();
        let before = s.repo.machines().len();

        let err = s.repo.create(valid_draft()).unwrap_err();

        assert_eq!(err.precondition(), Some(PreconditionUnmet::Unauthenticated));
        assert_eq!(s.repo.machines().len(), before);
        assert_eq!(s.store.read_entities().unwrap().len(), before);
    }

    #[test]
    fn test_created_machine_is_served_offline() {
        let mut s = open_session();
        s.repo.fetch_all();
        s.repo.sign_in(test_user("creator"));
        let created = s.repo.create(valid_draft()).unwrap();

        s.monitor.set_connected(false);
        let offline = s.repo.fetch_all();

        assert_eq!(offline.len(), 7);
        assert_eq!(offline[0], created);
        assert_eq!(s.repo.fetch_by_id(&created.id), Some(created));
    }

    // ===============================
    // CACHE LIFECYCLE
    // ===============================

    #[test]
    fn test_clear_all_empties_every_user() {
        let s = open_session();
        for user in ["a", "b", "c"] {
            let ids: BTreeSet<String> = ["1".to_string()].into();
            s.store.write_favorites(user, &ids).unwrap();
        }
        s.store.write_entities(&sample_machines()).unwrap();

        s.store.clear_all().unwrap();

        assert!(s.store.read_entities().unwrap().is_empty());
        assert!(s.store.read_last_sync().unwrap().is_none());
        for user in ["a", "b", "c", "never-seen"] {
            assert!(s.store.read_favorites(user).unwrap().is_empty());
        }
    }

    #[test]
    fn test_session_restart_keeps_cache_and_favorites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restart.lmdb");

        {
            let store = Arc::new(LocalCacheStore::open(&path, 8).unwrap());
            let mut repo =
                MachineRepository::new(Arc::new(InMemoryRemote::default()), store, ConnectivityMonitor::new());
            repo.fetch_all();
            repo.sign_in(test_user("returning"));
            repo.toggle_favorite("4").unwrap();
        }

        info!("Reopening cache at {}", path.display());
        let store = Arc::new(LocalCacheStore::open(&path, 8).unwrap());
        let monitor = ConnectivityMonitor::new();
        monitor.set_connected(false);
        let mut repo = MachineRepository::new(Arc::new(InMemoryRemote::default()), store, monitor);

        repo.fetch_all();
        repo.sign_in(test_user("returning"));

        assert_eq!(repo.machines().len(), 6);
        assert_eq!(repo.favorites()[0].id, "4");
    }

    // ===============================
    // FFI FUNCTION TESTS
    // ===============================

    fn take_response(ptr: *const c_char) -> AppResponse {
        assert!(!ptr.is_null(), "Response pointer should not be null");
        let json = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        free_response(ptr);
        serde_json::from_str(&json).unwrap()
    }

    fn ok_payload(ptr: *const c_char) -> Value {
        match take_response(ptr) {
            AppResponse::Ok(json) => serde_json::from_str(&json).unwrap(),
            other => panic!("Expected Ok response, got {other:?}"),
        }
    }

    fn open_ffi(dir: &Path) -> *mut AppCoreState {
        let config = serde_json::json!({ "dbPath": dir.join("ffi.lmdb"), "mapSizeMb": 8 }).to_string();
        let config = CString::new(config).unwrap();
        let core = open_repository(config.as_ptr());
        assert!(!core.is_null(), "Repository pointer should not be null");
        core
    }

    #[test]
    fn test_ffi_open_repository_null_pointer() {
        assert!(open_repository(std::ptr::null()).is_null());
    }

    #[test]
    fn test_ffi_open_repository_invalid_utf8() {
        let invalid_bytes = [0xFFu8, 0xFE, 0xFD, 0x00];
        let core = open_repository(invalid_bytes.as_ptr() as *const c_char);
        assert!(core.is_null(), "Should return null for invalid UTF-8");
    }

    #[test]
    fn test_ffi_open_repository_invalid_config() {
        let config = CString::new(r#"{"mapSizeMb": 8}"#).unwrap();
        assert!(open_repository(config.as_ptr()).is_null());
    }

    #[test]
    fn test_ffi_fetch_all_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());

        let all = ok_payload(fetch_all_machines(core));
        assert_eq!(all.as_array().unwrap().len(), 6);

        let category = CString::new("lait").unwrap();
        let filtered = ok_payload(set_category_filter(core, category.as_ptr()));
        assert_eq!(filtered.as_array().unwrap().len(), 1);
        assert_eq!(filtered[0]["category"], "Lait");

        let query = CString::new("bordeaux").unwrap();
        let displayed = ok_payload(set_search_query(core, query.as_ptr()));
        assert_eq!(displayed[0]["id"], "3");

        assert!(take_response(close_repository(core)).is_ok());
    }

    #[test]
    fn test_ffi_fetch_machine_by_id_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());

        let id = CString::new("2").unwrap();
        assert_eq!(ok_payload(fetch_machine_by_id(core, id.as_ptr()))["name"], "Pizz'Automat");

        let missing = CString::new("999").unwrap();
        assert!(matches!(
            take_response(fetch_machine_by_id(core, missing.as_ptr())),
            AppResponse::NotFound(_)
        ));

        take_response(report_connectivity(core, false));
        assert!(matches!(
            take_response(fetch_machine_by_id(core, id.as_ptr())),
            AppResponse::Unavailable(_)
        ));

        take_response(close_repository(core));
    }

    #[test]
    fn test_ffi_report_connectivity_state() {
        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());

        ok_payload(fetch_all_machines(core));
        let state = ok_payload(report_connectivity(core, false));

        assert_eq!(state["connected"], false);
        assert_eq!(state["offlineMode"], true);
        assert_eq!(state["mode"], "OfflineFallback");
        assert_eq!(state["machineCount"], 6);

        take_response(close_repository(core));
    }

    #[test]
    fn test_ffi_add_machine_preconditions() {
        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());
        let draft = CString::new(serde_json::to_string(&valid_draft()).unwrap()).unwrap();

        match take_response(add_machine(core, draft.as_ptr())) {
            AppResponse::PreconditionFailed(reason) => assert_eq!(reason, "unauthenticated"),
            other => panic!("Expected precondition failure, got {other:?}"),
        }

        let user = CString::new(r#"{"id":"ffi-user","email":"ffi@example.com"}"#).unwrap();
        take_response(sign_in(core, user.as_ptr()));

        take_response(report_connectivity(core, false));
        match take_response(add_machine(core, draft.as_ptr())) {
            AppResponse::PreconditionFailed(reason) => assert_eq!(reason, "offline"),
            other => panic!("Expected precondition failure, got {other:?}"),
        }

        take_response(report_connectivity(core, true));
        let created = ok_payload(add_machine(core, draft.as_ptr()));
        assert_eq!(created["rating"], 0.0);
        assert_eq!(created["reviewCount"], 0);

        take_response(close_repository(core));
    }

    #[test]
    fn test_ffi_add_machine_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());

        let bad = CString::new(r#"{"name": "missing everything else"}"#).unwrap();
        assert!(matches!(
            take_response(add_machine(core, bad.as_ptr())),
            AppResponse::SerializationError(_)
        ));

        take_response(close_repository(core));
    }

    #[test]
    fn test_ffi_favorites_flow() {
        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());
        let id = CString::new("5").unwrap();

        ok_payload(fetch_all_machines(core));
        assert!(matches!(
            take_response(toggle_favorite(core, id.as_ptr())),
            AppResponse::PreconditionFailed(_)
        ));

        let user = CString::new(r#"{"id":"ffi-fav"}"#).unwrap();
        take_response(sign_in(core, user.as_ptr()));

        let toggled = ok_payload(toggle_favorite(core, id.as_ptr()));
        assert_eq!(toggled["favorite"], true);
        assert_eq!(ok_payload(is_favorite(core, id.as_ptr())), true);
        assert_eq!(ok_payload(get_favorite_machines(core))[0]["id"], "5");

        take_response(sign_out(core));
        assert_eq!(ok_payload(is_favorite(core, id.as_ptr())), false);

        take_response(close_repository(core));
    }

    #[test]
    fn test_ffi_location_and_clear_cache() {
        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());

        let location = CString::new(r#"{"latitude":48.85,"longitude":2.35}"#).unwrap();
        ok_payload(remember_location(core, location.as_ptr()));
        assert_eq!(ok_payload(get_last_location(core))["latitude"], 48.85);

        ok_payload(fetch_all_machines(core));
        assert!(take_response(clear_cache(core)).is_ok());

        assert!(matches!(take_response(get_last_location(core)), AppResponse::NotFound(_)));
        let state = ok_payload(get_repository_state(core));
        assert!(state["lastSync"].is_null());

        take_response(close_repository(core));
    }

    #[test]
    fn test_ffi_notification_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());

        assert!(matches!(
            take_response(get_notification_preferences(core)),
            AppResponse::PreconditionFailed(_)
        ));

        let user = CString::new(r#"{"id":"notif-user"}"#).unwrap();
        take_response(sign_in(core, user.as_ptr()));

        let patch = CString::new(r#"{"promotional": true}"#).unwrap();
        let prefs = ok_payload(update_notification_preferences(core, patch.as_ptr()));
        assert_eq!(prefs["promotional"], true);
        assert_eq!(prefs["newMachinesNearby"], true);

        let token = CString::new(r#"{"pushToken":"ExponentPushToken[abc]","deviceType":"android"}"#).unwrap();
        let regs = ok_payload(register_push_token(core, token.as_ptr()));
        assert_eq!(regs[0]["deviceId"], "unknown");
        assert_eq!(regs[0]["isActive"], true);

        assert_eq!(ok_payload(notification_received(core)), 1);
        assert_eq!(ok_payload(mark_notification_read(core)), 0);
        assert_eq!(ok_payload(mark_notification_read(core)), 0);

        take_response(close_repository(core));
    }

    /// Backend whose `list` blocks until the test lets it through.
    struct GatedRemote {
        inner: InMemoryRemote,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl RemoteSource for GatedRemote {
        fn list(&self) -> Result<Vec<VendingMachine>, RemoteError> {
            if let Ok(gate) = self.gate.lock() {
                let _ = gate.recv();
            }
            self.inner.list()
        }

        fn get_by_id(&self, id: &str) -> Result<Option<VendingMachine>, RemoteError> {
            self.inner.get_by_id(id)
        }

        fn insert(&self, user_id: &str, draft: &MachineDraft) -> Result<VendingMachine, RemoteError> {
            self.inner.insert(user_id, draft)
        }
    }

    #[test]
    fn test_ffi_is_loading_while_fetch_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalCacheStore::open(dir.path().join("gated.lmdb"), 8).unwrap());
        let (release, gate) = mpsc::channel();
        let remote = Arc::new(GatedRemote {
            inner: InMemoryRemote::default(),
            gate: Mutex::new(gate),
        });
        let core = Box::into_raw(Box::new(AppCoreState::assemble(remote, store)));

        assert_eq!(ok_payload(is_loading(core)), false);

        let address = core as usize;
        let fetcher = thread::spawn(move || {
            free_response(fetch_all_machines(address as *mut AppCoreState));
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen_loading = false;
        while Instant::now() < deadline {
            if ok_payload(is_loading(core)).as_bool() == Some(true) {
                seen_loading = true;
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        release.send(()).unwrap();
        fetcher.join().unwrap();

        assert!(seen_loading, "Loading flag should be visible while the fetch runs");
        assert_eq!(ok_payload(is_loading(core)), false);
        let state = ok_payload(get_repository_state(core));
        assert_eq!(state["loading"], false);
        assert_eq!(state["machineCount"], 6);

        take_response(close_repository(core));
    }

    #[test]
    fn test_ffi_sign_in_forwards_access_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalCacheStore::open(dir.path().join("token.lmdb"), 8).unwrap());
        let remote = Arc::new(InMemoryRemote::default());
        let core = Box::into_raw(Box::new(AppCoreState::assemble(remote.clone(), store)));

        let user = CString::new(r#"{"id":"jwt-user","email":"jwt@example.com","accessToken":"eyJ.jwt"}"#).unwrap();
        ok_payload(sign_in(core, user.as_ptr()));
        assert_eq!(remote.access_token().as_deref(), Some("eyJ.jwt"));
        assert!(ok_payload(get_repository_state(core))["signedIn"].as_bool().unwrap());

        take_response(sign_out(core));
        assert_eq!(remote.access_token(), None);

        take_response(close_repository(core));
    }

    #[test]
    fn test_ffi_null_pointers() {
        assert!(matches!(take_response(fetch_all_machines(std::ptr::null_mut())), AppResponse::BadRequest(_)));
        assert!(matches!(take_response(close_repository(std::ptr::null_mut())), AppResponse::BadRequest(_)));
        assert!(matches!(take_response(get_repository_state(std::ptr::null_mut())), AppResponse::BadRequest(_)));
        assert!(matches!(take_response(is_loading(std::ptr::null_mut())), AppResponse::BadRequest(_)));

        let dir = tempfile::tempdir().unwrap();
        let core = open_ffi(dir.path());
        assert!(matches!(
            take_response(fetch_machine_by_id(core, std::ptr::null())),
            AppResponse::BadRequest(_)
        ));
        assert!(matches!(take_response(toggle_favorite(core, std::ptr::null())), AppResponse::BadRequest(_)));
        assert!(matches!(take_response(sign_in(core, std::ptr::null())), AppResponse::BadRequest(_)));
        take_response(close_repository(core));

        free_response(std::ptr::null());
    }
}
