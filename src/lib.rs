//! # VendingFinder Core
//!
//! Offline-first data layer for the VendingFinder mobile app, designed to be
//! called over FFI from the Flutter/React Native front-end. It keeps the list of
//! known vending machines, the user's favorites and notification bookkeeping in
//! a local LMDB cache, and decides per call whether to ask the backend or serve
//! the cache based on network reachability.
//!
//! ## Features
//!
//! - **Offline fallback**: every fetch degrades to the last cached snapshot when
//!   the device is offline or the backend fails
//! - **Write-through cache**: fresh lists replace the cached snapshot atomically
//! - **Per-user favorites**: persisted locally, survive restarts
//! - **FFI-friendly**: every call answers with a JSON [`AppResponse`] envelope
//! - **Safe error handling**: no `unwrap()` calls in production code
//!
//! ## Quick Start
//!
//! ```no_run
//! use vending_finder_core::{open_repository, fetch_all_machines, set_category_filter, free_response};
//! use std::ffi::CString;
//!
//! let config = CString::new(r#"{"dbPath":"vending_cache"}"#).unwrap();
//! let core = open_repository(config.as_ptr());
//!
//! let all = fetch_all_machines(core);
//! free_response(all);
//!
//! let category = CString::new("Pain").unwrap();
//! let bread = set_category_filter(core, category.as_ptr());
//! free_response(bread);
//! ```
//!
//! ## FFI Functions
//!
//! - [`open_repository`] / [`close_repository`] - Session lifecycle
//! - [`report_connectivity`] - Platform reachability changes
//! - [`fetch_all_machines`] / [`fetch_machine_by_id`] - Reads with offline fallback
//! - [`add_machine`] - Create a machine (online and signed in only)
//! - [`set_category_filter`] / [`set_search_query`] / [`get_displayed_machines`]
//! - [`sign_in`] / [`sign_out`]
//! - [`toggle_favorite`] / [`is_favorite`] / [`get_favorite_machines`]
//! - [`clear_cache`] / [`get_repository_state`] / [`is_loading`]
//! - [`get_notification_preferences`] / [`update_notification_preferences`] /
//!   [`register_push_token`] / [`notification_received`] / [`mark_notification_read`]
//! - [`free_response`] - Release a string returned by any of the above

pub mod app_response;
pub mod config;
pub mod connectivity;
pub mod core_state;
pub mod error;
pub mod local_cache_store;
pub mod machine_model;
pub mod notifications;
pub mod remote;
pub mod repository;
mod test;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};
use serde::{Deserialize, Serialize};

pub use crate::app_response::AppResponse;
pub use crate::config::CoreConfig;
pub use crate::connectivity::ConnectivityMonitor;
pub use crate::core_state::AppCoreState;
pub use crate::local_cache_store::{CacheStore, LocalCacheStore};
pub use crate::machine_model::{Category, MachineDraft, User, VendingMachine};
pub use crate::remote::{InMemoryRemote, RemoteSource, SupabaseRemote};
pub use crate::repository::{Lookup, MachineRepository};

use crate::machine_model::UserLocation;
use crate::notifications::PreferencesPatch;
use crate::repository::RepositoryState;

/// Opens the local cache and wires up a repository session.
///
/// # Parameters
///
/// * `config_json` - Null-terminated C string holding a [`CoreConfig`] JSON document
///
/// # Returns
///
/// A pointer to the session on success, or a null pointer on failure. Release it
/// with [`close_repository`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use vending_finder_core::open_repository;
///
/// let config = CString::new(r#"{"dbPath":"vending_cache","mapSizeMb":32}"#).unwrap();
/// let core = open_repository(config.as_ptr());
///
/// if !core.is_null() {
///     // Ready
/// }
/// ```
///
/// # Errors
///
/// Returns null pointer if:
/// - Input pointer is null or not valid UTF-8
/// - The JSON is not a valid configuration
/// - The LMDB environment cannot be opened
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn open_repository(config_json: *const c_char) -> *mut AppCoreState {
    if config_json.is_null() {
        warn!("Null config pointer passed to open_repository");
        return std::ptr::null_mut();
    }

    let raw = match unsafe { CStr::from_ptr(config_json).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in config parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    let config = match CoreConfig::from_json(raw) {
        Ok(config) => config,
        Err(e) => {
            warn!("Invalid core configuration: {e}");
            return std::ptr::null_mut();
        }
    };

    info!("Opening repository with cache at: {}", config.db_path);

    match AppCoreState::init(config) {
        Ok(state) => {
            info!("✅ Repository opened successfully");
            Box::into_raw(Box::new(state))
        }
        Err(e) => {
            warn!("❌ Failed to open repository: {e}");
            std::ptr::null_mut()
        }
    }
}

/// Releases a session created by [`open_repository`].
///
/// The pointer must not be used afterwards. Passing null is reported as a bad request.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_repository(state: *mut AppCoreState) -> *const c_char {
    if state.is_null() {
        let error = AppResponse::BadRequest("Null state pointer passed to close_repository".to_string());
        return response_to_c_string(&error);
    }

    drop(unsafe { Box::from_raw(state) });
    info!("Repository closed");
    response_to_c_string(&AppResponse::success("Repository closed successfully"))
}

/// Frees a string returned by any function of this library. Null is ignored.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_response(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    drop(unsafe { CString::from_raw(ptr as *mut c_char) });
}

/// Forwards a reachability change from the platform.
///
/// Answers with the repository state after the change. Going back online does
/// not refetch; call [`fetch_all_machines`] for that.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn report_connectivity(state: *mut AppCoreState, connected: bool) -> *const c_char {
    let state = match state_ref(state, "report_connectivity") {
        Ok(s) => s,
        Err(err) => return err,
    };

    state.monitor.set_connected(connected);
    let snapshot: RepositoryState = state.repository().state();
    json_response(&snapshot)
}

/// Refreshes and returns the full machine list.
///
/// Online, the list comes from the backend and is cached; offline or on backend
/// failure the cached snapshot is returned instead. This call always answers `Ok`
/// with a JSON array, possibly empty.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use vending_finder_core::{open_repository, fetch_all_machines};
///
/// let config = CString::new(r#"{"dbPath":"vending_cache"}"#).unwrap();
/// let core = open_repository(config.as_ptr());
///
/// let machines = fetch_all_machines(core);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_all_machines(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "fetch_all_machines") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let machines = state.repository().fetch_all();
    json_response(&machines)
}

/// Looks up a single machine.
///
/// Answers `Ok` with the machine, `NotFound` when the backend has no such id,
/// or `Unavailable` when offline and the id is not cached.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn fetch_machine_by_id(state: *mut AppCoreState, id: *const c_char) -> *const c_char {
    let state = match state_ref(state, "fetch_machine_by_id") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let id_str = match c_ptr_to_string(id, "id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };

    match state.repository().lookup(&id_str) {
        Lookup::Found(machine) => json_response(&machine),
        Lookup::NotFound => {
            let not_found = AppResponse::NotFound(format!("No machine found with id: {id_str}"));
            response_to_c_string(&not_found)
        }
        Lookup::Unavailable => {
            let unavailable = AppResponse::Unavailable(format!("Machine {id_str} is not cached and the device is offline"));
            response_to_c_string(&unavailable)
        }
    }
}

/// Creates a machine from a [`MachineDraft`] JSON document.
///
/// # Returns
///
/// `Ok` with the created machine, or `PreconditionFailed` with `"offline"` /
/// `"unauthenticated"` when the call was refused before reaching the backend.
///
/// # JSON Format
///
/// ```json
/// {
///   "name": "Distributeur de pain",
///   "address": "123 Rue de Paris",
///   "description": "",
///   "category": "Pain",
///   "averagePrice": 2.5,
///   "imageUri": "file:///photo.jpg",
///   "latitude": 48.85,
///   "longitude": 2.35
/// }
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn add_machine(state: *mut AppCoreState, draft_json: *const c_char) -> *const c_char {
    let state = match state_ref(state, "add_machine") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let draft: MachineDraft = match parse_json(draft_json, "draft") {
        Ok(draft) => draft,
        Err(err) => return err,
    };

    let result = state.repository().create(draft);
    match result {
        Ok(machine) => json_response(&machine),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Sets the category filter (`"all"` clears it) and answers with the displayed machines.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_category_filter(state: *mut AppCoreState, category: *const c_char) -> *const c_char {
    let state = match state_ref(state, "set_category_filter") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let category = match c_ptr_to_string(category, "category") {
        Ok(c) => c,
        Err(error_ptr) => return error_ptr,
    };

    let mut repository = state.repository();
    repository.set_filter(&category);
    json_response(&repository.displayed())
}

/// Sets the free-text search and answers with the displayed machines.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_search_query(state: *mut AppCoreState, query: *const c_char) -> *const c_char {
    let state = match state_ref(state, "set_search_query") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let query = match c_ptr_to_string(query, "query") {
        Ok(q) => q,
        Err(error_ptr) => return error_ptr,
    };

    let mut repository = state.repository();
    repository.set_search(&query);
    json_response(&repository.displayed())
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_displayed_machines(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "get_displayed_machines") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let displayed = state.repository().displayed();
    json_response(&displayed)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest {
    #[serde(flatten)]
    user: User,
    #[serde(default)]
    access_token: Option<String>,
}

/// Starts a session for the given `{"id": ..., "email": ..., "accessToken": ...}`
/// user and loads their favorites. The optional access token is passed on to
/// the backend.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn sign_in(state: *mut AppCoreState, user_json: *const c_char) -> *const c_char {
    let state = match state_ref(state, "sign_in") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let request: SignInRequest = match parse_json(user_json, "user") {
        Ok(request) => request,
        Err(err) => return err,
    };

    let mut repository = state.repository();
    repository.sign_in_with_token(request.user, request.access_token);
    json_response(&repository.favorites())
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn sign_out(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "sign_out") {
        Ok(s) => s,
        Err(err) => return err,
    };

    state.repository().sign_out();
    response_to_c_string(&AppResponse::success("Signed out"))
}

#[derive(Serialize)]
struct FavoriteToggle {
    id: String,
    favorite: bool,
}

/// Flips a machine in the signed-in user's favorites.
///
/// Answers `Ok` with `{"id": ..., "favorite": bool}`, or
/// `PreconditionFailed("unauthenticated")` when nobody is signed in.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn toggle_favorite(state: *mut AppCoreState, id: *const c_char) -> *const c_char {
    let state = match state_ref(state, "toggle_favorite") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let id = match c_ptr_to_string(id, "id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };

    let result = state.repository().toggle_favorite(&id);
    match result {
        Ok(favorite) => json_response(&FavoriteToggle { id, favorite }),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn is_favorite(state: *mut AppCoreState, id: *const c_char) -> *const c_char {
    let state = match state_ref(state, "is_favorite") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let id = match c_ptr_to_string(id, "id") {
        Ok(id) => id,
        Err(error_ptr) => return error_ptr,
    };

    let favorite = state.repository().is_favorite(&id);
    json_response(&favorite)
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_favorite_machines(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "get_favorite_machines") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let favorites = state.repository().favorites();
    json_response(&favorites)
}

/// Caches the device position for the map screen.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn remember_location(state: *mut AppCoreState, location_json: *const c_char) -> *const c_char {
    let state = match state_ref(state, "remember_location") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let location: UserLocation = match parse_json(location_json, "location") {
        Ok(location) => location,
        Err(err) => return err,
    };

    state.repository().remember_location(location);
    json_response(&location)
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_last_location(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "get_last_location") {
        Ok(s) => s,
        Err(err) => return err,
    };

    match state.repository().last_known_location() {
        Some(location) => json_response(&location),
        None => response_to_c_string(&AppResponse::NotFound("No cached location".to_string())),
    }
}

/// Wipes every cached record: machines, sync time, location, favorites and
/// notification bookkeeping.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn clear_cache(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "clear_cache") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let result = state.repository().clear_cache();
    match result {
        Ok(()) => response_to_c_string(&AppResponse::success("Cache cleared successfully")),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Whether a fetch or create is in flight, answered without waiting for it.
///
/// The other calls queue behind a running fetch, so this is the one to poll for a spinner.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn is_loading(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "is_loading") {
        Ok(s) => s,
        Err(err) => return err,
    };

    json_response(&state.is_loading())
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_repository_state(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "get_repository_state") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let snapshot = state.repository().state();
    json_response(&snapshot)
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_notification_preferences(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "get_notification_preferences") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let user = state.repository().current_user().cloned();
    match user {
        Some(user) => json_response(&state.notifications.preferences(&user)),
        None => response_to_c_string(&AppResponse::PreconditionFailed("unauthenticated".to_string())),
    }
}

/// Merges a partial preferences document (missing keys keep their value).
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn update_notification_preferences(
    state: *mut AppCoreState,
    patch_json: *const c_char,
) -> *const c_char {
    let state = match state_ref(state, "update_notification_preferences") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let patch: PreferencesPatch = match parse_json(patch_json, "preferences") {
        Ok(patch) => patch,
        Err(err) => return err,
    };

    let user = state.repository().current_user().cloned();
    match state.notifications.update_preferences(user.as_ref(), patch) {
        Ok(prefs) => json_response(&prefs),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushTokenRequest {
    push_token: String,
    device_type: String,
    #[serde(default = "unknown_device")]
    device_id: String,
}

fn unknown_device() -> String {
    "unknown".to_string()
}

/// Records the device's push token for the signed-in user.
///
/// Expects `{"pushToken": ..., "deviceType": ..., "deviceId": ...}`.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn register_push_token(state: *mut AppCoreState, request_json: *const c_char) -> *const c_char {
    let state = match state_ref(state, "register_push_token") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let request: PushTokenRequest = match parse_json(request_json, "push token") {
        Ok(request) => request,
        Err(err) => return err,
    };

    let user = state.repository().current_user().cloned();
    match state.notifications.register_push_token(
        user.as_ref(),
        &request.push_token,
        &request.device_type,
        &request.device_id,
    ) {
        Ok(registrations) => json_response(&registrations),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Bumps the unread counter; answers with the new count.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn notification_received(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "notification_received") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let user = state.repository().current_user().cloned();
    match state.notifications.notification_received(user.as_ref()) {
        Ok(count) => json_response(&count),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn mark_notification_read(state: *mut AppCoreState) -> *const c_char {
    let state = match state_ref(state, "mark_notification_read") {
        Ok(s) => s,
        Err(err) => return err,
    };

    let user = state.repository().current_user().cloned();
    match state.notifications.mark_read(user.as_ref()) {
        Ok(count) => json_response(&count),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Converts an [`AppResponse`] to a C-compatible string.
///
/// The caller owns the returned string and releases it with [`free_response`].
/// Returns a null pointer if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Wraps `value`, serialized as JSON, in an `Ok` response.
fn json_response<T: Serialize + ?Sized>(value: &T) -> *const c_char {
    match serde_json::to_string(value) {
        Ok(json) => response_to_c_string(&AppResponse::Ok(json)),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

fn state_ref<'a>(state: *mut AppCoreState, fn_name: &str) -> Result<&'a AppCoreState, *const c_char> {
    match unsafe { state.as_ref() } {
        Some(s) => Ok(s),
        None => {
            let error = AppResponse::BadRequest(format!("Null state pointer passed to {fn_name}"));
            Err(response_to_c_string(&error))
        }
    }
}

/// Converts a C string pointer to a Rust String.
///
/// # Returns
///
/// * `Ok(String)` - If conversion was successful
/// * `Err(*const c_char)` - A `BadRequest` response for null pointers or invalid UTF-8
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(ptr: *const c_char, field_name: &str) -> Result<T, *const c_char> {
    let raw = c_ptr_to_string(ptr, field_name)?;
    serde_json::from_str(&raw).map_err(|e| {
        let error = AppResponse::SerializationError(format!("Invalid {field_name} JSON: {e}"));
        response_to_c_string(&error)
    })
}
