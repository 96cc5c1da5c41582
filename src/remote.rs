//! Backend data service.
//!
//! [`RemoteSource`] is the narrow contract the repository consumes. Two
//! implementations ship with the crate: [`InMemoryRemote`], seeded with the
//! sample machines and usable while the real backend is not wired up, and
//! [`SupabaseRemote`], which talks to the PostgREST endpoint of a Supabase project.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::machine_model::{sample_machines, Category, MachineDraft, VendingMachine, DEFAULT_IMAGE_URL};

pub trait RemoteSource: Send + Sync {
    fn list(&self) -> Result<Vec<VendingMachine>, RemoteError>;

    /// `Ok(None)` when the backend has no machine with that id.
    fn get_by_id(&self, id: &str) -> Result<Option<VendingMachine>, RemoteError>;

    /// Creates the machine on behalf of `user_id` and returns the stored record.
    fn insert(&self, user_id: &str, draft: &MachineDraft) -> Result<VendingMachine, RemoteError>;

    /// Acts as the signed-in user from now on; `None` goes back to anonymous access.
    fn set_access_token(&self, _token: Option<String>) {}
}

/// Backend stand-in holding its machines in memory.
///
/// Ids for new machines are derived from the current time in milliseconds.
/// Failures can be switched on to exercise the cache fallback.
pub struct InMemoryRemote {
    machines: Mutex<Vec<VendingMachine>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    access_token: Mutex<Option<String>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::with_machines(sample_machines())
    }
}

impl InMemoryRemote {
    pub fn with_machines(machines: Vec<VendingMachine>) -> Self {
        Self {
            machines: Mutex::new(machines),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            access_token: Mutex::new(None),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls received, failed ones included.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Token of the user the backend currently acts for.
    pub fn access_token(&self) -> Option<String> {
        match self.access_token.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("in-memory backend set to fail".to_string()));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<VendingMachine>> {
        match self.machines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl RemoteSource for InMemoryRemote {
    fn list(&self) -> Result<Vec<VendingMachine>, RemoteError> {
        self.enter()?;
        Ok(self.lock().clone())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<VendingMachine>, RemoteError> {
        self.enter()?;
        Ok(self.lock().iter().find(|m| m.id == id).cloned())
    }

    fn insert(&self, user_id: &str, draft: &MachineDraft) -> Result<VendingMachine, RemoteError> {
        self.enter()?;
        let mut machines = self.lock();

        let mut millis = Utc::now().timestamp_millis();
        while machines.iter().any(|m| m.id == millis.to_string()) {
            millis += 1;
        }

        let machine = VendingMachine::from_draft(millis.to_string(), draft.clone());
        debug!("In-memory backend stored machine {} for user {user_id}", machine.id);
        machines.insert(0, machine.clone());
        Ok(machine)
    }

    fn set_access_token(&self, token: Option<String>) {
        match self.access_token.lock() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

const MACHINES_TABLE: &str = "distributeurs";

/// Row shape of the `distributeurs` table.
#[derive(Debug, Deserialize)]
struct MachineRow {
    id: String,
    name: String,
    address: String,
    latitude: f64,
    longitude: f64,
    category: Category,
    average_price: Option<f64>,
    description: Option<String>,
    image_url: Option<String>,
    #[serde(default)]
    rating: f64,
    #[serde(default)]
    review_count: u32,
}

impl From<MachineRow> for VendingMachine {
    fn from(row: MachineRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            address: row.address,
            description: row.description.unwrap_or_default(),
            category: row.category,
            average_price: row.average_price.unwrap_or(0.0),
            image_url: row.image_url.unwrap_or_else(|| DEFAULT_IMAGE_URL.to_string()),
            latitude: row.latitude,
            longitude: row.longitude,
            rating: row.rating,
            review_count: row.review_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct NewMachineRow<'a> {
    name: &'a str,
    address: &'a str,
    latitude: f64,
    longitude: f64,
    category: Category,
    average_price: f64,
    description: &'a str,
    image_url: &'a str,
    user_id: &'a str,
}

/// Client for a Supabase project's REST endpoint.
pub struct SupabaseRemote {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Mutex<Option<String>>,
}

impl SupabaseRemote {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: Mutex::new(None),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{MACHINES_TABLE}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = match self.access_token.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
        .unwrap_or_else(|| self.anon_key.clone());

        request
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Accept", "application/json")
    }

    fn rows(response: Response) -> Result<Vec<MachineRow>, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!("Backend request failed with {status}");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json()?)
    }
}

impl RemoteSource for SupabaseRemote {
    fn list(&self) -> Result<Vec<VendingMachine>, RemoteError> {
        let response = self
            .authorized(self.client.get(self.table_url()))
            .query(&[("select", "*")])
            .send()?;

        let rows = Self::rows(response)?;
        debug!("Backend returned {} machines", rows.len());
        Ok(rows.into_iter().map(VendingMachine::from).collect())
    }

    fn get_by_id(&self, id: &str) -> Result<Option<VendingMachine>, RemoteError> {
        let filter = format!("eq.{id}");
        let response = self
            .authorized(self.client.get(self.table_url()))
            .query(&[("select", "*"), ("id", filter.as_str())])
            .send()?;

        Ok(Self::rows(response)?.into_iter().next().map(VendingMachine::from))
    }

    fn insert(&self, user_id: &str, draft: &MachineDraft) -> Result<VendingMachine, RemoteError> {
        let row = NewMachineRow {
            name: &draft.name,
            address: &draft.address,
            latitude: draft.latitude,
            longitude: draft.longitude,
            category: draft.category,
            average_price: draft.average_price,
            description: &draft.description,
            image_url: draft.image_url.as_deref().unwrap_or(DEFAULT_IMAGE_URL),
            user_id,
        };

        let response = self
            .authorized(self.client.post(self.table_url()))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()?;

        Self::rows(response)?
            .into_iter()
            .next()
            .map(VendingMachine::from)
            .ok_or(RemoteError::EmptyResponse)
    }

    /// Uses the signed-in user's JWT instead of the anon key for row-level security.
    fn set_access_token(&self, token: Option<String>) {
        match self.access_token.lock() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}
