//! Local bookkeeping for push notifications: per-user preferences, the device's
//! push token registration and the unread counter.
//!
//! Delivery itself is handled by the push gateway; nothing here sends anything.

use std::sync::Arc;

use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PreconditionUnmet, RepositoryError, StoreError};
use crate::local_cache_store::CacheStore;
use crate::machine_model::User;

fn preferences_key(user_id: &str) -> String {
    format!("notification_prefs-{user_id}")
}

fn unread_key(user_id: &str) -> String {
    format!("unread_count-{user_id}")
}

fn registrations_key(user_id: &str) -> String {
    format!("push_registration-{user_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub new_machines_nearby: bool,
    pub machine_approved: bool,
    pub favorites_updates: bool,
    pub promotional: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            new_machines_nearby: true,
            machine_approved: true,
            favorites_updates: true,
            promotional: false,
        }
    }
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPatch {
    pub new_machines_nearby: Option<bool>,
    pub machine_approved: Option<bool>,
    pub favorites_updates: Option<bool>,
    pub promotional: Option<bool>,
}

impl NotificationPreferences {
    pub fn merged(self, patch: PreferencesPatch) -> Self {
        Self {
            new_machines_nearby: patch.new_machines_nearby.unwrap_or(self.new_machines_nearby),
            machine_approved: patch.machine_approved.unwrap_or(self.machine_approved),
            favorites_updates: patch.favorites_updates.unwrap_or(self.favorites_updates),
            promotional: patch.promotional.unwrap_or(self.promotional),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRegistration {
    pub push_token: String,
    pub device_type: String,
    pub device_id: String,
    pub is_active: bool,
}

pub struct NotificationCenter {
    store: Arc<dyn CacheStore>,
}

impl NotificationCenter {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    fn require(user: Option<&User>) -> Result<&User, RepositoryError> {
        user.ok_or_else(|| PreconditionUnmet::Unauthenticated.into())
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.read_record(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.store.write_record(key, &raw)
    }

    /// Stored preferences, or the defaults when none were saved or they cannot be read.
    pub fn preferences(&self, user: &User) -> NotificationPreferences {
        match self.read_json(&preferences_key(&user.id)) {
            Ok(prefs) => prefs.unwrap_or_default(),
            Err(e) => {
                warn!("Could not load notification preferences for {}: {e}", user.id);
                NotificationPreferences::default()
            }
        }
    }

    pub fn update_preferences(
        &self,
        user: Option<&User>,
        patch: PreferencesPatch,
    ) -> Result<NotificationPreferences, RepositoryError> {
        let user = Self::require(user)?;
        let updated = self.preferences(user).merged(patch);
        self.write_json(&preferences_key(&user.id), &updated)?;
        Ok(updated)
    }

    /// Records `push_token` as the active token for `device_id`, deactivating
    /// whatever that device had registered before.
    ///
    /// Each device keeps at most its active token and the one it replaced, so
    /// re-registering the same token on every launch leaves a single entry.
    pub fn register_push_token(
        &self,
        user: Option<&User>,
        push_token: &str,
        device_type: &str,
        device_id: &str,
    ) -> Result<Vec<PushRegistration>, RepositoryError> {
        let user = Self::require(user)?;
        let key = registrations_key(&user.id);

        let mut registrations: Vec<PushRegistration> = self.read_json(&key)?.unwrap_or_default();
        registrations.retain(|r| r.device_id != device_id || (r.is_active && r.push_token != push_token));
        for registration in registrations.iter_mut().filter(|r| r.device_id == device_id) {
            registration.is_active = false;
        }
        registrations.push(PushRegistration {
            push_token: push_token.to_string(),
            device_type: device_type.to_string(),
            device_id: device_id.to_string(),
            is_active: true,
        });

        self.write_json(&key, &registrations)?;
        info!("Registered push token for {} on {device_type}", user.id);
        Ok(registrations)
    }

    pub fn active_token(&self, user: &User, device_id: &str) -> Option<String> {
        let registrations: Vec<PushRegistration> = self
            .read_json(&registrations_key(&user.id))
            .ok()
            .flatten()
            .unwrap_or_default();
        registrations
            .into_iter()
            .rev()
            .find(|r| r.is_active && r.device_id == device_id)
            .map(|r| r.push_token)
    }

    pub fn unread_count(&self, user: &User) -> u32 {
        match self.read_json(&unread_key(&user.id)) {
            Ok(count) => count.unwrap_or(0),
            Err(e) => {
                warn!("Could not load unread count for {}: {e}", user.id);
                0
            }
        }
    }

    pub fn notification_received(&self, user: Option<&User>) -> Result<u32, RepositoryError> {
        let user = Self::require(user)?;
        let count = self.unread_count(user).saturating_add(1);
        self.write_json(&unread_key(&user.id), &count)?;
        Ok(count)
    }

    /// Never goes below zero.
    pub fn mark_read(&self, user: Option<&User>) -> Result<u32, RepositoryError> {
        let user = Self::require(user)?;
        let count = self.unread_count(user).saturating_sub(1);
        self.write_json(&unread_key(&user.id), &count)?;
        Ok(count)
    }
}
