//! Identity store
//!
//! Single-writer subscriber registry with unique-email enforcement and a
//! per-identity failed-login tracker consumed by the protection layer.

use crate::model::Subscriber;
use crate::password;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tunnel_common::{CoreError, CoreResult};
use uuid::Uuid;

/// Numeric handles start above the range reserved for fixtures
const HANDLE_SEQ_START: u32 = 10_000;

struct FailedLogins {
    count: u32,
    first_attempt: DateTime<Utc>,
}

/// Authoritative subscriber registry
pub struct IdentityStore {
    subscribers: DashMap<Uuid, Subscriber>,
    /// Lowercased email -> id; the uniqueness constraint
    by_email: DashMap<String, Uuid>,
    by_handle: DashMap<u32, Uuid>,
    handle_seq: AtomicU32,
    failed_logins: DashMap<String, FailedLogins>,
}

impl IdentityStore {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            by_email: DashMap::new(),
            by_handle: DashMap::new(),
            handle_seq: AtomicU32::new(HANDLE_SEQ_START),
            failed_logins: DashMap::new(),
        }
    }

    /// Register a new subscriber
    ///
    /// Fails with `AlreadyExists` on an email collision and `InvalidInput`
    /// on a malformed email or a password below policy.
    pub fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        phone: Option<&str>,
        country: Option<&str>,
    ) -> CoreResult<Subscriber> {
        let email = normalize_email(email)?;
        password::validate(password)?;
        if name.trim().is_empty() {
            return Err(CoreError::InvalidInput("name must not be empty".into()));
        }

        let password_hash = password::hash(password)?;
        let now = Utc::now();
        let subscriber = Subscriber {
            id: Uuid::new_v4(),
            handle: self.handle_seq.fetch_add(1, Ordering::Relaxed),
            email: email.clone(),
            password_hash,
            name: name.trim().to_string(),
            phone: phone.map(str::to_string),
            country: country.map(str::to_string),
            verified: false,
            active: true,
            premium: false,
            superuser: false,
            created_at: now,
            updated_at: now,
        };

        // The email index entry is the serialization point for duplicate
        // registration; whoever inserts first wins.
        match self.by_email.entry(email.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(CoreError::AlreadyExists(format!("email {email}")));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(subscriber.id);
            }
        }
        self.by_handle.insert(subscriber.handle, subscriber.id);
        self.subscribers.insert(subscriber.id, subscriber.clone());

        tracing::info!(handle = subscriber.handle, "subscriber registered");
        Ok(subscriber)
    }

    /// Authenticate by email and password
    ///
    /// Unknown email and wrong password are indistinguishable to the
    /// caller. Verification and active checks run only after the
    /// credential check passes.
    pub fn authenticate(&self, email: &str, password: &str) -> CoreResult<Subscriber> {
        let email = normalize_email(email)?;
        let subscriber = match self.by_email.get(&email) {
            Some(id) => self.subscribers.get(&*id).map(|s| s.clone()),
            None => None,
        };

        let subscriber = match subscriber {
            Some(s) => s,
            None => {
                self.record_failed_login(&email);
                return Err(CoreError::Unauthenticated);
            }
        };

        if !password::verify(password, &subscriber.password_hash) {
            self.record_failed_login(&email);
            return Err(CoreError::Unauthenticated);
        }
        if !subscriber.verified {
            return Err(CoreError::Unverified);
        }
        if !subscriber.active {
            return Err(CoreError::Disabled);
        }

        self.failed_logins.remove(&email);
        Ok(subscriber)
    }

    pub fn get_by_id(&self, id: Uuid) -> CoreResult<Subscriber> {
        self.subscribers
            .get(&id)
            .map(|s| s.clone())
            .ok_or_else(|| CoreError::NotFound(format!("subscriber {id}")))
    }

    pub fn get_by_handle(&self, handle: u32) -> CoreResult<Subscriber> {
        self.by_handle
            .get(&handle)
            .and_then(|id| self.subscribers.get(&*id).map(|s| s.clone()))
            .ok_or_else(|| CoreError::NotFound(format!("subscriber #{handle}")))
    }

    pub fn get_by_email(&self, email: &str) -> CoreResult<Subscriber> {
        let email = normalize_email(email)?;
        self.by_email
            .get(&email)
            .and_then(|id| self.subscribers.get(&*id).map(|s| s.clone()))
            .ok_or_else(|| CoreError::NotFound(format!("subscriber {email}")))
    }

    /// Update mutable profile fields
    pub fn update_profile(
        &self,
        id: Uuid,
        name: Option<&str>,
        phone: Option<&str>,
        country: Option<&str>,
    ) -> CoreResult<Subscriber> {
        let mut entry = self
            .subscribers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("subscriber {id}")))?;
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(CoreError::InvalidInput("name must not be empty".into()));
            }
            entry.name = name.trim().to_string();
        }
        if let Some(phone) = phone {
            entry.phone = Some(phone.to_string());
        }
        if let Some(country) = country {
            entry.country = Some(country.to_string());
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Update account flags
    pub fn update_status(
        &self,
        id: Uuid,
        active: Option<bool>,
        premium: Option<bool>,
        superuser: Option<bool>,
    ) -> CoreResult<Subscriber> {
        let mut entry = self
            .subscribers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("subscriber {id}")))?;
        if let Some(active) = active {
            entry.active = active;
        }
        if let Some(premium) = premium {
            entry.premium = premium;
        }
        if let Some(superuser) = superuser {
            entry.superuser = superuser;
        }
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Replace the stored credential
    pub fn set_password(&self, id: Uuid, new_password: &str) -> CoreResult<()> {
        password::validate(new_password)?;
        let hash = password::hash(new_password)?;
        let mut entry = self
            .subscribers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("subscriber {id}")))?;
        entry.password_hash = hash;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Mark an email address as verified
    pub fn mark_verified(&self, email: &str) -> CoreResult<Subscriber> {
        let id = *self
            .by_email
            .get(&normalize_email(email)?)
            .ok_or_else(|| CoreError::NotFound(format!("subscriber {email}")))?;
        let mut entry = self
            .subscribers
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("subscriber {id}")))?;
        entry.verified = true;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    /// Failed logins recorded for an email within `window_seconds`
    pub fn failed_login_count(&self, email: &str, window_seconds: u64) -> u32 {
        let key = email.trim().to_lowercase();
        match self.failed_logins.get(&key) {
            Some(f) if (Utc::now() - f.first_attempt).num_seconds() <= window_seconds as i64 => f.count,
            _ => 0,
        }
    }

    /// Total registered subscribers
    pub fn count(&self) -> usize {
        self.subscribers.len()
    }

    fn record_failed_login(&self, email: &str) {
        let now = Utc::now();
        self.failed_logins
            .entry(email.to_string())
            .and_modify(|f| f.count += 1)
            .or_insert(FailedLogins {
                count: 1,
                first_attempt: now,
            });
    }
}

impl Default for IdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase and structurally validate an email address
fn normalize_email(email: &str) -> CoreResult<String> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(CoreError::InvalidInput("malformed email address".into()));
    }
    Ok(email)
}
