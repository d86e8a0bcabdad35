//! Verification and reset codes
//!
//! Short-lived six-digit one-time codes bound to an email and a purpose.
//! At most one unconsumed code exists per (email, purpose); issuing a new
//! one replaces the old.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tunnel_common::CoreResult;

/// Failed attempts before a code is invalidated
const MAX_ATTEMPTS: u8 = 3;

/// What a code proves when consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodePurpose {
    EmailVerify,
    PasswordReset,
}

/// Outcome of a verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeCheck {
    /// Code matched and is now consumed
    Valid,
    /// Code existed but its TTL elapsed
    Expired,
    /// No such code, mismatch, or attempts exhausted
    Bad,
}

struct CodeEntry {
    code: String,
    expires_at: DateTime<Utc>,
    attempts: u8,
}

/// One-time code store
pub struct CodeStore {
    codes: DashMap<(String, CodePurpose), CodeEntry>,
}

impl CodeStore {
    pub fn new() -> Self {
        Self { codes: DashMap::new() }
    }

    /// Issue a fresh code, invalidating any prior unconsumed one
    pub fn issue(&self, email: &str, purpose: CodePurpose, ttl_minutes: u32) -> CoreResult<String> {
        let code = generate_code();
        let entry = CodeEntry {
            code: code.clone(),
            expires_at: Utc::now() + Duration::minutes(ttl_minutes as i64),
            attempts: 0,
        };
        self.codes.insert((email.trim().to_lowercase(), purpose), entry);
        Ok(code)
    }

    /// Check a candidate code
    ///
    /// A match consumes the code atomically; the third mismatch
    /// invalidates it.
    pub fn verify(&self, email: &str, purpose: CodePurpose, candidate: &str) -> CodeCheck {
        let key = (email.trim().to_lowercase(), purpose);
        let mut entry = match self.codes.get_mut(&key) {
            Some(e) => e,
            None => return CodeCheck::Bad,
        };

        if Utc::now() > entry.expires_at {
            drop(entry);
            self.codes.remove(&key);
            return CodeCheck::Expired;
        }

        if constant_time_eq(entry.code.as_bytes(), candidate.trim().as_bytes()) {
            drop(entry);
            self.codes.remove(&key);
            return CodeCheck::Valid;
        }

        entry.attempts += 1;
        let exhausted = entry.attempts >= MAX_ATTEMPTS;
        drop(entry);
        if exhausted {
            self.codes.remove(&key);
        }
        CodeCheck::Bad
    }

    /// Unconsumed codes currently stored
    pub fn pending(&self) -> usize {
        self.codes.len()
    }
}

impl Default for CodeStore {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    format!("{:06}", rng.gen_range(0..1_000_000))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}
