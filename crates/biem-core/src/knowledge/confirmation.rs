//! Confirmation manager
//!
//! Holds proposed knowledge changes until the user confirms or rejects
//! them. Pending updates live in memory only — they are not durable
//! state — behind their own lock, expire after a bounded window, and
//! every terminal transition is final: a confirmed update can never be
//! re-rejected, an expired one is purged unapplied.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{BiemError, Result};

use super::{ConfirmOutcome, InsertOutcome, KnowledgeStore, KnowledgeTriple, PendingUpdate};

// ============================================================================
// CONFIRMATION MANAGER
// ============================================================================

/// Pending-update lifecycle: `created -> (confirmed | rejected | expired)`
pub struct ConfirmationManager {
    store: Arc<KnowledgeStore>,
    pending: Mutex<HashMap<Uuid, PendingUpdate>>,
    ttl_seconds: i64,
}

impl ConfirmationManager {
    /// Create a manager with the given pending TTL
    pub fn new(store: Arc<KnowledgeStore>, ttl_seconds: i64) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
            ttl_seconds,
        }
    }

    fn pending(&self) -> Result<MutexGuard<'_, HashMap<Uuid, PendingUpdate>>> {
        self.pending
            .lock()
            .map_err(|_| BiemError::Unavailable("pending-updates lock poisoned".into()))
    }

    /// Stage a proposed change and return it for user surfacing
    pub fn stage(
        &self,
        new_triple: KnowledgeTriple,
        existing: Option<KnowledgeTriple>,
        suggestion: Option<String>,
    ) -> Result<PendingUpdate> {
        let now = Utc::now();
        let prompt = suggestion.unwrap_or_else(|| match &existing {
            Some(existing) => format!(
                "Update \"{} {}\" from \"{}\" to \"{}\"?",
                existing.subject, existing.predicate, existing.object, new_triple.object
            ),
            None => format!("Store \"{}\"?", new_triple.text()),
        });

        let update = PendingUpdate {
            id: Uuid::new_v4(),
            new_triple,
            existing,
            prompt,
            created_at: now,
            expires_at: now + Duration::seconds(self.ttl_seconds),
        };
        self.pending()?.insert(update.id, update.clone());
        tracing::info!(pending = %update.id, "knowledge update staged for confirmation");
        Ok(update)
    }

    /// Resolve a pending update by id
    ///
    /// Unknown ids are an error; an expired update is purged and reported
    /// as expired regardless of `accept`.
    pub fn confirm(&self, id: Uuid, accept: bool) -> Result<ConfirmOutcome> {
        let update = self
            .pending()?
            .remove(&id)
            .ok_or_else(|| BiemError::NotFound(id.to_string()))?;

        if update.is_expired(Utc::now()) {
            tracing::info!(pending = %id, "pending update expired before resolution");
            return Ok(ConfirmOutcome::Expired);
        }
        if !accept {
            tracing::info!(pending = %id, "pending update rejected");
            return Ok(ConfirmOutcome::Rejected);
        }

        let applied = self.apply(&update)?;
        tracing::info!(
            pending = %id,
            triple = %applied.id,
            version = applied.version,
            "pending update confirmed and applied"
        );
        Ok(ConfirmOutcome::Applied(applied))
    }

    fn apply(&self, update: &PendingUpdate) -> Result<KnowledgeTriple> {
        let vector = if update.new_triple.vector.is_empty() {
            None
        } else {
            Some(update.new_triple.vector.as_slice())
        };
        let contributor = update.new_triple.contributor_id.as_deref();

        match &update.existing {
            Some(existing) => self.store.update_object(
                &existing.id,
                &update.new_triple.object,
                "user_confirmed",
                true,
                contributor,
                vector,
            ),
            None => match self.store.insert(&update.new_triple)? {
                InsertOutcome::Inserted(triple) => Ok(triple),
                // An occupant appeared while the update was pending; the
                // user's confirmation covers the value change too
                InsertOutcome::DuplicateOf(existing) => self.store.update_object(
                    &existing.id,
                    &update.new_triple.object,
                    "user_confirmed",
                    true,
                    contributor,
                    vector,
                ),
            },
        }
    }

    /// Live pending updates (expired ones are purged on the way)
    pub fn list(&self) -> Result<Vec<PendingUpdate>> {
        let now = Utc::now();
        let mut guard = self.pending()?;
        guard.retain(|_, update| !update.is_expired(now));
        let mut updates: Vec<PendingUpdate> = guard.values().cloned().collect();
        updates.sort_by_key(|u| u.created_at);
        Ok(updates)
    }

    /// Purge expired updates; returns how many were dropped
    pub fn sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let mut guard = self.pending()?;
        let before = guard.len();
        guard.retain(|_, update| !update.is_expired(now));
        let purged = before - guard.len();
        if purged > 0 {
            tracing::debug!(purged, "expired pending updates swept");
        }
        Ok(purged)
    }

    /// Number of live pending updates
    pub fn count(&self) -> Result<usize> {
        let now = Utc::now();
        Ok(self
            .pending()?
            .values()
            .filter(|u| !u.is_expired(now))
            .count())
    }
}

// ============================================================================
// TESTS
// ============================================================================
