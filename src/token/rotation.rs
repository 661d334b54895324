use crate::config::AuthConfig;
use crate::database::session::SessionStore;
use crate::error::app_error::AppError;
use crate::models::session::{NewSession, RotationRecord};
use crate::token::codec::TokenCodec;
use crate::token::grace;
use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

/// Credentials minted for a newly created session. The raw token appears
/// here exactly once; only its hash is in the registry.
#[derive(Debug)]
pub struct IssuedSession {
    pub client_id: String,
    pub token: String,
    pub expiry: DateTime<Utc>,
    /// Client ids evicted to keep the user under the device cap.
    pub evicted: Vec<String>,
}

/// Outcome of a successful validation, deciding what the response publishes.
#[derive(Debug)]
pub enum Validation {
    /// The session rotated: fresh credentials to hand to the client.
    Rotated { token: String, expiry: DateTime<Utc> },
    /// Fixed-token mode: the presented token stays authoritative.
    Current { expiry: DateTime<Utc> },
    /// A superseded token was accepted inside the grace window. Nothing is
    /// published; the client already has (or will observe) the newer token.
    Grace,
}

/// Drives the per-session token state machine: ACTIVE, then ROTATING while a
/// grace window is open, back to ACTIVE when it collapses. Concurrent
/// rotations of one session are serialized by the store's compare-and-swap;
/// the loser falls back to the grace path instead of rotating again.
pub struct RotationEngine<'a, S: SessionStore + ?Sized> {
    store: &'a S,
    codec: TokenCodec,
    config: &'a AuthConfig,
}

impl<'a, S: SessionStore + ?Sized> RotationEngine<'a, S> {
    pub fn new(store: &'a S, config: &'a AuthConfig) -> Self {
        Self {
            store,
            codec: TokenCodec::new(config.token_cost),
            config,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Create (or replace) the session for one device and mint its first
    /// token. Evicts the user's oldest sessions when the device cap would be
    /// exceeded, atomically with the insert.
    pub async fn create_session(&self, user_id: &Uuid, client_id: &str, now: DateTime<Utc>) -> Result<IssuedSession, AppError> {
        let (token, token_hash) = self.codec.issue()?;

        let new = NewSession {
            user_id: *user_id,
            client_id: client_id.to_string(),
            token_hash,
            expiry: now + self.config.token_lifespan(),
            created_at: now,
        };

        let upserted = self.store.upsert_session(&new, self.config.max_devices).await?;

        if !upserted.evicted.is_empty() {
            info!(
                user_id = %user_id,
                evicted = ?upserted.evicted,
                max_devices = self.config.max_devices,
                "device cap exceeded, evicted oldest sessions"
            );
        }

        Ok(IssuedSession {
            client_id: new.client_id,
            token,
            expiry: new.expiry,
            evicted: upserted.evicted,
        })
    }

    /// Validate a presented token for `(user_id, client_id)` and decide
    /// whether to rotate. Time-based cutoffs use `now` as read by the caller
    /// at the request boundary, never a cached clock.
    pub async fn authenticate(&self, user_id: &Uuid, client_id: &str, token: &str, now: DateTime<Utc>) -> Result<Validation, AppError> {
        let session = self
            .store
            .find_session(user_id, client_id)
            .await?
            .ok_or(AppError::SessionNotFound)?;

        if session.expiry <= now {
            // The sweep would get to it eventually; dropping it here keeps
            // the registry from accumulating between sweeps.
            let _ = self.store.delete_session(user_id, client_id).await;
            return Err(AppError::SessionExpired);
        }

        if self.codec.verify(token, &session.token_hash) {
            if !self.config.rotate_on_each_request {
                self.store.touch_session(user_id, client_id, now).await?;
                return Ok(Validation::Current { expiry: session.expiry });
            }

            let (new_token, new_token_hash) = self.codec.issue()?;
            let record = RotationRecord {
                new_token_hash,
                rotated_at: now,
                expiry: now + self.config.token_lifespan(),
            };

            if self
                .store
                .commit_rotation(user_id, client_id, session.rotation_seq, &record)
                .await?
            {
                debug!(user_id = %user_id, client_id = %client_id, "rotated session token");
                return Ok(Validation::Rotated {
                    token: new_token,
                    expiry: record.expiry,
                });
            }

            // Lost the race: a concurrent request rotated first, so the
            // token we just verified is now the superseded one. Accept it
            // through the grace window without rotating again.
            let current = self
                .store
                .find_session(user_id, client_id)
                .await?
                .ok_or(AppError::SessionNotFound)?;

            if grace::accepts(&self.codec, &current, token, now, self.config.grace_duration()) {
                self.store.touch_session(user_id, client_id, now).await?;
                return Ok(Validation::Grace);
            }

            return Err(AppError::TokenMismatch);
        }

        // Current hash did not match; fall back to the superseded hash while
        // its grace window is open.
        if grace::accepts(&self.codec, &session, token, now, self.config.grace_duration()) {
            self.store.touch_session(user_id, client_id, now).await?;
            return Ok(Validation::Grace);
        }

        // Fallback exhausted: collapse the session back to a single
        // authoritative hash before reporting the mismatch.
        if session.previous_token_hash.is_some() {
            self.store.clear_previous(user_id, client_id, session.rotation_seq).await?;
        }

        Err(AppError::TokenMismatch)
    }

    /// Explicit sign-out; idempotent.
    pub async fn sign_out(&self, user_id: &Uuid, client_id: &str) -> Result<(), AppError> {
        self.store.delete_session(user_id, client_id).await
    }

    /// Remove every expired session. Returns the number removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        self.store.sweep_expired(now).await
    }
}
