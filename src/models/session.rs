use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One authenticated device's token state for one user.
///
/// Only hashes of token secrets are ever stored. `previous_token_hash` and
/// `rotated_at` are populated together while a grace window is open and
/// cleared together when it collapses.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceSession {
    pub user_id: Uuid,
    /// Unique within the owning user's session set, not globally.
    pub client_id: String,
    pub token_hash: String,
    pub previous_token_hash: Option<String>,
    pub rotated_at: Option<DateTime<Utc>>,
    /// Absolute cutoff; the session is invalid past this instant regardless
    /// of token correctness. Refreshed on each rotation.
    pub expiry: DateTime<Utc>,
    /// Observability only, never used for eviction ordering.
    pub last_used_at: DateTime<Utc>,
    /// Eviction order key.
    pub created_at: DateTime<Utc>,
    /// Session-creation sequence number; breaks eviction ties when
    /// `created_at` collides under a coarse clock.
    pub seq: i64,
    /// Version counter serializing concurrent rotations of this session.
    pub rotation_seq: i64,
}

/// Fields the registry needs to insert a session; `seq` and `rotation_seq`
/// are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub client_id: String,
    pub token_hash: String,
    pub expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Result of an upsert. `evicted` lists the client ids removed to keep the
/// user under the device cap; informational, not an error.
#[derive(Debug)]
pub struct Upserted {
    pub session: DeviceSession,
    pub evicted: Vec<String>,
}

/// The fields a rotation commits atomically. The store moves the current
/// hash into `previous_token_hash` as part of the same update.
#[derive(Debug, Clone)]
pub struct RotationRecord {
    pub new_token_hash: String,
    pub rotated_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
}
