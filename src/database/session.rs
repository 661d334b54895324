use crate::database::postgres_repository::PostgresRepository;
use crate::error::app_error::AppError;
use crate::models::session::{DeviceSession, NewSession, RotationRecord, Upserted};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

const SESSION_COLUMNS: &str = "user_id, client_id, token_hash, previous_token_hash, rotated_at, expiry, last_used_at, created_at, seq, rotation_seq";

/// The per-user session registry. One entry per `(user_id, client_id)`;
/// mutation of a single session is serialized through the `rotation_seq`
/// compare-and-swap in `commit_rotation`, never a store-wide lock.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_session(&self, user_id: &Uuid, client_id: &str) -> Result<Option<DeviceSession>, AppError>;

    /// Insert or replace the session for `(user_id, client_id)`. Replacing an
    /// existing device keeps its `created_at` and `seq`; inserting past
    /// `max_devices` evicts the oldest-created sessions in the same atomic
    /// update, and the evicted client ids are returned for logging.
    async fn upsert_session(&self, new: &NewSession, max_devices: u32) -> Result<Upserted, AppError>;

    /// Conditionally commit a rotation: applies only if the session's
    /// `rotation_seq` still equals `expected_rotation_seq`. Returns whether
    /// the commit won; a `false` means a concurrent request rotated first.
    async fn commit_rotation(
        &self,
        user_id: &Uuid,
        client_id: &str,
        expected_rotation_seq: i64,
        record: &RotationRecord,
    ) -> Result<bool, AppError>;

    /// Record a successful validation without changing token state.
    async fn touch_session(&self, user_id: &Uuid, client_id: &str, now: DateTime<Utc>) -> Result<(), AppError>;

    /// Drop the superseded hash once the fallback path is exhausted,
    /// collapsing the session back to a single authoritative token. Guarded
    /// by `expected_rotation_seq` so a newer rotation is never clobbered.
    async fn clear_previous(&self, user_id: &Uuid, client_id: &str, expected_rotation_seq: i64) -> Result<(), AppError>;

    /// Explicit sign-out. Idempotent: deleting an absent session is not an
    /// error.
    async fn delete_session(&self, user_id: &Uuid, client_id: &str) -> Result<(), AppError>;

    /// Remove every session whose expiry has elapsed. Returns the number
    /// removed. Safe to run concurrently with lookups.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
impl SessionStore for PostgresRepository {
    async fn find_session(&self, user_id: &Uuid, client_id: &str) -> Result<Option<DeviceSession>, AppError> {
        let session = sqlx::query_as::<_, DeviceSession>(&format!(
            r#"
            SELECT {SESSION_COLUMNS}
            FROM device_sessions
            WHERE user_id = $1 AND client_id = $2
            "#
        ))
        .bind(user_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn upsert_session(&self, new: &NewSession, max_devices: u32) -> Result<Upserted, AppError> {
        let mut tx = self.pool.begin().await?;

        let session = sqlx::query_as::<_, DeviceSession>(&format!(
            r#"
            INSERT INTO device_sessions (user_id, client_id, token_hash, expiry, last_used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (user_id, client_id) DO UPDATE
            SET token_hash = EXCLUDED.token_hash,
                previous_token_hash = NULL,
                rotated_at = NULL,
                expiry = EXCLUDED.expiry,
                last_used_at = EXCLUDED.last_used_at,
                rotation_seq = device_sessions.rotation_seq + 1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(new.user_id)
        .bind(&new.client_id)
        .bind(&new.token_hash)
        .bind(new.expiry)
        .bind(new.created_at)
        .fetch_one(&mut *tx)
        .await?;

        // Keep the newest `max_devices` sessions by (created_at, seq); the
        // transaction makes the eviction atomic with the insert above.
        let evicted = sqlx::query_scalar::<_, String>(
            r#"
            DELETE FROM device_sessions
            WHERE user_id = $1
              AND seq NOT IN (
                  SELECT seq FROM device_sessions
                  WHERE user_id = $1
                  ORDER BY created_at DESC, seq DESC
                  LIMIT $2
              )
            RETURNING client_id
            "#,
        )
        .bind(new.user_id)
        .bind(i64::from(max_devices))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Upserted { session, evicted })
    }

    async fn commit_rotation(
        &self,
        user_id: &Uuid,
        client_id: &str,
        expected_rotation_seq: i64,
        record: &RotationRecord,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE device_sessions
            SET previous_token_hash = token_hash,
                token_hash = $4,
                rotated_at = $5,
                expiry = $6,
                last_used_at = $5,
                rotation_seq = rotation_seq + 1
            WHERE user_id = $1 AND client_id = $2 AND rotation_seq = $3
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .bind(expected_rotation_seq)
        .bind(&record.new_token_hash)
        .bind(record.rotated_at)
        .bind(record.expiry)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn touch_session(&self, user_id: &Uuid, client_id: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query("UPDATE device_sessions SET last_used_at = $3 WHERE user_id = $1 AND client_id = $2")
            .bind(user_id)
            .bind(client_id)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn clear_previous(&self, user_id: &Uuid, client_id: &str, expected_rotation_seq: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE device_sessions
            SET previous_token_hash = NULL, rotated_at = NULL
            WHERE user_id = $1 AND client_id = $2 AND rotation_seq = $3
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .bind(expected_rotation_seq)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_session(&self, user_id: &Uuid, client_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM device_sessions WHERE user_id = $1 AND client_id = $2")
            .bind(user_id)
            .bind(client_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM device_sessions WHERE expiry <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
