use crate::Config;
use crate::database::postgres_repository::PostgresRepository;
use crate::database::session::SessionStore;
use crate::db::init_pool;
use chrono::Utc;

#[derive(Debug, Clone, Copy)]
pub struct SweepSessionsResult {
    pub sessions_removed: u64,
}

/// Batch removal of expired device sessions. Validation already rejects
/// expired tokens on its own; this keeps the registry from accumulating rows
/// for devices that never come back.
pub async fn sweep_sessions(config: &Config) -> Result<SweepSessionsResult, String> {
    let pool = init_pool(&config.database)
        .await
        .map_err(|err| format!("Failed to initialize database pool: {err}"))?;

    let repo = PostgresRepository { pool: pool.clone() };
    let sessions_removed = repo
        .sweep_expired(Utc::now())
        .await
        .map_err(|err| format!("Failed to sweep expired sessions: {err:?}"))?;

    pool.close().await;

    Ok(SweepSessionsResult { sessions_removed })
}
