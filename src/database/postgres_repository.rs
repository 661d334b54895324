use sqlx::PgPool;

/// Thin handle over the connection pool; the session registry and credential
/// store implementations hang off this in their own modules.
#[derive(Clone)]
pub struct PostgresRepository {
    pub pool: PgPool,
}
