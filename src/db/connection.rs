//! Database connection management using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    // Test the connection
    sqlx::query("SELECT 1").execute(&pool).await?;

    info!("✅ Connected to PostgreSQL ({} max connections)", max_connections);
    Ok(pool)
}
