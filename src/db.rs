use sqlx::postgres::{PgPool, PgPoolOptions};

/// Open the pool and bring the schema up to date via the embedded
/// migrations.
pub async fn connect_pg(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
