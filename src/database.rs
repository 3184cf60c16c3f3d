use sqlx::MySqlPool;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to connect to database: {0}")]
    ConnectionError(#[source] sqlx::Error),
    #[error("failed to run initial migration: {0}")]
    MigrationError(#[source] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Connects to MySQL and brings the schema up to date.
pub async fn connect(url: &str) -> Result<MySqlPool> {
    let db = sqlx::mysql::MySqlPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(10))
        .max_connections(10)
        .connect(url)
        .await
        .map_err(Error::ConnectionError)?;

    sqlx::migrate!().run(&db).await.map_err(Error::MigrationError)?;
    log::debug!("database schema is up to date");

    Ok(db)
}
