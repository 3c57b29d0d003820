use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version. Bump this whenever the schema changes and add a
/// corresponding migration arm in `run_migrations`.
const SCHEMA_VERSION: i64 = 1;

/// Initialize the database schema and run any pending migrations.
pub async fn create_tables(pool: &SqlitePool) -> sqlx::Result<()> {
    create_schema(pool).await?;
    run_migrations(pool).await?;
    Ok(())
}

/// Every content kind lives in one table. `body` is the JSON of the kind's
/// editable fields; `kind` is the lowercase `EntityKind` name.
async fn create_schema(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS content (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            kind       TEXT    NOT NULL,
            body       TEXT    NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    // --- Indexes --------------------------------------------------------
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_kind ON content(kind, id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Bring `PRAGMA user_version` up to `SCHEMA_VERSION`.
async fn run_migrations(pool: &SqlitePool) -> sqlx::Result<()> {
    let (current_version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;

    if current_version > SCHEMA_VERSION {
        warn!(
            "Database schema version {} is newer than this build ({})",
            current_version, SCHEMA_VERSION
        );
        return Ok(());
    }
    if current_version == SCHEMA_VERSION {
        return Ok(());
    }

    info!(
        "Database schema at version {}; target version {}. Running migrations…",
        current_version, SCHEMA_VERSION
    );

    // ── v0 → v1: fresh database, schema created above ──
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(pool)
        .await?;

    info!("Schema version set to {}.", SCHEMA_VERSION);
    Ok(())
}
