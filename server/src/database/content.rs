use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use shared::types::{ContentFields, EntityKind, FeaturedFields, FeaturedVideo, Record, now_millis};

use crate::database::utils::{from_body, parse_body, to_body};

/// `(id, body, created_at, updated_at)`
type ContentRow = (i64, String, i64, i64);

fn decode<F: ContentFields>(row: ContentRow) -> sqlx::Result<Record<F>> {
    let (id, body, created_at, updated_at) = row;
    Ok(Record {
        id,
        fields: from_body(parse_body(&body)?)?,
        created_at,
        updated_at,
    })
}

/// League a match body points at. Other kinds never affect league counters.
fn league_of(kind: EntityKind, body: &Value) -> Option<i64> {
    match kind {
        EntityKind::Match => body.get("league_id").and_then(Value::as_i64),
        _ => None,
    }
}

async fn adjust_match_count(
    conn: &mut SqliteConnection,
    league_id: i64,
    delta: i64,
) -> sqlx::Result<()> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT body FROM content WHERE kind = 'league' AND id = ?1")
            .bind(league_id)
            .fetch_optional(&mut *conn)
            .await?;

    let Some((raw,)) = row else {
        warn!("Match references unknown league {}", league_id);
        return Ok(());
    };

    let mut body = parse_body(&raw)?;
    let current = body.get("match_count").and_then(Value::as_i64).unwrap_or(0);
    body["match_count"] = (current + delta).max(0).into();

    sqlx::query("UPDATE content SET body = ?1 WHERE id = ?2")
        .bind(body.to_string())
        .bind(league_id)
        .execute(&mut *conn)
        .await?;

    debug!("League {} match_count {} -> {}", league_id, current, (current + delta).max(0));
    Ok(())
}

// ── Generic CRUD ──

/// All records of one kind, newest first.
pub async fn list<F: ContentFields>(pool: &SqlitePool) -> sqlx::Result<Vec<Record<F>>> {
    let rows: Vec<ContentRow> = sqlx::query_as(
        "SELECT id, body, created_at, updated_at FROM content WHERE kind = ?1 ORDER BY id DESC",
    )
    .bind(F::KIND.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(decode).collect()
}

pub async fn get<F: ContentFields>(pool: &SqlitePool, id: i64) -> sqlx::Result<Option<Record<F>>> {
    let row: Option<ContentRow> = sqlx::query_as(
        "SELECT id, body, created_at, updated_at FROM content WHERE kind = ?1 AND id = ?2",
    )
    .bind(F::KIND.as_str())
    .bind(id)
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// Insert a new record. A new league always starts at `match_count = 0`; a
/// new match bumps its league's counter in the same transaction.
pub async fn insert<F: ContentFields>(pool: &SqlitePool, fields: &F) -> sqlx::Result<Record<F>> {
    let mut body = to_body(fields)?;
    if F::KIND == EntityKind::League {
        body["match_count"] = 0.into();
    }
    let now = now_millis();

    let mut tx = pool.begin().await?;
    let id = sqlx::query(
        "INSERT INTO content (kind, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
    )
    .bind(F::KIND.as_str())
    .bind(body.to_string())
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    if let Some(league_id) = league_of(F::KIND, &body) {
        adjust_match_count(&mut tx, league_id, 1).await?;
    }
    tx.commit().await?;

    Ok(Record {
        id,
        fields: from_body(body)?,
        created_at: now,
        updated_at: now,
    })
}

/// Replace the editable fields of an existing record. `None` when no record
/// of this kind has `id`.
///
/// A league keeps its stored `match_count`; a match that moves between
/// leagues moves one unit of count with it.
pub async fn update<F: ContentFields>(
    pool: &SqlitePool,
    id: i64,
    fields: &F,
) -> sqlx::Result<Option<Record<F>>> {
    let mut tx = pool.begin().await?;

    let existing: Option<(String, i64)> =
        sqlx::query_as("SELECT body, created_at FROM content WHERE kind = ?1 AND id = ?2")
            .bind(F::KIND.as_str())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some((raw, created_at)) = existing else {
        return Ok(None);
    };
    let old = parse_body(&raw)?;

    let mut body = to_body(fields)?;
    if F::KIND == EntityKind::League {
        body["match_count"] = old.get("match_count").cloned().unwrap_or_else(|| 0.into());
    }
    let now = now_millis();

    sqlx::query("UPDATE content SET body = ?1, updated_at = ?2 WHERE id = ?3")
        .bind(body.to_string())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    let (before, after) = (league_of(F::KIND, &old), league_of(F::KIND, &body));
    if before != after {
        if let Some(league_id) = before {
            adjust_match_count(&mut tx, league_id, -1).await?;
        }
        if let Some(league_id) = after {
            adjust_match_count(&mut tx, league_id, 1).await?;
        }
    }
    tx.commit().await?;

    Ok(Some(Record {
        id,
        fields: from_body(body)?,
        created_at,
        updated_at: now,
    }))
}

/// Delete one record. `false` when nothing of this kind had `id`.
pub async fn delete(pool: &SqlitePool, kind: EntityKind, id: i64) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;

    let existing: Option<(String,)> =
        sqlx::query_as("SELECT body FROM content WHERE kind = ?1 AND id = ?2")
            .bind(kind.as_str())
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some((raw,)) = existing else {
        return Ok(false);
    };

    sqlx::query("DELETE FROM content WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    if let Some(league_id) = league_of(kind, &parse_body(&raw)?) {
        adjust_match_count(&mut tx, league_id, -1).await?;
    }
    tx.commit().await?;
    Ok(true)
}

// ── Featured video (at most one row) ──

pub async fn get_featured(pool: &SqlitePool) -> sqlx::Result<Option<FeaturedVideo>> {
    let row: Option<ContentRow> = sqlx::query_as(
        "SELECT id, body, created_at, updated_at FROM content
         WHERE kind = 'featured' ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    row.map(decode).transpose()
}

/// Set the featured video, keeping the existing row's id when there is one.
/// The flag is `true` when no featured video existed before.
pub async fn set_featured(
    pool: &SqlitePool,
    fields: &FeaturedFields,
) -> sqlx::Result<(FeaturedVideo, bool)> {
    let body = to_body(fields)?;
    let now = now_millis();
    let mut tx = pool.begin().await?;

    let existing: Option<(i64, i64)> = sqlx::query_as(
        "SELECT id, created_at FROM content WHERE kind = 'featured' ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(&mut *tx)
    .await?;

    let (id, created_at, created) = match existing {
        Some((id, created_at)) => {
            sqlx::query("UPDATE content SET body = ?1, updated_at = ?2 WHERE id = ?3")
                .bind(body.to_string())
                .bind(now)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            (id, created_at, false)
        }
        None => {
            let id = sqlx::query(
                "INSERT INTO content (kind, body, created_at, updated_at)
                 VALUES ('featured', ?1, ?2, ?2)",
            )
            .bind(body.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?
            .last_insert_rowid();
            (id, now, true)
        }
    };
    tx.commit().await?;

    Ok((
        Record {
            id,
            fields: from_body(body)?,
            created_at,
            updated_at: now,
        },
        created,
    ))
}

/// Remove the featured video. Returns the id that was removed, if any.
pub async fn clear_featured(pool: &SqlitePool) -> sqlx::Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let existing: Option<(i64,)> =
        sqlx::query_as("SELECT id FROM content WHERE kind = 'featured' ORDER BY id DESC LIMIT 1")
            .fetch_optional(&mut *tx)
            .await?;

    if existing.is_some() {
        sqlx::query("DELETE FROM content WHERE kind = 'featured'")
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(existing.map(|(id,)| id))
}
