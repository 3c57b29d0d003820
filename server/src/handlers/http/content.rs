use std::convert::Infallible;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use shared::types::{
    ContentFields, DeletedRef, EntityKind, FeaturedFields, UpdateAction, UpdateEvent, UpdateId,
};

use crate::AppState;
use crate::database::content;
use crate::handlers::http::utils::*;

type HttpResponse = Result<Response<BoxBody<Bytes, Infallible>>>;

/// Publish a committed change on the process-wide channel; the SSE transport
/// takes it from there.
fn emit<T: Serialize>(
    state: &AppState,
    id: UpdateId,
    kind: EntityKind,
    action: UpdateAction,
    record: &T,
) -> Result<()> {
    let data = serde_json::to_value(record).context("Failed to serialize update payload")?;
    state
        .hub
        .emitter
        .trigger_update(UpdateEvent::with_id(id, kind, action, data));
    Ok(())
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes> {
    Ok(req
        .into_body()
        .collect()
        .await
        .context("Failed to read request body")?
        .to_bytes())
}

// ── Reads ──

pub async fn handle_list<F: ContentFields>(_req: Request<Incoming>, state: AppState) -> HttpResponse {
    let records = content::list::<F>(&state.db)
        .await
        .with_context(|| format!("Failed to list {}", F::KIND.collection()))?;

    debug!("Listing {} {}", records.len(), F::KIND.collection());
    deliver_success_json(&records, StatusCode::OK)
}

pub async fn handle_get<F: ContentFields>(req: Request<Incoming>, state: AppState) -> HttpResponse {
    let Some(id) = path_id(req.uri().path()) else {
        return bad_request("Invalid id");
    };

    match content::get::<F>(&state.db, id)
        .await
        .with_context(|| format!("Failed to load {} {}", F::KIND, id))?
    {
        Some(record) => deliver_success_json(&record, StatusCode::OK),
        None => not_found(F::KIND, id),
    }
}

// ── Admin mutations ──

pub async fn handle_create<F: ContentFields>(
    req: Request<Incoming>,
    state: AppState,
) -> HttpResponse {
    let update_id = update_id_from(req.headers());
    let body = read_body(req).await?;
    let fields = match parse_fields::<F>(&body) {
        Ok(fields) => fields,
        Err(rejection) => return rejection.into_response(),
    };

    let record = content::insert(&state.db, &fields)
        .await
        .with_context(|| format!("Failed to create {}", F::KIND))?;

    info!("Created {} {}", F::KIND, record.id);
    emit(&state, update_id, F::KIND, UpdateAction::Create, &record)?;
    deliver_success_json(&record, StatusCode::CREATED)
}

pub async fn handle_update<F: ContentFields>(
    req: Request<Incoming>,
    state: AppState,
) -> HttpResponse {
    let Some(id) = path_id(req.uri().path()) else {
        return bad_request("Invalid id");
    };
    let update_id = update_id_from(req.headers());
    let body = read_body(req).await?;
    let fields = match parse_fields::<F>(&body) {
        Ok(fields) => fields,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(record) = content::update(&state.db, id, &fields)
        .await
        .with_context(|| format!("Failed to update {} {}", F::KIND, id))?
    else {
        return not_found(F::KIND, id);
    };

    info!("Updated {} {}", F::KIND, id);
    emit(&state, update_id, F::KIND, UpdateAction::Update, &record)?;
    deliver_success_json(&record, StatusCode::OK)
}

pub async fn handle_delete<F: ContentFields>(
    req: Request<Incoming>,
    state: AppState,
) -> HttpResponse {
    let Some(id) = path_id(req.uri().path()) else {
        return bad_request("Invalid id");
    };
    let update_id = update_id_from(req.headers());

    let removed = content::delete(&state.db, F::KIND, id)
        .await
        .with_context(|| format!("Failed to delete {} {}", F::KIND, id))?;
    if !removed {
        return not_found(F::KIND, id);
    }

    info!("Deleted {} {}", F::KIND, id);
    state
        .hub
        .emitter
        .trigger_update(UpdateEvent::deleted(update_id, F::KIND, id));
    deliver_success_json(DeletedRef { id }, StatusCode::OK)
}

// ── Featured video ──

/// `data` is `null` while nothing is featured.
pub async fn handle_get_featured(_req: Request<Incoming>, state: AppState) -> HttpResponse {
    let featured = content::get_featured(&state.db)
        .await
        .context("Failed to load featured video")?;
    deliver_success_json(&featured, StatusCode::OK)
}

pub async fn handle_set_featured(req: Request<Incoming>, state: AppState) -> HttpResponse {
    let update_id = update_id_from(req.headers());
    let body = read_body(req).await?;
    let fields = match parse_fields::<FeaturedFields>(&body) {
        Ok(fields) => fields,
        Err(rejection) => return rejection.into_response(),
    };

    let (record, created) = content::set_featured(&state.db, &fields)
        .await
        .context("Failed to set featured video")?;

    // Featured is a slot, not a collection: replacing it is always an update.
    info!(
        "Featured video {} {}",
        record.id,
        if created { "set" } else { "replaced" }
    );
    emit(&state, update_id, EntityKind::Featured, UpdateAction::Update, &record)?;
    deliver_success_json(&record, StatusCode::OK)
}

pub async fn handle_clear_featured(req: Request<Incoming>, state: AppState) -> HttpResponse {
    let update_id = update_id_from(req.headers());

    let Some(id) = content::clear_featured(&state.db)
        .await
        .context("Failed to clear featured video")?
    else {
        return deliver_error_json("NOT_FOUND", "No featured video", StatusCode::NOT_FOUND);
    };

    info!("Cleared featured video {}", id);
    state
        .hub
        .emitter
        .trigger_update(UpdateEvent::deleted(update_id, EntityKind::Featured, id));
    deliver_success_json(DeletedRef { id }, StatusCode::OK)
}
