use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use shared::realtime::UpdateEmitter;
use shared::types::{
    ContentFields, DeletedRef, EntityKind, FeaturedFields, FeaturedVideo, Record, UpdateAction,
    UpdateEvent, UpdateId,
};

use crate::api::{ApiClient, ApiResult};

/// Admin write path. Each call is one API request tagged with a fresh
/// update id followed, only on success, by exactly one local
/// `trigger_update` carrying that same id. The server's copy of the event
/// arrives later over the bridge and is skipped as a duplicate.
#[derive(Clone, Debug)]
pub struct AdminConsole {
    api: ApiClient,
    emitter: UpdateEmitter,
}

impl AdminConsole {
    pub fn new(api: ApiClient, emitter: UpdateEmitter) -> Self {
        Self { api, emitter }
    }

    pub async fn create<F: ContentFields>(&self, fields: &F) -> ApiResult<Record<F>> {
        let update_id = UpdateId::new();
        let record = self.api.create(fields, update_id).await?;
        self.announce(update_id, F::KIND, UpdateAction::Create, &record, record.id);
        Ok(record)
    }

    pub async fn update<F: ContentFields>(&self, id: i64, fields: &F) -> ApiResult<Record<F>> {
        let update_id = UpdateId::new();
        let record = self.api.update(id, fields, update_id).await?;
        self.announce(update_id, F::KIND, UpdateAction::Update, &record, record.id);
        Ok(record)
    }

    pub async fn delete(&self, kind: EntityKind, id: i64) -> ApiResult<DeletedRef> {
        let update_id = UpdateId::new();
        let deleted = self.api.delete(kind, id, update_id).await?;
        self.emitter
            .trigger_update(UpdateEvent::deleted(update_id, kind, deleted.id));
        info!("Deleted {} {}", kind, deleted.id);
        Ok(deleted)
    }

    pub async fn set_featured(&self, fields: &FeaturedFields) -> ApiResult<FeaturedVideo> {
        let update_id = UpdateId::new();
        let record = self.api.set_featured_video(fields, update_id).await?;
        self.announce(
            update_id,
            EntityKind::Featured,
            UpdateAction::Update,
            &record,
            record.id,
        );
        Ok(record)
    }

    pub async fn clear_featured(&self) -> ApiResult<DeletedRef> {
        let update_id = UpdateId::new();
        let deleted = self.api.clear_featured_video(update_id).await?;
        self.emitter.trigger_update(UpdateEvent::deleted(
            update_id,
            EntityKind::Featured,
            deleted.id,
        ));
        info!("Cleared featured video {}", deleted.id);
        Ok(deleted)
    }

    fn announce<T: Serialize>(
        &self,
        update_id: UpdateId,
        kind: EntityKind,
        action: UpdateAction,
        record: &T,
        id: i64,
    ) {
        let data = serde_json::to_value(record).unwrap_or_else(|_| json!({ "id": id }));
        self.emitter
            .trigger_update(UpdateEvent::with_id(update_id, kind, action, data));
        info!("{} {} {}", action_verb(action), kind, id);
    }
}

fn action_verb(action: UpdateAction) -> &'static str {
    match action {
        UpdateAction::Create => "Created",
        UpdateAction::Update => "Updated",
        UpdateAction::Delete => "Deleted",
    }
}

/// Parse a JSON object of entity fields, as typed on the command line.
pub fn parse_fields<F: ContentFields>(raw: &str) -> anyhow::Result<F> {
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        anyhow::bail!("{} fields must be a JSON object", F::KIND);
    }
    let fields: F = serde_json::from_value(value)?;
    fields.validate()?;
    Ok(fields)
}
