//! `X-Filter` header values for Linode list endpoints.

use serde_json::{Map, Value, json};

use crate::provider::{EntityKind, VolumeFilter};

/// Filter for `GET /volumes`; `None` when nothing is constrained.
pub(super) fn volumes(filter: &VolumeFilter) -> Option<String> {
    let mut fields = Map::new();
    if let Some(label) = filter.label.as_deref() {
        fields.insert(String::from("label"), Value::from(label));
    }
    if let Some(region) = filter.region.as_deref() {
        fields.insert(String::from("region"), Value::from(region));
    }
    (!fields.is_empty()).then(|| Value::Object(fields).to_string())
}

/// Filter for `GET /linode/instances`.
pub(super) fn instances(label: Option<&str>) -> Option<String> {
    label.map(|label| json!({ "label": label }).to_string())
}

/// Filter for `GET /account/events`, newest first.
pub(super) fn events(kind: EntityKind, entity_id: &str) -> String {
    let id = entity_id
        .parse::<u64>()
        .map_or_else(|_| Value::from(entity_id), Value::from);
    json!({
        "entity.type": kind.as_str(),
        "entity.id": id,
        "+order_by": "created",
        "+order": "desc",
    })
    .to_string()
}
