//! Outbox entries and the remote writes they replay to.

use serde::Serialize;
use serde_json::Value;

use crate::models::{new_id, now_ms, CollectionName, EntityType, OutboxAction, OutboxEntry};

/// Payload key listing products removed locally together with a category.
pub const CASCADE_PRODUCT_IDS: &str = "cascadeProductIds";

fn entry(entity_type: EntityType, action: OutboxAction, payload: Value) -> OutboxEntry {
    OutboxEntry {
        id: new_id("O"),
        entity_type,
        action,
        payload,
        ts: now_ms(),
    }
}

/// Entry carrying the full record for a create or update.
pub fn upsert_entry<T: Serialize>(
    entity_type: EntityType,
    action: OutboxAction,
    record: &T,
) -> Result<OutboxEntry, String> {
    let payload =
        serde_json::to_value(record).map_err(|e| format!("serialize outbox payload: {e}"))?;
    Ok(entry(entity_type, action, payload))
}

/// Entry carrying only `{id}`.
pub fn delete_entry(entity_type: EntityType, id: &str) -> OutboxEntry {
    entry(
        entity_type,
        OutboxAction::Delete,
        serde_json::json!({ "id": id }),
    )
}

/// Category delete that also names the products cascaded with it, so the
/// remote product documents are removed before the category document.
pub fn category_delete_entry(id: &str, cascaded_products: &[String]) -> OutboxEntry {
    let mut payload = serde_json::json!({ "id": id });
    if !cascaded_products.is_empty() {
        payload[CASCADE_PRODUCT_IDS] = serde_json::json!(cascaded_products);
    }
    entry(EntityType::Category, OutboxAction::Delete, payload)
}

/// A single remote mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteWrite {
    Upsert {
        collection: &'static str,
        id: String,
        doc: Value,
    },
    Delete {
        collection: &'static str,
        id: String,
    },
}

/// Remote writes for one entry, in the order they must be applied.
///
/// An empty plan means the entry has no remote effect (sale update/delete)
/// and can be dropped from the outbox. An `Err` means the payload is unusable.
pub fn plan(entry: &OutboxEntry) -> Result<Vec<RemoteWrite>, String> {
    let id = entry
        .payload
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| format!("outbox entry {} has no payload id", entry.id))?
        .to_string();
    let collection = entry.entity_type.remote_collection();

    let writes = match (entry.entity_type, entry.action) {
        (EntityType::Sale, OutboxAction::Update | OutboxAction::Delete) => Vec::new(),
        (_, OutboxAction::Create | OutboxAction::Update) => vec![RemoteWrite::Upsert {
            collection,
            id,
            doc: entry.payload.clone(),
        }],
        (EntityType::Category, OutboxAction::Delete) => {
            let mut writes: Vec<RemoteWrite> = entry
                .payload
                .get(CASCADE_PRODUCT_IDS)
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(Value::as_str)
                        .map(|pid| RemoteWrite::Delete {
                            collection: EntityType::Product.remote_collection(),
                            id: pid.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            writes.push(RemoteWrite::Delete { collection, id });
            writes
        }
        (_, OutboxAction::Delete) => vec![RemoteWrite::Delete { collection, id }],
    };
    Ok(writes)
}

/// Local collections whose state is ahead of the remote store until `entry`
/// has been delivered.
pub fn pending_collections(entry: &OutboxEntry) -> Vec<CollectionName> {
    let own = match entry.entity_type {
        EntityType::Category => CollectionName::Categories,
        EntityType::Product => CollectionName::Products,
        EntityType::Sale => CollectionName::Sales,
    };
    let cascades = entry
        .payload
        .get(CASCADE_PRODUCT_IDS)
        .and_then(Value::as_array)
        .is_some_and(|ids| !ids.is_empty());
    if cascades {
        vec![own, CollectionName::Products]
    } else {
        vec![own]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;

    #[test]
    fn test_upsert_plan_writes_full_payload() {
        let category = Category {
            id: "C_1".into(),
            name: "Snacks".into(),
            collapsed: true,
        };
        let entry = upsert_entry(EntityType::Category, OutboxAction::Create, &category).unwrap();
        assert!(entry.id.starts_with("O_"));

        let writes = plan(&entry).unwrap();
        assert_eq!(
            writes,
            vec![RemoteWrite::Upsert {
                collection: "categories",
                id: "C_1".into(),
                doc: serde_json::to_value(&category).unwrap(),
            }]
        );
    }

    #[test]
    fn test_delete_payload_is_id_only() {
        let entry = delete_entry(EntityType::Product, "P_9");
        assert_eq!(entry.payload, serde_json::json!({ "id": "P_9" }));
        assert_eq!(
            plan(&entry).unwrap(),
            vec![RemoteWrite::Delete {
                collection: "products",
                id: "P_9".into()
            }]
        );
    }

    #[test]
    fn test_category_delete_removes_cascaded_products_first() {
        let entry = category_delete_entry("C_1", &["P_1".to_string(), "P_2".to_string()]);
        let writes = plan(&entry).unwrap();
        assert_eq!(writes.len(), 3);
        assert_eq!(
            writes[0],
            RemoteWrite::Delete {
                collection: "products",
                id: "P_1".into()
            }
        );
        assert_eq!(
            writes[2],
            RemoteWrite::Delete {
                collection: "categories",
                id: "C_1".into()
            }
        );
    }

    #[test]
    fn test_category_delete_without_products_keeps_bare_payload() {
        let entry = category_delete_entry("C_1", &[]);
        assert_eq!(entry.payload, serde_json::json!({ "id": "C_1" }));
    }

    #[test]
    fn test_sale_update_and_delete_have_no_remote_effect() {
        let mut entry = delete_entry(EntityType::Sale, "TX_1");
        assert!(plan(&entry).unwrap().is_empty());
        entry.action = OutboxAction::Update;
        assert!(plan(&entry).unwrap().is_empty());
    }

    #[test]
    fn test_plan_rejects_payload_without_id() {
        let mut entry = delete_entry(EntityType::Product, "P_1");
        entry.payload = serde_json::json!({});
        assert!(plan(&entry).is_err());
        entry.payload = serde_json::json!({ "id": "   " });
        assert!(plan(&entry).is_err());
    }

    #[test]
    fn test_plan_keeps_id_verbatim() {
        let entry = delete_entry(EntityType::Product, " P_1 ");
        assert_eq!(
            plan(&entry).unwrap(),
            vec![RemoteWrite::Delete {
                collection: "products",
                id: " P_1 ".into()
            }]
        );
    }

    #[test]
    fn test_pending_collections_include_cascaded_products() {
        assert_eq!(
            pending_collections(&category_delete_entry("C_1", &["P_1".to_string()])),
            vec![CollectionName::Categories, CollectionName::Products]
        );
        assert_eq!(
            pending_collections(&category_delete_entry("C_1", &[])),
            vec![CollectionName::Categories]
        );
        assert_eq!(
            pending_collections(&delete_entry(EntityType::Sale, "TX_1")),
            vec![CollectionName::Sales]
        );
    }
}
