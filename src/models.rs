//! Domain records persisted locally and mirrored to the remote document store.
//!
//! Field names serialize in camelCase so the JSON documents written to the
//! remote store match what other terminals (and older web clients) read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Generate a prefixed, globally unique id (`C_…`, `P_…`, `TX_…`, `O_…`).
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Milliseconds since the Unix epoch, used for outbox timestamps.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `₱` followed by the amount with two decimals.
pub fn format_money(amount: f64) -> String {
    format!("₱{amount:.2}")
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

/// The five logical collections of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionName {
    Categories,
    Products,
    Sales,
    Outbox,
    Settings,
}

impl CollectionName {
    pub const ALL: [CollectionName; 5] = [
        CollectionName::Categories,
        CollectionName::Products,
        CollectionName::Sales,
        CollectionName::Outbox,
        CollectionName::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CollectionName::Categories => "categories",
            CollectionName::Products => "products",
            CollectionName::Sales => "sales",
            CollectionName::Outbox => "outbox",
            CollectionName::Settings => "settings",
        }
    }
}

impl std::fmt::Display for CollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(deserialize_with = "lenient::price")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient::stock")]
    pub stock: i64,
    #[serde(default)]
    pub category_id: String,
}

pub(crate) fn default_unit() -> String {
    "pcs".to_string()
}

/// Product numbers written by form-driven clients may arrive as JSON strings.
mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    pub fn price<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let parsed = match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed
            .filter(|p| p.is_finite())
            .ok_or_else(|| D::Error::custom("price is not a finite number"))
    }

    /// Integers, floats (truncated) and numeric strings; anything else is 0.
    pub fn stock<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let as_int = |v: f64| v.is_finite().then(|| v.trunc() as i64);
        let parsed = match Value::deserialize(deserializer)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(as_int)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(as_int))
            }
            _ => None,
        };
        Ok(parsed.unwrap_or(0))
    }
}

/// Raw product form input. `price` and `stock` arrive as text and are
/// validated by [`crate::catalog::save_product`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductForm {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub stock: String,
    #[serde(default)]
    pub category_id: String,
}

impl Default for ProductForm {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            unit: default_unit(),
            price: String::new(),
            stock: "0".to_string(),
            category_id: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sales
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub name: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub price: f64,
    pub qty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_product_id: Option<String>,
}

impl CartItem {
    pub fn subtotal(&self) -> f64 {
        self.price * self.qty
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub name: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    pub price: f64,
    pub qty: f64,
    pub subtotal: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_product_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub datetime: String,
    #[serde(default)]
    pub items: Vec<SaleItem>,
    pub total: f64,
}

// ---------------------------------------------------------------------------
// Outbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Category,
    Product,
    Sale,
}

impl EntityType {
    /// Remote collection holding documents of this type.
    pub fn remote_collection(self) -> &'static str {
        match self {
            EntityType::Category => "categories",
            EntityType::Product => "products",
            EntityType::Sale => "sales",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxAction {
    Create,
    Update,
    Delete,
}

/// One not-yet-acknowledged remote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub action: OutboxAction,
    pub payload: Value,
    pub ts: i64,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    #[default]
    Auto,
    Offline,
    Online,
}

impl SyncMode {
    /// `offline` suppresses network activity; `auto` and `online` defer to
    /// the connectivity signal.
    pub fn allows_network(self) -> bool {
        !matches!(self, SyncMode::Offline)
    }
}

/// Device-local settings singleton. Missing fields fall back to defaults so a
/// partial stored record is merged over them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub contact: String,
    pub cashier: String,
    pub thank_msg: String,
    pub receipt_size: String,
    pub mode: SyncMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            contact: "0999-999-9999".to_string(),
            cashier: "Joyce".to_string(),
            thank_msg: "Thank you 💗".to_string(),
            receipt_size: "58".to_string(),
            mode: SyncMode::Auto,
        }
    }
}

/// Partial settings update; `None` fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub contact: Option<String>,
    pub cashier: Option<String>,
    pub thank_msg: Option<String>,
    pub receipt_size: Option<String>,
    pub mode: Option<SyncMode>,
}

impl Settings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(v) = patch.contact {
            self.contact = v;
        }
        if let Some(v) = patch.cashier {
            self.cashier = v;
        }
        if let Some(v) = patch.thank_msg {
            self.thank_msg = v;
        }
        if let Some(v) = patch.receipt_size {
            self.receipt_size = v;
        }
        if let Some(v) = patch.mode {
            self.mode = v;
        }
    }
}
