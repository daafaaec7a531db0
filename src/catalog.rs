//! Category and product operations.
//!
//! Every mutation changes local state and appends exactly one outbox entry in
//! the same committed step. Destructive operations take a [`Confirm`] so the
//! approval decision stays with the caller; a declined confirmation is a full
//! no-op.

use tracing::info;

use crate::error::{PosError, PosResult};
use crate::models::{
    new_id, Category, CollectionName, EntityType, OutboxAction, Product, ProductForm,
};
use crate::outbox;
use crate::store::{PosStore, StoreState};

/// Categories created on a fresh install.
pub const DEFAULT_CATEGORIES: [&str; 4] = ["Liquor", "Softdrinks", "Snacks", "Cigarettes"];

const CATALOG_AND_OUTBOX: [CollectionName; 2] = [CollectionName::Categories, CollectionName::Outbox];
const PRODUCTS_AND_OUTBOX: [CollectionName; 2] = [CollectionName::Products, CollectionName::Outbox];

/// Caller-supplied approval for destructive operations.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Pre-decided approval, for non-interactive callers.
impl Confirm for bool {
    fn confirm(&self, _prompt: &str) -> bool {
        *self
    }
}

fn outbox_err(e: String) -> PosError {
    PosError::Storage(e)
}

fn category_index(state: &StoreState, id: &str) -> PosResult<usize> {
    state
        .categories
        .iter()
        .position(|c| c.id == id)
        .ok_or_else(|| PosError::not_found("category", id))
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

pub fn create_category(store: &PosStore, name: &str) -> PosResult<Category> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PosError::validation("Category name is required"));
    }
    let category = Category {
        id: new_id("C"),
        name: name.to_string(),
        collapsed: true,
    };

    store.mutate(&CATALOG_AND_OUTBOX, |state| {
        let entry = outbox::upsert_entry(EntityType::Category, OutboxAction::Create, &category)
            .map_err(outbox_err)?;
        state.categories.push(category.clone());
        state.outbox.push(entry);
        Ok(())
    })?;
    info!(category_id = %category.id, name = %category.name, "category created");
    Ok(category)
}

pub fn rename_category(store: &PosStore, id: &str, name: &str) -> PosResult<Category> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PosError::validation("Category name is required"));
    }
    store.mutate(&CATALOG_AND_OUTBOX, |state| {
        let idx = category_index(state, id)?;
        state.categories[idx].name = name.to_string();
        let updated = state.categories[idx].clone();
        state.outbox.push(
            outbox::upsert_entry(EntityType::Category, OutboxAction::Update, &updated)
                .map_err(outbox_err)?,
        );
        Ok(updated)
    })
}

/// Flip the `collapsed` flag. It is part of the synced record, so it is
/// queued like any other update.
pub fn toggle_category(store: &PosStore, id: &str) -> PosResult<Category> {
    store.mutate(&CATALOG_AND_OUTBOX, |state| {
        let idx = category_index(state, id)?;
        state.categories[idx].collapsed = !state.categories[idx].collapsed;
        let updated = state.categories[idx].clone();
        state.outbox.push(
            outbox::upsert_entry(EntityType::Category, OutboxAction::Update, &updated)
                .map_err(outbox_err)?,
        );
        Ok(updated)
    })
}

/// Delete a category and every product referencing it.
///
/// Products are removed locally first; the single queued delete names them so
/// the remote copies go too. Returns the ids of the cascaded products.
pub fn delete_category(store: &PosStore, id: &str, confirm: &dyn Confirm) -> PosResult<Vec<String>> {
    if !store.categories().iter().any(|c| c.id == id) {
        return Err(PosError::not_found("category", id));
    }
    if !confirm.confirm("Delete category and its products?") {
        return Err(PosError::Declined);
    }

    let cascaded = store.mutate(
        &[
            CollectionName::Products,
            CollectionName::Categories,
            CollectionName::Outbox,
        ],
        |state| {
            let idx = category_index(state, id)?;
            let cascaded: Vec<String> = state
                .products
                .iter()
                .filter(|p| p.category_id == id)
                .map(|p| p.id.clone())
                .collect();
            state.products.retain(|p| p.category_id != id);
            state.categories.remove(idx);
            state
                .outbox
                .push(outbox::category_delete_entry(id, &cascaded));
            Ok(cascaded)
        },
    )?;
    info!(
        category_id = %id,
        cascaded_products = cascaded.len(),
        "category deleted"
    );
    Ok(cascaded)
}

/// Create the default categories when the catalog is empty. Returns how many
/// were created.
pub fn seed_default_categories(store: &PosStore) -> PosResult<usize> {
    if !store.categories().is_empty() {
        return Ok(0);
    }
    for name in DEFAULT_CATEGORIES {
        create_category(store, name)?;
    }
    info!("seeded {} default categories", DEFAULT_CATEGORIES.len());
    Ok(DEFAULT_CATEGORIES.len())
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

fn parse_price(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|p| p.is_finite())
}

fn parse_stock(raw: &str) -> i64 {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| v.trunc() as i64)
        })
        .unwrap_or(0)
}

/// Create a product (`form.id == None`) or update an existing one.
///
/// Fails with `PosError::Validation` without touching state when the name is
/// empty, the price is not a number, or the category does not exist.
pub fn save_product(store: &PosStore, form: &ProductForm) -> PosResult<Product> {
    let name = form.name.trim();
    let price = parse_price(&form.price);
    let Some(price) = price.filter(|_| !name.is_empty()) else {
        return Err(PosError::validation("Provide name and price"));
    };
    let unit = match form.unit.trim() {
        "" => "pcs".to_string(),
        u => u.to_string(),
    };
    let stock = parse_stock(&form.stock);
    let category_id = form.category_id.trim().to_string();

    let product = store.mutate(&PRODUCTS_AND_OUTBOX, |state| {
        let (product, action) = match form.id.as_deref() {
            Some(id) => {
                let idx = state
                    .products
                    .iter()
                    .position(|p| p.id == id)
                    .ok_or_else(|| PosError::not_found("product", id))?;
                if state.products[idx].category_id != category_id {
                    category_index(state, &category_id)
                        .map_err(|_| PosError::validation("Choose an existing category"))?;
                }
                let existing = &mut state.products[idx];
                existing.name = name.to_string();
                existing.unit = unit.clone();
                existing.price = price;
                existing.stock = stock;
                existing.category_id = category_id.clone();
                (existing.clone(), OutboxAction::Update)
            }
            None => {
                category_index(state, &category_id)
                    .map_err(|_| PosError::validation("Choose an existing category"))?;
                let product = Product {
                    id: new_id("P"),
                    name: name.to_string(),
                    unit: unit.clone(),
                    price,
                    stock,
                    category_id: category_id.clone(),
                };
                state.products.push(product.clone());
                (product, OutboxAction::Create)
            }
        };
        state.outbox.push(
            outbox::upsert_entry(EntityType::Product, action, &product).map_err(outbox_err)?,
        );
        Ok(product)
    })?;
    info!(product_id = %product.id, name = %product.name, "product saved");
    Ok(product)
}

/// Pre-filled form for editing an existing product.
pub fn edit_product_form(store: &PosStore, id: &str) -> PosResult<ProductForm> {
    store
        .products()
        .into_iter()
        .find(|p| p.id == id)
        .map(|p| ProductForm {
            id: Some(p.id),
            name: p.name,
            unit: p.unit,
            price: p.price.to_string(),
            stock: p.stock.to_string(),
            category_id: p.category_id,
        })
        .ok_or_else(|| PosError::not_found("product", id))
}

pub fn delete_product(store: &PosStore, id: &str, confirm: &dyn Confirm) -> PosResult<()> {
    if !store.products().iter().any(|p| p.id == id) {
        return Err(PosError::not_found("product", id));
    }
    if !confirm.confirm("Delete product?") {
        return Err(PosError::Declined);
    }
    store.mutate(&PRODUCTS_AND_OUTBOX, |state| {
        state.products.retain(|p| p.id != id);
        state
            .outbox
            .push(outbox::delete_entry(EntityType::Product, id));
        Ok(())
    })?;
    info!(product_id = %id, "product deleted");
    Ok(())
}

// ---------------------------------------------------------------------------
// Read-only views
// ---------------------------------------------------------------------------

/// Categories + products as consumed by the print/export collaborators.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub categories: Vec<Category>,
    pub products: Vec<Product>,
}

pub fn catalog_snapshot(store: &PosStore) -> CatalogSnapshot {
    let state = store.snapshot();
    CatalogSnapshot {
        categories: state.categories,
        products: state.products,
    }
}

impl CatalogSnapshot {
    /// Categories whose name, or any of whose products' names, contains
    /// `search` (case-insensitive). An empty search matches everything.
    pub fn visible_categories(&self, search: &str) -> Vec<&Category> {
        let needle = search.to_lowercase();
        self.categories
            .iter()
            .filter(|c| {
                c.name.to_lowercase().contains(&needle)
                    || self
                        .products
                        .iter()
                        .any(|p| p.category_id == c.id && p.name.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Products of one category whose name contains `search`.
    pub fn products_in(&self, category_id: &str, search: &str) -> Vec<&Product> {
        let needle = search.to_lowercase();
        self.products
            .iter()
            .filter(|p| p.category_id == category_id && p.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn category_name(&self, category_id: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|c| c.id == category_id)
            .map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    fn form(name: &str, price: &str, category_id: &str) -> ProductForm {
        ProductForm {
            name: name.into(),
            price: price.into(),
            category_id: category_id.into(),
            ..ProductForm::default()
        }
    }

    #[test]
    fn test_create_category_enqueues_create() {
        let store = test_store();
        let cat = create_category(&store, "  Liquor ").unwrap();
        assert_eq!(cat.name, "Liquor");
        assert!(cat.collapsed);

        let outbox = store.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].entity_type, EntityType::Category);
        assert_eq!(outbox[0].action, OutboxAction::Create);
        assert_eq!(outbox[0].payload["id"], cat.id.as_str());
    }

    #[test]
    fn test_empty_category_name_is_rejected() {
        let store = test_store();
        assert!(matches!(
            create_category(&store, "   "),
            Err(PosError::Validation(_))
        ));
        assert!(store.categories().is_empty());
        assert_eq!(store.outbox_len(), 0);
    }

    #[test]
    fn test_rename_and_toggle_enqueue_updates() {
        let store = test_store();
        let cat = create_category(&store, "Snaks").unwrap();
        rename_category(&store, &cat.id, "Snacks").unwrap();
        let toggled = toggle_category(&store, &cat.id).unwrap();
        assert!(!toggled.collapsed);

        let outbox = store.outbox();
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox[1].action, OutboxAction::Update);
        assert_eq!(outbox[1].payload["name"], "Snacks");
        assert_eq!(outbox[2].payload["collapsed"], false);
    }

    #[test]
    fn test_delete_category_cascades_products() {
        let store = test_store();
        let drinks = create_category(&store, "Softdrinks").unwrap();
        let snacks = create_category(&store, "Snacks").unwrap();
        let cola = save_product(&store, &form("Cola", "20", &drinks.id)).unwrap();
        let soda = save_product(&store, &form("Soda", "18", &drinks.id)).unwrap();
        save_product(&store, &form("Chips", "15", &snacks.id)).unwrap();

        let cascaded = delete_category(&store, &drinks.id, &true).unwrap();
        assert_eq!(cascaded, vec![cola.id.clone(), soda.id.clone()]);

        let products = store.products();
        assert_eq!(products.len(), 1);
        assert!(products.iter().all(|p| p.category_id != drinks.id));
        assert!(store.categories().iter().all(|c| c.id != drinks.id));

        let last = store.outbox().pop().unwrap();
        assert_eq!(last.action, OutboxAction::Delete);
        assert_eq!(last.payload["id"], drinks.id.as_str());
        assert_eq!(
            last.payload[outbox::CASCADE_PRODUCT_IDS],
            serde_json::json!([cola.id, soda.id])
        );
    }

    #[test]
    fn test_declined_delete_is_a_no_op() {
        let store = test_store();
        let cat = create_category(&store, "Liquor").unwrap();
        let pid = save_product(&store, &form("Gin", "150", &cat.id)).unwrap().id;
        let before = store.snapshot();

        let asked = std::cell::Cell::new(false);
        let decline = |_: &str| {
            asked.set(true);
            false
        };
        assert_eq!(
            delete_category(&store, &cat.id, &decline),
            Err(PosError::Declined)
        );
        assert_eq!(delete_product(&store, &pid, &false), Err(PosError::Declined));
        assert!(asked.get());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_invalid_product_form_mutates_nothing() {
        let store = test_store();
        let cat = create_category(&store, "Snacks").unwrap();
        let before = store.snapshot();

        for bad in [
            form("", "10", &cat.id),
            form("Chips", "ten", &cat.id),
            form("Chips", "", &cat.id),
            form("Chips", "10", "C_missing"),
        ] {
            assert!(matches!(
                save_product(&store, &bad),
                Err(PosError::Validation(_))
            ));
        }
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_save_product_create_then_update() {
        let store = test_store();
        let cat = create_category(&store, "Snacks").unwrap();
        let mut f = form(" Chips ", "15.5", &cat.id);
        f.stock = "abc".into();
        let created = save_product(&store, &f).unwrap();
        assert_eq!(created.name, "Chips");
        assert_eq!(created.price, 15.5);
        assert_eq!(created.stock, 0);
        assert_eq!(created.unit, "pcs");

        let mut edit = edit_product_form(&store, &created.id).unwrap();
        edit.price = "17".into();
        edit.stock = "12".into();
        let updated = save_product(&store, &edit).unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.price, 17.0);
        assert_eq!(updated.stock, 12);
        assert_eq!(store.products(), vec![updated.clone()]);

        let outbox = store.outbox();
        assert_eq!(outbox.len(), 3);
        assert_eq!(outbox[2].action, OutboxAction::Update);
        assert_eq!(outbox[2].payload, serde_json::to_value(&updated).unwrap());
    }

    #[test]
    fn test_update_unknown_product_is_not_found() {
        let store = test_store();
        let cat = create_category(&store, "Snacks").unwrap();
        let mut f = form("Chips", "10", &cat.id);
        f.id = Some("P_gone".into());
        assert!(matches!(
            save_product(&store, &f),
            Err(PosError::NotFound { kind: "product", .. })
        ));
    }

    #[test]
    fn test_delete_product_enqueues_id_only_payload() {
        let store = test_store();
        let cat = create_category(&store, "Snacks").unwrap();
        let p = save_product(&store, &form("Chips", "10", &cat.id)).unwrap();
        delete_product(&store, &p.id, &true).unwrap();
        assert!(store.products().is_empty());
        let last = store.outbox().pop().unwrap();
        assert_eq!(last.payload, serde_json::json!({ "id": p.id }));
    }

    #[test]
    fn test_seed_only_when_empty() {
        let store = test_store();
        assert_eq!(seed_default_categories(&store).unwrap(), 4);
        assert_eq!(seed_default_categories(&store).unwrap(), 0);
        let names: Vec<String> = store.categories().into_iter().map(|c| c.name).collect();
        assert_eq!(names, DEFAULT_CATEGORIES);
        assert_eq!(store.outbox_len(), 4);
    }

    #[test]
    fn test_visible_categories_match_category_or_product_name() {
        let store = test_store();
        let liquor = create_category(&store, "Liquor").unwrap();
        create_category(&store, "Snacks").unwrap();
        save_product(&store, &form("Brandy", "300", &liquor.id)).unwrap();

        let snapshot = catalog_snapshot(&store);
        assert_eq!(snapshot.visible_categories("").len(), 2);
        let hits = snapshot.visible_categories("BRAND");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, liquor.id);
        assert_eq!(snapshot.products_in(&liquor.id, "gin").len(), 0);
        assert_eq!(snapshot.category_name(&liquor.id), Some("Liquor"));
    }
}
