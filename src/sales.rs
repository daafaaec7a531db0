//! Sale finalization. Sales are append-only: created here, never updated or
//! deleted locally.

use chrono::Local;
use tracing::info;

use crate::cart::Cart;
use crate::error::{PosError, PosResult};
use crate::models::{new_id, CollectionName, EntityType, OutboxAction, Sale, SaleItem};
use crate::outbox;
use crate::store::PosStore;

/// Turn the cart into a sale, append it locally, queue its creation and
/// clear the cart. An empty cart is rejected and nothing changes.
///
/// The cart is only cleared once the sale has been committed.
pub fn finalize_sale(store: &PosStore, cart: &mut Cart) -> PosResult<Sale> {
    if cart.is_empty() {
        return Err(PosError::validation("Cart empty"));
    }

    let items: Vec<SaleItem> = cart
        .items()
        .iter()
        .map(|i| SaleItem {
            name: i.name.clone(),
            unit: i.unit.clone(),
            price: i.price,
            qty: i.qty,
            subtotal: i.subtotal(),
            source_product_id: i.source_product_id.clone(),
        })
        .collect();
    let sale = Sale {
        id: new_id("TX"),
        datetime: Local::now().to_rfc3339(),
        total: items.iter().map(|i| i.subtotal).sum(),
        items,
    };

    store.mutate(&[CollectionName::Sales, CollectionName::Outbox], |state| {
        let entry = outbox::upsert_entry(EntityType::Sale, OutboxAction::Create, &sale)
            .map_err(PosError::Storage)?;
        state.sales.push(sale.clone());
        state.outbox.push(entry);
        Ok(())
    })?;
    cart.clear();

    info!(sale_id = %sale.id, total = sale.total, "sale saved locally");
    Ok(sale)
}

/// Sum of all recorded sale totals.
pub fn sales_total(store: &PosStore) -> f64 {
    store.sales().iter().map(|s| s.total).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CartItem;
    use crate::store::test_store;

    fn line(price: f64, qty: f64) -> CartItem {
        CartItem {
            name: format!("item {price}"),
            unit: "pcs".into(),
            price,
            qty,
            source_product_id: None,
        }
    }

    #[test]
    fn test_finalize_computes_subtotals_and_total() {
        let store = test_store();
        let mut cart = Cart::from_items(vec![line(10.0, 2.0), line(5.0, 1.0)]);

        let sale = finalize_sale(&store, &mut cart).unwrap();
        assert_eq!(sale.total, 25.0);
        let subtotals: Vec<f64> = sale.items.iter().map(|i| i.subtotal).collect();
        assert_eq!(subtotals, vec![20.0, 5.0]);
        assert!(sale.id.starts_with("TX_"));
        assert!(cart.is_empty());

        assert_eq!(store.sales(), vec![sale.clone()]);
        let outbox = store.outbox();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].entity_type, EntityType::Sale);
        assert_eq!(outbox[0].action, OutboxAction::Create);
        assert_eq!(outbox[0].payload, serde_json::to_value(&sale).unwrap());
        assert_eq!(sales_total(&store), 25.0);
    }

    #[test]
    fn test_empty_cart_changes_nothing() {
        let store = test_store();
        let mut cart = Cart::new();
        assert!(matches!(
            finalize_sale(&store, &mut cart),
            Err(PosError::Validation(_))
        ));
        assert!(store.sales().is_empty());
        assert_eq!(store.outbox_len(), 0);
    }
}
