//! Transient checkout cart. Never persisted; it ends either finalized into a
//! sale (see [`crate::sales::finalize_sale`]) or discarded.

use crate::catalog::Confirm;
use crate::error::{PosError, PosResult};
use crate::models::{CartItem, Product};

/// Fields of a cart line that may be edited in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartItemPatch {
    pub name: Option<String>,
    pub unit: Option<String>,
    pub price: Option<f64>,
    pub qty: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn add_product(&mut self, product: &Product) {
        self.items.push(CartItem {
            name: product.name.clone(),
            unit: product.unit.clone(),
            price: product.price,
            qty: 1.0,
            source_product_id: Some(product.id.clone()),
        });
    }

    /// Add a line not backed by a catalog product.
    pub fn add_custom(&mut self, name: &str, unit: &str, price: f64, qty: f64) -> PosResult<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PosError::validation("Item name is required"));
        }
        if !price.is_finite() || !qty.is_finite() || qty <= 0.0 {
            return Err(PosError::validation("Provide a valid price and quantity"));
        }
        self.items.push(CartItem {
            name: name.to_string(),
            unit: if unit.trim().is_empty() {
                "pcs".to_string()
            } else {
                unit.trim().to_string()
            },
            price,
            qty,
            source_product_id: None,
        });
        Ok(())
    }

    fn item_mut(&mut self, index: usize) -> PosResult<&mut CartItem> {
        self.items
            .get_mut(index)
            .ok_or_else(|| PosError::not_found("cart item", &index.to_string()))
    }

    pub fn increment(&mut self, index: usize) -> PosResult<()> {
        self.item_mut(index)?.qty += 1.0;
        Ok(())
    }

    pub fn edit(&mut self, index: usize, patch: CartItemPatch) -> PosResult<()> {
        if patch.qty.is_some_and(|q| !q.is_finite() || q <= 0.0)
            || patch.price.is_some_and(|p| !p.is_finite())
        {
            return Err(PosError::validation("Provide a valid price and quantity"));
        }
        let item = self.item_mut(index)?;
        if let Some(v) = patch.name {
            item.name = v;
        }
        if let Some(v) = patch.unit {
            item.unit = v;
        }
        if let Some(v) = patch.price {
            item.price = v;
        }
        if let Some(v) = patch.qty {
            item.qty = v;
        }
        Ok(())
    }

    pub fn remove(&mut self, index: usize, confirm: &dyn Confirm) -> PosResult<CartItem> {
        if index >= self.items.len() {
            return Err(PosError::not_found("cart item", &index.to_string()));
        }
        if !confirm.confirm("Remove item?") {
            return Err(PosError::Declined);
        }
        Ok(self.items.remove(index))
    }

    /// Refresh name, unit and price of lines sourced from `products`.
    pub fn refresh_from(&mut self, products: &[Product]) {
        for item in &mut self.items {
            let Some(source) = item.source_product_id.as_deref() else {
                continue;
            };
            if let Some(p) = products.iter().find(|p| p.id == source) {
                item.name = p.name.clone();
                item.unit = p.unit.clone();
                item.price = p.price;
            }
        }
    }

    pub fn total(&self) -> f64 {
        self.items.iter().map(CartItem::subtotal).sum()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[cfg(test)]
    pub(crate) fn from_items(items: Vec<CartItem>) -> Self {
        Self { items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, price: f64) -> Product {
        Product {
            id: id.into(),
            name: format!("Product {id}"),
            unit: "pcs".into(),
            price,
            stock: 0,
            category_id: "C_1".into(),
        }
    }

    #[test]
    fn test_add_increment_and_total() {
        let mut cart = Cart::new();
        cart.add_product(&product("P_1", 10.0));
        cart.add_custom("Ice", "bag", 5.0, 1.0).unwrap();
        cart.increment(0).unwrap();
        assert_eq!(cart.items()[0].qty, 2.0);
        assert_eq!(cart.total(), 25.0);
    }

    #[test]
    fn test_remove_requires_confirmation() {
        let mut cart = Cart::new();
        cart.add_product(&product("P_1", 10.0));
        assert_eq!(cart.remove(0, &false), Err(PosError::Declined));
        assert_eq!(cart.len(), 1);
        let removed = cart.remove(0, &true).unwrap();
        assert_eq!(removed.source_product_id.as_deref(), Some("P_1"));
        assert!(cart.is_empty());
        assert!(matches!(
            cart.remove(0, &true),
            Err(PosError::NotFound { .. })
        ));
    }

    #[test]
    fn test_refresh_from_updates_sourced_lines_only() {
        let mut cart = Cart::new();
        cart.add_product(&product("P_1", 10.0));
        cart.add_custom("Ice", "bag", 5.0, 1.0).unwrap();

        let mut changed = product("P_1", 12.0);
        changed.name = "Cola 1L".into();
        cart.refresh_from(&[changed]);

        assert_eq!(cart.items()[0].name, "Cola 1L");
        assert_eq!(cart.items()[0].price, 12.0);
        assert_eq!(cart.items()[1].name, "Ice");
    }

    #[test]
    fn test_edit_rejects_bad_quantity() {
        let mut cart = Cart::new();
        cart.add_product(&product("P_1", 10.0));
        let bad = CartItemPatch {
            qty: Some(0.0),
            ..CartItemPatch::default()
        };
        assert!(cart.edit(0, bad).is_err());
        cart.edit(
            0,
            CartItemPatch {
                qty: Some(3.0),
                ..CartItemPatch::default()
            },
        )
        .unwrap();
        assert_eq!(cart.total(), 30.0);
    }
}
