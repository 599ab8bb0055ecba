//! Almacén de productos del catálogo.
//!
//! El motor de persistencia queda fuera del núcleo: este almacén en memoria
//! implementa la interfaz del colaborador (listado, consulta por id, CRUD,
//! búsqueda por categoría y por texto). El pipeline de búsqueda sólo usa
//! `list_products` y `get_product_by_id`.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Result};
use chrono::Utc;

use crate::models::{NewProduct, Product, ProductPatch};

/// Filtro estructurado para el listado de productos.
#[derive(Debug, Clone, Default)]
pub struct ProductQueryFilter {
    pub category: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub brand: Option<String>,
}

struct StoreInner {
    products: BTreeMap<i64, Product>,
    next_id: i64,
}

/// Almacén compartido entre peticiones. Clonar es barato (Arc).
#[derive(Clone)]
pub struct ProductStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl ProductStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner {
                products: BTreeMap::new(),
                next_id: 1,
            })),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.products.is_empty())
    }

    /// Lista los productos, más recientes primero, con filtros opcionales.
    pub fn list_products(&self, filter: Option<&ProductQueryFilter>) -> Result<Vec<Product>> {
        let inner = self.read()?;
        let mut products: Vec<Product> = inner
            .products
            .values()
            .filter(|p| filter.map_or(true, |f| matches_query_filter(p, f)))
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(products)
    }

    pub fn get_product_by_id(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    pub fn create_product(&self, data: NewProduct) -> Result<Product> {
        if data.name.trim().is_empty() || data.category.trim().is_empty() {
            return Err(anyhow!("El nombre y la categoría son obligatorios"));
        }
        if data.price < 0.0 {
            return Err(anyhow!("El precio no puede ser negativo"));
        }

        let mut inner = self.write()?;
        let id = inner.next_id;
        inner.next_id += 1;
        let now = Utc::now();
        let product = Product {
            id,
            name: data.name,
            description: data.description,
            price: data.price,
            category: data.category,
            image_url: data.image_url,
            attributes: data.attributes,
            created_at: now,
            updated_at: now,
        };
        inner.products.insert(id, product.clone());
        Ok(product)
    }

    /// Aplica un parche parcial. Devuelve `None` si el producto no existe.
    pub fn update_product(&self, id: i64, patch: ProductPatch) -> Result<Option<Product>> {
        if let Some(price) = patch.price {
            if price < 0.0 {
                return Err(anyhow!("El precio no puede ser negativo"));
            }
        }

        let mut inner = self.write()?;
        let Some(product) = inner.products.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            product.name = name;
        }
        if let Some(description) = patch.description {
            product.description = description;
        }
        if let Some(price) = patch.price {
            product.price = price;
        }
        if let Some(category) = patch.category {
            product.category = category;
        }
        if let Some(image_url) = patch.image_url {
            product.image_url = Some(image_url);
        }
        if let Some(attributes) = patch.attributes {
            product.attributes = attributes;
        }
        product.updated_at = Utc::now();
        Ok(Some(product.clone()))
    }

    /// Elimina un producto y lo devuelve, o `None` si no existía.
    pub fn delete_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.write()?.products.remove(&id))
    }

    pub fn find_by_category(&self, category: &str) -> Result<Vec<Product>> {
        let wanted = category.to_lowercase();
        let mut products: Vec<Product> = self
            .read()?
            .products
            .values()
            .filter(|p| p.category.to_lowercase() == wanted)
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(products)
    }

    /// Búsqueda simple por subcadena sobre nombre y descripción.
    pub fn text_search(&self, term: &str) -> Result<Vec<Product>> {
        let needle = term.to_lowercase();
        let mut products: Vec<Product> = self
            .read()?
            .products
            .values()
            .filter(|p| {
                p.name.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(products)
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("El almacén de productos está envenenado"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("El almacén de productos está envenenado"))
    }
}

impl Default for ProductStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_query_filter(product: &Product, filter: &ProductQueryFilter) -> bool {
    if let Some(category) = &filter.category {
        if product.category.to_lowercase() != category.to_lowercase() {
            return false;
        }
    }
    if let Some(min) = filter.min_price {
        if product.price < min {
            return false;
        }
    }
    if let Some(max) = filter.max_price {
        if product.price > max {
            return false;
        }
    }
    if let Some(brand) = &filter.brand {
        match product.brand() {
            Some(b) if b.to_lowercase() == brand.to_lowercase() => {}
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_product(name: &str, price: f64, category: &str, brand: &str) -> NewProduct {
        let mut attributes = serde_json::Map::new();
        attributes.insert("brand".into(), json!(brand));
        NewProduct {
            name: name.to_string(),
            description: format!("Descripción de {name}"),
            price,
            category: category.to_string(),
            image_url: None,
            attributes,
        }
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let store = ProductStore::new();
        let a = store.create_product(new_product("Teclado", 50.0, "Electronics", "Logi")).unwrap();
        let b = store.create_product(new_product("Ratón", 25.0, "Electronics", "Logi")).unwrap();
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(store.get_product_by_id(2).unwrap().unwrap().name, "Ratón");
    }

    #[test]
    fn create_rejects_invalid_data() {
        let store = ProductStore::new();
        assert!(store.create_product(new_product("", 10.0, "X", "B")).is_err());
        assert!(store.create_product(new_product("Algo", -1.0, "X", "B")).is_err());
    }

    #[test]
    fn list_filters_by_category_price_and_brand() {
        let store = ProductStore::new();
        store.create_product(new_product("Portátil", 1200.0, "Electronics", "Apple")).unwrap();
        store.create_product(new_product("Auriculares", 300.0, "Electronics", "Sony")).unwrap();
        store.create_product(new_product("Zapatillas", 120.0, "Footwear", "Nike")).unwrap();

        let filter = ProductQueryFilter {
            category: Some("electronics".into()),
            min_price: Some(200.0),
            max_price: Some(500.0),
            brand: Some("sony".into()),
        };
        let found = store.list_products(Some(&filter)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Auriculares");
    }

    #[test]
    fn update_and_delete_round_trip() {
        let store = ProductStore::new();
        let created = store.create_product(new_product("Silla", 80.0, "Home", "Ikea")).unwrap();

        let patch = ProductPatch { price: Some(60.0), ..Default::default() };
        let updated = store.update_product(created.id, patch).unwrap().unwrap();
        assert_eq!(updated.price, 60.0);
        assert_eq!(updated.name, "Silla");

        let deleted = store.delete_product(created.id).unwrap().unwrap();
        assert_eq!(deleted.id, created.id);
        assert!(store.get_product_by_id(created.id).unwrap().is_none());
        assert!(store.delete_product(created.id).unwrap().is_none());
    }

    #[test]
    fn text_search_matches_name_and_description() {
        let store = ProductStore::new();
        store.create_product(new_product("Cafetera", 45.0, "Home", "Moka")).unwrap();
        store.create_product(new_product("Hervidor", 30.0, "Home", "Bosch")).unwrap();

        assert_eq!(store.text_search("cafe").unwrap().len(), 1);
        assert_eq!(store.text_search("descripción").unwrap().len(), 2);
        assert!(store.text_search("nevera").unwrap().is_empty());
    }
}
