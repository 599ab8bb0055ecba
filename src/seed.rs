//! Catálogo de ejemplo que se carga al arrancar cuando el almacén está vacío.

use anyhow::Result;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::models::NewProduct;
use crate::product_store::ProductStore;

fn attributes(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Inserta el catálogo de muestra. Devuelve el número de productos creados.
pub fn seed_catalog(store: &ProductStore) -> Result<usize> {
    let samples = vec![
        NewProduct {
            name: "Apple iPhone 15 Pro".into(),
            description: "The latest iPhone with titanium design, A17 Pro chip, and advanced camera system.".into(),
            price: 999.99,
            category: "Electronics".into(),
            image_url: None,
            attributes: attributes(&[
                ("brand", json!("Apple")),
                ("color", json!("Natural Titanium")),
                ("storage", json!("128GB")),
                ("screen", json!("6.1 inch")),
                ("camera", json!("48MP")),
            ]),
        },
        NewProduct {
            name: "Nike Air Jordan 1 High".into(),
            description: "Classic basketball sneakers with premium leather construction and iconic design.".into(),
            price: 170.00,
            category: "Footwear".into(),
            image_url: None,
            attributes: attributes(&[
                ("brand", json!("Nike")),
                ("color", json!("Black/Red/White")),
                ("material", json!("Leather")),
                ("type", json!("High Top")),
                ("sport", json!("Basketball")),
            ]),
        },
        NewProduct {
            name: "MacBook Pro 14-inch".into(),
            description: "Professional laptop with M3 chip, stunning Liquid Retina XDR display, and all-day battery life.".into(),
            price: 1999.99,
            category: "Electronics".into(),
            image_url: None,
            attributes: attributes(&[
                ("brand", json!("Apple")),
                ("processor", json!("M3")),
                ("memory", json!("16GB")),
                ("storage", json!("512GB SSD")),
                ("color", json!("Space Gray")),
            ]),
        },
        NewProduct {
            name: "Levi's 501 Original Jeans".into(),
            description: "The original blue jean since 1873. Classic straight fit with authentic details.".into(),
            price: 89.99,
            category: "Clothing".into(),
            image_url: None,
            attributes: attributes(&[
                ("brand", json!("Levi's")),
                ("fit", json!("Straight")),
                ("material", json!("100% Cotton")),
                ("color", json!("Medium Wash Blue")),
                ("style", json!("Classic")),
            ]),
        },
        NewProduct {
            name: "Sony WH-1000XM5 Headphones".into(),
            description: "Premium noise-canceling wireless headphones with exceptional sound quality.".into(),
            price: 399.99,
            category: "Electronics".into(),
            image_url: None,
            attributes: attributes(&[
                ("brand", json!("Sony")),
                ("type", json!("Over-ear")),
                ("wireless", json!(true)),
                ("noiseCanceling", json!(true)),
                ("batteryLife", json!("30 hours")),
                ("color", json!("Black")),
            ]),
        },
        NewProduct {
            name: "Stanley Adventure Quencher Tumbler".into(),
            description: "Insulated stainless steel tumbler that keeps drinks cold for 11+ hours and hot for 7+ hours.".into(),
            price: 44.95,
            category: "Home & Kitchen".into(),
            image_url: None,
            attributes: attributes(&[
                ("brand", json!("Stanley")),
                ("capacity", json!("40oz")),
                ("material", json!("Stainless Steel")),
                ("color", json!("Charcoal")),
                ("features", json!(["Leak Proof", "Dishwasher Safe"])),
            ]),
        },
        NewProduct {
            name: "Adidas Ultraboost 23 Running Shoes".into(),
            description: "High-performance running shoes with responsive Boost midsole and Primeknit upper.".into(),
            price: 189.99,
            category: "Footwear".into(),
            image_url: None,
            attributes: attributes(&[
                ("brand", json!("Adidas")),
                ("type", json!("Running")),
                ("material", json!("Primeknit")),
                ("color", json!("Triple Black")),
                ("technology", json!("Boost")),
            ]),
        },
        NewProduct {
            name: "Nintendo Switch OLED Console".into(),
            description: "Gaming console with vibrant 7-inch OLED screen, enhanced audio, and wide adjustable stand.".into(),
            price: 349.99,
            category: "Electronics".into(),
            image_url: None,
            attributes: attributes(&[
                ("brand", json!("Nintendo")),
                ("display", json!("7-inch OLED")),
                ("storage", json!("64GB")),
                ("color", json!("White")),
                ("type", json!("Handheld Console")),
            ]),
        },
    ];

    let total = samples.len();
    for sample in samples {
        store.create_product(sample)?;
    }
    info!("Catálogo de muestra cargado: {total} productos.");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_a_non_empty_catalog() {
        let store = ProductStore::new();
        let created = seed_catalog(&store).unwrap();
        assert!(created >= 8);
        assert_eq!(store.list_products(None).unwrap().len(), created);
    }
}
