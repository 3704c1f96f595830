//! Read-only product lookup used to render cart lines.
//!
//! Orders never read prices from here; the checkout amount is whatever the
//! client submits. The catalog only decorates cart output.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::errors::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    pub price: Decimal,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn product(&self, product_id: i32) -> Result<Option<CatalogProduct>, ServiceError>;
}

/// In-memory catalog, optionally loaded from a JSON array of products.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    products: HashMap<i32, CatalogProduct>,
}

impl StaticCatalog {
    pub fn new(products: impl IntoIterator<Item = CatalogProduct>) -> Self {
        Self {
            products: products.into_iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServiceError::InternalError(format!(
                "Failed to read catalog file {}: {}",
                path.display(),
                e
            ))
        })?;
        let products: Vec<CatalogProduct> = serde_json::from_str(&raw)?;
        info!(count = products.len(), path = %path.display(), "Loaded product catalog");
        Ok(Self::new(products))
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn product(&self, product_id: i32) -> Result<Option<CatalogProduct>, ServiceError> {
        Ok(self.products.get(&product_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[tokio::test]
    async fn loads_products_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 3, "name": "Kettle", "price": "12.50"}}, {{"id": 7, "name": "Mug", "image": "mug.png", "price": "4"}}]"#
        )
        .unwrap();

        let catalog = StaticCatalog::from_json_file(file.path()).unwrap();
        assert_eq!(catalog.len(), 2);

        let kettle = catalog.product(3).await.unwrap().unwrap();
        assert_eq!(kettle.price, dec!(12.50));
        assert!(kettle.image.is_none());
        assert!(catalog.product(4).await.unwrap().is_none());
    }

    #[test]
    fn malformed_catalog_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(StaticCatalog::from_json_file(file.path()).is_err());
    }
}
