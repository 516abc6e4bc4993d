//! Product catalog and scope selection
//!
//! The catalog is produced by an external discovery job and stored as JSON.
//! This module only reads it and turns a [`TestScope`] into an ordered
//! product list.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::TestScope;

/// Default cap for category / all selections
pub const DEFAULT_LIMIT: usize = 20;

/// Page-specific selectors recorded by catalog discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSelectors {
    #[serde(default)]
    pub product_title: Option<String>,
    #[serde(default)]
    pub add_to_cart_button: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub selectors: ProductSelectors,
}

impl Product {
    /// Variant anchors (`product#variant`) are not standalone pages
    pub fn is_variant_anchor(&self) -> bool {
        self.id.contains('#')
    }
}

/// Outcome of resolving a scope
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub products: Vec<Product>,
    /// Ids requested explicitly but absent from the catalog
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub products: Vec<Product>,
}

impl Catalog {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Catalog(format!("cannot read {}: {}", path.display(), e))
        })?;
        let catalog: Catalog = serde_json::from_str(&content)?;
        debug!("Loaded {} products from {:?}", catalog.products.len(), path);
        Ok(catalog)
    }

    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Distinct categories in first-seen order
    pub fn categories(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.products
            .iter()
            .filter_map(|p| p.category.clone())
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }

    /// Resolve a scope to an ordered product list.
    pub fn select(&self, scope: &TestScope, limit: Option<usize>) -> Result<Selection> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT);

        match scope {
            TestScope::Product { product_id } => {
                let product = self
                    .get(product_id)
                    .ok_or_else(|| Error::not_found("product", product_id.clone()))?;
                Ok(Selection {
                    products: vec![product.clone()],
                    missing: Vec::new(),
                })
            }
            TestScope::Products { product_ids } => {
                let mut selection = Selection::default();
                let mut seen = HashSet::new();
                for id in product_ids {
                    if !seen.insert(id.as_str()) {
                        debug!("Product {} listed more than once, testing it once", id);
                        continue;
                    }
                    match self.get(id) {
                        Some(product) => selection.products.push(product.clone()),
                        None => {
                            warn!("Product {} not in catalog, skipping", id);
                            selection.missing.push(id.clone());
                        }
                    }
                }
                Ok(selection)
            }
            TestScope::Category { category } => {
                let wanted = category.to_lowercase();
                let products = self
                    .candidates()
                    .filter(|p| {
                        p.category
                            .as_deref()
                            .map(|c| c.to_lowercase() == wanted)
                            .unwrap_or(false)
                    })
                    .take(limit)
                    .cloned()
                    .collect();
                Ok(Selection {
                    products,
                    missing: Vec::new(),
                })
            }
            TestScope::All => Ok(Selection {
                products: self.spread_across_categories(limit),
                missing: Vec::new(),
            }),
        }
    }

    fn candidates(&self) -> impl Iterator<Item = &Product> {
        self.products.iter().filter(|p| !p.is_variant_anchor())
    }

    /// Round-robin one product per category first, then fill in catalog order.
    fn spread_across_categories(&self, limit: usize) -> Vec<Product> {
        let mut buckets: BTreeMap<usize, Vec<&Product>> = BTreeMap::new();
        let mut order: Vec<Option<String>> = Vec::new();
        for product in self.candidates() {
            let slot = match order.iter().position(|c| *c == product.category) {
                Some(slot) => slot,
                None => {
                    order.push(product.category.clone());
                    order.len() - 1
                }
            };
            buckets.entry(slot).or_default().push(product);
        }

        let mut picked: Vec<Product> = Vec::new();
        let mut taken: HashSet<&str> = HashSet::new();
        for bucket in buckets.values() {
            if picked.len() >= limit {
                break;
            }
            if let Some(first) = bucket.first() {
                taken.insert(first.id.as_str());
                picked.push((*first).clone());
            }
        }
        for product in self.candidates() {
            if picked.len() >= limit {
                break;
            }
            if taken.insert(product.id.as_str()) {
                picked.push(product.clone());
            }
        }
        picked
    }
}
