//! Catalog commands

use anyhow::Result;

use shopguard_common::Product;

use crate::client::ApiClient;
use crate::output::{print_list, OutputFormat, TableDisplay};

impl TableDisplay for Product {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Category", "Priority", "URL"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.category.clone().unwrap_or_else(|| "-".to_string()),
            self.priority.clone().unwrap_or_else(|| "-".to_string()),
            self.url.clone(),
        ]
    }
}

/// Catalog products, optionally narrowed to one category
pub fn filter(products: Vec<Product>, category: Option<&str>) -> Vec<Product> {
    match category {
        Some(category) => products
            .into_iter()
            .filter(|p| p.category.as_deref() == Some(category))
            .collect(),
        None => products,
    }
}

pub async fn list(client: &ApiClient, category: Option<String>, format: OutputFormat) -> Result<()> {
    let catalog = client.products().await?;
    let products = filter(catalog.products, category.as_deref());
    print_list(&products, format);
    Ok(())
}
