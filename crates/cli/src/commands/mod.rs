//! CLI Commands

pub mod products;
pub mod reports;
pub mod tests;
