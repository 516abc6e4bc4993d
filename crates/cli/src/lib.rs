//! ShopGuard CLI
//!
//! Command-line client for the ShopGuard daemon: submit test runs, follow
//! their progress, and browse tasks, products and reports.

pub mod client;
pub mod commands;
pub mod output;
