//! Application layer - use cases and orchestration.
//!
//! This layer contains the sync engine, the domain services that switch
//! between remote and local data, and output formatting.

pub mod formatter;
pub mod services;
pub mod sync_engine;

pub use formatter::{
    format_clients_table, format_down_report, format_full_report, format_ingredients_table,
    format_json, format_orders_table, format_quotes_table, format_skip, format_status,
    format_units_table, format_up_report, OutputFormat, StatusSummary,
};
pub use services::{CatalogService, ClientService, DataSourceSelector, OrderService, QuoteService};
pub use sync_engine::SyncEngine;
