//! Output formatting for mirrored data and sync reports.
//!
//! Listings render as tables or JSON; reports render as colored summaries.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};
use serde::Serialize;

use crate::domain::{
    Client, DownReport, Family, FullSyncReport, Ingredient, MirrorTable, Order, OrderStatusKind,
    QuoteWithItems, SkipReason, UnitOfMeasure, UpReport,
};

/// Output format options.
#[derive(Debug, Clone, Copy, Default)]
pub enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// JSON for programmatic use.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {s}. Use: table, json")),
        }
    }
}

/// Formats any serializable listing as pretty JSON.
///
/// # Errors
/// Returns error if serialization fails.
pub fn format_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(header);
    table
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn money(amount: f64) -> String {
    format!("{amount:.2}")
}

pub fn format_clients_table(clients: &[Client]) -> String {
    let mut table = new_table(vec!["ID", "Name", "Phone", "Instagram"]);

    for client in clients {
        table.add_row(vec![
            short_id(&client.id).to_string(),
            truncate(&client.full_name(), 30),
            client.phone.clone().unwrap_or_else(|| "-".to_string()),
            client.instagram.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }

    table.to_string()
}

pub fn format_quotes_table(quotes: &[QuoteWithItems]) -> String {
    let mut table = new_table(vec!["ID", "Created", "Name", "Lines", "Total"]);

    for q in quotes {
        table.add_row(vec![
            short_id(&q.quote.id).to_string(),
            q.quote.created_at.format("%Y-%m-%d %H:%M").to_string(),
            q.quote
                .name
                .as_deref()
                .map_or_else(|| "-".to_string(), |n| truncate(n, 30)),
            q.line_items.len().to_string(),
            money(q.quote.total),
        ]);
    }

    table.to_string()
}

fn status_label(order: &Order) -> String {
    match order.status_kind() {
        Some(OrderStatusKind::Pending) => "pending".yellow().to_string(),
        Some(OrderStatusKind::Delivered) => "delivered".green().to_string(),
        Some(OrderStatusKind::Cancelled) => "cancelled".red().to_string(),
        None => order
            .status_name
            .clone()
            .unwrap_or_else(|| "-".to_string()),
    }
}

/// Orders with their status and whether they can still be edited at `now`.
pub fn format_orders_table(orders: &[Order], now: DateTime<Utc>) -> String {
    let mut table = new_table(vec!["ID", "Delivery", "Client", "Status", "Price", "Editable"]);

    for order in orders {
        let editable = if order.is_editable(now) { "yes" } else { "no" };
        table.add_row(vec![
            short_id(&order.id).to_string(),
            order.delivery_date.format("%Y-%m-%d %H:%M").to_string(),
            truncate(&order.client_display_name(), 25),
            status_label(order),
            money(order.price),
            editable.to_string(),
        ]);
    }

    table.to_string()
}

pub fn format_ingredients_table(ingredients: &[Ingredient]) -> String {
    let mut table = new_table(vec!["ID", "Name", "Price", "Per"]);

    for i in ingredients {
        let unit = i.unit_name.as_deref().unwrap_or(&i.unit_id);
        table.add_row(vec![
            short_id(&i.id).to_string(),
            truncate(&i.name, 30),
            money(i.price),
            format!("{} {unit}", i.base_quantity),
        ]);
    }

    table.to_string()
}

pub fn format_units_table(units: &[UnitOfMeasure]) -> String {
    let mut table = new_table(vec!["ID", "Name"]);
    for u in units {
        table.add_row(vec![short_id(&u.id), u.name.as_str()]);
    }
    table.to_string()
}

/// One-line notice for a skipped sync.
pub fn format_skip(operation: &str, reason: &SkipReason) -> String {
    format!("{} {operation} skipped: {reason}", "⏸".yellow())
}

pub fn format_up_report(report: &UpReport) -> String {
    let mut out = format!(
        "{} Sync-Up: {} applied, {} failed",
        if report.failed() == 0 {
            "✓".green().bold()
        } else {
            "⚠".yellow().bold()
        },
        report.applied().to_string().cyan(),
        report.failed().to_string().red()
    );

    for (family, r) in &report.families {
        if r.applied > 0 || r.failed > 0 {
            out.push_str(&format!(
                "\n  {family}: {} applied, {} failed",
                r.applied, r.failed
            ));
        }
    }
    out
}

pub fn format_down_report(report: &DownReport) -> String {
    let mut out = format!(
        "{} Sync-Down: {} rows",
        "✓".green().bold(),
        report.total_rows().to_string().cyan()
    );
    for (table, rows) in &report.rows {
        out.push_str(&format!("\n  {table}: {rows}"));
    }
    out
}

pub fn format_full_report(report: &FullSyncReport) -> String {
    if let Some(reason) = &report.skipped {
        return format_skip("Full sync", reason);
    }

    let mut parts = Vec::new();
    if let Some(up) = &report.up {
        parts.push(format_up_report(up));
    }
    if let Some(down) = &report.down {
        parts.push(format_down_report(down));
    }
    for error in &report.errors {
        parts.push(format!("{} {error}", "✗".red().bold()));
    }
    parts.join("\n")
}

/// Snapshot of local state for the `status` command.
#[derive(Debug, Clone)]
pub struct StatusSummary {
    pub db_path: PathBuf,
    pub store_active: bool,
    pub online: bool,
    pub remote_url: String,
    pub credential: Option<String>,
    pub outbox: Vec<(Family, usize)>,
    pub mirror: Vec<(MirrorTable, usize)>,
}

pub fn format_status(status: &StatusSummary) -> String {
    let mut out = format!("{}\n", "📊 Sync Status".bold());

    let store = if status.store_active {
        "active".green()
    } else {
        "inactive".red()
    };
    out.push_str(&format!(
        "  Local store: {store} ({})\n",
        status.db_path.display()
    ));

    let network = if status.online {
        "online".green()
    } else {
        "offline".yellow()
    };
    out.push_str(&format!("  Remote: {network} ({})\n", status.remote_url));

    out.push_str(&format!(
        "  Signed in: {}\n",
        status.credential.as_deref().unwrap_or("-")
    ));

    let pending: usize = status.outbox.iter().map(|(_, n)| n).sum();
    let pending_label = if pending == 0 {
        "0".green()
    } else {
        pending.to_string().yellow()
    };
    out.push_str(&format!("  Pending outbox entries: {pending_label}\n"));
    for (family, n) in &status.outbox {
        out.push_str(&format!("    {family}: {n}\n"));
    }

    out.push_str("  Mirror rows:\n");
    for (table, n) in &status.mirror {
        out.push_str(&format!("    {table}: {}\n", n.to_string().cyan()));
    }

    out
}

/// Truncates a string to max characters with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.lines().next().unwrap_or(s);
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FamilyReport;
    use crate::testing::{client, order, ts};

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world!", 8), "hello...");
        assert_eq!(truncate("añoñoño", 5), "añ...");
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!(
            "table".parse::<OutputFormat>(),
            Ok(OutputFormat::Table)
        ));
        assert!(matches!(
            "JSON".parse::<OutputFormat>(),
            Ok(OutputFormat::Json)
        ));
        assert!("markdown".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_orders_table_marks_editability() {
        colored::control::set_override(false);
        let now = ts(2030, 1, 1);
        let out = format_orders_table(
            &[
                order("order-far-away", "c-1", ts(2030, 1, 10)),
                order("order-tomorrow", "c-1", ts(2030, 1, 1) + chrono::Duration::hours(3)),
            ],
            now,
        );
        assert!(out.contains("order-fa"));
        assert!(out.contains("yes"));
        assert!(out.contains("no"));
    }

    #[test]
    fn test_clients_table_shows_names() {
        let out = format_clients_table(&[client("c-1", "Ana")]);
        assert!(out.contains("Ana"));
        assert!(out.contains("c-1"));
    }

    #[test]
    fn test_up_report_lists_active_families() {
        colored::control::set_override(false);
        let mut report = UpReport::default();
        report.record(
            Family::Orders,
            FamilyReport {
                applied: 1,
                failed: 2,
            },
        );
        report.record(Family::Clients, FamilyReport::default());

        let out = format_up_report(&report);
        assert!(out.contains("orders: 1 applied, 2 failed"));
        assert!(!out.contains("clients:"));
    }

    #[test]
    fn test_skipped_full_report() {
        colored::control::set_override(false);
        let out = format_full_report(&FullSyncReport::skipped(SkipReason::Offline));
        assert!(out.contains("Full sync skipped: offline"));
    }
}
