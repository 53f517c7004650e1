//! CLI interface using clap.
//!
//! Provides command-line arguments and subcommands for the tool.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};

use crate::application::OutputFormat;
use crate::domain::LineItemDraft;

/// Sippa - offline-first sync for orders, quotes and ingredients.
///
/// Works against the hosted backend when online and against the local mirror
/// when offline; queued changes are pushed when the connection comes back.
#[derive(Parser, Debug)]
#[command(name = "sippa")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (use multiple times for more verbosity).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output format for listings: table or json.
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,

    /// Treat the network as unavailable: read the mirror, queue every write.
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directory, default config and local database.
    Init {
        /// Remote backend URL to store in the config.
        #[arg(long)]
        url: Option<String>,
    },

    /// Show store, connectivity and outbox status.
    Status,

    /// Synchronize with the remote store (Sync-Up then Sync-Down by default).
    Sync {
        /// Only push pending outbox entries.
        #[arg(long, conflicts_with = "down")]
        up: bool,

        /// Only refresh the local mirror (requires an empty outbox).
        #[arg(long)]
        down: bool,
    },

    /// Stay running: probe connectivity and push queued changes on reconnect.
    Watch,

    /// Sign in and download a fresh copy of the data.
    Login {
        /// Account email.
        #[arg(short, long)]
        email: String,
    },

    /// Forget the offline sign-in.
    Logout,

    /// Manage clients.
    #[command(subcommand)]
    Clients(ClientCommand),

    /// Manage quotes.
    #[command(subcommand)]
    Quotes(QuoteCommand),

    /// Manage orders.
    #[command(subcommand)]
    Orders(OrderCommand),

    /// List and manage ingredients.
    #[command(subcommand)]
    Ingredients(IngredientCommand),

    /// List units of measure.
    Units,
}

#[derive(Args, Debug, Default)]
pub struct ClientFields {
    /// Last name.
    #[arg(long)]
    pub last_name: Option<String>,

    /// Phone number.
    #[arg(long)]
    pub phone: Option<String>,

    /// Instagram handle.
    #[arg(long)]
    pub instagram: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// List clients.
    List,

    /// Add a client.
    Add {
        /// First name.
        first_name: String,

        #[command(flatten)]
        fields: ClientFields,
    },

    /// Change a client's details.
    Update {
        /// Client ID.
        id: String,

        /// New first name.
        #[arg(long)]
        first_name: Option<String>,

        #[command(flatten)]
        fields: ClientFields,
    },

    /// Remove a client.
    Remove {
        /// Client ID.
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum QuoteCommand {
    /// List quotes.
    List,

    /// Add a quote.
    Add {
        /// Quote name.
        #[arg(short, long)]
        name: Option<String>,

        /// Line item as INGREDIENT_ID:QUANTITY:UNIT_PRICE (repeatable).
        #[arg(short, long = "item", value_parser = parse_line_item, required = true)]
        items: Vec<LineItemDraft>,

        /// Quote total (defaults to the sum of the lines).
        #[arg(short, long)]
        total: Option<f64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum OrderCommand {
    /// List orders by delivery date.
    List,

    /// Add an order for an existing or a new client.
    Add {
        /// Existing client ID.
        #[arg(long, conflicts_with = "new_client", required_unless_present = "new_client")]
        client: Option<String>,

        /// First name of a client to create with the order.
        #[arg(long)]
        new_client: Option<String>,

        /// Quote the order is based on.
        #[arg(long)]
        quote: Option<String>,

        /// Delivery time: RFC 3339 or "YYYY-MM-DD HH:MM" local time.
        #[arg(long, value_parser = parse_datetime)]
        delivery: DateTime<Utc>,

        /// Agreed price.
        #[arg(long)]
        price: f64,
    },

    /// Change delivery time or price of an editable order.
    Update {
        /// Order ID.
        id: String,

        /// New delivery time.
        #[arg(long, value_parser = parse_datetime)]
        delivery: Option<DateTime<Utc>>,

        /// New price.
        #[arg(long)]
        price: Option<f64>,
    },

    /// Mark an order as cancelled.
    Cancel {
        /// Order ID.
        id: String,
    },

    /// Mark an order as delivered.
    Deliver {
        /// Order ID.
        id: String,
    },

    /// Move an order back to pending.
    Reactivate {
        /// Order ID.
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum IngredientCommand {
    /// List ingredients.
    List {
        /// Only ingredients whose name contains this text.
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Add an ingredient (needs a connection).
    Add {
        /// Ingredient name.
        name: String,

        /// Price of the base quantity.
        #[arg(long)]
        price: f64,

        /// Unit of measure ID.
        #[arg(long)]
        unit: String,

        /// Quantity the price refers to, in the unit.
        #[arg(long, default_value_t = 1)]
        base_quantity: i64,
    },

    /// Change an ingredient (needs a connection).
    Update {
        /// Ingredient ID.
        id: String,

        /// New name.
        #[arg(long)]
        name: Option<String>,

        /// New price.
        #[arg(long)]
        price: Option<f64>,

        /// New unit of measure ID.
        #[arg(long)]
        unit: Option<String>,

        /// New base quantity.
        #[arg(long)]
        base_quantity: Option<i64>,
    },

    /// Hide an ingredient from listings (needs a connection).
    Remove {
        /// Ingredient ID.
        id: String,
    },

    /// Bring back a removed ingredient (needs a connection).
    Restore {
        /// Ingredient ID.
        id: String,
    },
}

impl Cli {
    /// Parse the output format argument.
    pub fn output_format(&self) -> Result<OutputFormat, String> {
        self.format.parse()
    }
}

/// Parse `INGREDIENT_ID:QUANTITY:UNIT_PRICE`.
fn parse_line_item(s: &str) -> Result<LineItemDraft, String> {
    let mut parts = s.split(':');
    let (Some(id), Some(qty), Some(price), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("Expected INGREDIENT_ID:QUANTITY:UNIT_PRICE, got {s}"));
    };
    if id.is_empty() {
        return Err("Ingredient ID is empty".to_string());
    }

    Ok(LineItemDraft {
        ingredient_id: id.to_string(),
        quantity_used: qty
            .parse()
            .map_err(|_| format!("Invalid quantity: {qty}"))?,
        unit_price: price
            .parse()
            .map_err(|_| format!("Invalid unit price: {price}"))?,
    })
}

/// Parse RFC 3339, or a local `YYYY-MM-DD HH:MM`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M")
        .map_err(|_| format!("Invalid date: {s}. Use RFC 3339 or YYYY-MM-DD HH:MM"))?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| format!("Ambiguous local time: {s}"))
}
