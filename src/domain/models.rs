//! Domain models for the mirrored business tables.
//!
//! Foreign keys are carried as opaque identifier strings. The remote store owns
//! referential integrity; the local mirror never enforces it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: String,
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub instagram: Option<String>,
    /// Soft-delete marker set by the remote store.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Client {
    /// Full display name.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

/// Client fields entered before an identifier exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NewClient {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub instagram: Option<String>,
}

impl NewClient {
    /// Attach an identifier.
    #[must_use]
    pub fn with_id(self, id: impl Into<String>) -> Client {
        Client {
            id: id.into(),
            first_name: self.first_name,
            last_name: self.last_name,
            phone: self.phone,
            instagram: self.instagram,
            deleted_at: None,
        }
    }
}

/// Unit of measure reference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOfMeasure {
    pub id: String,
    pub name: String,
}

/// An ingredient with its price per base quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub unit_id: String,
    #[serde(default)]
    pub base_quantity: i64,
    #[serde(default)]
    pub is_deleted: bool,
    /// Joined unit name, only populated on local reads.
    #[serde(default, skip_serializing)]
    pub unit_name: Option<String>,
}

/// Ingredient fields entered before an identifier exists.
#[derive(Debug, Clone, PartialEq)]
pub struct IngredientDraft {
    pub name: String,
    pub price: f64,
    pub unit_id: String,
    pub base_quantity: i64,
}

impl IngredientDraft {
    #[must_use]
    pub fn with_id(self, id: impl Into<String>) -> Ingredient {
        Ingredient {
            id: id.into(),
            name: self.name,
            price: self.price,
            unit_id: self.unit_id,
            base_quantity: self.base_quantity,
            is_deleted: false,
            unit_name: None,
        }
    }
}

/// Partial update of an ingredient; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngredientUpdate {
    pub name: Option<String>,
    pub price: Option<f64>,
    pub unit_id: Option<String>,
    pub base_quantity: Option<i64>,
}

impl IngredientUpdate {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.price.is_none()
            && self.unit_id.is_none()
            && self.base_quantity.is_none()
    }

    /// Apply the set fields on top of `current`.
    #[must_use]
    pub fn apply(self, mut current: Ingredient) -> Ingredient {
        if let Some(name) = self.name {
            current.name = name;
        }
        if let Some(price) = self.price {
            current.price = price;
        }
        if let Some(unit_id) = self.unit_id {
            current.unit_id = unit_id;
        }
        if let Some(base_quantity) = self.base_quantity {
            current.base_quantity = base_quantity;
        }
        current.unit_name = None;
        current
    }
}

/// Order status reference row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub id: String,
    pub name: String,
}

/// The status transitions an order can go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatusKind {
    Pending,
    Cancelled,
    Delivered,
}

impl OrderStatusKind {
    /// Name of the status row in the remote `order_statuses` table.
    #[must_use]
    pub const fn remote_name(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Cancelled => "CANCELLED",
            Self::Delivered => "DELIVERED",
        }
    }

    /// Parse a status name, ignoring case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "CANCELLED" => Some(Self::Cancelled),
            "DELIVERED" => Some(Self::Delivered),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.remote_name().to_lowercase())
    }
}

/// Quote header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub total: f64,
    pub created_at: DateTime<Utc>,
}

/// One ingredient line of a quote, priced at quote time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteLineItem {
    pub quote_id: String,
    pub ingredient_id: String,
    pub quantity_used: f64,
    pub unit_price: f64,
}

/// A quote together with its line items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteWithItems {
    #[serde(flatten)]
    pub quote: Quote,
    #[serde(default, rename = "quote_line_items")]
    pub line_items: Vec<QuoteLineItem>,
}

/// Quote line entered before the quote has an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemDraft {
    pub ingredient_id: String,
    pub quantity_used: f64,
    pub unit_price: f64,
}

/// Quote fields entered before an identifier exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteDraft {
    pub name: Option<String>,
    pub total: f64,
    pub line_items: Vec<LineItemDraft>,
}

impl QuoteDraft {
    /// Attach an identifier and creation time, stamping it on every line.
    #[must_use]
    pub fn with_id(self, id: impl Into<String>, created_at: DateTime<Utc>) -> QuoteWithItems {
        let id = id.into();
        let line_items = self
            .line_items
            .into_iter()
            .map(|line| QuoteLineItem {
                quote_id: id.clone(),
                ingredient_id: line.ingredient_id,
                quantity_used: line.quantity_used,
                unit_price: line.unit_price,
            })
            .collect();

        QuoteWithItems {
            quote: Quote {
                id,
                name: self.name,
                total: self.total,
                created_at,
            },
            line_items,
        }
    }
}

/// An order row, denormalized with its status and client names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub quote_id: Option<String>,
    pub status_id: String,
    pub price: f64,
    pub delivery_date: DateTime<Utc>,
    #[serde(default)]
    pub status_name: Option<String>,
    #[serde(default)]
    pub client_first_name: Option<String>,
    #[serde(default)]
    pub client_last_name: Option<String>,
}

impl Order {
    /// Hours of notice required before delivery for an order to be editable.
    pub const EDIT_WINDOW_HOURS: i64 = 24;

    /// Parsed status, if the denormalized name is known.
    #[must_use]
    pub fn status_kind(&self) -> Option<OrderStatusKind> {
        self.status_name.as_deref().and_then(OrderStatusKind::from_name)
    }

    /// Client name for display.
    #[must_use]
    pub fn client_display_name(&self) -> String {
        let first = self.client_first_name.as_deref().unwrap_or_default();
        let last = self.client_last_name.as_deref().unwrap_or_default();
        let name = format!("{first} {last}").trim().to_string();
        if name.is_empty() {
            self.client_id.clone()
        } else {
            name
        }
    }

    /// Whether the order can still be edited at `now`.
    ///
    /// Delivered and cancelled orders are frozen, and so is anything due within
    /// the next [`Self::EDIT_WINDOW_HOURS`].
    #[must_use]
    pub fn is_editable(&self, now: DateTime<Utc>) -> bool {
        if matches!(
            self.status_kind(),
            Some(OrderStatusKind::Delivered | OrderStatusKind::Cancelled)
        ) {
            return false;
        }
        self.delivery_date - now > Duration::hours(Self::EDIT_WINDOW_HOURS)
    }
}

/// Who an order is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderClient {
    Existing(String),
    New(NewClient),
}

/// Order fields entered before an identifier exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub client: OrderClient,
    pub quote_id: Option<String>,
    pub delivery_date: DateTime<Utc>,
    pub price: f64,
}

/// A new order as sent upstream. Carries its own identifier, and the new
/// client inline when one has to be created, so replay is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub new_client: Option<Client>,
    #[serde(default)]
    pub quote_id: Option<String>,
    pub delivery_date: DateTime<Utc>,
    pub price: f64,
}

/// Partial update of an order's editable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    #[serde(default)]
    pub delivery_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// The seven mirrored tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorTable {
    Clients,
    UnitsOfMeasure,
    Ingredients,
    OrderStatuses,
    Quotes,
    QuoteLineItems,
    Orders,
}

impl MirrorTable {
    /// All mirrored tables, reference tables first.
    pub const ALL: [Self; 7] = [
        Self::UnitsOfMeasure,
        Self::Ingredients,
        Self::OrderStatuses,
        Self::Clients,
        Self::Quotes,
        Self::QuoteLineItems,
        Self::Orders,
    ];

    /// SQL table name.
    #[must_use]
    pub const fn table_name(self) -> &'static str {
        match self {
            Self::Clients => "clients",
            Self::UnitsOfMeasure => "units_of_measure",
            Self::Ingredients => "ingredients",
            Self::OrderStatuses => "order_statuses",
            Self::Quotes => "quotes",
            Self::QuoteLineItems => "quote_line_items",
            Self::Orders => "orders",
        }
    }
}

impl std::fmt::Display for MirrorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// A complete copy of the remote state, the unit of a Sync-Down.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MirrorSnapshot {
    pub units: Vec<UnitOfMeasure>,
    pub ingredients: Vec<Ingredient>,
    pub order_statuses: Vec<OrderStatus>,
    pub clients: Vec<Client>,
    pub quotes: Vec<Quote>,
    pub quote_line_items: Vec<QuoteLineItem>,
    pub orders: Vec<Order>,
}

impl MirrorSnapshot {
    /// Build a snapshot from the remote bulk reads, splitting quote lines out
    /// of their quotes.
    #[must_use]
    pub fn assemble(
        units: Vec<UnitOfMeasure>,
        ingredients: Vec<Ingredient>,
        order_statuses: Vec<OrderStatus>,
        clients: Vec<Client>,
        quotes: Vec<QuoteWithItems>,
        orders: Vec<Order>,
    ) -> Self {
        let mut quote_headers = Vec::with_capacity(quotes.len());
        let mut quote_line_items = Vec::new();
        for q in quotes {
            quote_line_items.extend(q.line_items);
            quote_headers.push(q.quote);
        }

        Self {
            units,
            ingredients,
            order_statuses,
            clients,
            quotes: quote_headers,
            quote_line_items,
            orders,
        }
    }

    /// Number of rows destined for `table`.
    #[must_use]
    pub fn row_count(&self, table: MirrorTable) -> usize {
        match table {
            MirrorTable::Clients => self.clients.len(),
            MirrorTable::UnitsOfMeasure => self.units.len(),
            MirrorTable::Ingredients => self.ingredients.len(),
            MirrorTable::OrderStatuses => self.order_statuses.len(),
            MirrorTable::Quotes => self.quotes.len(),
            MirrorTable::QuoteLineItems => self.quote_line_items.len(),
            MirrorTable::Orders => self.orders.len(),
        }
    }

    /// Total number of rows across all tables.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        MirrorTable::ALL.iter().map(|t| self.row_count(*t)).sum()
    }
}
