//! Outbox deltas: the typed record of a mutation made while offline.
//!
//! Each entity family has its own tagged union. An outbox row stores the
//! `action` tag and the JSON `payload` in separate columns; [`encode`] splits a
//! delta into those two parts and [`decode`] puts them back together.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::error::{AppError, Result};
use super::models::{Client, NewOrder, OrderStatusKind, OrderUpdate, QuoteWithItems};

/// An entity family with its own outbox table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Clients,
    Quotes,
    Orders,
}

impl Family {
    /// Families in the order Sync-Up drains them.
    pub const ALL: [Self; 3] = [Self::Clients, Self::Quotes, Self::Orders];

    /// Name of the outbox table for this family.
    #[must_use]
    pub const fn outbox_table(self) -> &'static str {
        match self {
            Self::Clients => "outbox_clients",
            Self::Quotes => "outbox_quotes",
            Self::Orders => "outbox_orders",
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clients => write!(f, "clients"),
            Self::Quotes => write!(f, "quotes"),
            Self::Orders => write!(f, "orders"),
        }
    }
}

/// A mutation that can be queued in an outbox.
pub trait Delta: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// The family whose outbox holds this delta.
    const FAMILY: Family;

    /// The action tag as stored in the outbox.
    fn action(&self) -> &'static str;

    /// Identifier of the entity this delta touches, for logging.
    fn subject_id(&self) -> &str;
}

/// Client mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum ClientDelta {
    #[serde(rename = "INSERT")]
    Insert(Client),
    #[serde(rename = "UPDATE_GENERAL")]
    Update(Client),
    #[serde(rename = "DELETE")]
    Delete { client_id: String },
}

impl Delta for ClientDelta {
    const FAMILY: Family = Family::Clients;

    fn action(&self) -> &'static str {
        match self {
            Self::Insert(_) => "INSERT",
            Self::Update(_) => "UPDATE_GENERAL",
            Self::Delete { .. } => "DELETE",
        }
    }

    fn subject_id(&self) -> &str {
        match self {
            Self::Insert(c) | Self::Update(c) => &c.id,
            Self::Delete { client_id } => client_id,
        }
    }
}

/// Quote mutations. Both variants upsert the header and its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum QuoteDelta {
    #[serde(rename = "INSERT")]
    Insert(QuoteWithItems),
    #[serde(rename = "UPDATE_GENERAL")]
    Update(QuoteWithItems),
}

impl QuoteDelta {
    /// The quote carried by this delta.
    #[must_use]
    pub const fn quote(&self) -> &QuoteWithItems {
        match self {
            Self::Insert(q) | Self::Update(q) => q,
        }
    }
}

impl Delta for QuoteDelta {
    const FAMILY: Family = Family::Quotes;

    fn action(&self) -> &'static str {
        match self {
            Self::Insert(_) => "INSERT",
            Self::Update(_) => "UPDATE_GENERAL",
        }
    }

    fn subject_id(&self) -> &str {
        &self.quote().quote.id
    }
}

/// Order mutations, including one action per status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "payload")]
pub enum OrderDelta {
    #[serde(rename = "INSERT")]
    Insert(NewOrder),
    #[serde(rename = "UPDATE_GENERAL")]
    Update(OrderUpdate),
    #[serde(rename = "UPDATE_STATUS_PENDING")]
    MarkPending { order_id: String },
    #[serde(rename = "UPDATE_STATUS_CANCELLED")]
    MarkCancelled { order_id: String },
    #[serde(rename = "UPDATE_STATUS_DELIVERED")]
    MarkDelivered { order_id: String },
}

impl OrderDelta {
    /// Build the status-transition delta for `kind`.
    #[must_use]
    pub fn status_change(order_id: impl Into<String>, kind: OrderStatusKind) -> Self {
        let order_id = order_id.into();
        match kind {
            OrderStatusKind::Pending => Self::MarkPending { order_id },
            OrderStatusKind::Cancelled => Self::MarkCancelled { order_id },
            OrderStatusKind::Delivered => Self::MarkDelivered { order_id },
        }
    }

    /// Target status of a status-transition delta.
    #[must_use]
    pub const fn target_status(&self) -> Option<OrderStatusKind> {
        match self {
            Self::MarkPending { .. } => Some(OrderStatusKind::Pending),
            Self::MarkCancelled { .. } => Some(OrderStatusKind::Cancelled),
            Self::MarkDelivered { .. } => Some(OrderStatusKind::Delivered),
            Self::Insert(_) | Self::Update(_) => None,
        }
    }
}

impl Delta for OrderDelta {
    const FAMILY: Family = Family::Orders;

    fn action(&self) -> &'static str {
        match self {
            Self::Insert(_) => "INSERT",
            Self::Update(_) => "UPDATE_GENERAL",
            Self::MarkPending { .. } => "UPDATE_STATUS_PENDING",
            Self::MarkCancelled { .. } => "UPDATE_STATUS_CANCELLED",
            Self::MarkDelivered { .. } => "UPDATE_STATUS_DELIVERED",
        }
    }

    fn subject_id(&self) -> &str {
        match self {
            Self::Insert(o) => &o.id,
            Self::Update(u) => &u.order_id,
            Self::MarkPending { order_id }
            | Self::MarkCancelled { order_id }
            | Self::MarkDelivered { order_id } => order_id,
        }
    }
}

/// A pending outbox entry with its decoded delta.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry<D> {
    /// Store-assigned, strictly increasing within a family.
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub delta: D,
}

/// Split a delta into its `(action, payload_json)` columns.
///
/// # Errors
/// Returns error if the delta cannot be serialized.
pub fn encode<D: Delta>(delta: &D) -> Result<(String, String)> {
    let mut value = serde_json::to_value(delta).map_err(AppError::json_parse)?;
    let payload = value
        .get_mut("payload")
        .map(serde_json::Value::take)
        .ok_or_else(|| AppError::InvalidData {
            message: format!("{} delta has no payload", D::FAMILY),
        })?;
    let payload = serde_json::to_string(&payload).map_err(AppError::json_parse)?;

    Ok((delta.action().to_string(), payload))
}

/// Rebuild a delta from its stored `(action, payload_json)` columns.
///
/// # Errors
/// Returns error if the payload is not JSON or does not match the action.
pub fn decode<D: Delta>(action: &str, payload: &str) -> Result<D> {
    let payload: serde_json::Value = serde_json::from_str(payload).map_err(AppError::json_parse)?;
    let tagged = serde_json::json!({ "action": action, "payload": payload });
    serde_json::from_value(tagged).map_err(AppError::json_parse)
}
