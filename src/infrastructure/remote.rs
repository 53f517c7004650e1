//! Remote store boundary and its PostgREST-style HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::outbox::Delta;
use crate::domain::{
    AppConfig, AppError, Client, ClientDelta, Ingredient, Order, OrderDelta, OrderStatus,
    OrderStatusKind, QuoteDelta, QuoteWithItems, Result, UnitOfMeasure,
};

/// The authoritative store. Bulk reads feed Sync-Down; the `apply_*` handlers
/// replay outbox entries and must be idempotent.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_units(&self) -> Result<Vec<UnitOfMeasure>>;
    async fn fetch_ingredients(&self) -> Result<Vec<Ingredient>>;
    async fn fetch_order_statuses(&self) -> Result<Vec<OrderStatus>>;
    async fn fetch_clients(&self) -> Result<Vec<Client>>;
    /// Quotes with their line items.
    async fn fetch_quotes(&self) -> Result<Vec<QuoteWithItems>>;
    /// Orders joined with their status name and client name.
    async fn fetch_orders(&self) -> Result<Vec<Order>>;

    async fn apply_client_delta(&self, delta: &ClientDelta) -> Result<()>;
    async fn apply_quote_delta(&self, delta: &QuoteDelta) -> Result<()>;
    async fn apply_order_delta(&self, delta: &OrderDelta) -> Result<()>;

    /// Catalog writes. Online only, never queued.
    async fn insert_ingredient(&self, ingredient: &Ingredient) -> Result<()>;
    async fn update_ingredient(&self, ingredient: &Ingredient) -> Result<()>;
    /// Soft-delete (`true`) or restore (`false`) an ingredient.
    async fn set_ingredient_deleted(&self, ingredient_id: &str, deleted: bool) -> Result<()>;
}

/// A delta that knows which remote handler applies it.
#[async_trait]
pub trait RemoteDelta: Delta {
    async fn apply_to(&self, remote: &dyn RemoteStore) -> Result<()>;
}

#[async_trait]
impl RemoteDelta for ClientDelta {
    async fn apply_to(&self, remote: &dyn RemoteStore) -> Result<()> {
        remote.apply_client_delta(self).await
    }
}

#[async_trait]
impl RemoteDelta for QuoteDelta {
    async fn apply_to(&self, remote: &dyn RemoteStore) -> Result<()> {
        remote.apply_quote_delta(self).await
    }
}

#[async_trait]
impl RemoteDelta for OrderDelta {
    async fn apply_to(&self, remote: &dyn RemoteStore) -> Result<()> {
        remote.apply_order_delta(self).await
    }
}

const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=minimal";
const IGNORE_DUPLICATES: &str = "resolution=ignore-duplicates,return=minimal";

/// HTTP client for a PostgREST-style backend.
pub struct RestRemote {
    base_url: String,
    client: reqwest::Client,
}

impl RestRemote {
    /// Build a client from the `[remote]` config section.
    ///
    /// # Errors
    /// Returns error if the API key is not a valid header value or the HTTP
    /// client cannot be built.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = config.api_key() {
            let invalid = |_| AppError::Config {
                message: "API key contains characters not allowed in a header".to_string(),
            };
            headers.insert("apikey", HeaderValue::from_str(&key).map_err(invalid)?);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(invalid)?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.remote.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| AppError::remote("Failed to build HTTP client", e))?;

        Ok(Self {
            base_url: config.remote.url.trim_end_matches('/').to_string(),
            client,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    async fn send(request: RequestBuilder, context: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::remote(context.to_string(), e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(AppError::remote_message(format!(
            "HTTP {status} {context}: {body}"
        )))
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, &str)]) -> Result<Vec<T>> {
        let context = format!("GET {table}");
        let response = Self::send(self.client.get(self.table_url(table)).query(query), &context).await?;
        let rows: Vec<T> = response
            .json()
            .await
            .map_err(|e| AppError::remote(format!("Failed to decode {table}"), e))?;

        tracing::debug!(table, rows = rows.len(), "Fetched remote rows");
        Ok(rows)
    }

    async fn upsert<T: Serialize + Sync + ?Sized>(&self, table: &str, rows: &T, prefer: &str) -> Result<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", prefer)
            .json(rows);
        Self::send(request, &format!("POST {table}")).await?;
        Ok(())
    }

    async fn patch(&self, table: &str, filter: &[(&str, String)], body: &Value) -> Result<()> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(filter)
            .header("Prefer", "return=minimal")
            .json(body);
        Self::send(request, &format!("PATCH {table}")).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &[(&str, String)]) -> Result<()> {
        let request = self.client.delete(self.table_url(table)).query(filter);
        Self::send(request, &format!("DELETE {table}")).await?;
        Ok(())
    }

    async fn status_id(&self, kind: OrderStatusKind) -> Result<String> {
        let name = eq(kind.remote_name());
        let rows: Vec<OrderStatus> = self
            .select(
                "order_statuses",
                &[("select", "id,name"), ("name", name.as_str())],
            )
            .await?;

        rows.into_iter()
            .next()
            .map(|s| s.id)
            .ok_or_else(|| AppError::InvalidData {
                message: format!("Remote has no order status named {}", kind.remote_name()),
            })
    }
}

/// Order columns written upstream.
#[derive(Serialize)]
struct OrderInsert<'a> {
    id: &'a str,
    client_id: &'a str,
    quote_id: Option<&'a str>,
    status_id: &'a str,
    price: f64,
    delivery_date: DateTime<Utc>,
}

/// Order row as returned by the embedded-resource select.
#[derive(Deserialize)]
struct OrderRow {
    id: String,
    client_id: String,
    #[serde(default)]
    quote_id: Option<String>,
    status_id: String,
    price: f64,
    delivery_date: DateTime<Utc>,
    #[serde(default)]
    order_statuses: Option<StatusRef>,
    #[serde(default)]
    clients: Option<ClientRef>,
}

#[derive(Deserialize)]
struct StatusRef {
    name: String,
}

#[derive(Deserialize)]
struct ClientRef {
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        let (client_first_name, client_last_name) = match row.clients {
            Some(c) => (Some(c.first_name), c.last_name),
            None => (None, None),
        };
        Self {
            id: row.id,
            client_id: row.client_id,
            quote_id: row.quote_id,
            status_id: row.status_id,
            price: row.price,
            delivery_date: row.delivery_date,
            status_name: row.order_statuses.map(|s| s.name),
            client_first_name,
            client_last_name,
        }
    }
}

fn eq(value: &str) -> String {
    format!("eq.{value}")
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn fetch_units(&self) -> Result<Vec<UnitOfMeasure>> {
        self.select("units_of_measure", &[("select", "*"), ("order", "name.asc")])
            .await
    }

    async fn fetch_ingredients(&self) -> Result<Vec<Ingredient>> {
        self.select("ingredients", &[("select", "*"), ("order", "name.asc")])
            .await
    }

    async fn fetch_order_statuses(&self) -> Result<Vec<OrderStatus>> {
        self.select("order_statuses", &[("select", "*"), ("order", "name.asc")])
            .await
    }

    async fn fetch_clients(&self) -> Result<Vec<Client>> {
        self.select(
            "clients",
            &[
                ("select", "*"),
                ("deleted_at", "is.null"),
                ("order", "first_name.asc"),
            ],
        )
        .await
    }

    async fn fetch_quotes(&self) -> Result<Vec<QuoteWithItems>> {
        self.select(
            "quotes",
            &[
                ("select", "*,quote_line_items(*)"),
                ("order", "created_at.desc"),
            ],
        )
        .await
    }

    async fn fetch_orders(&self) -> Result<Vec<Order>> {
        let rows: Vec<OrderRow> = self
            .select(
                "orders",
                &[
                    ("select", "*,order_statuses(name),clients(first_name,last_name)"),
                    ("order", "delivery_date.asc"),
                ],
            )
            .await?;
        Ok(rows.into_iter().map(Order::from).collect())
    }

    async fn apply_client_delta(&self, delta: &ClientDelta) -> Result<()> {
        match delta {
            ClientDelta::Insert(client) => self.upsert("clients", client, IGNORE_DUPLICATES).await,
            ClientDelta::Update(client) => self.upsert("clients", client, MERGE_DUPLICATES).await,
            ClientDelta::Delete { client_id } => {
                // Only live rows match, so a replayed delete keeps the first timestamp.
                self.patch(
                    "clients",
                    &[("id", eq(client_id)), ("deleted_at", "is.null".to_string())],
                    &json!({ "deleted_at": Utc::now() }),
                )
                .await
            }
        }
    }

    async fn apply_quote_delta(&self, delta: &QuoteDelta) -> Result<()> {
        let QuoteWithItems { quote, line_items } = delta.quote();
        self.upsert("quotes", quote, MERGE_DUPLICATES).await?;

        // Lines are replaced wholesale.
        self.delete("quote_line_items", &[("quote_id", eq(&quote.id))])
            .await?;
        if !line_items.is_empty() {
            let request = self
                .client
                .post(self.table_url("quote_line_items"))
                .header("Prefer", "return=minimal")
                .json(line_items);
            Self::send(request, "POST quote_line_items").await?;
        }
        Ok(())
    }

    async fn apply_order_delta(&self, delta: &OrderDelta) -> Result<()> {
        match delta {
            OrderDelta::Insert(order) => {
                if let Some(client) = &order.new_client {
                    self.upsert("clients", client, IGNORE_DUPLICATES).await?;
                }
                let status_id = self.status_id(OrderStatusKind::Pending).await?;
                let row = OrderInsert {
                    id: &order.id,
                    client_id: &order.client_id,
                    quote_id: order.quote_id.as_deref(),
                    status_id: &status_id,
                    price: order.price,
                    delivery_date: order.delivery_date,
                };
                // A replayed insert must not reset a status changed since.
                self.upsert("orders", &row, IGNORE_DUPLICATES).await
            }
            OrderDelta::Update(update) => {
                let mut body = serde_json::Map::new();
                if let Some(date) = update.delivery_date {
                    body.insert("delivery_date".into(), json!(date));
                }
                if let Some(price) = update.price {
                    body.insert("price".into(), json!(price));
                }
                if body.is_empty() {
                    return Ok(());
                }
                self.patch("orders", &[("id", eq(&update.order_id))], &Value::Object(body))
                    .await
            }
            OrderDelta::MarkPending { order_id }
            | OrderDelta::MarkCancelled { order_id }
            | OrderDelta::MarkDelivered { order_id } => {
                let kind = delta.target_status().unwrap_or(OrderStatusKind::Pending);
                let status_id = self.status_id(kind).await?;
                self.patch(
                    "orders",
                    &[("id", eq(order_id))],
                    &json!({ "status_id": status_id }),
                )
                .await
            }
        }
    }

    async fn insert_ingredient(&self, ingredient: &Ingredient) -> Result<()> {
        self.upsert("ingredients", ingredient, IGNORE_DUPLICATES).await
    }

    async fn update_ingredient(&self, ingredient: &Ingredient) -> Result<()> {
        self.patch(
            "ingredients",
            &[("id", eq(&ingredient.id))],
            &json!({
                "name": ingredient.name,
                "price": ingredient.price,
                "unit_id": ingredient.unit_id,
                "base_quantity": ingredient.base_quantity,
            }),
        )
        .await
    }

    async fn set_ingredient_deleted(&self, ingredient_id: &str, deleted: bool) -> Result<()> {
        self.patch(
            "ingredients",
            &[("id", eq(ingredient_id))],
            &json!({ "is_deleted": deleted }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::RemoteConfig;

    #[test]
    fn test_order_row_flattens_joins() {
        let json = r#"[{
            "id": "o1", "client_id": "c1", "quote_id": null, "status_id": "s1",
            "price": 250.0, "delivery_date": "2025-05-01T15:00:00Z",
            "order_statuses": {"name": "PENDING"},
            "clients": {"first_name": "Ana", "last_name": "Diaz"}
        }]"#;
        let rows: Vec<OrderRow> = serde_json::from_str(json).unwrap();
        let order = Order::from(rows.into_iter().next().unwrap());

        assert_eq!(order.status_kind(), Some(OrderStatusKind::Pending));
        assert_eq!(order.client_display_name(), "Ana Diaz");
    }

    #[test]
    fn test_order_row_without_joins() {
        let json = r#"{
            "id": "o1", "client_id": "c1", "status_id": "s1",
            "price": 1.0, "delivery_date": "2025-05-01T15:00:00Z"
        }"#;
        let order = Order::from(serde_json::from_str::<OrderRow>(json).unwrap());
        assert!(order.status_name.is_none());
        assert_eq!(order.client_display_name(), "c1");
    }

    #[test]
    fn test_ingredient_body_omits_joined_unit() {
        let mut ingredient = crate::domain::IngredientDraft {
            name: "Sugar".into(),
            price: 1.5,
            unit_id: "u-kg".into(),
            base_quantity: 1000,
        }
        .with_id("i-sugar");
        ingredient.unit_name = Some("kg".into());

        let body = serde_json::to_value(&ingredient).unwrap();
        assert_eq!(body["id"], "i-sugar");
        assert_eq!(body["is_deleted"], false);
        assert!(body.get("unit_name").is_none());
    }

    #[test]
    fn test_table_url_strips_trailing_slash() {
        let config = AppConfig {
            remote: RemoteConfig {
                url: "https://api.example.com/".into(),
                api_key: Some("anon".into()),
                timeout_secs: 5,
            },
            ..Default::default()
        };
        let remote = RestRemote::new(&config).unwrap();
        assert_eq!(remote.base_url(), "https://api.example.com");
        assert_eq!(
            remote.table_url("clients"),
            "https://api.example.com/rest/v1/clients"
        );
    }

    #[test]
    fn test_invalid_api_key_is_config_error() {
        let config = AppConfig {
            remote: RemoteConfig {
                api_key: Some("bad\nkey".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            RestRemote::new(&config),
            Err(AppError::Config { .. })
        ));
    }
}
