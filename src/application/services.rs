//! Domain services: CRUD for clients, quotes, orders and the catalog.
//!
//! Every call asks a [`DataSourceSelector`] where to go. Online, reads and
//! writes hit the remote store and accepted writes are copied into the mirror.
//! Offline, reads come from the mirror and writes are queued in the outbox.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::outbox::Delta;
use crate::domain::{
    AppError, Client, ClientDelta, Ingredient, IngredientDraft, IngredientUpdate, NewClient, NewOrder, Order, OrderClient,
    OrderDelta, OrderDraft, OrderStatusKind, OrderUpdate, QuoteDelta, QuoteDraft, QuoteWithItems,
    Result, UnitOfMeasure,
};
use crate::infrastructure::{ConnectivityOracle, LocalStore, MirrorWrite, RemoteDelta, RemoteStore};

/// Where service reads and writes go.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn clients(&self) -> Result<Vec<Client>>;
    async fn quotes(&self) -> Result<Vec<QuoteWithItems>>;
    async fn orders(&self) -> Result<Vec<Order>>;
    async fn ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>>;
    async fn units(&self) -> Result<Vec<UnitOfMeasure>>;

    async fn submit_client(&self, delta: ClientDelta) -> Result<()>;
    async fn submit_quote(&self, delta: QuoteDelta) -> Result<()>;
    async fn submit_order(&self, delta: OrderDelta) -> Result<()>;
}

/// Online source: the remote store, with the mirror kept in step.
pub struct RemoteSource {
    remote: Arc<dyn RemoteStore>,
    store: Arc<LocalStore>,
}

impl RemoteSource {
    pub fn new(remote: Arc<dyn RemoteStore>, store: Arc<LocalStore>) -> Self {
        Self { remote, store }
    }

    async fn submit<D: RemoteDelta + MirrorWrite>(&self, delta: &D) -> Result<()> {
        delta.apply_to(self.remote.as_ref()).await?;
        debug!(family = %D::FAMILY, action = delta.action(), "Remote write accepted");

        if let Err(e) = self.store.mirror_delta(delta).await {
            warn!(family = %D::FAMILY, error = %e, "Failed to mirror remote write");
        }
        Ok(())
    }

    async fn add_ingredient(&self, ingredient: &Ingredient) -> Result<()> {
        self.remote.insert_ingredient(ingredient).await?;
        if let Err(e) = self.store.mirror_ingredient(ingredient).await {
            warn!(ingredient = %ingredient.id, error = %e, "Failed to mirror new ingredient");
        }
        Ok(())
    }

    async fn update_ingredient(&self, ingredient: &Ingredient) -> Result<()> {
        self.remote.update_ingredient(ingredient).await?;
        if let Err(e) = self.store.mirror_ingredient(ingredient).await {
            warn!(ingredient = %ingredient.id, error = %e, "Failed to mirror ingredient update");
        }
        Ok(())
    }

    async fn set_ingredient_deleted(&self, ingredient_id: &str, deleted: bool) -> Result<()> {
        self.remote
            .set_ingredient_deleted(ingredient_id, deleted)
            .await?;
        if let Err(e) = self
            .store
            .mirror_ingredient_deleted(ingredient_id, deleted)
            .await
        {
            warn!(ingredient = ingredient_id, error = %e, "Failed to mirror ingredient state");
        }
        Ok(())
    }
}

#[async_trait]
impl DataSource for RemoteSource {
    async fn clients(&self) -> Result<Vec<Client>> {
        self.remote.fetch_clients().await
    }

    async fn quotes(&self) -> Result<Vec<QuoteWithItems>> {
        self.remote.fetch_quotes().await
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        self.remote.fetch_orders().await
    }

    async fn ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        let units = self.remote.fetch_units().await?;
        let needle = search.map(str::to_lowercase).unwrap_or_default();

        let mut ingredients: Vec<Ingredient> = self
            .remote
            .fetch_ingredients()
            .await?
            .into_iter()
            .filter(|i| !i.is_deleted && i.name.to_lowercase().contains(&needle))
            .collect();
        for ingredient in &mut ingredients {
            ingredient.unit_name = units
                .iter()
                .find(|u| u.id == ingredient.unit_id)
                .map(|u| u.name.clone());
        }
        Ok(ingredients)
    }

    async fn units(&self) -> Result<Vec<UnitOfMeasure>> {
        self.remote.fetch_units().await
    }

    async fn submit_client(&self, delta: ClientDelta) -> Result<()> {
        self.submit(&delta).await
    }

    async fn submit_quote(&self, delta: QuoteDelta) -> Result<()> {
        self.submit(&delta).await
    }

    async fn submit_order(&self, delta: OrderDelta) -> Result<()> {
        self.submit(&delta).await
    }
}

/// Offline source: the mirror for reads, the outbox for writes.
pub struct LocalSource {
    store: Arc<LocalStore>,
}

impl LocalSource {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    async fn submit<D: MirrorWrite>(&self, delta: &D) -> Result<()> {
        let sequence = self
            .store
            .append_outbox(delta)
            .await?
            .ok_or(AppError::StoreInactive)?;
        debug!(family = %D::FAMILY, sequence, "Offline write queued");

        // Show the write in local listings until the next refresh replaces it.
        if let Err(e) = self.store.mirror_delta(delta).await {
            warn!(family = %D::FAMILY, error = %e, "Failed to mirror queued write");
        }
        Ok(())
    }
}

#[async_trait]
impl DataSource for LocalSource {
    async fn clients(&self) -> Result<Vec<Client>> {
        self.store.clients().await
    }

    async fn quotes(&self) -> Result<Vec<QuoteWithItems>> {
        self.store.quotes().await
    }

    async fn orders(&self) -> Result<Vec<Order>> {
        self.store.orders().await
    }

    async fn ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        self.store.ingredients(search).await
    }

    async fn units(&self) -> Result<Vec<UnitOfMeasure>> {
        self.store.units().await
    }

    async fn submit_client(&self, delta: ClientDelta) -> Result<()> {
        self.submit(&delta).await
    }

    async fn submit_quote(&self, delta: QuoteDelta) -> Result<()> {
        self.submit(&delta).await
    }

    async fn submit_order(&self, delta: OrderDelta) -> Result<()> {
        self.submit(&delta).await
    }
}

/// Picks the data source for each call.
pub struct DataSourceSelector {
    store: Arc<LocalStore>,
    oracle: Arc<dyn ConnectivityOracle>,
    remote: RemoteSource,
    local: LocalSource,
}

impl DataSourceSelector {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        oracle: Arc<dyn ConnectivityOracle>,
    ) -> Self {
        Self {
            remote: RemoteSource::new(remote, Arc::clone(&store)),
            local: LocalSource::new(Arc::clone(&store)),
            store,
            oracle,
        }
    }

    /// Remote when online or when there is no usable mirror, local otherwise.
    pub async fn select(&self) -> &dyn DataSource {
        if !self.store.is_active().await {
            debug!("Local store inactive, using remote source");
            return &self.remote;
        }
        if self.oracle.is_online().await {
            return &self.remote;
        }
        debug!("Offline, using local source");
        &self.local
    }

    /// The remote source, or an error while offline with a usable mirror.
    async fn online_only(&self, operation: &str) -> Result<&RemoteSource> {
        if self.store.is_active().await && !self.oracle.is_online().await {
            return Err(AppError::OnlineOnly {
                operation: operation.to_string(),
            });
        }
        Ok(&self.remote)
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn require_name(first_name: &str) -> Result<()> {
    if first_name.trim().is_empty() {
        return Err(AppError::InvalidData {
            message: "Client first name is required".to_string(),
        });
    }
    Ok(())
}

fn require_non_negative(what: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::InvalidData {
            message: format!("{what} must be a non-negative number, got {value}"),
        });
    }
    Ok(())
}

pub struct ClientService {
    selector: Arc<DataSourceSelector>,
}

impl ClientService {
    pub fn new(selector: Arc<DataSourceSelector>) -> Self {
        Self { selector }
    }

    pub async fn list(&self) -> Result<Vec<Client>> {
        self.selector.select().await.clients().await
    }

    /// Create a client and return its identifier.
    ///
    /// # Errors
    /// Returns error if the name is empty or the write fails.
    pub async fn create(&self, client: NewClient) -> Result<String> {
        require_name(&client.first_name)?;
        let id = new_id();
        self.selector
            .select()
            .await
            .submit_client(ClientDelta::Insert(client.with_id(id.clone())))
            .await?;
        Ok(id)
    }

    /// Replace a client's fields.
    ///
    /// # Errors
    /// Returns error if the name is empty or the write fails.
    pub async fn update(&self, client: Client) -> Result<()> {
        require_name(&client.first_name)?;
        self.selector
            .select()
            .await
            .submit_client(ClientDelta::Update(client))
            .await
    }

    /// Soft-delete a client.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn remove(&self, client_id: &str) -> Result<()> {
        self.selector
            .select()
            .await
            .submit_client(ClientDelta::Delete {
                client_id: client_id.to_string(),
            })
            .await
    }
}

pub struct QuoteService {
    selector: Arc<DataSourceSelector>,
}

impl QuoteService {
    pub fn new(selector: Arc<DataSourceSelector>) -> Self {
        Self { selector }
    }

    pub async fn list(&self) -> Result<Vec<QuoteWithItems>> {
        self.selector.select().await.quotes().await
    }

    /// Create a quote with its line items and return its identifier.
    ///
    /// # Errors
    /// Returns error if the quote has no lines, a negative amount, an
    /// ingredient listed twice, or the write fails.
    pub async fn create(&self, draft: QuoteDraft) -> Result<String> {
        if draft.line_items.is_empty() {
            return Err(AppError::InvalidData {
                message: "A quote needs at least one ingredient".to_string(),
            });
        }
        require_non_negative("Quote total", draft.total)?;
        let mut seen = HashSet::new();
        for line in &draft.line_items {
            require_non_negative("Quantity", line.quantity_used)?;
            require_non_negative("Unit price", line.unit_price)?;
            if !seen.insert(line.ingredient_id.as_str()) {
                return Err(AppError::InvalidData {
                    message: format!(
                        "Ingredient {} appears more than once in the quote",
                        line.ingredient_id
                    ),
                });
            }
        }

        let id = new_id();
        self.selector
            .select()
            .await
            .submit_quote(QuoteDelta::Insert(draft.with_id(id.clone(), Utc::now())))
            .await?;
        Ok(id)
    }
}

pub struct OrderService {
    selector: Arc<DataSourceSelector>,
}

impl OrderService {
    pub fn new(selector: Arc<DataSourceSelector>) -> Self {
        Self { selector }
    }

    pub async fn list(&self) -> Result<Vec<Order>> {
        self.selector.select().await.orders().await
    }

    /// Create an order, creating its client inline when needed, and return the
    /// order identifier.
    ///
    /// # Errors
    /// Returns error if the price is negative, a new client has no name, or
    /// the write fails.
    pub async fn create(&self, draft: OrderDraft) -> Result<String> {
        require_non_negative("Order price", draft.price)?;

        let (client_id, new_client) = match draft.client {
            OrderClient::Existing(id) => (id, None),
            OrderClient::New(client) => {
                require_name(&client.first_name)?;
                let id = new_id();
                (id.clone(), Some(client.with_id(id)))
            }
        };

        let id = new_id();
        let order = NewOrder {
            id: id.clone(),
            client_id,
            new_client,
            quote_id: draft.quote_id,
            delivery_date: draft.delivery_date,
            price: draft.price,
        };
        self.selector
            .select()
            .await
            .submit_order(OrderDelta::Insert(order))
            .await?;
        Ok(id)
    }

    /// Change delivery date and/or price of an order that is still editable.
    ///
    /// # Errors
    /// Returns error if nothing changes, the order is frozen, or the write
    /// fails.
    pub async fn update(&self, update: OrderUpdate) -> Result<()> {
        if update.delivery_date.is_none() && update.price.is_none() {
            return Err(AppError::InvalidData {
                message: "Nothing to update".to_string(),
            });
        }
        if let Some(price) = update.price {
            require_non_negative("Order price", price)?;
        }

        let source = self.selector.select().await;
        let current = source
            .orders()
            .await?
            .into_iter()
            .find(|o| o.id == update.order_id);
        if let Some(order) = current {
            if !Self::is_editable(&order, Utc::now()) {
                return Err(AppError::InvalidData {
                    message: format!(
                        "Order {} can no longer be edited (status or delivery too close)",
                        order.id
                    ),
                });
            }
        }

        source.submit_order(OrderDelta::Update(update)).await
    }

    /// # Errors
    /// Returns error if the write fails.
    pub async fn cancel(&self, order_id: &str) -> Result<()> {
        self.set_status(order_id, OrderStatusKind::Cancelled).await
    }

    /// # Errors
    /// Returns error if the write fails.
    pub async fn deliver(&self, order_id: &str) -> Result<()> {
        self.set_status(order_id, OrderStatusKind::Delivered).await
    }

    /// Move a cancelled or delivered order back to pending.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn reactivate(&self, order_id: &str) -> Result<()> {
        self.set_status(order_id, OrderStatusKind::Pending).await
    }

    async fn set_status(&self, order_id: &str, kind: OrderStatusKind) -> Result<()> {
        self.selector
            .select()
            .await
            .submit_order(OrderDelta::status_change(order_id, kind))
            .await
    }

    #[must_use]
    pub fn is_editable(order: &Order, now: DateTime<Utc>) -> bool {
        order.is_editable(now)
    }
}

/// Ingredients and units. Reads follow the selector; ingredient writes go
/// straight to the remote store and are refused offline.
pub struct CatalogService {
    selector: Arc<DataSourceSelector>,
}

impl CatalogService {
    pub fn new(selector: Arc<DataSourceSelector>) -> Self {
        Self { selector }
    }

    pub async fn ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        self.selector.select().await.ingredients(search).await
    }

    pub async fn units(&self) -> Result<Vec<UnitOfMeasure>> {
        self.selector.select().await.units().await
    }

    /// Add an ingredient and return its identifier.
    ///
    /// # Errors
    /// Returns error while offline, on invalid fields or an unknown unit, or
    /// if the remote rejects the write.
    pub async fn add_ingredient(&self, draft: IngredientDraft) -> Result<String> {
        let remote = self.selector.online_only("Adding an ingredient").await?;
        let ingredient = draft.with_id(new_id());
        Self::validate(remote, &ingredient).await?;

        remote.add_ingredient(&ingredient).await?;
        Ok(ingredient.id)
    }

    /// Change some fields of an ingredient, deleted or not.
    ///
    /// # Errors
    /// Returns error while offline, if nothing changes, the ingredient does
    /// not exist, a field is invalid, or the remote rejects the write.
    pub async fn update_ingredient(&self, ingredient_id: &str, update: IngredientUpdate) -> Result<()> {
        if update.is_empty() {
            return Err(AppError::InvalidData {
                message: "Nothing to update".to_string(),
            });
        }
        let remote = self.selector.online_only("Editing an ingredient").await?;
        let current = remote
            .remote
            .fetch_ingredients()
            .await?
            .into_iter()
            .find(|i| i.id == ingredient_id)
            .ok_or_else(|| AppError::InvalidData {
                message: format!("No ingredient with ID {ingredient_id}"),
            })?;

        let ingredient = update.apply(current);
        Self::validate(remote, &ingredient).await?;
        remote.update_ingredient(&ingredient).await
    }

    /// Soft-delete an ingredient. It stays in existing quotes.
    ///
    /// # Errors
    /// Returns error while offline or if the remote rejects the write.
    pub async fn remove_ingredient(&self, ingredient_id: &str) -> Result<()> {
        self.selector
            .online_only("Removing an ingredient")
            .await?
            .set_ingredient_deleted(ingredient_id, true)
            .await
    }

    /// Undo a soft delete.
    ///
    /// # Errors
    /// Returns error while offline or if the remote rejects the write.
    pub async fn restore_ingredient(&self, ingredient_id: &str) -> Result<()> {
        self.selector
            .online_only("Restoring an ingredient")
            .await?
            .set_ingredient_deleted(ingredient_id, false)
            .await
    }

    async fn validate(remote: &RemoteSource, ingredient: &Ingredient) -> Result<()> {
        if ingredient.name.trim().is_empty() {
            return Err(AppError::InvalidData {
                message: "Ingredient name is required".to_string(),
            });
        }
        require_non_negative("Ingredient price", ingredient.price)?;
        if ingredient.base_quantity <= 0 {
            return Err(AppError::InvalidData {
                message: format!(
                    "Base quantity must be positive, got {}",
                    ingredient.base_quantity
                ),
            });
        }

        let units = remote.remote.fetch_units().await?;
        if !units.iter().any(|u| u.id == ingredient.unit_id) {
            return Err(AppError::InvalidData {
                message: format!("Unknown unit of measure: {}", ingredient.unit_id),
            });
        }
        Ok(())
    }
}
