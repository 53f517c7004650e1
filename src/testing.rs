//! Test fixtures and an in-memory remote store.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Notify, Semaphore};

use crate::domain::outbox::Delta;
use crate::domain::{
    AppError, Client, ClientDelta, Ingredient, MirrorSnapshot, Order, OrderDelta, OrderStatus,
    OrderStatusKind, Quote, QuoteDelta, QuoteLineItem, QuoteWithItems, Result, UnitOfMeasure,
};
use crate::infrastructure::RemoteStore;

pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

pub fn client(id: &str, first_name: &str) -> Client {
    Client {
        id: id.into(),
        first_name: first_name.into(),
        last_name: String::new(),
        phone: None,
        instagram: None,
        deleted_at: None,
    }
}

pub fn order(id: &str, client_id: &str, delivery_date: DateTime<Utc>) -> Order {
    Order {
        id: id.into(),
        client_id: client_id.into(),
        quote_id: None,
        status_id: "st-pending".into(),
        price: 120.0,
        delivery_date,
        status_name: Some("PENDING".into()),
        client_first_name: None,
        client_last_name: None,
    }
}

pub fn statuses() -> Vec<OrderStatus> {
    [
        ("st-cancelled", "CANCELLED"),
        ("st-delivered", "DELIVERED"),
        ("st-pending", "PENDING"),
    ]
    .into_iter()
    .map(|(id, name)| OrderStatus {
        id: id.into(),
        name: name.into(),
    })
    .collect()
}

/// A small, fully populated snapshot with rows sorted by id.
pub fn sample_snapshot() -> MirrorSnapshot {
    let ingredient = |id: &str, name: &str, is_deleted: bool| Ingredient {
        id: id.into(),
        name: name.into(),
        price: 2.5,
        unit_id: "u-kg".into(),
        base_quantity: 1000,
        is_deleted,
        unit_name: None,
    };

    let mut first = order("o-1", "c-1", ts(2030, 1, 1));
    first.quote_id = Some("q-1".into());

    MirrorSnapshot {
        units: vec![UnitOfMeasure {
            id: "u-kg".into(),
            name: "kg".into(),
        }],
        ingredients: vec![
            ingredient("i-flour", "Flour", false),
            ingredient("i-old", "Old cocoa", true),
        ],
        order_statuses: statuses(),
        clients: vec![client("c-1", "Ana")],
        quotes: vec![Quote {
            id: "q-1".into(),
            name: Some("Cake".into()),
            total: 25.0,
            created_at: ts(2025, 1, 10),
        }],
        quote_line_items: vec![QuoteLineItem {
            quote_id: "q-1".into(),
            ingredient_id: "i-flour".into(),
            quantity_used: 2.0,
            unit_price: 2.5,
        }],
        orders: vec![first],
    }
}

#[derive(Default)]
struct RemoteTables {
    units: Vec<UnitOfMeasure>,
    ingredients: Vec<Ingredient>,
    statuses: Vec<OrderStatus>,
    clients: Vec<Client>,
    quotes: Vec<QuoteWithItems>,
    orders: Vec<Order>,
}

/// In-memory remote store that applies deltas to its own tables.
#[derive(Default)]
pub struct FakeRemote {
    tables: Mutex<RemoteTables>,
    failing_subjects: Mutex<HashSet<String>>,
    fail_fetches: AtomicBool,
    gate: Option<Arc<Semaphore>>,
    /// Signalled when a gated fetch starts waiting.
    pub fetch_entered: Notify,
    fetch_calls: AtomicUsize,
    applied: Mutex<Vec<(String, String)>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote seeded with the rows of `snapshot`.
    pub fn with_snapshot(snapshot: MirrorSnapshot) -> Self {
        let remote = Self::new();
        {
            let mut tables = remote.tables.lock().unwrap();
            tables.units = snapshot.units;
            tables.ingredients = snapshot.ingredients;
            tables.statuses = snapshot.order_statuses;
            tables.clients = snapshot.clients;
            tables.quotes = snapshot
                .quotes
                .into_iter()
                .map(|quote| {
                    let line_items = snapshot
                        .quote_line_items
                        .iter()
                        .filter(|l| l.quote_id == quote.id)
                        .cloned()
                        .collect();
                    QuoteWithItems { quote, line_items }
                })
                .collect();
            tables.orders = snapshot.orders;
        }
        remote
    }

    /// Remote whose `fetch_units` blocks until the returned semaphore gets a
    /// permit.
    pub fn gated(snapshot: MirrorSnapshot) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut remote = Self::with_snapshot(snapshot);
        remote.gate = Some(Arc::clone(&gate));
        (remote, gate)
    }

    /// Make every delta touching `id` fail.
    pub fn fail_subject(&self, id: &str) {
        self.failing_subjects.lock().unwrap().insert(id.to_string());
    }

    pub fn heal_subject(&self, id: &str) {
        self.failing_subjects.lock().unwrap().remove(id);
    }

    /// Make `fetch_orders` fail, after every other fetch has succeeded.
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// `(action, subject)` of every applied delta, in order.
    pub fn applied(&self) -> Vec<(String, String)> {
        self.applied.lock().unwrap().clone()
    }

    pub fn client_ids(&self) -> Vec<String> {
        let tables = self.tables.lock().unwrap();
        tables
            .clients
            .iter()
            .filter(|c| c.deleted_at.is_none())
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn ingredient(&self, id: &str) -> Option<Ingredient> {
        let tables = self.tables.lock().unwrap();
        tables.ingredients.iter().find(|i| i.id == id).cloned()
    }

    fn check<D: Delta>(&self, delta: &D) -> Result<()> {
        self.record(delta.action(), delta.subject_id())
    }

    fn record(&self, action: &str, subject: &str) -> Result<()> {
        if self.failing_subjects.lock().unwrap().contains(subject) {
            return Err(AppError::remote_message(format!(
                "HTTP 500 {subject}: rejected"
            )));
        }
        self.applied
            .lock()
            .unwrap()
            .push((action.to_string(), subject.to_string()));
        Ok(())
    }

    fn upsert_client(tables: &mut RemoteTables, client: &Client) {
        match tables.clients.iter_mut().find(|c| c.id == client.id) {
            Some(existing) => *existing = client.clone(),
            None => tables.clients.push(client.clone()),
        }
    }

    fn status_id(tables: &RemoteTables, kind: OrderStatusKind) -> String {
        tables
            .statuses
            .iter()
            .find(|s| OrderStatusKind::from_name(&s.name) == Some(kind))
            .map(|s| s.id.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn fetch_units(&self) -> Result<Vec<UnitOfMeasure>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            self.fetch_entered.notify_one();
            let _permit = gate.acquire().await.unwrap();
        }
        Ok(self.tables.lock().unwrap().units.clone())
    }

    async fn fetch_ingredients(&self) -> Result<Vec<Ingredient>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().unwrap().ingredients.clone())
    }

    async fn fetch_order_statuses(&self) -> Result<Vec<OrderStatus>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().unwrap().statuses.clone())
    }

    async fn fetch_clients(&self) -> Result<Vec<Client>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .clients
            .iter()
            .filter(|c| c.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn fetch_quotes(&self) -> Result<Vec<QuoteWithItems>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.lock().unwrap().quotes.clone())
    }

    async fn fetch_orders(&self) -> Result<Vec<Order>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(AppError::remote_message("HTTP 503 GET orders: unavailable"));
        }

        let tables = self.tables.lock().unwrap();
        Ok(tables
            .orders
            .iter()
            .map(|o| {
                let mut o = o.clone();
                o.status_name = tables
                    .statuses
                    .iter()
                    .find(|s| s.id == o.status_id)
                    .map(|s| s.name.clone());
                if let Some(c) = tables.clients.iter().find(|c| c.id == o.client_id) {
                    o.client_first_name = Some(c.first_name.clone());
                    o.client_last_name = Some(c.last_name.clone());
                }
                o
            })
            .collect())
    }

    async fn apply_client_delta(&self, delta: &ClientDelta) -> Result<()> {
        self.check(delta)?;
        let mut tables = self.tables.lock().unwrap();
        match delta {
            ClientDelta::Insert(c) | ClientDelta::Update(c) => Self::upsert_client(&mut tables, c),
            ClientDelta::Delete { client_id } => {
                if let Some(c) = tables
                    .clients
                    .iter_mut()
                    .find(|c| &c.id == client_id && c.deleted_at.is_none())
                {
                    c.deleted_at = Some(Utc::now());
                }
            }
        }
        Ok(())
    }

    async fn apply_quote_delta(&self, delta: &QuoteDelta) -> Result<()> {
        self.check(delta)?;
        let quote = delta.quote().clone();
        let mut tables = self.tables.lock().unwrap();
        match tables.quotes.iter_mut().find(|q| q.quote.id == quote.quote.id) {
            Some(existing) => *existing = quote,
            None => tables.quotes.push(quote),
        }
        Ok(())
    }

    async fn apply_order_delta(&self, delta: &OrderDelta) -> Result<()> {
        self.check(delta)?;
        let mut tables = self.tables.lock().unwrap();
        match delta {
            OrderDelta::Insert(new) => {
                if let Some(c) = &new.new_client {
                    Self::upsert_client(&mut tables, c);
                }
                if !tables.orders.iter().any(|o| o.id == new.id) {
                    let status_id = Self::status_id(&tables, OrderStatusKind::Pending);
                    tables.orders.push(Order {
                        id: new.id.clone(),
                        client_id: new.client_id.clone(),
                        quote_id: new.quote_id.clone(),
                        status_id,
                        price: new.price,
                        delivery_date: new.delivery_date,
                        status_name: None,
                        client_first_name: None,
                        client_last_name: None,
                    });
                }
            }
            OrderDelta::Update(update) => {
                if let Some(o) = tables.orders.iter_mut().find(|o| o.id == update.order_id) {
                    if let Some(date) = update.delivery_date {
                        o.delivery_date = date;
                    }
                    if let Some(price) = update.price {
                        o.price = price;
                    }
                }
            }
            OrderDelta::MarkPending { order_id }
            | OrderDelta::MarkCancelled { order_id }
            | OrderDelta::MarkDelivered { order_id } => {
                let kind = delta.target_status().unwrap();
                let status_id = Self::status_id(&tables, kind);
                if let Some(o) = tables.orders.iter_mut().find(|o| &o.id == order_id) {
                    o.status_id = status_id;
                }
            }
        }
        Ok(())
    }

    async fn insert_ingredient(&self, ingredient: &Ingredient) -> Result<()> {
        self.record("INSERT_INGREDIENT", &ingredient.id)?;
        let mut tables = self.tables.lock().unwrap();
        if !tables.ingredients.iter().any(|i| i.id == ingredient.id) {
            let mut row = ingredient.clone();
            row.unit_name = None;
            tables.ingredients.push(row);
        }
        Ok(())
    }

    async fn update_ingredient(&self, ingredient: &Ingredient) -> Result<()> {
        self.record("UPDATE_INGREDIENT", &ingredient.id)?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(row) = tables.ingredients.iter_mut().find(|i| i.id == ingredient.id) {
            row.name.clone_from(&ingredient.name);
            row.price = ingredient.price;
            row.unit_id.clone_from(&ingredient.unit_id);
            row.base_quantity = ingredient.base_quantity;
        }
        Ok(())
    }

    async fn set_ingredient_deleted(&self, ingredient_id: &str, deleted: bool) -> Result<()> {
        self.record("SET_INGREDIENT_DELETED", ingredient_id)?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(row) = tables.ingredients.iter_mut().find(|i| i.id == ingredient_id) {
            row.is_deleted = deleted;
        }
        Ok(())
    }
}
