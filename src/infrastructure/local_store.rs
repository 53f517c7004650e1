//! Local SQLite store: the offline mirror plus the per-family outboxes.
//!
//! The database is opened lazily behind a shared once-cell, so every operation
//! awaits the same readiness signal and a read issued right after startup can
//! never race schema creation. If the database cannot be opened the store is
//! inactive for the rest of the process: reads come back empty and writes are
//! dropped with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::OnceCell;

use crate::domain::outbox::{self, Delta, Family, OutboxEntry};
use crate::domain::{
    AppError, Client, ClientDelta, Ingredient, MirrorSnapshot, MirrorTable, Order, OrderDelta,
    OrderStatus, OrderStatusKind, Quote, QuoteDelta, QuoteLineItem, QuoteWithItems, Result,
    UnitOfMeasure,
};

const SCHEMA: &str = r"
    -- Mirrored tables
    CREATE TABLE IF NOT EXISTS clients (
        id TEXT PRIMARY KEY,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL DEFAULT '',
        phone TEXT,
        instagram TEXT,
        deleted_at TEXT
    );

    CREATE TABLE IF NOT EXISTS units_of_measure (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS ingredients (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        price REAL NOT NULL,
        unit_id TEXT NOT NULL,
        base_quantity INTEGER NOT NULL DEFAULT 0,
        is_deleted INTEGER NOT NULL DEFAULT 0
    );

    CREATE TABLE IF NOT EXISTS order_statuses (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS quotes (
        id TEXT PRIMARY KEY,
        name TEXT,
        total REAL NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS quote_line_items (
        quote_id TEXT NOT NULL,
        ingredient_id TEXT NOT NULL,
        quantity_used REAL NOT NULL,
        unit_price REAL NOT NULL,
        PRIMARY KEY (quote_id, ingredient_id)
    );

    CREATE TABLE IF NOT EXISTS orders (
        id TEXT PRIMARY KEY,
        client_id TEXT NOT NULL,
        quote_id TEXT,
        status_id TEXT NOT NULL,
        price REAL NOT NULL,
        delivery_date TEXT NOT NULL,
        status_name TEXT,
        client_first_name TEXT,
        client_last_name TEXT
    );

    -- Offline authentication marker
    CREATE TABLE IF NOT EXISTS local_auth (
        email TEXT PRIMARY KEY
    );

    -- Outboxes
    CREATE TABLE IF NOT EXISTS outbox_clients (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS outbox_quotes (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS outbox_orders (
        sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_orders_delivery
        ON orders(delivery_date);
    CREATE INDEX IF NOT EXISTS idx_line_items_quote
        ON quote_line_items(quote_id);
";

/// Local mirror and outbox repository.
pub struct LocalStore {
    path: PathBuf,
    ready: OnceCell<Option<Mutex<Connection>>>,
}

impl LocalStore {
    /// Create a store for `path` without touching the filesystem yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ready: OnceCell::new(),
        }
    }

    /// Create a store and wait for it to be ready.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let store = Self::new(path);
        store.initialize().await;
        store
    }

    /// Database file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the database and create the schema, once.
    ///
    /// Safe to call any number of times from any number of tasks; all of them
    /// wait on the same initialization. Returns whether the store is active.
    pub async fn initialize(&self) -> bool {
        self.connection().await.is_some()
    }

    /// Whether the store opened successfully.
    pub async fn is_active(&self) -> bool {
        self.initialize().await
    }

    async fn connection(&self) -> Option<&Mutex<Connection>> {
        self.ready
            .get_or_init(|| async {
                match open_connection(&self.path) {
                    Ok(conn) => {
                        tracing::info!(path = %self.path.display(), "Local store ready");
                        Some(Mutex::new(conn))
                    }
                    Err(e) => {
                        tracing::error!(
                            path = %self.path.display(),
                            error = %e,
                            "Local store failed to initialize; continuing online-only"
                        );
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// Run a read against the connection; an inactive store yields `default`.
    async fn read<T, F>(&self, default: T, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send,
    {
        let Some(conn) = self.connection().await else {
            return Ok(default);
        };
        let guard = lock(conn);
        f(&guard)
    }

    /// Run a write against the connection; an inactive store drops it.
    async fn write<T, F>(&self, operation: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send,
    {
        let Some(conn) = self.connection().await else {
            tracing::warn!(operation, "Local store inactive, write dropped");
            return Ok(None);
        };
        let mut guard = lock(conn);
        f(&mut guard).map(Some)
    }

    // === Mirror reads ===

    /// Clients that are not soft-deleted, by first name.
    pub async fn clients(&self) -> Result<Vec<Client>> {
        self.read(Vec::new(), |conn| {
            query_rows(
                conn,
                "SELECT id, first_name, last_name, phone, instagram, deleted_at
                 FROM clients
                 WHERE deleted_at IS NULL
                 ORDER BY first_name COLLATE NOCASE ASC, last_name COLLATE NOCASE ASC",
                [],
                row_to_client,
            )
        })
        .await
    }

    /// Units of measure by name.
    pub async fn units(&self) -> Result<Vec<UnitOfMeasure>> {
        self.read(Vec::new(), |conn| {
            query_rows(
                conn,
                "SELECT id, name FROM units_of_measure ORDER BY name COLLATE NOCASE ASC",
                [],
                |row| {
                    Ok(UnitOfMeasure {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
        })
        .await
    }

    /// Active ingredients whose name contains `search`, with their unit name.
    pub async fn ingredients(&self, search: Option<&str>) -> Result<Vec<Ingredient>> {
        let pattern = format!("%{}%", search.unwrap_or_default());
        self.read(Vec::new(), move |conn| {
            query_rows(
                conn,
                "SELECT i.id, i.name, i.price, i.unit_id, i.base_quantity, i.is_deleted, u.name
                 FROM ingredients i
                 LEFT JOIN units_of_measure u ON i.unit_id = u.id
                 WHERE i.is_deleted = 0 AND i.name LIKE ?1
                 ORDER BY i.name COLLATE NOCASE ASC",
                [&pattern],
                row_to_ingredient,
            )
        })
        .await
    }

    /// Order statuses by name.
    pub async fn order_statuses(&self) -> Result<Vec<OrderStatus>> {
        self.read(Vec::new(), |conn| {
            query_rows(
                conn,
                "SELECT id, name FROM order_statuses ORDER BY name COLLATE NOCASE ASC",
                [],
                |row| {
                    Ok(OrderStatus {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
        })
        .await
    }

    /// Quotes, newest first, each with its line items.
    pub async fn quotes(&self) -> Result<Vec<QuoteWithItems>> {
        self.read(Vec::new(), |conn| {
            let quotes = query_rows(
                conn,
                "SELECT id, name, total, created_at FROM quotes ORDER BY created_at DESC",
                [],
                row_to_quote,
            )?;
            let mut lines: HashMap<String, Vec<QuoteLineItem>> = HashMap::new();
            for line in all_line_items(conn)? {
                lines.entry(line.quote_id.clone()).or_default().push(line);
            }

            Ok(quotes
                .into_iter()
                .map(|quote| {
                    let line_items = lines.remove(&quote.id).unwrap_or_default();
                    QuoteWithItems { quote, line_items }
                })
                .collect())
        })
        .await
    }

    /// Orders by delivery date, soonest first.
    pub async fn orders(&self) -> Result<Vec<Order>> {
        self.read(Vec::new(), |conn| {
            query_rows(
                conn,
                "SELECT id, client_id, quote_id, status_id, price, delivery_date,
                        status_name, client_first_name, client_last_name
                 FROM orders
                 ORDER BY delivery_date ASC",
                [],
                row_to_order,
            )
        })
        .await
    }

    /// Every mirrored row, unfiltered, in a stable order.
    pub async fn snapshot(&self) -> Result<MirrorSnapshot> {
        self.read(MirrorSnapshot::default(), |conn| {
            Ok(MirrorSnapshot {
                units: query_rows(
                    conn,
                    "SELECT id, name FROM units_of_measure ORDER BY id",
                    [],
                    |row| {
                        Ok(UnitOfMeasure {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    },
                )?,
                ingredients: query_rows(
                    conn,
                    "SELECT id, name, price, unit_id, base_quantity, is_deleted, NULL
                     FROM ingredients ORDER BY id",
                    [],
                    row_to_ingredient,
                )?,
                order_statuses: query_rows(
                    conn,
                    "SELECT id, name FROM order_statuses ORDER BY id",
                    [],
                    |row| {
                        Ok(OrderStatus {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    },
                )?,
                clients: query_rows(
                    conn,
                    "SELECT id, first_name, last_name, phone, instagram, deleted_at
                     FROM clients ORDER BY id",
                    [],
                    row_to_client,
                )?,
                quotes: query_rows(
                    conn,
                    "SELECT id, name, total, created_at FROM quotes ORDER BY id",
                    [],
                    row_to_quote,
                )?,
                quote_line_items: all_line_items(conn)?,
                orders: query_rows(
                    conn,
                    "SELECT id, client_id, quote_id, status_id, price, delivery_date,
                            status_name, client_first_name, client_last_name
                     FROM orders ORDER BY id",
                    [],
                    row_to_order,
                )?,
            })
        })
        .await
    }

    /// Row count per mirrored table.
    pub async fn mirror_counts(&self) -> Result<Vec<(MirrorTable, usize)>> {
        self.read(Vec::new(), |conn| {
            MirrorTable::ALL
                .iter()
                .map(|table| count_rows(conn, table.table_name()).map(|n| (*table, n)))
                .collect()
        })
        .await
    }

    // === Sync-Down ===

    /// Replace the whole mirror with `snapshot` in one transaction.
    ///
    /// Either every table holds the new rows or, on any failure, every table
    /// still holds its previous rows.
    ///
    /// # Errors
    /// Returns error if any delete or insert fails; nothing is committed then.
    pub async fn replace_all(&self, snapshot: &MirrorSnapshot) -> Result<()> {
        self.write("replace_all", |conn| {
            let tx = conn.transaction().map_err(AppError::database)?;
            for table in MirrorTable::ALL {
                tx.execute(&format!("DELETE FROM {}", table.table_name()), [])
                    .map_err(AppError::database)?;
            }
            insert_snapshot(&tx, snapshot)?;
            tx.commit().map_err(AppError::database)?;

            tracing::debug!(rows = snapshot.total_rows(), "Mirror replaced");
            Ok(())
        })
        .await
        .map(|_| ())
    }

    // === Outbox ===

    /// Queue `delta` in its family's outbox.
    ///
    /// Returns the assigned sequence, or `None` if the store is inactive and
    /// the write was dropped.
    ///
    /// # Errors
    /// Returns error if the entry could not be recorded.
    pub async fn append_outbox<D: Delta>(&self, delta: &D) -> Result<Option<i64>> {
        let (action, payload) = outbox::encode(delta)?;
        let created_at = format_ts(Utc::now());
        let table = D::FAMILY.outbox_table();

        let sequence = self
            .write("append_outbox", |conn| {
                conn.execute(
                    &format!("INSERT INTO {table} (action, payload, created_at) VALUES (?1, ?2, ?3)"),
                    params![action, payload, created_at],
                )
                .map_err(AppError::database)?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        if let Some(sequence) = sequence {
            tracing::debug!(
                family = %D::FAMILY,
                action = delta.action(),
                subject = delta.subject_id(),
                sequence,
                "Outbox entry queued"
            );
        }

        Ok(sequence)
    }

    /// Pending entries of `D`'s family in ascending sequence order.
    ///
    /// Entries whose payload or timestamp no longer decodes are logged and
    /// left in place.
    ///
    /// # Errors
    /// Returns error if the outbox cannot be read.
    pub async fn list_outbox<D: Delta>(&self) -> Result<Vec<OutboxEntry<D>>> {
        let table = D::FAMILY.outbox_table();
        let raw = self
            .read(Vec::new(), |conn| {
                query_rows(
                    conn,
                    &format!(
                        "SELECT sequence, action, payload, created_at FROM {table} ORDER BY sequence ASC"
                    ),
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
            })
            .await?;

        let mut entries = Vec::with_capacity(raw.len());
        for (sequence, action, payload, created_at) in raw {
            let decoded = parse_ts(3, created_at)
                .map_err(AppError::database)
                .and_then(|created_at| {
                    outbox::decode::<D>(&action, &payload).map(|delta| (created_at, delta))
                });
            match decoded {
                Ok((created_at, delta)) => entries.push(OutboxEntry {
                    sequence,
                    created_at,
                    delta,
                }),
                Err(e) => {
                    tracing::warn!(
                        family = %D::FAMILY,
                        sequence,
                        action = %action,
                        error = %e,
                        "Undecodable outbox entry left in place"
                    );
                }
            }
        }

        Ok(entries)
    }

    /// Delete exactly one outbox entry.
    ///
    /// # Errors
    /// Returns error if the delete fails.
    pub async fn remove_outbox_entry(&self, family: Family, sequence: i64) -> Result<()> {
        let table = family.outbox_table();
        let removed = self
            .write("remove_outbox_entry", |conn| {
                conn.execute(&format!("DELETE FROM {table} WHERE sequence = ?1"), [sequence])
                    .map_err(AppError::database)
            })
            .await?;

        if removed == Some(0) {
            tracing::warn!(%family, sequence, "Outbox entry already gone");
        }
        Ok(())
    }

    /// Number of pending entries in one family, decodable or not.
    pub async fn outbox_len(&self, family: Family) -> Result<usize> {
        self.read(0, |conn| count_rows(conn, family.outbox_table()))
            .await
    }

    /// Number of pending entries across all families.
    pub async fn pending_outbox_total(&self) -> Result<usize> {
        let mut total = 0;
        for family in Family::ALL {
            total += self.outbox_len(family).await?;
        }
        Ok(total)
    }

    // === Local credential ===

    /// Remember `email` as the offline sign-in marker, replacing any other.
    ///
    /// # Errors
    /// Returns error if the marker could not be written.
    pub async fn set_local_credential(&self, email: &str) -> Result<()> {
        self.write("set_local_credential", |conn| {
            let tx = conn.transaction().map_err(AppError::database)?;
            tx.execute("DELETE FROM local_auth", [])
                .map_err(AppError::database)?;
            tx.execute("INSERT INTO local_auth (email) VALUES (?1)", [email])
                .map_err(AppError::database)?;
            tx.commit().map_err(AppError::database)
        })
        .await
        .map(|_| ())
    }

    /// Whether an offline sign-in marker is present. Any failure reads as no.
    pub async fn has_local_credential(&self) -> bool {
        let result = self
            .read(false, |conn| {
                count_rows(conn, "local_auth").map(|n| n > 0)
            })
            .await;

        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read local credential");
            false
        })
    }

    /// Email stored in the offline sign-in marker.
    pub async fn local_credential(&self) -> Result<Option<String>> {
        self.read(None, |conn| {
            conn.query_row("SELECT email FROM local_auth LIMIT 1", [], |row| row.get(0))
                .optional()
                .map_err(AppError::database)
        })
        .await
    }

    /// Remove the offline sign-in marker.
    ///
    /// # Errors
    /// Returns error if the delete fails.
    pub async fn clear_local_credential(&self) -> Result<()> {
        self.write("clear_local_credential", |conn| {
            conn.execute("DELETE FROM local_auth", [])
                .map_err(AppError::database)
        })
        .await
        .map(|_| ())
    }

    // === Opportunistic mirror writes ===

    /// Insert or overwrite one ingredient row.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn mirror_ingredient(&self, ingredient: &Ingredient) -> Result<()> {
        self.write("mirror_ingredient", |conn| {
            conn.execute(
                "INSERT INTO ingredients (id, name, price, unit_id, base_quantity, is_deleted)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    price = excluded.price,
                    unit_id = excluded.unit_id,
                    base_quantity = excluded.base_quantity,
                    is_deleted = excluded.is_deleted",
                params![
                    ingredient.id,
                    ingredient.name,
                    ingredient.price,
                    ingredient.unit_id,
                    ingredient.base_quantity,
                    ingredient.is_deleted,
                ],
            )
            .map_err(AppError::database)
        })
        .await
        .map(|_| ())
    }

    /// Flip the soft-delete flag of one ingredient row.
    ///
    /// # Errors
    /// Returns error if the write fails.
    pub async fn mirror_ingredient_deleted(&self, ingredient_id: &str, deleted: bool) -> Result<()> {
        self.write("mirror_ingredient_deleted", |conn| {
            conn.execute(
                "UPDATE ingredients SET is_deleted = ?2 WHERE id = ?1",
                params![ingredient_id, deleted],
            )
            .map_err(AppError::database)
        })
        .await
        .map(|_| ())
    }

    /// Reflect a delta the remote store has already accepted in the mirror.
    ///
    /// # Errors
    /// Returns error if the mirror write fails.
    pub async fn mirror_delta<D: MirrorWrite>(&self, delta: &D) -> Result<()> {
        self.write("mirror_delta", |conn| {
            let tx = conn.transaction().map_err(AppError::database)?;
            delta.write_to_mirror(&tx)?;
            tx.commit().map_err(AppError::database)
        })
        .await
        .map(|_| ())
    }
}

/// A delta that can be written straight into the mirror.
pub trait MirrorWrite: Delta {
    /// Apply this delta to the mirrored tables inside `tx`.
    ///
    /// # Errors
    /// Returns error if any statement fails.
    fn write_to_mirror(&self, tx: &Transaction<'_>) -> Result<()>;
}

impl MirrorWrite for ClientDelta {
    fn write_to_mirror(&self, tx: &Transaction<'_>) -> Result<()> {
        match self {
            Self::Insert(client) | Self::Update(client) => upsert_client(tx, client),
            Self::Delete { client_id } => {
                tx.execute(
                    "UPDATE clients SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
                    params![client_id, format_ts(Utc::now())],
                )
                .map_err(AppError::database)?;
                Ok(())
            }
        }
    }
}

impl MirrorWrite for QuoteDelta {
    fn write_to_mirror(&self, tx: &Transaction<'_>) -> Result<()> {
        let QuoteWithItems { quote, line_items } = self.quote();
        tx.execute(
            "INSERT INTO quotes (id, name, total, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                total = excluded.total,
                created_at = excluded.created_at",
            params![quote.id, quote.name, quote.total, format_ts(quote.created_at)],
        )
        .map_err(AppError::database)?;
        tx.execute("DELETE FROM quote_line_items WHERE quote_id = ?1", [&quote.id])
            .map_err(AppError::database)?;
        for line in line_items {
            insert_line_item(tx, line)?;
        }
        Ok(())
    }
}

impl MirrorWrite for OrderDelta {
    fn write_to_mirror(&self, tx: &Transaction<'_>) -> Result<()> {
        match self {
            Self::Insert(order) => {
                if let Some(client) = &order.new_client {
                    upsert_client(tx, client)?;
                }
                let pending = OrderStatusKind::Pending.remote_name();
                tx.execute(
                    "INSERT INTO orders
                        (id, client_id, quote_id, status_id, price, delivery_date,
                         status_name, client_first_name, client_last_name)
                     VALUES (?1, ?2, ?3,
                        COALESCE((SELECT id FROM order_statuses WHERE UPPER(name) = ?6), ''),
                        ?4, ?5, ?6,
                        (SELECT first_name FROM clients WHERE id = ?2),
                        (SELECT last_name FROM clients WHERE id = ?2))
                     ON CONFLICT(id) DO UPDATE SET
                        client_id = excluded.client_id,
                        quote_id = excluded.quote_id,
                        price = excluded.price,
                        delivery_date = excluded.delivery_date",
                    params![
                        order.id,
                        order.client_id,
                        order.quote_id,
                        order.price,
                        format_ts(order.delivery_date),
                        pending,
                    ],
                )
                .map_err(AppError::database)?;
            }
            Self::Update(update) => {
                tx.execute(
                    "UPDATE orders SET
                        delivery_date = COALESCE(?2, delivery_date),
                        price = COALESCE(?3, price)
                     WHERE id = ?1",
                    params![
                        update.order_id,
                        update.delivery_date.map(format_ts),
                        update.price,
                    ],
                )
                .map_err(AppError::database)?;
            }
            Self::MarkPending { order_id }
            | Self::MarkCancelled { order_id }
            | Self::MarkDelivered { order_id } => {
                let name = self
                    .target_status()
                    .map(OrderStatusKind::remote_name)
                    .unwrap_or_default();
                tx.execute(
                    "UPDATE orders SET
                        status_name = ?2,
                        status_id = COALESCE(
                            (SELECT id FROM order_statuses WHERE UPPER(name) = ?2),
                            status_id)
                     WHERE id = ?1",
                    params![order_id, name],
                )
                .map_err(AppError::database)?;
            }
        }
        Ok(())
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create local store directory", e))?;
    }

    let conn = Connection::open(path).map_err(AppError::database)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(AppError::database)?;

    conn.execute_batch(SCHEMA).map_err(AppError::database)?;

    Ok(conn)
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

fn query_rows<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql).map_err(AppError::database)?;
    let rows = stmt.query_map(params, f).map_err(AppError::database)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(AppError::database)
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|n| usize::try_from(n).unwrap_or_default())
    .map_err(AppError::database)
}

fn all_line_items(conn: &Connection) -> Result<Vec<QuoteLineItem>> {
    query_rows(
        conn,
        "SELECT quote_id, ingredient_id, quantity_used, unit_price
         FROM quote_line_items
         ORDER BY quote_id, ingredient_id",
        [],
        |row| {
            Ok(QuoteLineItem {
                quote_id: row.get(0)?,
                ingredient_id: row.get(1)?,
                quantity_used: row.get(2)?,
                unit_price: row.get(3)?,
            })
        },
    )
}

fn insert_snapshot(tx: &Transaction<'_>, snapshot: &MirrorSnapshot) -> Result<()> {
    for unit in &snapshot.units {
        tx.execute(
            "INSERT INTO units_of_measure (id, name) VALUES (?1, ?2)",
            params![unit.id, unit.name],
        )
        .map_err(AppError::database)?;
    }

    for ingredient in &snapshot.ingredients {
        tx.execute(
            "INSERT INTO ingredients (id, name, price, unit_id, base_quantity, is_deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ingredient.id,
                ingredient.name,
                ingredient.price,
                ingredient.unit_id,
                ingredient.base_quantity,
                ingredient.is_deleted,
            ],
        )
        .map_err(AppError::database)?;
    }

    for status in &snapshot.order_statuses {
        tx.execute(
            "INSERT INTO order_statuses (id, name) VALUES (?1, ?2)",
            params![status.id, status.name],
        )
        .map_err(AppError::database)?;
    }

    for client in &snapshot.clients {
        tx.execute(
            "INSERT INTO clients (id, first_name, last_name, phone, instagram, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                client.id,
                client.first_name,
                client.last_name,
                client.phone,
                client.instagram,
                client.deleted_at.map(format_ts),
            ],
        )
        .map_err(AppError::database)?;
    }

    for quote in &snapshot.quotes {
        tx.execute(
            "INSERT INTO quotes (id, name, total, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![quote.id, quote.name, quote.total, format_ts(quote.created_at)],
        )
        .map_err(AppError::database)?;
    }

    for line in &snapshot.quote_line_items {
        insert_line_item(tx, line)?;
    }

    for order in &snapshot.orders {
        tx.execute(
            "INSERT INTO orders
                (id, client_id, quote_id, status_id, price, delivery_date,
                 status_name, client_first_name, client_last_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                order.id,
                order.client_id,
                order.quote_id,
                order.status_id,
                order.price,
                format_ts(order.delivery_date),
                order.status_name,
                order.client_first_name,
                order.client_last_name,
            ],
        )
        .map_err(AppError::database)?;
    }

    Ok(())
}

fn insert_line_item(tx: &Transaction<'_>, line: &QuoteLineItem) -> Result<()> {
    tx.execute(
        "INSERT INTO quote_line_items (quote_id, ingredient_id, quantity_used, unit_price)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            line.quote_id,
            line.ingredient_id,
            line.quantity_used,
            line.unit_price
        ],
    )
    .map_err(AppError::database)?;
    Ok(())
}

fn upsert_client(tx: &Transaction<'_>, client: &Client) -> Result<()> {
    tx.execute(
        "INSERT INTO clients (id, first_name, last_name, phone, instagram, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            phone = excluded.phone,
            instagram = excluded.instagram,
            deleted_at = excluded.deleted_at",
        params![
            client.id,
            client.first_name,
            client.last_name,
            client.phone,
            client.instagram,
            client.deleted_at.map(format_ts),
        ],
    )
    .map_err(AppError::database)?;
    Ok(())
}

/// Fixed-width UTC timestamps, so text order matches time order.
fn format_ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_client(row: &rusqlite::Row<'_>) -> rusqlite::Result<Client> {
    let deleted_at: Option<String> = row.get(5)?;
    Ok(Client {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        phone: row.get(3)?,
        instagram: row.get(4)?,
        deleted_at: deleted_at.map(|s| parse_ts(5, s)).transpose()?,
    })
}

fn row_to_ingredient(row: &rusqlite::Row<'_>) -> rusqlite::Result<Ingredient> {
    Ok(Ingredient {
        id: row.get(0)?,
        name: row.get(1)?,
        price: row.get(2)?,
        unit_id: row.get(3)?,
        base_quantity: row.get(4)?,
        is_deleted: row.get(5)?,
        unit_name: row.get(6)?,
    })
}

fn row_to_quote(row: &rusqlite::Row<'_>) -> rusqlite::Result<Quote> {
    Ok(Quote {
        id: row.get(0)?,
        name: row.get(1)?,
        total: row.get(2)?,
        created_at: parse_ts(3, row.get(3)?)?,
    })
}

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        client_id: row.get(1)?,
        quote_id: row.get(2)?,
        status_id: row.get(3)?,
        price: row.get(4)?,
        delivery_date: parse_ts(5, row.get(5)?)?,
        status_name: row.get(6)?,
        client_first_name: row.get(7)?,
        client_last_name: row.get(8)?,
    })
}
