//! Domain layer - core business types.
//!
//! This layer contains pure domain models, outbox deltas and error types
//! without any I/O.

pub mod config;
pub mod error;
pub mod models;
pub mod outbox;
pub mod sync;

pub use config::AppConfig;
pub use error::{AppError, Result};
pub use models::{
    Client, Ingredient, IngredientDraft, IngredientUpdate, LineItemDraft, MirrorSnapshot, MirrorTable, NewClient, NewOrder, Order,
    OrderClient, OrderDraft, OrderStatus, OrderStatusKind, OrderUpdate, Quote, QuoteDraft,
    QuoteLineItem, QuoteWithItems, UnitOfMeasure,
};
pub use outbox::{ClientDelta, Delta, Family, OrderDelta, OutboxEntry, QuoteDelta};
pub use sync::{
    DownReport, FamilyReport, FullSyncReport, Outcome, SkipReason, SyncPhase, UpReport,
};
