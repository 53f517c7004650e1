//! Sippa - offline-first sync engine for an order, quote and ingredient app.
//!
//! Keeps a local `SQLite` mirror of the hosted backend, queues changes made
//! offline in per-family outboxes, and reconciles both directions on demand or
//! when connectivity returns.
//!
//! QUICK START:
//!   sippa init                          # Create config and local database
//!   sippa login -e me@example.com       # Sign in and download everything
//!   sippa orders list                   # Works offline too
//!   sippa --offline clients add Ana     # Queue a change
//!   sippa sync                          # Push queued changes, then refresh
//!   sippa watch                         # Push automatically on reconnect

mod application;
mod cli;
mod domain;
mod infrastructure;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use application::{
    format_clients_table, format_down_report, format_full_report, format_ingredients_table,
    format_json, format_orders_table, format_quotes_table, format_skip, format_status,
    format_units_table, format_up_report, CatalogService, ClientService, DataSourceSelector,
    OrderService, OutputFormat, QuoteService, StatusSummary, SyncEngine,
};
use cli::{
    ClientCommand, ClientFields, Cli, Commands, IngredientCommand, OrderCommand, QuoteCommand,
};
use domain::{
    AppConfig, AppError, Family, IngredientDraft, IngredientUpdate, MirrorTable, NewClient,
    OrderClient, OrderDraft, OrderUpdate, Outcome, QuoteDraft,
};
use infrastructure::{
    ensure_config_exists, load_config, save_config, ConnectivityOracle, LocalStore, ManualOracle,
    ProbeOracle, RemoteStore, RestRemote,
};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Everything a command needs, wired together once.
struct App {
    config: AppConfig,
    store: Arc<LocalStore>,
    oracle: Arc<dyn ConnectivityOracle>,
    probe: Option<Arc<ProbeOracle>>,
    engine: Arc<SyncEngine>,
    selector: Arc<DataSourceSelector>,
    format: OutputFormat,
}

impl App {
    async fn build(config: AppConfig, offline: bool, format: OutputFormat) -> domain::Result<Self> {
        let store = Arc::new(LocalStore::open(config.local_db_path()).await);
        let remote: Arc<dyn RemoteStore> = Arc::new(RestRemote::new(&config)?);

        let (oracle, probe): (Arc<dyn ConnectivityOracle>, Option<Arc<ProbeOracle>>) = if offline {
            (Arc::new(ManualOracle::new(false)) as Arc<dyn ConnectivityOracle>, None)
        } else {
            let probe = Arc::new(ProbeOracle::new(&config)?);
            (Arc::clone(&probe) as Arc<dyn ConnectivityOracle>, Some(probe))
        };

        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&oracle),
        ));
        let selector = Arc::new(DataSourceSelector::new(
            Arc::clone(&store),
            remote,
            Arc::clone(&oracle),
        ));

        Ok(Self {
            config,
            store,
            oracle,
            probe,
            engine,
            selector,
            format,
        })
    }

    /// Print a listing as a table or JSON.
    fn print<T: Serialize>(&self, rows: &[T], table: impl FnOnce(&[T]) -> String) -> domain::Result<()> {
        let out = match self.format {
            OutputFormat::Table => table(rows),
            OutputFormat::Json => format_json(rows).map_err(AppError::json_parse)?,
        };
        println!("{out}");
        Ok(())
    }
}

/// Main application logic.
async fn run(cli: Cli) -> domain::Result<()> {
    let format = cli
        .output_format()
        .map_err(|e| AppError::Config { message: e })?;
    let config = load_config()?;
    let app = App::build(config, cli.offline, format).await?;

    match cli.command {
        Commands::Init { url } => cmd_init(&app, url).await?,
        Commands::Status => cmd_status(&app).await?,
        Commands::Sync { up, down } => cmd_sync(&app, up, down).await?,
        Commands::Watch => cmd_watch(&app).await?,
        Commands::Login { email } => cmd_login(&app, &email).await?,
        Commands::Logout => cmd_logout(&app).await?,
        Commands::Clients(command) => cmd_clients(&app, command).await?,
        Commands::Quotes(command) => cmd_quotes(&app, command).await?,
        Commands::Orders(command) => cmd_orders(&app, command).await?,
        Commands::Ingredients(command) => cmd_ingredients(&app, command).await?,
        Commands::Units => {
            let units = CatalogService::new(Arc::clone(&app.selector)).units().await?;
            app.print(&units, format_units_table)?;
        }
    }

    Ok(())
}

/// Create config and database.
async fn cmd_init(app: &App, url: Option<String>) -> domain::Result<()> {
    let config = &app.config;
    let created = ensure_config_exists()?;
    let store = &app.store;

    if let Some(url) = url {
        let mut updated = config.clone();
        updated.remote.url = url;
        save_config(&updated)?;
        println!("{} Remote set to {}", "✓".green().bold(), updated.remote.url);
    } else if created {
        println!(
            "{} Config written to {}",
            "✓".green().bold(),
            AppConfig::config_file_path().display()
        );
    } else {
        println!("  Config already present: {}", AppConfig::config_file_path().display());
    }

    if store.is_active().await {
        println!("{} Local store ready: {}", "✓".green().bold(), store.path().display());
        Ok(())
    } else {
        Err(AppError::StoreInactive)
    }
}

async fn cmd_status(app: &App) -> domain::Result<()> {
    let mut outbox = Vec::with_capacity(Family::ALL.len());
    for family in Family::ALL {
        outbox.push((family, app.store.outbox_len(family).await?));
    }
    let mirror: Vec<(MirrorTable, usize)> = app.store.mirror_counts().await?;

    let status = StatusSummary {
        db_path: app.store.path().to_path_buf(),
        store_active: app.store.is_active().await,
        online: app.oracle.is_online().await,
        remote_url: app.config.remote.url.clone(),
        credential: app.store.local_credential().await?,
        outbox,
        mirror,
    };

    print!("{}", format_status(&status));
    println!("  Engine: {}", app.engine.phase());
    Ok(())
}

async fn cmd_sync(app: &App, up: bool, down: bool) -> domain::Result<()> {
    if up {
        match app.engine.sync_up().await? {
            Outcome::Done(report) => println!("{}", format_up_report(&report)),
            Outcome::Skipped(reason) => println!("{}", format_skip("Sync-Up", &reason)),
        }
    } else if down {
        match app.engine.sync_down().await? {
            Outcome::Done(report) => println!("{}", format_down_report(&report)),
            Outcome::Skipped(reason) => println!("{}", format_skip("Sync-Down", &reason)),
        }
    } else {
        println!("{}", format_full_report(&app.engine.full_sync().await));
    }
    Ok(())
}

async fn cmd_watch(app: &App) -> domain::Result<()> {
    let listener = app.engine.spawn_reconnect_listener();
    let prober = app
        .probe
        .as_ref()
        .map(|p| p.spawn(Duration::from_secs(app.config.sync.probe_interval_secs.max(1))));

    if app.config.sync.sync_on_start {
        println!("{}", format_full_report(&app.engine.full_sync().await));
    }

    println!(
        "{} Watching connectivity (every {}s). Press Ctrl-C to stop.",
        "👀".bold(),
        app.config.sync.probe_interval_secs
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| AppError::io("Failed to listen for Ctrl-C", e))?;

    if let Some(prober) = prober {
        prober.abort();
    }
    listener.abort();

    let pending = app.store.pending_outbox_total().await?;
    println!("Stopped. {pending} outbox entries pending.");
    Ok(())
}

async fn cmd_login(app: &App, email: &str) -> domain::Result<()> {
    if app.oracle.is_online().await {
        app.store.set_local_credential(email).await?;
        println!("{} Signed in as {}", "✓".green().bold(), email.cyan());
        println!("{}", format_full_report(&app.engine.full_sync().await));
        return Ok(());
    }

    // Offline sign-in only works on a device that has signed in before.
    match app.store.local_credential().await? {
        Some(known) if known.eq_ignore_ascii_case(email) => {
            println!(
                "{} Offline session resumed for {}",
                "✓".green().bold(),
                email.cyan()
            );
            Ok(())
        }
        _ => Err(AppError::Config {
            message: "First sign-in on this device requires a connection".to_string(),
        }),
    }
}

async fn cmd_logout(app: &App) -> domain::Result<()> {
    app.store.clear_local_credential().await?;
    let pending = app.store.pending_outbox_total().await?;
    println!("{} Signed out", "✓".green().bold());
    if pending > 0 {
        println!(
            "{} {pending} changes are still queued and will sync on next sign-in",
            "⚠".yellow()
        );
    }
    Ok(())
}

fn apply_fields(client: &mut domain::Client, fields: ClientFields) {
    if let Some(last_name) = fields.last_name {
        client.last_name = last_name;
    }
    if fields.phone.is_some() {
        client.phone = fields.phone;
    }
    if fields.instagram.is_some() {
        client.instagram = fields.instagram;
    }
}

async fn cmd_clients(app: &App, command: ClientCommand) -> domain::Result<()> {
    let service = ClientService::new(Arc::clone(&app.selector));

    match command {
        ClientCommand::List => app.print(&service.list().await?, format_clients_table)?,
        ClientCommand::Add { first_name, fields } => {
            let id = service
                .create(NewClient {
                    first_name,
                    last_name: fields.last_name.unwrap_or_default(),
                    phone: fields.phone,
                    instagram: fields.instagram,
                })
                .await?;
            println!("{} Client created: {id}", "✓".green().bold());
        }
        ClientCommand::Update {
            id,
            first_name,
            fields,
        } => {
            let mut client = service
                .list()
                .await?
                .into_iter()
                .find(|c| c.id == id)
                .ok_or_else(|| AppError::InvalidData {
                    message: format!("Client not found: {id}"),
                })?;
            if let Some(first_name) = first_name {
                client.first_name = first_name;
            }
            apply_fields(&mut client, fields);
            service.update(client).await?;
            println!("{} Client updated: {id}", "✓".green().bold());
        }
        ClientCommand::Remove { id } => {
            service.remove(&id).await?;
            println!("{} Client removed: {id}", "✓".green().bold());
        }
    }
    Ok(())
}

async fn cmd_quotes(app: &App, command: QuoteCommand) -> domain::Result<()> {
    let service = QuoteService::new(Arc::clone(&app.selector));

    match command {
        QuoteCommand::List => app.print(&service.list().await?, format_quotes_table)?,
        QuoteCommand::Add { name, items, total } => {
            let total = total.unwrap_or_else(|| {
                items
                    .iter()
                    .map(|i| i.quantity_used * i.unit_price)
                    .sum()
            });
            let id = service
                .create(QuoteDraft {
                    name,
                    total,
                    line_items: items,
                })
                .await?;
            println!("{} Quote created: {id} (total {total:.2})", "✓".green().bold());
        }
    }
    Ok(())
}

async fn cmd_orders(app: &App, command: OrderCommand) -> domain::Result<()> {
    let service = OrderService::new(Arc::clone(&app.selector));

    match command {
        OrderCommand::List => {
            let now = Utc::now();
            app.print(&service.list().await?, |orders| format_orders_table(orders, now))?;
        }
        OrderCommand::Add {
            client,
            new_client,
            quote,
            delivery,
            price,
        } => {
            let client = match (client, new_client) {
                (Some(id), _) => OrderClient::Existing(id),
                (None, Some(first_name)) => OrderClient::New(NewClient {
                    first_name,
                    ..Default::default()
                }),
                (None, None) => {
                    return Err(AppError::InvalidData {
                        message: "An order needs --client or --new-client".to_string(),
                    })
                }
            };
            let id = service
                .create(OrderDraft {
                    client,
                    quote_id: quote,
                    delivery_date: delivery,
                    price,
                })
                .await?;
            println!("{} Order created: {id}", "✓".green().bold());
        }
        OrderCommand::Update {
            id,
            delivery,
            price,
        } => {
            service
                .update(OrderUpdate {
                    order_id: id.clone(),
                    delivery_date: delivery,
                    price,
                })
                .await?;
            println!("{} Order updated: {id}", "✓".green().bold());
        }
        OrderCommand::Cancel { id } => {
            service.cancel(&id).await?;
            println!("{} Order cancelled: {id}", "✓".green().bold());
        }
        OrderCommand::Deliver { id } => {
            service.deliver(&id).await?;
            println!("{} Order delivered: {id}", "✓".green().bold());
        }
        OrderCommand::Reactivate { id } => {
            service.reactivate(&id).await?;
            println!("{} Order back to pending: {id}", "✓".green().bold());
        }
    }
    Ok(())
}

async fn cmd_ingredients(app: &App, command: IngredientCommand) -> domain::Result<()> {
    let catalog = CatalogService::new(Arc::clone(&app.selector));

    match command {
        IngredientCommand::List { search } => {
            let ingredients = catalog.ingredients(search.as_deref()).await?;
            app.print(&ingredients, format_ingredients_table)?;
        }
        IngredientCommand::Add {
            name,
            price,
            unit,
            base_quantity,
        } => {
            let id = catalog
                .add_ingredient(IngredientDraft {
                    name,
                    price,
                    unit_id: unit,
                    base_quantity,
                })
                .await?;
            println!("{} Ingredient added: {id}", "✓".green().bold());
        }
        IngredientCommand::Update {
            id,
            name,
            price,
            unit,
            base_quantity,
        } => {
            catalog
                .update_ingredient(
                    &id,
                    IngredientUpdate {
                        name,
                        price,
                        unit_id: unit,
                        base_quantity,
                    },
                )
                .await?;
            println!("{} Ingredient updated: {id}", "✓".green().bold());
        }
        IngredientCommand::Remove { id } => {
            catalog.remove_ingredient(&id).await?;
            println!("{} Ingredient removed: {id}", "✓".green().bold());
        }
        IngredientCommand::Restore { id } => {
            catalog.restore_ingredient(&id).await?;
            println!("{} Ingredient restored: {id}", "✓".green().bold());
        }
    }
    Ok(())
}

/// Setup tracing/logging based on verbosity level.
fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
