//! herald demo host.
//!
//! Places a few orders in SQLite (order row + outbox envelopes in one
//! transaction), then runs the outbox host until Ctrl-C.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald_core::app::{OutboxBuilder, OutboxConfig, OutboxHost, TracingMiddleware, UnitOfWork};
use herald_core::impls::LeaseLockProvider;
use herald_core::ports::{DispatchContext, HandlerError, SystemClock, UlidGenerator};
use herald_core::typed::{DomainEvent, EventHandler};
use herald_sqlx::{SqliteLeaseStore, SqliteOutboxStore};

#[derive(Debug, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: i64,
    customer: String,
}

impl DomainEvent for OrderPlaced {
    const TYPE: &'static str = "sales.order.placed.v1";
}

#[derive(Debug, Serialize, Deserialize)]
struct StockReserved {
    order_id: i64,
    sku: String,
}

impl DomainEvent for StockReserved {
    const TYPE: &'static str = "inventory.stock.reserved.v1";
}

struct SendReceipt;

#[async_trait]
impl EventHandler<OrderPlaced> for SendReceipt {
    async fn handle(&self, event: &OrderPlaced, ctx: &DispatchContext) -> Result<(), HandlerError> {
        tracing::info!(order_id = event.order_id, node = %ctx.node_id, "receipt sent to {}", event.customer);
        Ok(())
    }
}

/// Fails its first `n` calls so the demo leaves some `Failed` envelopes.
struct FlakyWarehouse {
    remaining_failures: AtomicU32,
}

impl FlakyWarehouse {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl EventHandler<StockReserved> for FlakyWarehouse {
    async fn handle(&self, event: &StockReserved, _ctx: &DispatchContext) -> Result<(), HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::new(format!("warehouse unavailable (left={left})")));
        }
        tracing::info!(order_id = event.order_id, sku = %event.sku, "stock picked");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_core=debug,herald_sqlx=debug,herald_cli=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OutboxConfig::from_env().context("invalid HERALD_* configuration")?;
    let database_url =
        std::env::var("HERALD_DATABASE_URL").unwrap_or_else(|_| "sqlite:herald.db?mode=rwc".into());
    tracing::info!(node_id = %config.processor.node_id, %database_url, "starting herald");

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .with_context(|| format!("failed to open {database_url}"))?;

    let store = Arc::new(SqliteOutboxStore::new(pool.clone()));
    store.migrate().await.context("outbox migration failed")?;
    let leases = Arc::new(SqliteLeaseStore::new(pool.clone()));
    leases.migrate().await.context("lease migration failed")?;
    sqlx::query("CREATE TABLE IF NOT EXISTS orders (id INTEGER PRIMARY KEY AUTOINCREMENT, customer TEXT NOT NULL)")
        .execute(&pool)
        .await?;

    let pipeline = OutboxBuilder::new()
        .handler::<OrderPlaced, _>(SendReceipt)?
        .handler::<StockReserved, _>(FlakyWarehouse::new(1))?
        .middleware(TracingMiddleware)
        .expect_events(&[OrderPlaced::TYPE, StockReserved::TYPE])
        .build()?;

    for customer in ["ada", "grace", "edsger"] {
        place_order(&pool, customer).await?;
    }

    let locks = Arc::new(LeaseLockProvider::new(
        leases,
        config.processor.node_id.clone(),
        chrono::Duration::seconds(60),
    ));
    let host = OutboxHost::new(store, locks, &pipeline, config);
    let handle = host.spawn(CancellationToken::new());

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    tracing::info!("shutting down");
    handle.shutdown_and_join().await;
    Ok(())
}

/// Business write and its events commit or roll back together.
async fn place_order(pool: &sqlx::SqlitePool, customer: &str) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    let order_id: i64 = sqlx::query_scalar("INSERT INTO orders (customer) VALUES (?) RETURNING id")
        .bind(customer)
        .fetch_one(&mut *tx)
        .await?;

    let mut uow = UnitOfWork::new(Arc::new(SystemClock), Arc::new(UlidGenerator::new(SystemClock)));
    uow.raise(&OrderPlaced {
        order_id,
        customer: customer.to_string(),
    })?;
    uow.raise(&StockReserved {
        order_id,
        sku: format!("SKU-{order_id:04}"),
    })?;

    SqliteOutboxStore::append_in(&mut tx, &uow.into_messages()).await?;
    tx.commit().await?;
    tracing::info!(order_id, customer, "order placed");
    Ok(())
}
