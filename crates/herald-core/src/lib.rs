//! herald-core
//!
//! Transactional outbox: domain events are stored in the same transaction as
//! the business change and delivered to in-process handlers afterwards.
//!
//! # Modules
//! - **domain**: ids, status, the `OutboxMessage` envelope, errors, reports
//! - **ports**: seams to the outside (OutboxStore, LockProvider, Dispatch, Clock, IdGenerator)
//! - **typed**: typed event API (DomainEvent, EventHandler, EventRegistry, PayloadCodec)
//! - **app**: builder, dispatcher, unit of work, processor, retention, reaper, host
//! - **impls**: in-process implementations for development and tests
//!
//! Database-backed stores and locks live in `herald-sqlx`.

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod typed;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{EventPipeline, OutboxBuilder, OutboxConfig, OutboxHost, OutboxProcessor, UnitOfWork};
pub use domain::{BatchReport, MessageId, OutboxError, OutboxMessage, OutboxStatus};
pub use typed::{DomainEvent, EventHandler};
