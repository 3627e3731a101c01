//! App - the outbox application layer, built on top of the ports.
//!
//! # Main components
//! - **OutboxBuilder**: startup wiring of event types, handlers and middleware
//! - **EventDispatcher**: delivers decoded events to their handlers
//! - **UnitOfWork**: collects envelopes inside a business transaction
//! - **OutboxProcessor**: claim -> lock -> re-check -> dispatch -> finalize
//! - **RetentionJob**: deletes old processed envelopes
//! - **StaleProcessingReaper**: requeues envelopes orphaned by a crash
//! - **OutboxHost**: timers, overlap guard and shutdown

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod middleware;
pub mod processor;
pub mod reaper;
pub mod retention;
pub mod scheduler;
pub mod unit_of_work;

pub use self::builder::{BuildError, EventPipeline, OutboxBuilder};
pub use self::config::{
    ConfigError, OutboxConfig, ProcessorOptions, ReaperOptions, RetentionOptions, SchedulerOptions,
};
pub use self::dispatcher::EventDispatcher;
pub use self::middleware::{Middleware, Next, TracingMiddleware};
pub use self::processor::OutboxProcessor;
pub use self::reaper::StaleProcessingReaper;
pub use self::retention::RetentionJob;
pub use self::scheduler::{HostHandle, OutboxHost};
pub use self::unit_of_work::UnitOfWork;
