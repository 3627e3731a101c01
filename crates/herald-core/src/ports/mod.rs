//! Ports - the seams to the outside world.
//!
//! Each trait hides an external system (database, lock backend, clock) so
//! the application layer can run against in-memory implementations in tests
//! and against `herald-sqlx` in production.

pub mod clock;
pub mod dispatch;
pub mod id_generator;
pub mod lock;
pub mod outbox_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dispatch::{Dispatch, DispatchContext, DispatchError, HandlerError, HandlerFailure};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lock::{
    DistributedLock, Lease, LockError, LockHandle, LockProvider, lock_name, message_lock_name,
};
pub use self::outbox_store::{OutboxStore, StoreError};
