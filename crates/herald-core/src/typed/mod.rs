//! Typed - the typed event API.
//!
//! Event type names are bound to Rust types once, so handlers never parse
//! strings and an unknown name is caught at decode time.
//!
//! # Two layers
//! - **typed**: `DomainEvent`, `EventHandler<E>` - compile-time checked
//! - **dyn**: `AnyEvent`, `DynHandler` - object safe, stored in tables

pub mod codec;
pub mod event;
pub mod handler;
pub mod registry;

pub use self::codec::PayloadCodec;
pub use self::event::{AnyEvent, DomainEvent};
pub use self::handler::{DynHandler, EventHandler, TypedHandler};
pub use self::registry::{EventRegistry, RegistryError};
