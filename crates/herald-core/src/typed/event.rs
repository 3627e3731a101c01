//! DomainEvent trait - binds a Rust type to a stable logical event name.

use std::any::Any;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A business fact that must eventually be delivered to its handlers.
///
/// # Example
/// ```ignore
/// #[derive(Debug, Serialize, Deserialize)]
/// struct OrderPlaced {
///     order_id: u64,
/// }
///
/// impl DomainEvent for OrderPlaced {
///     const TYPE: &'static str = "sales.order.placed.v1";
/// }
/// ```
///
/// `TYPE` is persisted next to the payload and must stay stable across
/// deployments; renaming it orphans every stored envelope of the old name.
pub trait DomainEvent: Serialize + DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Logical type name, `{namespace}.{aggregate}.{fact}.v{major}` by convention.
    const TYPE: &'static str;
}

/// Type-erased view of a decoded event.
///
/// Every `DomainEvent` is an `AnyEvent`; handlers downcast back to the
/// concrete type through `as_any`.
pub trait AnyEvent: Any + fmt::Debug + Send + Sync {
    fn event_type(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

impl<E: DomainEvent> AnyEvent for E {
    fn event_type(&self) -> &'static str {
        E::TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn AnyEvent {
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}
