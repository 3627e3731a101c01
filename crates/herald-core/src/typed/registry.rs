//! EventRegistry - 既知の event type と decoder の対応表
//!
//! 起動時に一度だけ登録する。保存された `event_type` 文字列の解決に
//! リフレクションは使わず、未知の名前は `DecodeError::TypeNotFound` になる。

use std::any::TypeId;
use std::collections::HashMap;

use super::codec::PayloadCodec;
use super::event::{AnyEvent, DomainEvent};
use crate::domain::errors::DecodeError;

type DecodeFn = fn(&str) -> Result<Box<dyn AnyEvent>, serde_json::Error>;

fn decode_as<E: DomainEvent>(content: &str) -> Result<Box<dyn AnyEvent>, serde_json::Error> {
    let event: E = PayloadCodec::decode(content)?;
    Ok(Box::new(event))
}

#[derive(Clone, Copy)]
struct KnownEvent {
    type_id: TypeId,
    rust_name: &'static str,
    decode: DecodeFn,
}

/// Registry of known event types (`TYPE` -> decoder).
#[derive(Clone, Default)]
pub struct EventRegistry {
    known: HashMap<&'static str, KnownEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("event type '{key}' is already bound to {existing}, cannot bind it to {requested}")]
    TypeKeyConflict {
        key: &'static str,
        existing: &'static str,
        requested: &'static str,
    },
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            known: HashMap::new(),
        }
    }

    /// Register `E` under `E::TYPE`.
    ///
    /// Registering the same type twice is a no-op; binding one key to two
    /// different Rust types is an error.
    pub fn register<E: DomainEvent>(&mut self) -> Result<(), RegistryError> {
        let requested = KnownEvent {
            type_id: TypeId::of::<E>(),
            rust_name: std::any::type_name::<E>(),
            decode: decode_as::<E>,
        };
        if let Some(existing) = self.known.get(E::TYPE) {
            if existing.type_id == requested.type_id {
                return Ok(());
            }
            return Err(RegistryError::TypeKeyConflict {
                key: E::TYPE,
                existing: existing.rust_name,
                requested: requested.rust_name,
            });
        }
        self.known.insert(E::TYPE, requested);
        Ok(())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.known.contains_key(event_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.known.keys().map(|k| k.to_string()).collect();
        types.sort();
        types
    }

    /// Decode `content` as the event registered under `event_type`.
    pub fn decode(&self, event_type: &str, content: &str) -> Result<Box<dyn AnyEvent>, DecodeError> {
        let known = self
            .known
            .get(event_type)
            .ok_or_else(|| DecodeError::TypeNotFound(event_type.to_string()))?;
        (known.decode)(content).map_err(|source| DecodeError::DeserializationFailed {
            event_type: event_type.to_string(),
            source,
        })
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("known", &self.registered_types())
            .finish()
    }
}
