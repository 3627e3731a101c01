//! PayloadCodec - domain event と envelope content の相互変換
//!
//! content は JSON テキスト（DB 上で人が読める形）。

use super::event::DomainEvent;

/// JSON codec for envelope payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<E: DomainEvent>(event: &E) -> Result<String, serde_json::Error> {
        serde_json::to_string(event)
    }

    pub fn decode<E: DomainEvent>(content: &str) -> Result<E, serde_json::Error> {
        serde_json::from_str(content)
    }
}
