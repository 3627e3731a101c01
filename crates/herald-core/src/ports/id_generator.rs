//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: 注入された Clock の時刻で ULID を生成

use crate::domain::ids::{BatchId, MessageId};
use crate::ports::Clock;
use ulid::Ulid;

/// Mints ids usable across nodes without coordination.
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;

    fn generate_batch_id(&self) -> BatchId;
}

/// ULID based generator.
///
/// The timestamp part comes from the clock, so a `FixedClock` yields ids that
/// share a timestamp while the random part keeps them unique.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        MessageId::from(self.next_ulid())
    }

    fn generate_batch_id(&self) -> BatchId {
        BatchId::from(self.next_ulid())
    }
}
