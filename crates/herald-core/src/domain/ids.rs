//! Domain identifiers (strongly-typed IDs).
//!
//! ID は ULID (Universally Unique Lexicographically Sortable Identifier) ベースです。
//!
//! ## ULID の特性
//! - **時刻でソート可能**: timestamp が先頭にあるため、生成順序でソートできる
//! - **分散生成可能**: 調整なしで複数ノードで生成できる
//! - **UUID互換**: 128-bit で UUID と同じサイズ
//!
//! ## Phantom Type パターン
//! `Id<T>` で共通実装を持ちつつ、マーカー型 `T` により
//! `MessageId` と `BatchId` をコンパイル時に区別します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for id kinds.
pub trait IdMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "msg-").
    fn prefix() -> &'static str;
}

/// Generic ULID id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }

    /// Canonical 26-char ULID text, without the display prefix.
    pub fn to_ulid_string(&self) -> String {
        self.ulid.to_string()
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Parses either the bare ULID or the prefixed display form.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// ========================================
// Markers
// ========================================

/// Marker for outbox messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

/// Marker for processor batches (used as a correlation tag in logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Batch {}

impl IdMarker for Batch {
    fn prefix() -> &'static str {
        "batch-"
    }
}

/// Identifier of an outbox message (envelope).
pub type MessageId = Id<Message>;

/// Identifier of one processor batch.
pub type BatchId = Id<Batch>;
