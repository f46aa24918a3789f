//! Stable ID newtypes for pipeline records.
//!
//! All IDs are distinct newtype wrappers over a v4 `Uuid`, providing type
//! safety so that a `KindId` cannot be accidentally used where an `EntryId`
//! is expected. IDs are minted once, when a record is first created, and
//! survive every later update of that record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a tracked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub Uuid);

/// Identity of a defined kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KindId(pub Uuid);

/// Identity of a build-cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Uuid);

macro_rules! impl_id {
    ($($ty:ident),*) => {$(
        impl $ty {
            /// Mints a fresh random identity.
            pub fn new() -> Self {
                $ty(Uuid::new_v4())
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $ty {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map($ty)
            }
        }
    )*};
}

impl_id!(ResourceId, KindId, EntryId);
