//! Asset identity: process-unique ids and runtime type tags.

use std::any::TypeId;
use std::fmt;

use uuid::Uuid;

use crate::Asset;

/// A process-unique 128-bit identifier for an asset record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Creates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rebuilds an id from its raw 128-bit value.
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// The raw 128-bit value.
    pub fn as_u128(&self) -> u128 {
        self.0.as_u128()
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Runtime tag naming the concrete asset kind a record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetType {
    type_id: TypeId,
    name: &'static str,
}

impl AssetType {
    /// The tag for asset type `T`.
    pub fn of<T: Asset>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::type_name(),
        }
    }

    /// The Rust type id of the payload type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Human-readable type name, from [`Asset::type_name`](crate::Asset::type_name).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if this tag names `T`.
    pub fn is<T: Asset>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}
