#[cfg(not(feature = "std"))]
use alloc::collections::BTreeMap;
#[cfg(feature = "std")]
use std::collections::HashMap;

/// Elements released during one change, keyed by the item they were bound to.
#[cfg(feature = "std")]
pub(crate) type ItemMap<K, V> = HashMap<K, V>;
#[cfg(not(feature = "std"))]
pub(crate) type ItemMap<K, V> = BTreeMap<K, V>;

/// Identity bound for model items.
///
/// With `std` items are hashed; without it they are ordered.
#[cfg(feature = "std")]
pub trait ItemIdentity: core::hash::Hash + Eq {}
#[cfg(feature = "std")]
impl<K: core::hash::Hash + Eq> ItemIdentity for K {}

#[cfg(not(feature = "std"))]
pub trait ItemIdentity: Ord {}
#[cfg(not(feature = "std"))]
impl<K: Ord> ItemIdentity for K {}
