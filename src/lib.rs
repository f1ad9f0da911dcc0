//! A headless tile manager for virtualized list, grid and table views.
//!
//! A view that shows a huge, changing collection only needs real view elements for the few
//! items on screen. This crate keeps the bookkeeping for that: the collection is indexed as a
//! sequence of tiles (runs of items, optionally bound to one recyclable element, plus section
//! header/footer markers) stored in an augmented red-black tree, so the tile covering any
//! position is found in O(log n).
//!
//! The UI layer is expected to provide:
//! - a [`ListModel`] and change notifications for it
//! - element factories and the [`ItemElement`] / [`HeaderElement`] glue
//! - tracker windows around whatever must stay materialized (the visible range, focus, ...)
//! - a periodic call to [`TileManager::gc`], typically once per layout pass
#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

#[macro_use]
mod macros;

mod change;
mod key;
mod manager;
mod model;
mod options;
mod state;
mod tile;
mod tracker;
mod tree;
mod validate;

#[cfg(test)]
mod tests;

pub use key::ItemIdentity;
pub use manager::TileManager;
pub use model::ListModel;
pub use options::{PrepareSectionCallback, SplitCallback, TileManagerOptions};
pub use state::{TileSummary, TrackerWindow};
pub use tile::{HeaderElement, ItemElement, Tile, TileId, TileKind};
pub use tracker::TrackerId;
pub use validate::{InvariantError, SectionState};
