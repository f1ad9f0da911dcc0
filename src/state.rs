use crate::TileKind;

/// A lightweight, serializable snapshot of one tile.
///
/// With `feature = "serde"`, this type implements `Serialize`/`Deserialize`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TileSummary {
    pub kind: TileKind,
    pub n_items: usize,
    pub materialized: bool,
}

/// A serializable snapshot of a tracker's request.
///
/// Feed it back into [`crate::TileManager::tracker_set_window`] to restore a tracker across
/// model swaps or sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerWindow {
    pub position: usize,
    pub n_before: usize,
    pub n_after: usize,
}
