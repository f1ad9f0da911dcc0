use crate::tree::{Augmented, NodeId};

/// A view element that displays one item.
///
/// Elements are created by the factory in [`crate::TileManagerOptions`], owned by exactly one
/// tile while materialized, and recycled through the manager's pool afterwards.
pub trait ItemElement<I> {
    /// Binds the element to `item` at `position`.
    fn bind(&mut self, position: usize, item: I, selected: bool);

    /// Refreshes position and selection without changing the bound item.
    fn update(&mut self, position: usize, selected: bool);

    /// The item this element is bound to.
    fn item(&self) -> Option<&I>;

    /// The position this element was last told.
    fn position(&self) -> Option<usize>;

    /// Called right before the element enters the recycling pool.
    fn unbind(&mut self) {}
}

/// A view element that displays a section header.
pub trait HeaderElement<I> {
    /// Binds the header to the section `start..end`, whose first item is `item`.
    fn bind(&mut self, item: I, start: usize, end: usize);

    /// The section range this header was last bound to, if it keeps track of it.
    fn range(&self) -> Option<(usize, usize)> {
        None
    }

    fn unbind(&mut self) {}
}

/// Header type for views that never show section headers.
impl<I> HeaderElement<I> for () {
    fn bind(&mut self, _item: I, _start: usize, _end: usize) {}
}

/// Handle to a tile inside a [`crate::TileManager`].
///
/// A handle is valid until the tile is removed by a GC pass or a model change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(pub(crate) NodeId);

/// One entry of the tile sequence.
#[derive(Debug)]
pub enum Tile<E, H> {
    /// `n_items` consecutive items. A run bound to an element always holds exactly one item.
    Run { n_items: usize, element: Option<E> },
    /// Start of a section. Matched headers have been resolved against the model and carry an
    /// element; unmatched ones span a region whose real section boundaries are unknown yet.
    Header { matched: bool, element: Option<H> },
    /// End of a section.
    Footer { matched: bool },
    /// Placeholder for a removed tile, dropped by the next GC pass.
    Tombstone,
}

impl<E, H> Tile<E, H> {
    pub(crate) fn run(n_items: usize) -> Self {
        Self::Run {
            n_items,
            element: None,
        }
    }

    pub fn kind(&self) -> TileKind {
        match self {
            Self::Run { .. } => TileKind::Run,
            Self::Header { matched, .. } => TileKind::Header { matched: *matched },
            Self::Footer { matched } => TileKind::Footer { matched: *matched },
            Self::Tombstone => TileKind::Tombstone,
        }
    }

    pub fn n_items(&self) -> usize {
        match self {
            Self::Run { n_items, .. } => *n_items,
            _ => 0,
        }
    }

    /// The item element, if this is a materialized run.
    pub fn element(&self) -> Option<&E> {
        match self {
            Self::Run { element, .. } => element.as_ref(),
            _ => None,
        }
    }

    pub fn header_element(&self) -> Option<&H> {
        match self {
            Self::Header { element, .. } => element.as_ref(),
            _ => None,
        }
    }

    pub fn is_materialized(&self) -> bool {
        match self {
            Self::Run { element, .. } => element.is_some(),
            Self::Header { element, .. } => element.is_some(),
            _ => false,
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self, Self::Header { .. })
    }

    pub fn is_footer(&self) -> bool {
        matches!(self, Self::Footer { .. })
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone)
    }

    /// A run that is not bound to an element.
    pub(crate) fn is_free_run(&self) -> bool {
        matches!(self, Self::Run { element: None, .. })
    }
}

/// Payload-free description of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TileKind {
    Run,
    Header { matched: bool },
    Footer { matched: bool },
    Tombstone,
}

/// Subtree summary cached on every tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct TileAugment {
    pub(crate) n_items: usize,
    pub(crate) has_header: bool,
    pub(crate) has_footer: bool,
}

impl<E, H> Augmented for Tile<E, H> {
    type Augment = TileAugment;

    fn augment(&self, left: Option<&TileAugment>, right: Option<&TileAugment>) -> TileAugment {
        let mut aug = TileAugment {
            n_items: self.n_items(),
            has_header: self.is_header(),
            has_footer: self.is_footer(),
        };
        for child in [left, right].into_iter().flatten() {
            aug.n_items += child.n_items;
            aug.has_header |= child.has_header;
            aug.has_footer |= child.has_footer;
        }
        aug
    }
}
