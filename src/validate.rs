use thiserror::Error;

use crate::key::ItemIdentity;
use crate::{HeaderElement, ItemElement, ListModel, Tile, TileKind, TileManager};

/// Where the section walk of [`TileManager::validate`] currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SectionState {
    None,
    Matched,
    Unmatched,
}

/// A broken structural invariant, reported by [`TileManager::validate`].
///
/// `tile` fields are indices into the tile sequence, tombstones included.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InvariantError {
    #[error("tiles hold {tiles} items, the model has {model}")]
    ItemCount { tiles: usize, model: usize },

    #[error("root augment counts {augment} items, the tiles hold {tiles}")]
    StaleAugment { augment: usize, tiles: usize },

    #[error("run at tile {tile} is empty")]
    EmptyRun { tile: usize },

    #[error("run at tile {tile} holds {n_items} items and an element")]
    OversizedElementRun { tile: usize, n_items: usize },

    #[error("{tiles} tiles carry an element, the manager accounts for {bound}")]
    ElementCount { tiles: usize, bound: usize },

    #[error("{found:?} at tile {tile} while in section state {state:?}")]
    SectionOrder {
        tile: usize,
        state: SectionState,
        found: TileKind,
    },

    #[error("items at tile {tile} are outside of any section")]
    OutsideSection { tile: usize },

    #[error("{found:?} at tile {tile} although sections are off")]
    BoundaryWithoutSections { tile: usize, found: TileKind },

    #[error("header at tile {tile} sits at position {position}, which does not start a section")]
    MisplacedHeader { tile: usize, position: usize },

    #[error("footer at tile {tile} sits at position {position}, which does not end a section")]
    MisplacedFooter { tile: usize, position: usize },

    #[error("last section is not terminated")]
    UnterminatedSection,

    #[error("header at tile {tile} is {found:?} but materialized = {materialized}")]
    HeaderElement {
        tile: usize,
        found: TileKind,
        materialized: bool,
    },

    #[error("header at tile {tile} shows {found:?}, the model says {expected:?}")]
    StaleHeader {
        tile: usize,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("element at position {position} is bound to a different item or position")]
    StaleElement { position: usize },

    #[error("position {position} is tracked but not materialized")]
    TrackerNotMaterialized { position: usize },

    #[error("tombstone left at tile {tile}")]
    Tombstone { tile: usize },

    #[error("unmaterialized run at tile {tile} is not merged with the next one")]
    UncoalescedRuns { tile: usize },
}

impl<M, E, H> TileManager<M, E, H>
where
    M: ListModel,
    M::Item: ItemIdentity,
    E: ItemElement<M::Item>,
    H: HeaderElement<M::Item>,
{
    /// Checks every structural invariant in one linear pass over the tiles.
    ///
    /// Section boundaries, matched or not, must sit where the model starts and ends sections.
    ///
    /// Meant for tests and debug builds; it queries the model for every materialized item.
    pub fn validate(&self) -> Result<(), InvariantError> {
        let model = self.model();
        let model_n_items = model.map_or(0, M::n_items);
        let sections = self.sections_active();

        let mut position = 0;
        let mut n_bound = 0;
        let mut state = SectionState::None;
        for (tile, (_, t)) in self.tree.iter().enumerate() {
            match t {
                Tile::Run { n_items, element } => {
                    if *n_items == 0 {
                        return Err(InvariantError::EmptyRun { tile });
                    }
                    if sections && state == SectionState::None {
                        return Err(InvariantError::OutsideSection { tile });
                    }
                    if let Some(element) = element {
                        if *n_items != 1 {
                            return Err(InvariantError::OversizedElementRun {
                                tile,
                                n_items: *n_items,
                            });
                        }
                        n_bound += 1;
                        let fresh = model.is_some_and(|model| {
                            position < model_n_items
                                && element.item() == Some(&model.item(position))
                        });
                        if !fresh || element.position() != Some(position) {
                            return Err(InvariantError::StaleElement { position });
                        }
                    }
                }
                Tile::Header { matched, element } => {
                    if !sections {
                        return Err(InvariantError::BoundaryWithoutSections {
                            tile,
                            found: t.kind(),
                        });
                    }
                    if state != SectionState::None {
                        return Err(InvariantError::SectionOrder {
                            tile,
                            state,
                            found: t.kind(),
                        });
                    }
                    if let Some(model) = model.filter(|_| position < model_n_items) {
                        if model.section(position).0 != position {
                            return Err(InvariantError::MisplacedHeader { tile, position });
                        }
                    }
                    if *matched != element.is_some() {
                        return Err(InvariantError::HeaderElement {
                            tile,
                            found: t.kind(),
                            materialized: element.is_some(),
                        });
                    }
                    if let Some(header) = element {
                        n_bound += 1;
                        if let (Some(model), Some(found)) = (model, header.range()) {
                            if position >= model_n_items {
                                return Err(InvariantError::OutsideSection { tile });
                            }
                            let expected = model.section(position);
                            if found != expected {
                                return Err(InvariantError::StaleHeader {
                                    tile,
                                    expected,
                                    found,
                                });
                            }
                        }
                    }
                    state = if *matched {
                        SectionState::Matched
                    } else {
                        SectionState::Unmatched
                    };
                }
                Tile::Footer { matched } => {
                    if !sections {
                        return Err(InvariantError::BoundaryWithoutSections {
                            tile,
                            found: t.kind(),
                        });
                    }
                    let expected = if *matched {
                        SectionState::Matched
                    } else {
                        SectionState::Unmatched
                    };
                    if state != expected {
                        return Err(InvariantError::SectionOrder {
                            tile,
                            state,
                            found: t.kind(),
                        });
                    }
                    if let Some(model) = model.filter(|_| position > 0 && position <= model_n_items)
                    {
                        if model.section(position - 1).1 != position {
                            return Err(InvariantError::MisplacedFooter { tile, position });
                        }
                    }
                    state = SectionState::None;
                }
                Tile::Tombstone => {}
            }
            position += t.n_items();
        }

        if state != SectionState::None {
            return Err(InvariantError::UnterminatedSection);
        }
        if position != model_n_items {
            return Err(InvariantError::ItemCount {
                tiles: position,
                model: model_n_items,
            });
        }
        if self.n_items() != position {
            return Err(InvariantError::StaleAugment {
                augment: self.n_items(),
                tiles: position,
            });
        }
        if n_bound != self.n_bound {
            return Err(InvariantError::ElementCount {
                tiles: n_bound,
                bound: self.n_bound,
            });
        }

        for (_, tracker) in self.trackers.iter() {
            let Some((start, len)) = tracker.range(model_n_items) else {
                continue;
            };
            for position in start..start + len {
                if self.element_at(position).is_none() {
                    return Err(InvariantError::TrackerNotMaterialized { position });
                }
            }
        }
        Ok(())
    }

    /// [`Self::validate`], plus the guarantees of a finished [`Self::gc`]: no tombstones and
    /// no adjacent unmaterialized runs.
    pub fn validate_compact(&self) -> Result<(), InvariantError> {
        self.validate()?;

        let mut previous_free = false;
        for (tile, (_, t)) in self.tree.iter().enumerate() {
            if t.is_tombstone() {
                return Err(InvariantError::Tombstone { tile });
            }
            let free = t.is_free_run();
            if free && previous_free {
                return Err(InvariantError::UncoalescedRuns { tile: tile - 1 });
            }
            previous_free = free;
        }
        Ok(())
    }
}
