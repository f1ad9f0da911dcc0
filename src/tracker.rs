use alloc::vec::Vec;

use crate::TrackerWindow;

/// Handle to a tracker created by [`crate::TileManager::tracker_create`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackerId {
    index: u32,
    generation: u32,
}

#[derive(Clone, Debug)]
pub(crate) struct Tracker<I> {
    pub(crate) position: Option<usize>,
    pub(crate) n_before: usize,
    pub(crate) n_after: usize,
    /// The item at `position` once it is materialized.
    pub(crate) item: Option<I>,
    /// Set when a window was requested while the model was empty.
    pub(crate) pending: bool,
}

impl<I> Tracker<I> {
    fn new() -> Self {
        Self {
            position: None,
            n_before: 0,
            n_after: 0,
            item: None,
            pending: false,
        }
    }

    pub(crate) fn unset(&mut self) {
        self.position = None;
        self.item = None;
        self.pending = false;
    }

    /// The tracked range as `(start, len)`, clamped to `n_items`.
    ///
    /// Near the ends of the list the window keeps its size and shifts inward.
    pub(crate) fn range(&self, n_items: usize) -> Option<(usize, usize)> {
        let position = self.position?;
        let len = self
            .n_before
            .saturating_add(self.n_after)
            .saturating_add(1)
            .min(n_items);
        let start = (position.max(self.n_before) - self.n_before).min(n_items - len);
        Some((start, len))
    }

    pub(crate) fn window(&self) -> Option<TrackerWindow> {
        Some(TrackerWindow {
            position: self.position?,
            n_before: self.n_before,
            n_after: self.n_after,
        })
    }
}

struct Slot<I> {
    generation: u32,
    tracker: Option<Tracker<I>>,
}

/// Generational slab of trackers.
pub(crate) struct Trackers<I> {
    slots: Vec<Slot<I>>,
    free: Vec<u32>,
}

impl<I> Trackers<I> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn insert(&mut self) -> TrackerId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.tracker = Some(Tracker::new());
            return TrackerId {
                index,
                generation: slot.generation,
            };
        }
        let index = slot_index(self.slots.len());
        self.slots.push(Slot {
            generation: 0,
            tracker: Some(Tracker::new()),
        });
        TrackerId {
            index,
            generation: 0,
        }
    }

    pub(crate) fn remove(&mut self, id: TrackerId) -> Option<Tracker<I>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let tracker = slot.tracker.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(tracker)
    }

    pub(crate) fn get(&self, id: TrackerId) -> Option<&Tracker<I>> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.tracker.as_ref()
    }

    pub(crate) fn get_mut(&mut self, id: TrackerId) -> Option<&mut Tracker<I>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.tracker.as_mut()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (TrackerId, &Tracker<I>)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let tracker = slot.tracker.as_ref()?;
            Some((
                TrackerId {
                    index: index as u32,
                    generation: slot.generation,
                },
                tracker,
            ))
        })
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tracker<I>> + '_ {
        self.slots.iter_mut().filter_map(|slot| slot.tracker.as_mut())
    }

    /// Computes how far the tracked/untracked stretch starting at `position` extends.
    ///
    /// Returns `(n, tracked)`: the `n` items starting at `position` are either all covered by
    /// some tracker window or all uncovered. Overlapping or touching windows are joined.
    pub(crate) fn query_range(&self, n_items: usize, position: usize) -> (usize, bool) {
        debug_assert!(position < n_items);

        let mut n = n_items - position;
        let mut tracked = false;
        for (_, tracker) in self.iter() {
            let Some((start, len)) = tracker.range(n_items) else {
                continue;
            };
            if start > position {
                n = n.min(start - position);
            } else if start + len > position {
                tracked = true;
                n = start + len - position;
                break;
            }
        }
        if !tracked {
            return (n, false);
        }

        // The number of trackers is tiny, so the quadratic join is fine.
        loop {
            let mut grown = false;
            for (_, tracker) in self.iter() {
                let Some((start, len)) = tracker.range(n_items) else {
                    continue;
                };
                if start + len <= position + n || start > position + n {
                    continue;
                }
                n = start + len - position;
                grown = true;
            }
            if !grown {
                return (n, true);
            }
        }
    }
}

/// Index of a slot appended to a slab of `len` slots.
///
/// Panics once the slab holds `u32::MAX` slots.
pub(crate) fn slot_index(len: usize) -> u32 {
    match u32::try_from(len) {
        Ok(index) if index < u32::MAX => index,
        _ => panic!("tracker slab is full ({len} slots)"),
    }
}
