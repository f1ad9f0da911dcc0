use alloc::vec::Vec;
use core::fmt;

use crate::change::{Change, Pool};
use crate::key::ItemIdentity;
use crate::tracker::Trackers;
use crate::tree::{NodeId, RbTree};
use crate::{
    HeaderElement, ItemElement, ListModel, Tile, TileId, TileKind, TileManagerOptions,
    TileSummary, TrackerId, TrackerWindow,
};

/// Keeps tracked windows of a [`ListModel`] materialized as recyclable elements.
///
/// The manager indexes the model as a sequence of tiles in a balanced tree: runs of items,
/// each optionally bound to one element, and section headers/footers when the model has
/// sections. Trackers pin windows of positions; everything inside a window is materialized
/// eagerly, everything outside is released by the next [`Self::gc`].
///
/// The model is owned by the manager but never observed: after mutating it through
/// [`Self::model_mut`], report the change with [`Self::on_items_changed`],
/// [`Self::on_sections_changed`] or [`Self::on_selection_changed`].
pub struct TileManager<M: ListModel, E, H = ()> {
    options: TileManagerOptions<E, H>,
    model: Option<M>,
    pub(crate) tree: RbTree<Tile<E, H>>,
    pub(crate) trackers: Trackers<M::Item>,
    recycled_items: Pool<E>,
    recycled_headers: Pool<H>,
    /// Number of elements currently bound to tiles.
    pub(crate) n_bound: usize,
}

impl<M, E, H> TileManager<M, E, H>
where
    M: ListModel,
    M::Item: ItemIdentity,
    E: ItemElement<M::Item>,
    H: HeaderElement<M::Item>,
{
    pub fn new(options: TileManagerOptions<E, H>) -> Self {
        ldebug!(
            has_sections = options.has_sections,
            max_recycled = options.max_recycled,
            "TileManager::new"
        );
        Self {
            recycled_items: Pool::new(options.max_recycled),
            recycled_headers: Pool::new(options.max_recycled),
            options,
            model: None,
            tree: RbTree::new(),
            trackers: Trackers::new(),
            n_bound: 0,
        }
    }

    pub fn options(&self) -> &TileManagerOptions<E, H> {
        &self.options
    }

    pub fn model(&self) -> Option<&M> {
        self.model.as_ref()
    }

    /// Mutable access to the model. Report every change made through it.
    pub fn model_mut(&mut self) -> Option<&mut M> {
        self.model.as_mut()
    }

    /// Replaces the model and rebuilds all tiles, returning the previous model.
    ///
    /// All trackers are unset; reposition them against the new model.
    pub fn set_model(&mut self, model: Option<M>) -> Option<M> {
        let old = self.clear_model();
        self.model = model;

        if let Some(n_items) = self.model.as_ref().map(M::n_items) {
            ldebug!(n_items, sections = self.has_sections(), "set_model");
            let mut change = Change::new();
            self.add_items(&mut change, 0, n_items);
            self.ensure_items(&mut change);
            self.finish(change);
        }
        old
    }

    fn clear_model(&mut self) -> Option<M> {
        let old = self.model.take()?;

        let items = &mut self.recycled_items;
        let headers = &mut self.recycled_headers;
        let mut change: Change<M::Item, E, H> = Change::new();
        self.tree.remove_all(|tile| match tile {
            Tile::Run {
                element: Some(element),
                ..
            } => change.recycle(element),
            Tile::Header {
                element: Some(header),
                ..
            } => change.recycle_header(header),
            _ => {}
        });
        change.finish(items, headers);
        self.n_bound = 0;

        for tracker in self.trackers.iter_mut() {
            tracker.unset();
        }
        Some(old)
    }

    /// The section mode requested through the options.
    pub fn has_sections(&self) -> bool {
        self.options.has_sections
    }

    /// Whether header/footer tiles are maintained: requested and supported by the model.
    pub(crate) fn sections_active(&self) -> bool {
        self.options.has_sections && self.model.as_ref().is_some_and(M::has_sections)
    }

    /// Toggles section mode.
    ///
    /// Turning sections off drops every header and footer tile. Turning them on wraps the whole
    /// list in one unmatched section that is resolved lazily around tracked windows.
    pub fn set_has_sections(&mut self, has_sections: bool) {
        if self.options.has_sections == has_sections {
            return;
        }
        let had_sections = self.sections_active();
        self.options.has_sections = has_sections;
        let sections = self.sections_active();
        if had_sections == sections {
            return;
        }
        ldebug!(sections, "set_has_sections");

        let mut change = Change::new();
        if had_sections {
            let mut cur = self.tree.first();
            while let Some(id) = cur {
                cur = self.tree.next(id);
                match self.tree.get(id) {
                    Tile::Header { .. } => {
                        self.clear_header(&mut change, id);
                        self.tombstone(id);
                    }
                    Tile::Footer { .. } => self.tombstone(id),
                    Tile::Run { .. } | Tile::Tombstone => {}
                }
            }
        } else if self.n_items() > 0 {
            self.tree.insert_before(
                None,
                Tile::Header {
                    matched: false,
                    element: None,
                },
            );
            self.tree
                .insert_after(None, Tile::Footer { matched: false });
        }
        self.ensure_items(&mut change);
        self.finish(change);
    }

    /// Reconciles the tiles after `removed` items at `position` were replaced by `added` ones.
    ///
    /// Elements of removed items are torn down. If a tracked item was removed and the same item
    /// shows up among the added ones, it keeps its element and the tracker follows it.
    /// Otherwise such a tracker becomes invalid until it is repositioned.
    ///
    /// In section mode the boundaries next to the edited range are dropped and re-resolved, so
    /// edits that split or join sections need no follow-up. Section membership of items away
    /// from the edit is assumed to be unchanged; report such changes with
    /// [`Self::on_sections_changed`].
    ///
    /// Panics if no model is set or the range exceeds the previous item count.
    pub fn on_items_changed(&mut self, position: usize, removed: usize, added: usize) {
        assert!(
            self.model.is_some(),
            "on_items_changed called without a model"
        );
        let old_n_items = self.n_items();
        assert!(
            position
                .checked_add(removed)
                .is_some_and(|end| end <= old_n_items),
            "items_changed({position}, {removed}, {added}) out of range for {old_n_items} items"
        );
        let n_items = self.live_model().n_items();
        debug_assert_eq!(
            old_n_items - removed + added,
            n_items,
            "model size disagrees with the reported change"
        );
        if removed == 0 && added == 0 {
            return;
        }
        ldebug!(position, removed, added, n_items, "on_items_changed");

        let mut change = Change::new();
        self.remove_items(&mut change, position, removed);
        self.add_items(&mut change, position, added);

        let tracked_removed = self.trackers.iter().any(|(_, tracker)| {
            tracker.item.is_some()
                && tracker
                    .position
                    .is_some_and(|p| p >= position && p < position + removed)
        });
        let moved = if tracked_removed {
            self.restore_moved_items(&mut change, position, added)
        } else {
            Vec::new()
        };

        for tracker in self.trackers.iter_mut() {
            match tracker.position {
                None => {
                    if tracker.pending && old_n_items == 0 && n_items > 0 {
                        tracker.position = Some(0);
                        tracker.pending = false;
                    }
                }
                Some(p) if p >= position + removed => {
                    tracker.position = Some(p - removed + added);
                }
                Some(p) if p >= position => {
                    let target = tracker.item.as_ref().and_then(|item| {
                        moved
                            .iter()
                            .find(|(moved_item, _)| moved_item == item)
                            .map(|&(_, to)| to)
                    });
                    match target {
                        Some(to) => tracker.position = Some(to),
                        None => {
                            ldebug!(position = p, "tracked item removed");
                            tracker.unset();
                        }
                    }
                }
                Some(_) => {}
            }
        }

        if self.sections_active() {
            self.drop_boundaries(&mut change, position, added);
        }
        self.update_positions(position + added);
        self.ensure_items(&mut change);
        self.finish(change);
    }

    /// Re-resolves section boundaries for `n_items` items starting at `position`.
    ///
    /// Every boundary touching the range is dropped and the surrounding sections merge into one
    /// unmatched section; tracked parts of it are resolved against the model again right away.
    ///
    /// The range must cover every item whose section changed.
    pub fn on_sections_changed(&mut self, position: usize, n_items: usize) {
        if !self.sections_active() || n_items == 0 {
            return;
        }
        assert!(
            position
                .checked_add(n_items)
                .is_some_and(|end| end <= self.n_items()),
            "sections_changed({position}, {n_items}) out of range for {} items",
            self.n_items()
        );
        ldebug!(position, n_items, "on_sections_changed");

        let mut change = Change::new();
        self.drop_boundaries(&mut change, position, n_items);
        self.ensure_items(&mut change);
        self.finish(change);
    }

    /// Refreshes the selection state of materialized items in `position..position + n_items`.
    pub fn on_selection_changed(&mut self, position: usize, n_items: usize) {
        if n_items == 0 {
            return;
        }
        let end = position.saturating_add(n_items).min(self.n_items());
        let Some((tile, offset)) = self.nth_node(position) else {
            return;
        };
        ltrace!(position, n_items, "on_selection_changed");

        let Some(model) = self.model.as_ref() else {
            return;
        };
        let mut pos = position - offset;
        let mut cur = Some(tile);
        while pos < end {
            let Some(id) = cur else { break };
            let tile = self.tree.get_mut(id);
            let n_items = tile.n_items();
            if let Tile::Run {
                element: Some(element),
                ..
            } = tile
            {
                element.update(pos, model.is_selected(pos));
            }
            pos += n_items;
            cur = self.tree.next(id);
        }
    }

    /// Splits the run `tile` after its first `n_items` items and returns the new second tile.
    ///
    /// Panics unless `tile` is an unmaterialized run with more than `n_items` items.
    pub fn split(&mut self, tile: TileId, n_items: usize) -> TileId {
        TileId(self.split_node(tile.0, n_items))
    }

    pub(crate) fn split_node(&mut self, id: NodeId, n_items: usize) -> NodeId {
        let rest = match self.tree.get_mut(id) {
            Tile::Run {
                n_items: total,
                element: None,
            } => {
                assert!(
                    n_items > 0 && n_items < *total,
                    "cannot split a run of {total} items at {n_items}"
                );
                let rest = *total - n_items;
                *total = n_items;
                rest
            }
            other => panic!("cannot split a {:?} tile", other.kind()),
        };
        self.tree.mark_dirty(id);
        let new = self.tree.insert_after(Some(id), Tile::run(rest));
        if let Some(split) = &self.options.split {
            split(TileId(id), TileId(new), n_items);
        }
        new
    }

    /// Creates an unset tracker.
    pub fn tracker_create(&mut self) -> TrackerId {
        let id = self.trackers.insert();
        ltrace!(?id, "tracker_create");
        id
    }

    /// Pins the window `position - n_before ..= position + n_after` and materializes it.
    ///
    /// `position` is clamped to the last item. Near the list ends the window keeps its size and
    /// shifts inward. On an empty model the tracker stays pending and moves to position 0 once
    /// items are added. Without a model the tracker is just unset.
    ///
    /// Panics if `tracker` was destroyed.
    pub fn tracker_set_window(
        &mut self,
        tracker: TrackerId,
        position: usize,
        n_before: usize,
        n_after: usize,
    ) {
        let n_items = self.model.as_ref().map(M::n_items);
        let Some(state) = self.trackers.get_mut(tracker) else {
            panic!("tracker_set_window on a destroyed tracker {tracker:?}");
        };
        state.unset();
        let Some(n_items) = n_items else {
            return;
        };
        state.n_before = n_before;
        state.n_after = n_after;
        if n_items == 0 {
            state.pending = true;
            return;
        }
        state.position = Some(position.min(n_items - 1));
        ltrace!(?tracker, position, n_before, n_after, "tracker_set_window");

        let mut change = Change::new();
        self.ensure_items(&mut change);
        self.finish(change);
    }

    /// The tracked position, or `None` if the tracker is unset or its item was removed.
    ///
    /// Panics if `tracker` was destroyed.
    pub fn tracker_position(&self, tracker: TrackerId) -> Option<usize> {
        match self.trackers.get(tracker) {
            Some(state) => state.position,
            None => panic!("tracker_position on a destroyed tracker {tracker:?}"),
        }
    }

    /// The window requested for `tracker`, with the position as currently tracked.
    pub fn tracker_window(&self, tracker: TrackerId) -> Option<TrackerWindow> {
        self.trackers.get(tracker).and_then(|state| state.window())
    }

    /// Drops a tracker. Its window stays materialized until the next [`Self::gc`].
    pub fn tracker_destroy(&mut self, tracker: TrackerId) {
        if self.trackers.remove(tracker).is_none() {
            lwarn!(?tracker, "tracker_destroy on a destroyed tracker");
            debug_assert!(false, "tracker {tracker:?} destroyed twice");
            return;
        }
        ltrace!(?tracker, "tracker_destroy");
    }

    pub fn n_trackers(&self) -> usize {
        self.trackers.len()
    }

    /// Releases everything outside the tracked windows and compacts the tiles.
    ///
    /// Afterwards no tombstones remain and no two unmaterialized runs are adjacent.
    pub fn gc(&mut self) {
        ldebug!(n_tiles = self.tree.len(), bound = self.n_bound, "gc");
        let mut change = Change::new();
        self.release_items(&mut change, true);
        self.materialize_tracked(&mut change);
        self.gc_tiles();
        self.finish(change);
        ltrace!(n_tiles = self.tree.len(), bound = self.n_bound, "gc done");
    }

    /// Number of items indexed by the tiles.
    pub fn n_items(&self) -> usize {
        self.tree
            .root()
            .map_or(0, |root| self.tree.augment(root).n_items)
    }

    pub fn n_tiles(&self) -> usize {
        self.tree.len()
    }

    /// Number of elements waiting in the recycling pools.
    pub fn n_recycled(&self) -> usize {
        self.recycled_items.len() + self.recycled_headers.len()
    }

    /// Number of elements bound to tiles.
    pub fn n_materialized(&self) -> usize {
        self.n_bound
    }

    /// Panics if `tile` is no longer part of the manager.
    pub fn tile(&self, tile: TileId) -> &Tile<E, H> {
        self.tree.get(tile.0)
    }

    pub fn first(&self) -> Option<TileId> {
        self.tree.first().map(TileId)
    }

    pub fn last(&self) -> Option<TileId> {
        self.tree.last().map(TileId)
    }

    pub fn next(&self, tile: TileId) -> Option<TileId> {
        self.tree.next(tile.0).map(TileId)
    }

    pub fn previous(&self, tile: TileId) -> Option<TileId> {
        self.tree.previous(tile.0).map(TileId)
    }

    /// Iterates all tiles in sequence order, tombstones included.
    pub fn tiles(&self) -> impl Iterator<Item = (TileId, &Tile<E, H>)> + '_ {
        self.tree.iter().map(|(id, tile)| (TileId(id), tile))
    }

    /// The run covering `position` and the offset of `position` inside it.
    pub fn nth(&self, position: usize) -> Option<(TileId, usize)> {
        self.nth_node(position).map(|(id, offset)| (TileId(id), offset))
    }

    /// Number of items before `tile`.
    pub fn tile_position(&self, tile: TileId) -> usize {
        self.position_of(tile.0)
    }

    /// The header of the section containing `tile` (or `tile` itself if it is a header).
    pub fn header_of(&self, tile: TileId) -> Option<TileId> {
        self.section_header(tile.0).map(TileId)
    }

    /// The footer of the section containing `tile` (or `tile` itself if it is a footer).
    pub fn footer_of(&self, tile: TileId) -> Option<TileId> {
        self.section_footer(tile.0).map(TileId)
    }

    pub fn element_at(&self, position: usize) -> Option<&E> {
        let (id, _) = self.nth_node(position)?;
        self.tree.get(id).element()
    }

    pub fn summary(&self) -> Vec<TileSummary> {
        self.tree
            .iter()
            .map(|(_, tile)| TileSummary {
                kind: tile.kind(),
                n_items: tile.n_items(),
                materialized: tile.is_materialized(),
            })
            .collect()
    }

    pub(crate) fn nth_node(&self, position: usize) -> Option<(NodeId, usize)> {
        nth_in(&self.tree, position)
    }

    pub(crate) fn position_of(&self, id: NodeId) -> usize {
        let mut position = self
            .tree
            .left(id)
            .map_or(0, |left| self.tree.augment(left).n_items);
        let mut cur = id;
        while let Some(parent) = self.tree.parent(cur) {
            let left = self.tree.left(parent);
            if left != Some(cur) {
                position += left.map_or(0, |left| self.tree.augment(left).n_items);
                position += self.tree.get(parent).n_items();
            }
            cur = parent;
        }
        position
    }

    /// Closest header at or before `id`, found through the `has_header` augment bits.
    fn section_header(&self, mut id: NodeId) -> Option<NodeId> {
        let mut check_right = false;
        loop {
            if check_right {
                if let Some(right) = self
                    .tree
                    .right(id)
                    .filter(|&r| self.tree.augment(r).has_header)
                {
                    id = right;
                    continue;
                }
            }
            if self.tree.get(id).is_header() {
                return Some(id);
            }
            if let Some(left) = self
                .tree
                .left(id)
                .filter(|&l| self.tree.augment(l).has_header)
            {
                id = left;
                check_right = true;
                continue;
            }
            loop {
                let parent = self.tree.parent(id)?;
                let from_right = self.tree.right(parent) == Some(id);
                id = parent;
                if from_right {
                    break;
                }
            }
            check_right = false;
        }
    }

    /// Closest footer at or after `id`.
    fn section_footer(&self, mut id: NodeId) -> Option<NodeId> {
        let mut check_left = false;
        loop {
            if check_left {
                if let Some(left) = self
                    .tree
                    .left(id)
                    .filter(|&l| self.tree.augment(l).has_footer)
                {
                    id = left;
                    continue;
                }
            }
            if self.tree.get(id).is_footer() {
                return Some(id);
            }
            if let Some(right) = self
                .tree
                .right(id)
                .filter(|&r| self.tree.augment(r).has_footer)
            {
                id = right;
                check_left = true;
                continue;
            }
            loop {
                let parent = self.tree.parent(id)?;
                let from_left = self.tree.left(parent) == Some(id);
                id = parent;
                if from_left {
                    break;
                }
            }
            check_left = false;
        }
    }

    fn next_skip(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = self.tree.next(id);
        while let Some(next) = cur.filter(|&n| self.tree.get(n).is_tombstone()) {
            cur = self.tree.next(next);
        }
        cur
    }

    fn previous_skip(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = self.tree.previous(id);
        while let Some(previous) = cur.filter(|&p| self.tree.get(p).is_tombstone()) {
            cur = self.tree.previous(previous);
        }
        cur
    }

    fn expect_tile(&self, tile: Option<NodeId>) -> NodeId {
        match tile {
            Some(id) => id,
            None => panic!("tile sequence ended early ({} items)", self.n_items()),
        }
    }

    fn expect_header(&self, id: NodeId) -> NodeId {
        match self.section_header(id) {
            Some(header) => header,
            None => panic!("tile {id:?} is not inside a section"),
        }
    }

    fn expect_footer(&self, id: NodeId) -> NodeId {
        match self.section_footer(id) {
            Some(footer) => footer,
            None => panic!("tile {id:?} is not inside a section"),
        }
    }

    pub(crate) fn live_model(&self) -> &M {
        match &self.model {
            Some(model) => model,
            None => unreachable!("tiles exist without a model"),
        }
    }

    fn tombstone(&mut self, id: NodeId) {
        debug_assert!(
            !self.tree.get(id).is_materialized(),
            "tombstoning a materialized tile"
        );
        *self.tree.get_mut(id) = Tile::Tombstone;
        self.tree.mark_dirty(id);
    }

    fn set_footer(&mut self, id: NodeId, matched: bool) {
        match self.tree.get_mut(id) {
            Tile::Footer { matched: m } => *m = matched,
            other => panic!("expected a footer, found {:?}", other.kind()),
        }
    }

    fn unmatch_header(&mut self, change: &mut Change<M::Item, E, H>, id: NodeId) {
        self.clear_header(change, id);
        match self.tree.get_mut(id) {
            Tile::Header { matched, .. } => *matched = false,
            other => panic!("expected a header, found {:?}", other.kind()),
        }
    }

    fn clear_header(&mut self, change: &mut Change<M::Item, E, H>, id: NodeId) {
        if let Tile::Header { element, .. } = self.tree.get_mut(id) {
            if let Some(header) = element.take() {
                self.n_bound -= 1;
                change.recycle_header(header);
            }
        }
    }

    fn take_element(&mut self, id: NodeId) -> Option<E> {
        let Tile::Run { element, .. } = self.tree.get_mut(id) else {
            return None;
        };
        let element = element.take();
        if element.is_some() {
            self.n_bound -= 1;
        }
        element
    }

    fn put_element(&mut self, id: NodeId, new: E) {
        match self.tree.get_mut(id) {
            Tile::Run {
                n_items: 1,
                element: element @ None,
            } => *element = Some(new),
            other => panic!("cannot bind an element to {:?}", other.kind()),
        }
        self.n_bound += 1;
    }

    /// Binds a fresh header element to the matched header `id` for the section `start..end`.
    fn bind_header(
        &mut self,
        change: &mut Change<M::Item, E, H>,
        id: NodeId,
        start: usize,
        end: usize,
    ) {
        let mut header = change
            .get_header()
            .or_else(|| self.recycled_headers.pop())
            .unwrap_or_else(|| (self.options.create_header)());
        header.bind(self.live_model().item(start), start, end);
        match self.tree.get_mut(id) {
            Tile::Header {
                matched: true,
                element: element @ None,
            } => *element = Some(header),
            other => panic!("cannot bind a header element to {:?}", other.kind()),
        }
        self.n_bound += 1;
    }

    fn acquire_element(&mut self, change: &mut Change<M::Item, E, H>, item: &M::Item) -> E {
        change
            .get(item)
            .or_else(|| self.recycled_items.pop())
            .unwrap_or_else(|| (self.options.create_element)())
    }

    fn finish(&mut self, change: Change<M::Item, E, H>) {
        change.finish(&mut self.recycled_items, &mut self.recycled_headers);
    }

    fn remove_items(&mut self, change: &mut Change<M::Item, E, H>, position: usize, n_items: usize) {
        if n_items == 0 {
            return;
        }
        let (mut tile, offset) = self.nth_node(position).unwrap_or_else(|| unreachable!());
        if offset > 0 {
            tile = self.split_node(tile, offset);
        }
        let mut header = self
            .previous_skip(tile)
            .filter(|&h| self.tree.get(h).is_header());

        let mut remaining = n_items;
        let mut cur = Some(tile);
        while remaining > 0 {
            let id = self.expect_tile(cur);
            match self.tree.get(id) {
                Tile::Header { .. } => {
                    debug_assert!(header.is_none(), "nested section header");
                    header = Some(id);
                }
                Tile::Footer { .. } => {
                    if let Some(h) = header.take() {
                        self.clear_header(change, h);
                        self.tombstone(h);
                        self.tombstone(id);
                    }
                }
                Tile::Run { n_items, .. } => {
                    if *n_items > remaining {
                        self.split_node(id, remaining);
                    }
                    remaining -= self.tree.get(id).n_items();
                    if let Some(element) = self.take_element(id) {
                        change.release(element);
                    }
                    self.tombstone(id);
                }
                Tile::Tombstone => unreachable!("tombstone reached while skipping"),
            }
            cur = self.next_skip(id);
        }

        if let Some(h) = header {
            if let Some(footer) = cur.filter(|&f| self.tree.get(f).is_footer()) {
                self.clear_header(change, h);
                self.tombstone(h);
                self.tombstone(footer);
            }
        }
    }

    fn add_items(&mut self, change: &mut Change<M::Item, E, H>, position: usize, n_items: usize) {
        if n_items == 0 {
            return;
        }
        let Some((tile, offset)) = self.nth_node(position) else {
            let sections = self.sections_active();
            self.append_items(change, sections, n_items);
            return;
        };
        if offset > 0 {
            self.grow_run(tile, n_items);
            return;
        }

        // Inserted at a section start, the items land after its header.
        match self.previous_skip(tile) {
            Some(b) if self.tree.get(b).is_free_run() => self.grow_run(b, n_items),
            _ if self.tree.get(tile).is_free_run() => self.grow_run(tile, n_items),
            _ => {
                self.tree.insert_before(Some(tile), Tile::run(n_items));
            }
        }
    }

    fn append_items(&mut self, change: &mut Change<M::Item, E, H>, sections: bool, n_items: usize) {
        let mut last = self.tree.last();
        while let Some(id) = last.filter(|&id| self.tree.get(id).is_tombstone()) {
            last = self.tree.previous(id);
        }

        let Some(last) = last else {
            if sections {
                let header = self.tree.insert_after(
                    None,
                    Tile::Header {
                        matched: false,
                        element: None,
                    },
                );
                let footer = self
                    .tree
                    .insert_after(Some(header), Tile::Footer { matched: false });
                self.tree.insert_before(Some(footer), Tile::run(n_items));
            } else {
                self.tree.insert_after(None, Tile::run(n_items));
            }
            return;
        };

        if !sections {
            if self.tree.get(last).is_free_run() {
                self.grow_run(last, n_items);
            } else {
                self.tree.insert_after(None, Tile::run(n_items));
            }
            return;
        }

        assert!(
            self.tree.get(last).is_footer(),
            "section mode without a trailing footer"
        );
        if matches!(self.tree.get(last), Tile::Footer { matched: true }) {
            self.set_footer(last, false);
            let header = self.expect_header(last);
            self.unmatch_header(change, header);
        }
        match self
            .previous_skip(last)
            .filter(|&b| self.tree.get(b).is_free_run())
        {
            Some(run) => self.grow_run(run, n_items),
            None => {
                self.tree.insert_before(Some(last), Tile::run(n_items));
            }
        }
    }

    /// Drops every boundary between the item before `position` and the item after
    /// `position + n_items - 1`. The sections touching that stretch merge into one unmatched
    /// section.
    fn drop_boundaries(
        &mut self,
        change: &mut Change<M::Item, E, H>,
        position: usize,
        n_items: usize,
    ) {
        let start = position.saturating_sub(1);
        let end = position
            .saturating_add(n_items)
            .saturating_add(1)
            .min(self.n_items());
        if start >= end {
            return;
        }
        ltrace!(start, end, "drop boundaries");

        let (tile, offset) = self.nth_node(start).unwrap_or_else(|| unreachable!());
        let header = self.expect_header(tile);
        self.unmatch_header(change, header);

        let mut remaining = end - start + offset;
        let mut cur = Some(tile);
        while remaining > 0 {
            let id = self.expect_tile(cur);
            match self.tree.get(id) {
                Tile::Header { .. } => {
                    self.clear_header(change, id);
                    self.tombstone(id);
                }
                Tile::Footer { .. } => self.tombstone(id),
                Tile::Run { n_items, .. } => remaining -= remaining.min(*n_items),
                Tile::Tombstone => unreachable!("tombstone reached while skipping"),
            }
            cur = self.next_skip(id);
        }

        let next = self.expect_tile(cur);
        let footer = if self.tree.get(next).is_footer() {
            next
        } else {
            self.expect_footer(next)
        };
        self.set_footer(footer, false);
    }

    fn grow_run(&mut self, id: NodeId, n_items: usize) {
        match self.tree.get_mut(id) {
            Tile::Run {
                n_items: total,
                element: None,
            } => *total += n_items,
            other => panic!("cannot grow a {:?} tile", other.kind()),
        }
        self.tree.mark_dirty(id);
    }

    /// Puts elements of removed items back where the same items were re-added.
    ///
    /// Returns the new positions of every item that got its element back.
    fn restore_moved_items(
        &mut self,
        change: &mut Change<M::Item, E, H>,
        position: usize,
        added: usize,
    ) -> Vec<(M::Item, usize)> {
        let mut moved = Vec::new();
        let Some((mut tile, mut offset)) = self.nth_node(position) else {
            return moved;
        };

        for i in 0..added {
            let item = self.live_model().item(position + i);
            let Some(mut element) = change.find(&item) else {
                offset += 1;
                continue;
            };
            while offset >= self.tree.get(tile).n_items() {
                offset -= self.tree.get(tile).n_items();
                tile = self.expect_tile(self.tree.next(tile));
            }
            if offset > 0 {
                tile = self.split_node(tile, offset);
                offset = 0;
            }

            let target = tile;
            if self.tree.get(tile).n_items() == 1 {
                if let Some(next) = self.tree.next(tile) {
                    tile = next;
                }
            } else {
                tile = self.split_node(tile, 1);
            }

            let selected = self.live_model().is_selected(position + i);
            element.update(position + i, selected);
            self.put_element(target, element);
            ltrace!(to = position + i, "element follows moved item");
            moved.push((item, position + i));
        }
        moved
    }

    /// Re-tells every element at or after `from` its position and refreshes section headers.
    fn update_positions(&mut self, from: usize) {
        let model = match &self.model {
            Some(model) => model,
            None => return,
        };
        let n_items = model.n_items();
        let mut position = 0;
        let mut cur = self.tree.first();
        while let Some(id) = cur {
            match self.tree.get_mut(id) {
                Tile::Run {
                    element: Some(element),
                    ..
                } if position >= from => {
                    element.update(position, model.is_selected(position));
                }
                Tile::Header {
                    matched: true,
                    element: Some(header),
                } if position < n_items => {
                    let (start, end) = model.section(position);
                    if header.range() != Some((start, end)) {
                        header.bind(model.item(start), start, end);
                    }
                }
                _ => {}
            }
            position += self.tree.get(id).n_items();
            cur = self.tree.next(id);
        }
    }

    /// Collapses untracked boundaries and materializes every tracked window.
    fn ensure_items(&mut self, change: &mut Change<M::Item, E, H>) {
        self.release_items(change, false);
        self.materialize_tracked(change);
    }

    /// Walks the untracked ranges. Boundaries strictly inside one are dropped and the sections
    /// they touched merge into a single unmatched one. With `demote`, elements in the range go
    /// back to the pool as well.
    fn release_items(&mut self, change: &mut Change<M::Item, E, H>, demote: bool) {
        let Some(n_items) = self.model.as_ref().map(M::n_items) else {
            return;
        };
        if !demote && !self.sections_active() {
            return;
        }

        let mut position = 0;
        while position < n_items {
            let (query_n_items, tracked) = self.trackers.query_range(n_items, position);
            let end = position + query_n_items;
            if tracked {
                position = end;
                continue;
            }

            let (tile, offset) = self.nth_node(position).unwrap_or_else(|| unreachable!());
            let mut header = if offset == 0 {
                self.previous_skip(tile)
                    .filter(|&h| self.tree.get(h).is_header())
            } else {
                None
            };
            let mut deleted_section = false;
            let mut i = position - offset;
            let mut cur = Some(tile);
            while i < end {
                let id = self.expect_tile(cur);
                match self.tree.get(id) {
                    Tile::Run { n_items, .. } => {
                        i += *n_items;
                        if demote {
                            if let Some(element) = self.take_element(id) {
                                change.recycle(element);
                            }
                        }
                    }
                    Tile::Header { .. } => {
                        debug_assert!(deleted_section, "header without preceding footer");
                        self.clear_header(change, id);
                        self.tombstone(id);
                        deleted_section = true;
                        header = None;
                    }
                    Tile::Footer { .. } => {
                        self.tombstone(id);
                        deleted_section = true;
                        header = None;
                    }
                    Tile::Tombstone => unreachable!("tombstone reached while skipping"),
                }
                cur = self.next_skip(id);
            }

            if header.is_some() && cur.is_some_and(|f| self.tree.get(f).is_footer()) {
                deleted_section = true;
            }
            if deleted_section {
                let next = self.expect_tile(cur);
                let header = match header {
                    Some(header) => header,
                    None => self.expect_header(next),
                };
                self.unmatch_header(change, header);
                let footer = self.expect_footer(next);
                self.set_footer(footer, false);
            }
            position = end;
        }
    }

    /// Makes sure a section boundary sits right before `position` and returns its header.
    ///
    /// An existing boundary gets its header matched (when `header_matched`) and its footer
    /// matched (when `footer_matched`); a new one is created with exactly these states. At the
    /// end of the list only the last footer is touched and `None` is returned.
    fn insert_section(
        &mut self,
        position: usize,
        footer_matched: bool,
        header_matched: bool,
    ) -> Option<NodeId> {
        let Some((mut tile, offset)) = self.nth_node(position) else {
            if footer_matched {
                let mut footer = self.expect_tile(self.tree.last());
                if !self.tree.get(footer).is_footer() {
                    footer = self.expect_tile(self.previous_skip(footer));
                }
                self.set_footer(footer, true);
            }
            return None;
        };
        if offset > 0 {
            tile = self.split_node(tile, offset);
        }

        if let Some(header) = self
            .previous_skip(tile)
            .filter(|&h| self.tree.get(h).is_header())
        {
            if header_matched {
                if let Tile::Header { matched, .. } = self.tree.get_mut(header) {
                    *matched = true;
                }
            }
            if footer_matched {
                if let Some(footer) = self.previous_skip(header) {
                    self.set_footer(footer, true);
                }
            }
            return Some(header);
        }

        if let Some(prepare_section) = &self.options.prepare_section {
            prepare_section(TileId(tile), position);
        }
        let header = self.tree.insert_before(
            Some(tile),
            Tile::Header {
                matched: header_matched,
                element: None,
            },
        );
        self.tree.insert_before(
            Some(header),
            Tile::Footer {
                matched: footer_matched,
            },
        );
        ltrace!(position, "section boundary inserted");
        Some(header)
    }

    /// Resolves the unmatched section containing `position` and binds its header.
    ///
    /// Returns the end of the resolved section.
    fn resolve_section(&mut self, change: &mut Change<M::Item, E, H>, position: usize) -> usize {
        let (start, end) = self.live_model().section(position);
        let Some(header) = self.insert_section(start, false, true) else {
            unreachable!("section start {start} past the end of the list");
        };
        self.bind_header(change, header, start, end);
        self.insert_section(end, true, false);
        ltrace!(start, end, "section resolved");
        end
    }

    fn materialize_tracked(&mut self, change: &mut Change<M::Item, E, H>) {
        let Some(n_items) = self.model.as_ref().map(M::n_items) else {
            return;
        };
        let sections = self.sections_active();

        let mut position = 0;
        while position < n_items {
            let (query_n_items, tracked) = self.trackers.query_range(n_items, position);
            if !tracked {
                position += query_n_items;
                continue;
            }

            let (mut tile, offset) = self.nth_node(position).unwrap_or_else(|| unreachable!());
            if offset > 0 {
                tile = self.split_node(tile, offset);
            }
            if sections {
                let header = self.expect_header(tile);
                if matches!(self.tree.get(header), Tile::Header { matched: false, .. }) {
                    self.resolve_section(change, position);
                }
            }

            let mut i = 0;
            let mut cur = Some(tile);
            while i < query_n_items {
                let id = self.expect_tile(cur);
                match self.tree.get(id).kind() {
                    TileKind::Run => {
                        if self.tree.get(id).n_items() > 1 {
                            self.split_node(id, 1);
                        }
                        if !self.tree.get(id).is_materialized() {
                            let p = position + i;
                            let item = self.live_model().item(p);
                            let mut element = self.acquire_element(change, &item);
                            element.bind(p, item, self.live_model().is_selected(p));
                            self.put_element(id, element);
                        }
                        i += 1;
                    }
                    TileKind::Header { matched: false } => {
                        self.resolve_section(change, position + i);
                    }
                    TileKind::Header { matched: true } | TileKind::Footer { matched: true } => {}
                    TileKind::Footer { matched: false } => {
                        debug_assert!(false, "unmatched footer inside a tracked range");
                    }
                    TileKind::Tombstone => unreachable!("tombstone reached while skipping"),
                }
                cur = self.next_skip(id);
            }
            position += query_n_items;
        }

        let tree = &self.tree;
        for tracker in self.trackers.iter_mut() {
            let Some(p) = tracker.position else {
                continue;
            };
            tracker.item = nth_in(tree, p)
                .and_then(|(id, _)| tree.get(id).element())
                .and_then(|element| element.item().cloned());
            debug_assert!(tracker.item.is_some(), "tracked position {p} not materialized");
        }
    }

    fn gc_tiles(&mut self) {
        let mut cur = self.tree.first();
        while let Some(tile) = cur {
            cur = self.gc_tile(tile).and_then(|tile| self.tree.next(tile));
        }
    }

    /// Drops tombstones after `tile` and merges following free runs into it.
    ///
    /// Returns the tile the compaction stopped at, or `None` at the end of the list.
    fn gc_tile(&mut self, mut tile: NodeId) -> Option<NodeId> {
        loop {
            let mut next = self.tree.next(tile);
            while let Some(dead) = next.filter(|&n| self.tree.get(n).is_tombstone()) {
                self.tree.remove(dead);
                next = self.tree.next(tile);
            }

            match self.tree.get(tile) {
                Tile::Run { .. } => {
                    debug_assert!(self.tree.get(tile).n_items() > 0, "empty run");
                    if let Some(next) = next {
                        if self.merge_runs(tile, next) {
                            continue;
                        }
                    }
                    return Some(tile);
                }
                Tile::Tombstone => {
                    self.tree.remove(tile);
                    tile = next?;
                }
                Tile::Header { .. } | Tile::Footer { .. } => return Some(tile),
            }
        }
    }

    fn merge_runs(&mut self, first: NodeId, second: NodeId) -> bool {
        if !self.tree.get(first).is_free_run() || !self.tree.get(second).is_free_run() {
            return false;
        }
        let n_items = self.tree.get(second).n_items();
        self.grow_run(first, n_items);
        self.tree.remove(second);
        true
    }
}

impl<M, E, H> fmt::Debug for TileManager<M, E, H>
where
    M: ListModel,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileManager")
            .field("has_model", &self.model.is_some())
            .field("has_sections", &self.options.has_sections)
            .field("n_tiles", &self.tree.len())
            .field("n_trackers", &self.trackers.len())
            .field("n_bound", &self.n_bound)
            .field(
                "n_recycled",
                &(self.recycled_items.len() + self.recycled_headers.len()),
            )
            .finish_non_exhaustive()
    }
}

/// Order-statistics descent: the tile covering `position` and the offset into it.
fn nth_in<E, H>(tree: &RbTree<Tile<E, H>>, mut position: usize) -> Option<(NodeId, usize)> {
    let mut cur = tree.root();
    while let Some(id) = cur {
        if let Some(left) = tree.left(id) {
            let n = tree.augment(left).n_items;
            if position < n {
                cur = Some(left);
                continue;
            }
            position -= n;
        }
        let own = tree.get(id).n_items();
        if position < own {
            return Some((id, position));
        }
        position -= own;
        cur = tree.right(id);
    }
    None
}
