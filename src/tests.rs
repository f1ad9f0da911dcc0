use crate::tree::{Augmented, NodeId, RbTree};
use crate::*;

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use alloc::{format, vec};
use core::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Copy, Debug)]
struct Lcg(u64);

impl Lcg {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u64(&mut self) -> u64 {
        // Deterministic, dependency-free PRNG for tests.
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0
    }

    fn gen_range_u64(&mut self, start: u64, end_exclusive: u64) -> u64 {
        debug_assert!(start < end_exclusive);
        let span = end_exclusive - start;
        start + (self.next_u64() % span)
    }

    fn gen_range_usize(&mut self, start: usize, end_exclusive: usize) -> usize {
        self.gen_range_u64(start as u64, end_exclusive as u64) as usize
    }

    fn gen_range_u32(&mut self, start: u32, end_exclusive: u32) -> u32 {
        self.gen_range_u64(start as u64, end_exclusive as u64) as u32
    }

    fn gen_bool(&mut self) -> bool {
        (self.next_u64() & 1) == 1
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    id: u64,
    key: u64,
    selected: bool,
}

/// Every maximal run of equal keys is one section.
#[derive(Debug, Default)]
struct TestModel {
    entries: Vec<Entry>,
    sections: bool,
    next_id: u64,
}

impl TestModel {
    fn from_keys(keys: impl IntoIterator<Item = u64>, sections: bool) -> Self {
        let mut model = Self {
            sections,
            ..Self::default()
        };
        let keys: Vec<u64> = keys.into_iter().collect();
        model.insert(0, &keys);
        model
    }

    fn flat(n: usize) -> Self {
        Self::from_keys(vec![0; n], false)
    }

    /// One section per entry of `sizes`.
    fn grouped(sizes: &[usize]) -> Self {
        let keys = sizes
            .iter()
            .enumerate()
            .flat_map(|(key, &n)| core::iter::repeat_n(key as u64, n));
        Self::from_keys(keys, true)
    }

    fn insert(&mut self, position: usize, keys: &[u64]) {
        let new: Vec<Entry> = keys
            .iter()
            .map(|&key| {
                self.next_id += 1;
                Entry {
                    id: self.next_id,
                    key,
                    selected: false,
                }
            })
            .collect();
        self.entries.splice(position..position, new);
    }

    /// Inserts `n` items with `key` somewhere among the items with the same key and returns
    /// where they went.
    fn insert_sorted(&mut self, rng: &mut Lcg, key: u64, n: usize) -> usize {
        let lower = self.entries.partition_point(|e| e.key < key);
        let upper = self.entries.partition_point(|e| e.key <= key);
        let position = rng.gen_range_usize(lower, upper + 1);
        self.insert(position, &vec![key; n]);
        position
    }

    fn remove(&mut self, position: usize, n: usize) -> Vec<Entry> {
        self.entries.drain(position..position + n).collect()
    }
}

impl ListModel for TestModel {
    type Item = u64;

    fn n_items(&self) -> usize {
        self.entries.len()
    }

    fn item(&self, position: usize) -> u64 {
        self.entries[position].id
    }

    fn is_selected(&self, position: usize) -> bool {
        self.entries[position].selected
    }

    fn has_sections(&self) -> bool {
        self.sections
    }

    fn section(&self, position: usize) -> (usize, usize) {
        let key = self.entries[position].key;
        let mut start = position;
        while start > 0 && self.entries[start - 1].key == key {
            start -= 1;
        }
        let mut end = position + 1;
        while end < self.entries.len() && self.entries[end].key == key {
            end += 1;
        }
        (start, end)
    }
}

#[derive(Debug, Default)]
struct Counters {
    live: AtomicUsize,
    created: AtomicUsize,
}

impl Counters {
    fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    fn spawn(&self) -> usize {
        self.live.fetch_add(1, Ordering::Relaxed);
        self.created.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct TestElement {
    counters: Arc<Counters>,
    serial: usize,
    item: Option<u64>,
    position: Option<usize>,
    selected: bool,
}

impl TestElement {
    fn new(counters: &Arc<Counters>) -> Self {
        Self {
            counters: Arc::clone(counters),
            serial: counters.spawn(),
            item: None,
            position: None,
            selected: false,
        }
    }
}

impl Drop for TestElement {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ItemElement<u64> for TestElement {
    fn bind(&mut self, position: usize, item: u64, selected: bool) {
        self.item = Some(item);
        self.position = Some(position);
        self.selected = selected;
    }

    fn update(&mut self, position: usize, selected: bool) {
        self.position = Some(position);
        self.selected = selected;
    }

    fn item(&self) -> Option<&u64> {
        self.item.as_ref()
    }

    fn position(&self) -> Option<usize> {
        self.position
    }

    fn unbind(&mut self) {
        self.item = None;
        self.position = None;
        self.selected = false;
    }
}

#[derive(Debug)]
struct TestHeader {
    counters: Arc<Counters>,
    item: Option<u64>,
    range: Option<(usize, usize)>,
}

impl TestHeader {
    fn new(counters: &Arc<Counters>) -> Self {
        counters.spawn();
        Self {
            counters: Arc::clone(counters),
            item: None,
            range: None,
        }
    }
}

impl Drop for TestHeader {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl HeaderElement<u64> for TestHeader {
    fn bind(&mut self, item: u64, start: usize, end: usize) {
        self.item = Some(item);
        self.range = Some((start, end));
    }

    fn range(&self) -> Option<(usize, usize)> {
        self.range
    }

    fn unbind(&mut self) {
        self.item = None;
        self.range = None;
    }
}

type Manager = TileManager<TestModel, TestElement, TestHeader>;

fn options(counters: &Arc<Counters>) -> TileManagerOptions<TestElement, TestHeader> {
    let items = Arc::clone(counters);
    let headers = Arc::clone(counters);
    TileManagerOptions::new_with_headers(
        move || TestElement::new(&items),
        move || TestHeader::new(&headers),
    )
}

fn manager(model: TestModel) -> (Manager, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let sections = model.sections;
    let mut m = TileManager::new(options(&counters).with_has_sections(sections));
    m.set_model(Some(model));
    (m, counters)
}

/// Tile sequence as tokens: `R<n>` free run, `E` materialized run, `H`/`h` matched/unmatched
/// header, `F`/`f` footer, `x` tombstone.
fn shape(m: &Manager) -> String {
    let tokens: Vec<String> = m
        .tiles()
        .map(|(_, tile)| match tile {
            Tile::Run {
                n_items,
                element: None,
            } => format!("R{n_items}"),
            Tile::Run { .. } => "E".to_string(),
            Tile::Header { matched: true, .. } => "H".to_string(),
            Tile::Header { .. } => "h".to_string(),
            Tile::Footer { matched: true } => "F".to_string(),
            Tile::Footer { .. } => "f".to_string(),
            Tile::Tombstone => "x".to_string(),
        })
        .collect();
    tokens.join(" ")
}

/// Like [`shape`], but adjacent runs are summed regardless of materialization and tombstones
/// are skipped.
fn merged(m: &Manager) -> String {
    let mut tokens: Vec<String> = Vec::new();
    let mut run = 0;
    for (_, tile) in m.tiles() {
        match tile.kind() {
            TileKind::Run => {
                run += tile.n_items();
                continue;
            }
            TileKind::Tombstone => continue,
            _ => {}
        }
        if run > 0 {
            tokens.push(format!("R{run}"));
            run = 0;
        }
        tokens.push(
            match tile.kind() {
                TileKind::Header { matched: true } => "H",
                TileKind::Header { matched: false } => "h",
                TileKind::Footer { matched: true } => "F",
                _ => "f",
            }
            .to_string(),
        );
    }
    if run > 0 {
        tokens.push(format!("R{run}"));
    }
    tokens.join(" ")
}

/// Structural invariants plus element bookkeeping.
fn check(m: &Manager, counters: &Counters) {
    m.tree.check();
    if let Err(err) = m.validate() {
        panic!("{err}: {}", shape(m));
    }
    assert_eq!(
        counters.live(),
        m.n_materialized() + m.n_recycled(),
        "leaked or lost elements"
    );
    let model = m.model().expect("model");
    let mut position = 0;
    for (_, tile) in m.tiles() {
        if let Some(element) = tile.element() {
            assert_eq!(
                element.selected,
                model.is_selected(position),
                "stale selection at {position}"
            );
        }
        position += tile.n_items();
    }
}

fn header_ranges(m: &Manager) -> Vec<Option<(usize, usize)>> {
    m.tiles()
        .filter_map(|(_, tile)| tile.header_element())
        .map(|header| header.range)
        .collect()
}

fn tracked_positions(windows: &[(usize, usize, usize)], n_items: usize) -> Vec<usize> {
    let mut tracked = vec![false; n_items];
    for &(position, n_before, n_after) in windows {
        let len = (n_before + n_after + 1).min(n_items);
        let start = (position.max(n_before) - n_before).min(n_items - len);
        for slot in &mut tracked[start..start + len] {
            *slot = true;
        }
    }
    (0..n_items).filter(|&p| tracked[p]).collect()
}

#[derive(Debug)]
struct Counted(usize);

impl Augmented for Counted {
    type Augment = usize;

    fn augment(&self, left: Option<&usize>, right: Option<&usize>) -> usize {
        self.0 + left.copied().unwrap_or(0) + right.copied().unwrap_or(0)
    }
}

#[test]
fn tree_random_inserts_and_removes_stay_balanced() {
    let mut rng = Lcg::new(7);
    let mut tree = RbTree::new();
    let mut order: Vec<(NodeId, usize)> = Vec::new();

    for _ in 0..2_000 {
        if order.is_empty() || rng.gen_range_u32(0, 3) != 0 {
            let value = rng.gen_range_usize(0, 100);
            let at = rng.gen_range_usize(0, order.len() + 1);
            let id = if at == order.len() {
                if rng.gen_bool() {
                    tree.insert_after(None, Counted(value))
                } else {
                    tree.insert_after(order.last().map(|&(id, _)| id), Counted(value))
                }
            } else if rng.gen_bool() {
                tree.insert_before(Some(order[at].0), Counted(value))
            } else if at == 0 {
                tree.insert_before(None, Counted(value))
            } else {
                tree.insert_after(Some(order[at - 1].0), Counted(value))
            };
            order.insert(at, (id, value));
        } else {
            let at = rng.gen_range_usize(0, order.len());
            let (id, value) = order.remove(at);
            assert_eq!(tree.remove(id).0, value);
        }

        tree.check();
        let seen: Vec<usize> = tree.iter().map(|(_, c)| c.0).collect();
        let expected: Vec<usize> = order.iter().map(|&(_, v)| v).collect();
        assert_eq!(seen, expected);
        let total: usize = expected.iter().sum();
        assert_eq!(tree.root().map_or(0, |root| *tree.augment(root)), total);

        let bound = 2 * (usize::BITS - (tree.len() + 1).leading_zeros()) as usize;
        assert!(
            tree.height() <= bound,
            "height {} over {bound} for {} nodes",
            tree.height(),
            tree.len()
        );
    }
}

#[test]
fn tree_walks_both_directions() {
    let mut tree = RbTree::new();
    let mut last = None;
    for value in 0..100 {
        last = Some(tree.insert_after(last, Counted(value)));
    }
    assert_eq!(tree.len(), 100);

    let mut backwards = Vec::new();
    let mut cur = tree.last();
    while let Some(id) = cur {
        backwards.push(tree.get(id).0);
        cur = tree.previous(id);
    }
    let forwards: Vec<usize> = backwards.iter().rev().copied().collect();
    assert_eq!(forwards, (0..100).collect::<Vec<_>>());
    assert_eq!(tree.first().map(|id| tree.get(id).0), Some(0));
}

#[test]
fn tree_mark_dirty_refreshes_augments() {
    let mut tree = RbTree::new();
    let ids: Vec<NodeId> = (0..20)
        .map(|value| tree.insert_after(None, Counted(value)))
        .collect();
    tree.get_mut(ids[7]).0 = 1_000;
    tree.mark_dirty(ids[7]);
    tree.check();
    let expected = (0..20).sum::<usize>() - 7 + 1_000;
    assert_eq!(tree.root().map(|root| *tree.augment(root)), Some(expected));
}

#[test]
fn tree_remove_all_finalizes_in_order() {
    let mut tree = RbTree::new();
    for value in (0..50).rev() {
        tree.insert_before(None, Counted(value));
    }
    let mut seen = Vec::new();
    tree.remove_all(|c| seen.push(c.0));
    assert_eq!(seen, (0..50).collect::<Vec<_>>());
    assert_eq!(tree.len(), 0);
    assert_eq!(tree.root(), None);
    tree.check();
}

#[test]
fn tracker_materializes_single_item() {
    let (mut m, counters) = manager(TestModel::flat(10));
    assert_eq!(shape(&m), "R10");

    let t = m.tracker_create();
    m.tracker_set_window(t, 3, 0, 0);
    assert_eq!(shape(&m), "R3 E R6");
    assert_eq!(m.tracker_position(t), Some(3));
    assert_eq!(m.element_at(3).and_then(|e| e.item), Some(4));
    check(&m, &counters);

    m.gc();
    assert_eq!(shape(&m), "R3 E R6");
    check(&m, &counters);
}

#[test]
fn destroyed_tracker_is_released_by_gc() {
    let (mut m, counters) = manager(TestModel::flat(10));
    let t = m.tracker_create();
    m.tracker_set_window(t, 3, 0, 0);

    m.tracker_destroy(t);
    assert_eq!(m.n_trackers(), 0);
    assert_eq!(shape(&m), "R3 E R6");

    m.gc();
    assert_eq!(shape(&m), "R10");
    assert_eq!(m.n_materialized(), 0);
    assert_eq!(m.n_recycled(), 1);
    assert_eq!(counters.live(), 1);
    check(&m, &counters);
}

#[test]
fn window_is_clamped_to_the_list_end() {
    let (mut m, counters) = manager(TestModel::flat(10));
    let t = m.tracker_create();
    m.tracker_set_window(t, 9, 0, 3);
    assert_eq!(shape(&m), "R6 E E E E");
    assert_eq!(
        m.tracker_window(t),
        Some(TrackerWindow {
            position: 9,
            n_before: 0,
            n_after: 3,
        })
    );

    m.tracker_set_window(t, 25, 1, 1);
    assert_eq!(m.tracker_position(t), Some(9));
    check(&m, &counters);
}

#[test]
fn scrolling_reuses_elements() {
    let (mut m, counters) = manager(TestModel::flat(1_000));
    let t = m.tracker_create();
    for position in (0..1_000).step_by(7) {
        m.tracker_set_window(t, position, 5, 10);
        m.gc();
        check(&m, &counters);
    }
    assert!(
        counters.created() <= 2 * 16,
        "created {} elements for a 16 item window",
        counters.created()
    );
}

#[test]
fn pool_keeps_at_most_max_recycled() {
    let counters = Arc::new(Counters::default());
    let mut m = TileManager::new(options(&counters).with_max_recycled(2));
    m.set_model(Some(TestModel::flat(20)));
    let t = m.tracker_create();
    m.tracker_set_window(t, 5, 0, 9);
    assert_eq!(m.n_materialized(), 10);

    m.tracker_destroy(t);
    m.gc();
    assert_eq!(m.n_recycled(), 2);
    assert_eq!(counters.live(), 2);
    check(&m, &counters);
}

#[test]
fn gc_is_idempotent_and_keeps_tracked_windows() {
    for sections in [false, true] {
        let model = if sections {
            TestModel::grouped(&[30, 50, 20, 40, 60])
        } else {
            TestModel::flat(200)
        };
        let (mut m, counters) = manager(model);
        let a = m.tracker_create();
        let b = m.tracker_create();
        m.tracker_set_window(a, 50, 5, 5);
        m.tracker_set_window(b, 120, 3, 10);

        m.model_mut().expect("model").remove(10, 5);
        m.on_items_changed(10, 5, 0);
        m.gc();
        m.validate_compact().expect("compact after gc");
        let once = m.summary();

        m.gc();
        assert_eq!(m.summary(), once);
        check(&m, &counters);

        let expected = tracked_positions(&[(45, 5, 5), (115, 3, 10)], 195);
        for &position in &expected {
            assert!(m.element_at(position).is_some(), "{position} not materialized");
        }
        let headers = m
            .tiles()
            .filter(|(_, tile)| tile.header_element().is_some())
            .count();
        assert_eq!(m.n_materialized(), expected.len() + headers);
    }
}

#[test]
fn removing_tracked_item_invalidates_tracker() {
    let (mut m, counters) = manager(TestModel::flat(10));
    let t = m.tracker_create();
    m.tracker_set_window(t, 4, 0, 0);
    assert_eq!(shape(&m), "R4 E R5");

    m.model_mut().expect("model").remove(4, 1);
    m.on_items_changed(4, 1, 0);
    assert_eq!(m.tracker_position(t), None);
    assert_eq!(m.tracker_window(t), None);
    assert_eq!(shape(&m), "R4 x R5");
    assert_eq!(m.n_materialized(), 0);
    check(&m, &counters);

    m.gc();
    assert_eq!(shape(&m), "R9");
    check(&m, &counters);
}

#[test]
fn trackers_shift_with_insertions_and_removals() {
    let (mut m, counters) = manager(TestModel::flat(10));
    let t = m.tracker_create();
    m.tracker_set_window(t, 6, 1, 1);

    m.model_mut().expect("model").insert(2, &[0, 0, 0]);
    m.on_items_changed(2, 0, 3);
    assert_eq!(m.tracker_position(t), Some(9));
    check(&m, &counters);

    m.model_mut().expect("model").remove(0, 4);
    m.on_items_changed(0, 4, 0);
    assert_eq!(m.tracker_position(t), Some(5));
    check(&m, &counters);

    // Changes after the tracked item leave it alone.
    m.model_mut().expect("model").insert(7, &[0]);
    m.on_items_changed(7, 0, 1);
    assert_eq!(m.tracker_position(t), Some(5));
    check(&m, &counters);
}

#[test]
fn moved_item_keeps_its_element() {
    let (mut m, counters) = manager(TestModel::flat(10));
    let t = m.tracker_create();
    m.tracker_set_window(t, 4, 0, 0);
    let serial = m.element_at(4).map(|e| e.serial);
    let item = m.element_at(4).and_then(|e| e.item);

    m.model_mut().expect("model").entries[2..8].reverse();
    m.on_items_changed(2, 6, 6);

    assert_eq!(m.tracker_position(t), Some(5));
    assert_eq!(m.element_at(5).map(|e| e.serial), serial);
    assert_eq!(m.element_at(5).and_then(|e| e.item), item);
    assert_eq!(counters.created(), 1);
    check(&m, &counters);
}

#[test]
fn duplicate_items_recycle_the_extra_element() {
    let mut model = TestModel::flat(4);
    model.entries[2].id = model.entries[1].id;
    let (mut m, counters) = manager(model);
    let t = m.tracker_create();
    m.tracker_set_window(t, 0, 0, 3);
    assert_eq!(m.n_materialized(), 4);

    m.model_mut().expect("model").remove(1, 2);
    m.on_items_changed(1, 2, 0);
    assert_eq!(m.n_materialized(), 2);
    assert_eq!(m.n_recycled(), 2);
    check(&m, &counters);
}

#[test]
fn pending_tracker_starts_at_first_item() {
    let (mut m, counters) = manager(TestModel::flat(0));
    let t = m.tracker_create();
    m.tracker_set_window(t, 5, 0, 2);
    assert_eq!(m.tracker_position(t), None);
    assert_eq!(m.n_tiles(), 0);

    m.model_mut().expect("model").insert(0, &[0; 10]);
    m.on_items_changed(0, 0, 10);
    assert_eq!(m.tracker_position(t), Some(0));
    assert_eq!(shape(&m), "E E E R7");
    check(&m, &counters);
}

#[test]
fn set_model_unsets_trackers() {
    let (mut m, counters) = manager(TestModel::flat(10));
    let t = m.tracker_create();
    m.tracker_set_window(t, 3, 0, 0);

    let old = m.set_model(Some(TestModel::flat(5)));
    assert_eq!(old.map(|model| model.n_items()), Some(10));
    assert_eq!(m.tracker_position(t), None);
    assert_eq!(shape(&m), "R5");
    assert_eq!(m.n_recycled(), 1);
    assert_eq!(counters.live(), 1);
    check(&m, &counters);

    // Without a model there is nothing to track.
    assert!(m.set_model(None).is_some());
    m.tracker_set_window(t, 0, 0, 0);
    assert_eq!(m.tracker_position(t), None);
    assert_eq!(m.n_items(), 0);
}

#[test]
fn selection_changes_reach_materialized_items() {
    let (mut m, counters) = manager(TestModel::flat(10));
    let t = m.tracker_create();
    m.tracker_set_window(t, 0, 0, 4);

    m.model_mut().expect("model").entries[2].selected = true;
    m.on_selection_changed(2, 1);
    assert_eq!(m.element_at(2).map(|e| e.selected), Some(true));
    assert_eq!(m.element_at(3).map(|e| e.selected), Some(false));

    // Selection outside the window only matters once it gets materialized.
    m.model_mut().expect("model").entries[8].selected = true;
    m.on_selection_changed(8, 1);
    m.tracker_set_window(t, 8, 0, 0);
    assert_eq!(m.element_at(8).map(|e| e.selected), Some(true));
    check(&m, &counters);
}

#[test]
fn split_callback_sees_every_split() {
    let splits = Arc::new(AtomicUsize::new(0));
    let counters = Arc::new(Counters::default());
    let seen = Arc::clone(&splits);
    let opts = options(&counters).with_split(Some(move |_kept, _created, _n| {
        seen.fetch_add(1, Ordering::Relaxed);
    }));
    let mut m = TileManager::new(opts);
    m.set_model(Some(TestModel::flat(10)));

    let t = m.tracker_create();
    m.tracker_set_window(t, 3, 0, 0);
    assert_eq!(splits.load(Ordering::Relaxed), 2);

    let (tile, offset) = m.nth(4).expect("run after the tracked item");
    assert_eq!(offset, 0);
    let second = m.split(tile, 2);
    assert_eq!(m.tile_position(second), 6);
    assert_eq!(splits.load(Ordering::Relaxed), 3);
    assert_eq!(shape(&m), "R3 E R2 R4");

    m.gc();
    assert_eq!(shape(&m), "R3 E R6");
    check(&m, &counters);
}

#[test]
#[should_panic(expected = "destroyed tracker")]
fn set_window_on_destroyed_tracker_panics() {
    let (mut m, _counters) = manager(TestModel::flat(10));
    let t = m.tracker_create();
    m.tracker_destroy(t);
    m.tracker_set_window(t, 0, 0, 0);
}

#[test]
#[should_panic(expected = "out of range")]
fn out_of_range_change_panics() {
    let (mut m, _counters) = manager(TestModel::flat(10));
    m.model_mut().expect("model").insert(10, &[0]);
    m.on_items_changed(8, 3, 4);
}

#[test]
fn sections_resolve_around_trackers() {
    let (mut m, counters) = manager(TestModel::grouped(&[5]));
    assert_eq!(shape(&m), "h R5 f");
    check(&m, &counters);

    let t = m.tracker_create();
    m.tracker_set_window(t, 0, 0, 10);
    assert_eq!(merged(&m), "H R5 F");
    assert_eq!(shape(&m), "H E E E E E F");
    check(&m, &counters);

    let model = m.model_mut().expect("model");
    model.insert(5, &[1, 1]);
    m.on_items_changed(5, 0, 2);
    assert_eq!(merged(&m), "H R5 F H R2 F");
    check(&m, &counters);
}

#[test]
fn empty_section_model_has_no_boundaries() {
    let (mut m, counters) = manager(TestModel::from_keys(Vec::new(), true));
    assert_eq!(m.n_tiles(), 0);

    m.model_mut().expect("model").insert(0, &[3, 3, 3]);
    m.on_items_changed(0, 0, 3);
    assert_eq!(shape(&m), "h R3 f");

    m.model_mut().expect("model").remove(0, 3);
    m.on_items_changed(0, 3, 0);
    m.gc();
    assert_eq!(m.n_tiles(), 0);
    check(&m, &counters);
}

#[test]
fn prepare_section_runs_before_each_new_boundary() {
    let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
    let counters = Arc::new(Counters::default());
    let seen = Arc::clone(&calls);
    let opts = options(&counters)
        .with_has_sections(true)
        .with_prepare_section(Some(move |_tile, position| {
            if let Ok(mut calls) = seen.lock() {
                calls.push(position);
            }
        }));
    let mut m = TileManager::new(opts);
    m.set_model(Some(TestModel::grouped(&[5, 5])));

    let t = m.tracker_create();
    m.tracker_set_window(t, 7, 0, 0);
    assert_eq!(shape(&m), "h R5 f H R2 E R2 F");
    assert_eq!(*calls.lock().expect("lock"), vec![5]);
    check(&m, &counters);
}

#[test]
fn toggling_sections_rebuilds_boundaries() {
    let (mut m, counters) = manager(TestModel::grouped(&[5, 5]));
    let t = m.tracker_create();
    m.tracker_set_window(t, 0, 0, 9);
    assert_eq!(merged(&m), "H R5 F H R5 F");
    assert_eq!(m.n_materialized(), 12);

    m.set_has_sections(false);
    assert!(!m.has_sections());
    assert_eq!(merged(&m), "R10");
    assert_eq!(m.n_materialized(), 10);
    check(&m, &counters);

    m.set_has_sections(true);
    assert_eq!(merged(&m), "H R5 F H R5 F");
    check(&m, &counters);

    m.tracker_destroy(t);
    m.gc();
    assert_eq!(shape(&m), "h R10 f");
    m.validate_compact().expect("compact");
    check(&m, &counters);
}

#[test]
fn sections_changed_reresolves_boundaries() {
    let (mut m, counters) = manager(TestModel::grouped(&[5, 5]));
    let t = m.tracker_create();
    m.tracker_set_window(t, 0, 0, 9);
    assert_eq!(merged(&m), "H R5 F H R5 F");

    let model = m.model_mut().expect("model");
    model.entries[3].key = 1;
    model.entries[4].key = 1;
    m.on_sections_changed(3, 3);
    assert_eq!(merged(&m), "H R3 F H R7 F");
    check(&m, &counters);
    assert_eq!(header_ranges(&m), vec![Some((0, 3)), Some((3, 10))]);
}

#[test]
fn sections_changed_drops_the_boundary_before_the_range() {
    let (mut m, counters) = manager(TestModel::from_keys([0, 0, 1, 1], true));
    let t = m.tracker_create();
    m.tracker_set_window(t, 0, 0, 3);
    assert_eq!(merged(&m), "H R2 F H R2 F");

    m.model_mut().expect("model").entries[2].key = 0;
    m.on_sections_changed(2, 1);
    assert_eq!(merged(&m), "H R3 F H R1 F");
    assert_eq!(header_ranges(&m), vec![Some((0, 3)), Some((3, 4))]);
    check(&m, &counters);
}

#[test]
fn removing_a_separating_section_joins_its_neighbors() {
    let (mut m, counters) = manager(TestModel::from_keys([0, 0, 1, 0, 0], true));
    let t = m.tracker_create();
    m.tracker_set_window(t, 0, 0, 4);
    assert_eq!(shape(&m), "H E E F H E F H E E F");

    m.model_mut().expect("model").remove(2, 1);
    m.on_items_changed(2, 1, 0);
    assert_eq!(merged(&m), "H R4 F");
    assert_eq!(header_ranges(&m), vec![Some((0, 4))]);
    check(&m, &counters);

    m.gc();
    m.validate_compact().expect("compact");
    assert_eq!(shape(&m), "H E E E E F");
    check(&m, &counters);
}

#[test]
fn inserting_another_key_splits_the_section() {
    let (mut m, counters) = manager(TestModel::from_keys([0, 0, 0, 0], true));
    let t = m.tracker_create();
    m.tracker_set_window(t, 0, 0, 4);
    assert_eq!(shape(&m), "H E E E E F");

    m.model_mut().expect("model").insert(2, &[1]);
    m.on_items_changed(2, 0, 1);
    assert_eq!(merged(&m), "H R2 F H R1 F H R2 F");
    assert_eq!(
        header_ranges(&m),
        vec![Some((0, 2)), Some((2, 3)), Some((3, 5))]
    );
    check(&m, &counters);
}

#[test]
fn validate_reports_boundaries_off_section_starts() {
    let (mut m, _counters) = manager(TestModel::grouped(&[5, 5]));
    let t = m.tracker_create();
    m.tracker_set_window(t, 7, 0, 0);
    assert_eq!(m.validate(), Ok(()));

    // Not reported to the manager.
    m.model_mut().expect("model").entries[5].key = 0;
    assert_eq!(
        m.validate(),
        Err(InvariantError::MisplacedFooter {
            tile: 2,
            position: 5
        })
    );
}

#[test]
fn header_follows_section_start() {
    let (mut m, counters) = manager(TestModel::grouped(&[5, 5]));
    let t = m.tracker_create();
    m.tracker_set_window(t, 7, 0, 0);

    // Shrink the tracked section from the front: the header stays and learns its new range.
    m.model_mut().expect("model").remove(5, 1);
    m.on_items_changed(5, 1, 0);
    assert_eq!(m.tracker_position(t), Some(6));
    check(&m, &counters);

    // Grow the preceding section: the tracked one moves back.
    m.model_mut().expect("model").insert(0, &[0, 0]);
    m.on_items_changed(0, 0, 2);
    assert_eq!(m.tracker_position(t), Some(8));
    check(&m, &counters);
}

#[test]
fn lookup_helpers_agree() {
    let (mut m, counters) = manager(TestModel::grouped(&[5, 5]));
    let t = m.tracker_create();
    m.tracker_set_window(t, 7, 0, 0);
    assert_eq!(shape(&m), "h R5 f H R2 E R2 F");
    check(&m, &counters);

    for position in 0..10 {
        let (tile, offset) = m.nth(position).expect("covered");
        assert_eq!(m.tile_position(tile) + offset, position);
        assert!(offset < m.tile(tile).n_items());
    }
    assert_eq!(m.nth(10), None);

    let (tile, offset) = m.nth(6).expect("covered");
    assert_eq!((m.tile_position(tile), offset), (5, 1));
    let header = m.header_of(tile).expect("header");
    assert_eq!(m.tile(header).kind(), TileKind::Header { matched: true });
    assert_eq!(
        m.tile(header).header_element().and_then(|h| h.range),
        Some((5, 10))
    );
    assert_eq!(m.tile(header).header_element().and_then(|h| h.item), Some(6));
    let footer = m.footer_of(tile).expect("footer");
    assert_eq!(Some(footer), m.last());
    assert_eq!(m.next(footer), None);

    let first = m.first().expect("first");
    assert_eq!(m.tile(first).kind(), TileKind::Header { matched: false });
    assert_eq!(m.previous(first), None);
    let (run, _) = m.nth(0).expect("covered");
    assert_eq!(m.header_of(run), Some(first));

    assert_eq!(m.element_at(7).and_then(|e| e.item), Some(8));
    assert!(m.element_at(6).is_none());

    let (flat, _counters) = manager(TestModel::flat(3));
    let (run, _) = flat.nth(1).expect("covered");
    assert_eq!(flat.header_of(run), None);
    assert_eq!(flat.footer_of(run), None);
}

#[test]
fn random_edits_keep_invariants() {
    for seed in 0..8u64 {
        let mut rng = Lcg::new(0x5eed ^ (seed << 8));
        let initial = rng.gen_range_usize(0, 50);
        let (mut m, counters) = manager(TestModel::flat(initial));
        let mut trackers: Vec<TrackerId> = Vec::new();

        for _ in 0..300 {
            let n_items = m.n_items();
            match rng.gen_range_u32(0, 9) {
                0 | 1 => {
                    let position = rng.gen_range_usize(0, n_items + 1);
                    let added = rng.gen_range_usize(1, 12);
                    m.model_mut()
                        .expect("model")
                        .insert(position, &vec![0; added]);
                    m.on_items_changed(position, 0, added);
                }
                2 if n_items > 0 => {
                    let position = rng.gen_range_usize(0, n_items);
                    let removed = rng.gen_range_usize(1, (n_items - position).min(10) + 1);
                    m.model_mut().expect("model").remove(position, removed);
                    m.on_items_changed(position, removed, 0);
                }
                3 if n_items > 0 => {
                    // Reorder a range and add some fresh items to it.
                    let position = rng.gen_range_usize(0, n_items);
                    let removed = rng.gen_range_usize(1, (n_items - position).min(12) + 1);
                    let extra = rng.gen_range_usize(0, 3);
                    let model = m.model_mut().expect("model");
                    let mut entries = model.remove(position, removed);
                    entries.reverse();
                    model.entries.splice(position..position, entries);
                    model.insert(position + removed, &vec![0; extra]);
                    m.on_items_changed(position, removed, removed + extra);
                }
                4 | 5 => {
                    if trackers.len() < 3 || rng.gen_bool() {
                        trackers.push(m.tracker_create());
                    }
                    let t = trackers[rng.gen_range_usize(0, trackers.len())];
                    let position = rng.gen_range_usize(0, n_items.max(1) + 5);
                    let n_before = rng.gen_range_usize(0, 6);
                    let n_after = rng.gen_range_usize(0, 10);
                    m.tracker_set_window(t, position, n_before, n_after);
                }
                6 if !trackers.is_empty() => {
                    let t = trackers.swap_remove(rng.gen_range_usize(0, trackers.len()));
                    m.tracker_destroy(t);
                }
                7 => {
                    m.gc();
                    m.validate_compact().expect("compact after gc");
                    let windows: Vec<(usize, usize, usize)> = trackers
                        .iter()
                        .filter_map(|&t| m.tracker_window(t))
                        .map(|w| (w.position, w.n_before, w.n_after))
                        .collect();
                    let tracked = tracked_positions(&windows, m.n_items());
                    assert_eq!(m.n_materialized(), tracked.len());
                }
                8 if n_items > 0 => {
                    let position = rng.gen_range_usize(0, n_items);
                    let n = rng.gen_range_usize(1, (n_items - position).min(4) + 1);
                    let model = m.model_mut().expect("model");
                    for entry in &mut model.entries[position..position + n] {
                        entry.selected = !entry.selected;
                    }
                    m.on_selection_changed(position, n);
                }
                _ => {}
            }
            check(&m, &counters);
        }
    }
}

#[test]
fn random_section_edits_keep_invariants() {
    for seed in 0..8u64 {
        let mut rng = Lcg::new(0xc0ffee ^ (seed << 16));
        let mut keys: Vec<u64> = (0..rng.gen_range_usize(0, 40))
            .map(|_| rng.gen_range_u64(0, 6))
            .collect();
        keys.sort_unstable();
        let (mut m, counters) = manager(TestModel::from_keys(keys, true));
        let mut trackers: Vec<TrackerId> = Vec::new();

        for _ in 0..300 {
            let n_items = m.n_items();
            match rng.gen_range_u32(0, 10) {
                0 | 1 => {
                    let key = rng.gen_range_u64(0, 8);
                    let added = rng.gen_range_usize(1, 6);
                    let position =
                        m.model_mut()
                            .expect("model")
                            .insert_sorted(&mut rng, key, added);
                    m.on_items_changed(position, 0, added);
                }
                2 if n_items > 0 => {
                    let position = rng.gen_range_usize(0, n_items);
                    let removed = rng.gen_range_usize(1, (n_items - position).min(8) + 1);
                    m.model_mut().expect("model").remove(position, removed);
                    m.on_items_changed(position, removed, 0);
                }
                3 | 4 => {
                    if trackers.len() < 3 || rng.gen_bool() {
                        trackers.push(m.tracker_create());
                    }
                    let t = trackers[rng.gen_range_usize(0, trackers.len())];
                    let position = rng.gen_range_usize(0, n_items.max(1) + 3);
                    let n_before = rng.gen_range_usize(0, 4);
                    let n_after = rng.gen_range_usize(0, 8);
                    m.tracker_set_window(t, position, n_before, n_after);
                }
                5 if !trackers.is_empty() => {
                    let t = trackers.swap_remove(rng.gen_range_usize(0, trackers.len()));
                    m.tracker_destroy(t);
                }
                6 => {
                    m.gc();
                    m.validate_compact().expect("compact after gc");
                }
                7 if n_items > 0 => {
                    // Nothing actually changed, the manager must cope with spurious reports.
                    let position = rng.gen_range_usize(0, n_items);
                    let n = rng.gen_range_usize(1, n_items - position + 1);
                    m.on_sections_changed(position, n);
                }
                8 => {
                    let on = !m.has_sections();
                    m.set_has_sections(on);
                }
                9 if n_items > 0 => {
                    let position = rng.gen_range_usize(0, n_items);
                    let model = m.model_mut().expect("model");
                    model.entries[position].selected = !model.entries[position].selected;
                    m.on_selection_changed(position, 1);
                }
                _ => {}
            }
            check(&m, &counters);
        }
    }
}

#[test]
fn random_unsorted_section_edits_keep_invariants() {
    for seed in 0..8u64 {
        let mut rng = Lcg::new(0xbead ^ (seed << 12));
        let keys: Vec<u64> = (0..rng.gen_range_usize(0, 40))
            .map(|_| rng.gen_range_u64(0, 3))
            .collect();
        let (mut m, counters) = manager(TestModel::from_keys(keys, true));
        let mut trackers: Vec<TrackerId> = Vec::new();

        for _ in 0..400 {
            let n_items = m.n_items();
            match rng.gen_range_u32(0, 10) {
                0 | 1 => {
                    let position = rng.gen_range_usize(0, n_items + 1);
                    let keys: Vec<u64> = (0..rng.gen_range_usize(1, 5))
                        .map(|_| rng.gen_range_u64(0, 3))
                        .collect();
                    m.model_mut().expect("model").insert(position, &keys);
                    m.on_items_changed(position, 0, keys.len());
                }
                2 if n_items > 0 => {
                    let position = rng.gen_range_usize(0, n_items);
                    let removed = rng.gen_range_usize(1, (n_items - position).min(6) + 1);
                    m.model_mut().expect("model").remove(position, removed);
                    m.on_items_changed(position, removed, 0);
                }
                3 if n_items > 0 => {
                    // Reverse a range, append fresh items to it.
                    let position = rng.gen_range_usize(0, n_items);
                    let removed = rng.gen_range_usize(1, (n_items - position).min(8) + 1);
                    let keys: Vec<u64> = (0..rng.gen_range_usize(0, 3))
                        .map(|_| rng.gen_range_u64(0, 3))
                        .collect();
                    let model = m.model_mut().expect("model");
                    let mut entries = model.remove(position, removed);
                    entries.reverse();
                    model.entries.splice(position..position, entries);
                    model.insert(position + removed, &keys);
                    m.on_items_changed(position, removed, removed + keys.len());
                }
                4 if n_items > 0 => {
                    let position = rng.gen_range_usize(0, n_items);
                    let n = rng.gen_range_usize(1, (n_items - position).min(5) + 1);
                    let model = m.model_mut().expect("model");
                    for entry in &mut model.entries[position..position + n] {
                        entry.key = rng.gen_range_u64(0, 3);
                    }
                    m.on_sections_changed(position, n);
                }
                5 | 6 => {
                    if trackers.len() < 3 || rng.gen_bool() {
                        trackers.push(m.tracker_create());
                    }
                    let t = trackers[rng.gen_range_usize(0, trackers.len())];
                    let position = rng.gen_range_usize(0, n_items.max(1) + 3);
                    let n_before = rng.gen_range_usize(0, 4);
                    let n_after = rng.gen_range_usize(0, 8);
                    m.tracker_set_window(t, position, n_before, n_after);
                }
                7 if !trackers.is_empty() => {
                    let t = trackers.swap_remove(rng.gen_range_usize(0, trackers.len()));
                    m.tracker_destroy(t);
                }
                8 => {
                    m.gc();
                    m.validate_compact().expect("compact after gc");
                }
                9 => {
                    let on = !m.has_sections();
                    m.set_has_sections(on);
                }
                _ => {}
            }
            check(&m, &counters);
        }
    }
}

#[test]
fn tracker_slots_are_indexed_up_to_the_limit() {
    assert_eq!(crate::tracker::slot_index(0), 0);
    assert_eq!(crate::tracker::slot_index(41), 41);
}

#[test]
#[should_panic(expected = "tracker slab is full")]
fn full_tracker_slab_panics() {
    crate::tracker::slot_index(u32::MAX as usize);
}

#[test]
fn example_basic_smoke() {
    let (mut m, counters) = manager(TestModel::flat(100_000));
    let viewport = m.tracker_create();
    m.tracker_set_window(viewport, 50_000, 5, 15);
    assert_eq!(m.n_materialized(), 21);
    assert_eq!(m.n_tiles(), 23);

    m.tracker_set_window(viewport, 50_010, 5, 15);
    m.gc();
    assert_eq!(m.n_materialized(), 21);
    assert_eq!(counters.created(), 31);
    assert_eq!(m.n_recycled(), 10);

    m.model_mut().expect("model").insert(0, &[0, 0, 0]);
    m.on_items_changed(0, 0, 3);
    assert_eq!(m.tracker_position(viewport), Some(50_013));
    let expected = m.model().map(|model| model.item(50_008));
    assert_eq!(m.element_at(50_008).and_then(|e| e.item), expected);
    check(&m, &counters);
}

#[test]
fn example_sections_smoke() {
    let (mut m, counters) = manager(TestModel::grouped(&[2, 2, 1, 2, 1, 2, 1, 1]));
    assert_eq!(shape(&m), "h R12 f");

    let viewport = m.tracker_create();
    m.tracker_set_window(viewport, 5, 1, 2);
    assert_eq!(merged(&m), "h R4 f H R1 F H R2 F H R1 F h R4 f");
    check(&m, &counters);

    // A new section right before the viewport.
    let model = m.model_mut().expect("model");
    for entry in &mut model.entries[5..] {
        entry.key += 1;
    }
    model.insert(5, &[3]);
    m.on_items_changed(5, 0, 1);
    m.gc();
    m.validate_compact().expect("compact");
    assert_eq!(m.tracker_position(viewport), Some(6));
    check(&m, &counters);

    m.set_has_sections(false);
    m.gc();
    assert_eq!(merged(&m), "R13");
    check(&m, &counters);
}
