use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use list_tiles::{ItemElement, ListModel, TileManager, TileManagerOptions};

struct Numbers {
    items: Vec<u64>,
}

impl ListModel for Numbers {
    type Item = u64;

    fn n_items(&self) -> usize {
        self.items.len()
    }

    fn item(&self, position: usize) -> u64 {
        self.items[position]
    }
}

#[derive(Default)]
struct Row {
    item: Option<u64>,
    position: Option<usize>,
}

impl ItemElement<u64> for Row {
    fn bind(&mut self, position: usize, item: u64, _selected: bool) {
        self.item = Some(item);
        self.position = Some(position);
    }

    fn update(&mut self, position: usize, _selected: bool) {
        self.position = Some(position);
    }

    fn item(&self) -> Option<&u64> {
        self.item.as_ref()
    }

    fn position(&self) -> Option<usize> {
        self.position
    }
}

fn main() {
    let created = Arc::new(AtomicUsize::new(0));
    let opts = TileManagerOptions::new({
        let created = Arc::clone(&created);
        move || {
            created.fetch_add(1, Ordering::Relaxed);
            Row::default()
        }
    });

    let mut m = TileManager::new(opts);
    m.set_model(Some(Numbers {
        items: (0..1_000_000).collect(),
    }));

    // The visible rows plus some overscan on both sides.
    let viewport = m.tracker_create();
    m.tracker_set_window(viewport, 500_000, 5, 15);
    println!(
        "tiles={} materialized={} created={}",
        m.n_tiles(),
        m.n_materialized(),
        created.load(Ordering::Relaxed)
    );

    // Scroll by ten rows: the rows that left the window are recycled by the next gc.
    m.tracker_set_window(viewport, 500_010, 5, 15);
    m.gc();
    println!(
        "after scroll: tiles={} materialized={} recycled={} created={}",
        m.n_tiles(),
        m.n_materialized(),
        m.n_recycled(),
        created.load(Ordering::Relaxed)
    );

    // Prepend three rows; the tracker keeps following the same row.
    if let Some(model) = m.model_mut() {
        model.items.splice(0..0, [u64::MAX - 2, u64::MAX - 1, u64::MAX]);
    }
    m.on_items_changed(0, 0, 3);
    println!("tracker now at {:?}", m.tracker_position(viewport));
    println!("first visible row={:?}", m.element_at(500_008).and_then(|row| row.item()));

    if let Err(err) = m.validate() {
        eprintln!("inconsistent tiles: {err}");
    }
}
