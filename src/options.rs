use alloc::sync::Arc;

use crate::TileId;

/// Called with the tile that will start a newly inserted section and the section's first
/// position, right before the header/footer pair is created.
pub type PrepareSectionCallback = Arc<dyn Fn(TileId, usize) + Send + Sync>;

/// Called after a run was split in two: `(kept, created, n_items_kept)`.
///
/// `kept` keeps the first `n_items_kept` items, `created` directly follows it. Layout code uses
/// this to carry per-tile state (e.g. measured areas) over to the new tile.
pub type SplitCallback = Arc<dyn Fn(TileId, TileId, usize) + Send + Sync>;

/// Configuration for [`crate::TileManager`].
///
/// This type is cheap to clone: factories and callbacks are stored in `Arc`s.
pub struct TileManagerOptions<E, H = ()> {
    /// Creates an item element when the recycling pool is empty.
    pub create_element: Arc<dyn Fn() -> E + Send + Sync>,
    /// Creates a header element when the header pool is empty.
    pub create_header: Arc<dyn Fn() -> H + Send + Sync>,
    pub prepare_section: Option<PrepareSectionCallback>,
    pub split: Option<SplitCallback>,
    /// Whether section headers/footers are tracked (only effective for models with sections).
    pub has_sections: bool,
    /// Capacity of each recycling pool. Elements demoted beyond it are dropped.
    pub max_recycled: usize,
}

impl<E, H> Clone for TileManagerOptions<E, H> {
    fn clone(&self) -> Self {
        Self {
            create_element: Arc::clone(&self.create_element),
            create_header: Arc::clone(&self.create_header),
            prepare_section: self.prepare_section.clone(),
            split: self.split.clone(),
            has_sections: self.has_sections,
            max_recycled: self.max_recycled,
        }
    }
}

impl<E> TileManagerOptions<E, ()> {
    /// Options for a view without section headers.
    pub fn new(create_element: impl Fn() -> E + Send + Sync + 'static) -> Self {
        Self::new_with_headers(create_element, || ())
    }
}

impl<E, H> TileManagerOptions<E, H> {
    pub fn new_with_headers(
        create_element: impl Fn() -> E + Send + Sync + 'static,
        create_header: impl Fn() -> H + Send + Sync + 'static,
    ) -> Self {
        Self {
            create_element: Arc::new(create_element),
            create_header: Arc::new(create_header),
            prepare_section: None,
            split: None,
            has_sections: false,
            max_recycled: 32,
        }
    }

    pub fn with_prepare_section(
        mut self,
        prepare_section: Option<impl Fn(TileId, usize) + Send + Sync + 'static>,
    ) -> Self {
        self.prepare_section = prepare_section.map(|f| Arc::new(f) as _);
        self
    }

    pub fn with_split(
        mut self,
        split: Option<impl Fn(TileId, TileId, usize) + Send + Sync + 'static>,
    ) -> Self {
        self.split = split.map(|f| Arc::new(f) as _);
        self
    }

    pub fn with_has_sections(mut self, has_sections: bool) -> Self {
        self.has_sections = has_sections;
        self
    }

    pub fn with_max_recycled(mut self, max_recycled: usize) -> Self {
        self.max_recycled = max_recycled;
        self
    }
}

impl<E, H> core::fmt::Debug for TileManagerOptions<E, H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TileManagerOptions")
            .field("has_prepare_section", &self.prepare_section.is_some())
            .field("has_split", &self.split.is_some())
            .field("has_sections", &self.has_sections)
            .field("max_recycled", &self.max_recycled)
            .finish_non_exhaustive()
    }
}
