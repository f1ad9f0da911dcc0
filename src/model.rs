/// The collection a [`crate::TileManager`] virtualizes.
///
/// The manager never observes the model on its own. After changing it, report the change with
/// [`crate::TileManager::on_items_changed`] (or `on_sections_changed` /
/// `on_selection_changed`) before doing anything else with the manager.
pub trait ListModel {
    /// Item identity. Elements follow items across moves by comparing these.
    type Item: Clone;

    fn n_items(&self) -> usize;

    /// The item at `position`. Only called with `position < n_items()`.
    fn item(&self, position: usize) -> Self::Item;

    fn is_selected(&self, _position: usize) -> bool {
        false
    }

    /// Whether this model groups its items into sections.
    fn has_sections(&self) -> bool {
        false
    }

    /// The section containing `position`, as `(start, end)` with `end` exclusive.
    ///
    /// Only called when [`Self::has_sections`] returns `true`.
    fn section(&self, _position: usize) -> (usize, usize) {
        (0, self.n_items())
    }
}
