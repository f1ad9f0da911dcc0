use alloc::vec::Vec;

use crate::key::{ItemIdentity, ItemMap};
use crate::{HeaderElement, ItemElement};

/// Bounded free list of elements kept around between operations.
pub(crate) struct Pool<T> {
    free: Vec<T>,
    capacity: usize,
}

impl<T> Pool<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free: Vec::new(),
            capacity,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn pop(&mut self) -> Option<T> {
        self.free.pop()
    }

    fn has_room(&self) -> bool {
        self.free.len() < self.capacity
    }
}

/// Scratch state of a single manager operation.
///
/// Elements torn down by a removal are kept by item so a re-insertion of the same item within
/// the same operation gets its old element back. Demoted elements are kept unbounded until
/// [`Change::finish`] moves them into the long-lived pools.
pub(crate) struct Change<I, E, H> {
    deleted: ItemMap<I, E>,
    items: Vec<E>,
    headers: Vec<H>,
}

impl<I, E, H> Change<I, E, H>
where
    I: ItemIdentity + Clone,
    E: ItemElement<I>,
    H: HeaderElement<I>,
{
    pub(crate) fn new() -> Self {
        Self {
            deleted: ItemMap::new(),
            items: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Stashes an element whose item was removed from the model.
    pub(crate) fn release(&mut self, element: E) {
        let Some(item) = element.item().cloned() else {
            self.items.push(element);
            return;
        };
        if let Some(older) = self.deleted.insert(item, element) {
            lwarn!("duplicate item detected in list, recycling one of its elements");
            self.items.push(older);
        }
    }

    /// Takes back the element that was bound to `item` before it got removed.
    pub(crate) fn find(&mut self, item: &I) -> Option<E> {
        self.deleted.remove(item)
    }

    pub(crate) fn recycle(&mut self, element: E) {
        self.items.push(element);
    }

    pub(crate) fn recycle_header(&mut self, header: H) {
        self.headers.push(header);
    }

    /// An element for `item`: its previous element if it was removed in this operation,
    /// otherwise any element demoted so far.
    pub(crate) fn get(&mut self, item: &I) -> Option<E> {
        self.find(item).or_else(|| self.items.pop())
    }

    pub(crate) fn get_header(&mut self) -> Option<H> {
        self.headers.pop()
    }

    /// Moves every unclaimed element into the pools, dropping what does not fit.
    pub(crate) fn finish(self, items: &mut Pool<E>, headers: &mut Pool<H>) {
        let Self {
            deleted,
            items: recycled,
            headers: recycled_headers,
        } = self;

        for mut element in deleted.into_values().chain(recycled) {
            if items.has_room() {
                element.unbind();
                items.free.push(element);
            }
        }
        for mut header in recycled_headers {
            if headers.has_room() {
                header.unbind();
                headers.free.push(header);
            }
        }
        ltrace!(
            pooled_items = items.len(),
            pooled_headers = headers.len(),
            "change finished"
        );
    }
}
