//! Fixed-capacity allocator of listener slots

use super::listener::Listener;

/// A bounded set of listener slots with stable ids
///
/// Every slot carries an id of the form `<prefix>-<index>`. Free slots are
/// kept on a LIFO stack initialized in increasing index order, so the
/// first bind receives the highest index and re-binding reuses ids in
/// reverse order of release. At most `size` listeners are bound at once.
pub struct ListenerPool {
    listeners: Vec<Listener>,
    bound: Vec<bool>,
    free: Vec<usize>,
}

impl ListenerPool {
    pub(crate) fn new(
        size: usize,
        prefix: &str,
        mut factory: impl FnMut(&str) -> Listener,
    ) -> Self {
        let listeners = (0..size)
            .map(|i| factory(&format!("{}-{}", prefix, i)))
            .collect();
        Self {
            listeners,
            bound: vec![false; size],
            free: (0..size).collect(),
        }
    }

    pub fn size(&self) -> usize {
        self.listeners.len()
    }

    /// True if a free slot remains
    pub fn available(&self) -> bool {
        !self.free.is_empty()
    }

    /// Take the next free slot
    pub fn bind_next(&mut self) -> Option<&mut Listener> {
        let index = self.free.pop()?;
        self.bound[index] = true;
        Some(&mut self.listeners[index])
    }

    /// Return slots to the pool by listener id
    pub fn release(&mut self, ids: &[String]) {
        for id in ids {
            let Some(index) = self.listeners.iter().position(|l| l.id() == id) else {
                continue;
            };
            if !self.bound[index] {
                continue;
            }
            self.bound[index] = false;
            self.free.push(index);
        }
    }

    /// Detach every bound listener and return all slots
    pub fn reset(&mut self) {
        for (index, listener) in self.listeners.iter_mut().enumerate() {
            if self.bound[index] {
                listener.detach();
                self.bound[index] = false;
            }
        }
        self.free = (0..self.listeners.len()).collect();
    }

    /// Visit every bound listener
    pub fn for_each(&mut self, mut f: impl FnMut(&mut Listener)) {
        for (index, listener) in self.listeners.iter_mut().enumerate() {
            if self.bound[index] {
                f(listener);
            }
        }
    }

    /// Visit every listener, bound or not (configuration updates)
    pub fn for_each_all(&mut self, mut f: impl FnMut(&mut Listener)) {
        for listener in self.listeners.iter_mut() {
            f(listener);
        }
    }

    /// The first bound listener
    pub fn first(&mut self) -> Option<&mut Listener> {
        let index = self.bound.iter().position(|&b| b)?;
        Some(&mut self.listeners[index])
    }
}
