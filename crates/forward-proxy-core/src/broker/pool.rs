//! Fixed-size client pool.
//!
//! Hands out lazily created, deterministically named clients in
//! round-robin order. Slots are created at most once and never evicted;
//! reconnecting is left to the client itself.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Builds the client for a slot from the slot's name.
pub type ClientFactory<T> = Box<dyn Fn(&str) -> Result<T> + Send + Sync>;

/// Round-robin pool of `T`.
pub struct ConnectionPool<T> {
    name_prefix: String,
    slots: Box<[OnceCell<Arc<T>>]>,
    cursor: AtomicUsize,
    factory: ClientFactory<T>,
}

impl<T> ConnectionPool<T> {
    /// Create a pool with `size` slots (at least one). No client is built
    /// until its slot is first selected.
    pub fn new<F>(name_prefix: impl Into<String>, size: usize, factory: F) -> Self
    where
        F: Fn(&str) -> Result<T> + Send + Sync + 'static,
    {
        let name_prefix = name_prefix.into();
        let size = size.max(1);
        info!(prefix = %name_prefix, size, "created connection pool");

        Self {
            name_prefix,
            slots: (0..size).map(|_| OnceCell::new()).collect(),
            cursor: AtomicUsize::new(0),
            factory: Box::new(factory),
        }
    }

    /// Select the next client in round-robin order, creating it on first
    /// use.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the slot's client cannot be created;
    /// the slot stays empty and is retried on its next turn.
    pub fn select(&self) -> Result<Arc<T>> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        self.get(index)
    }

    /// Get the client in slot `index` (modulo the pool size), creating it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the client cannot be created.
    pub fn get(&self, index: usize) -> Result<Arc<T>> {
        let index = index % self.slots.len();
        self.slots[index]
            .get_or_try_init(|| {
                let name = self.slot_name(index);
                debug!(slot = index, name = %name, "creating pooled client");
                (self.factory)(&name).map(Arc::new).map_err(|e| {
                    warn!(slot = index, name = %name, error = %e, "failed to create pooled client");
                    e
                })
            })
            .map(Arc::clone)
    }

    /// Name of the client in slot `index`.
    #[must_use]
    pub fn slot_name(&self, index: usize) -> String {
        format!("{}{}", self.name_prefix, index)
    }

    /// Number of slots.
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots whose client has been created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.slots.iter().filter(|slot| slot.get().is_some()).count()
    }

    /// Clients created so far, in slot order.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<T>> {
        self.slots
            .iter()
            .filter_map(|slot| slot.get().map(Arc::clone))
            .collect()
    }
}

impl<T> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name_prefix", &self.name_prefix)
            .field("size", &self.size())
            .field("created", &self.created())
            .finish_non_exhaustive()
    }
}
