//! Monotonic ID generation

use std::sync::atomic::{AtomicI32, Ordering};

/// Thread-safe generator handing out strictly increasing ids.
///
/// Ids are never handed out twice by the same generator, so a view id or
/// player id stays unique for the lifetime of the owning session even after
/// the object it named is gone.
pub struct IdGenerator<T: From<i32>> {
    next_id: AtomicI32,
    phantom: std::marker::PhantomData<fn() -> T>,
}

impl<T: From<i32>> IdGenerator<T> {
    /// Create a generator whose first id is `first`.
    pub fn starting_at(first: i32) -> Self {
        Self {
            next_id: AtomicI32::new(first),
            phantom: std::marker::PhantomData,
        }
    }

    /// Get the next available ID
    pub fn get_available_id(&self) -> T {
        T::from(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// The id the next call to [`get_available_id`](Self::get_available_id) returns.
    pub fn peek(&self) -> T {
        T::from(self.next_id.load(Ordering::Relaxed))
    }
}

impl<T: From<i32>> Default for IdGenerator<T> {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
