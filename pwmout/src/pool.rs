use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// A fixed set of hardware channel slots.
///
/// Slots are addressed by index. Claiming and releasing a slot happens inside a critical
/// section, so handles may be created from thread mode while an interrupt handler inspects
/// the pool.
pub struct ChannelPool<const N: usize> {
    taken: Mutex<CriticalSectionRawMutex, RefCell<[bool; N]>>,
}

impl<const N: usize> Default for ChannelPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ChannelPool<N> {
    /// Creates a pool in which all slots are free.
    pub const fn new() -> Self {
        Self {
            taken: Mutex::new(RefCell::new([false; N])),
        }
    }

    /// Returns the number of slots in the pool.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Claims the free slot with the lowest index.
    pub fn acquire(&self) -> Option<usize> {
        self.taken.lock(|taken| {
            let mut taken = taken.borrow_mut();
            let index = taken.iter().position(|slot| !*slot)?;
            taken[index] = true;
            Some(index)
        })
    }

    /// Claims the slot at `index`.
    ///
    /// Returns `false` if the slot is already taken or does not exist.
    pub fn acquire_index(&self, index: usize) -> bool {
        self.taken.lock(|taken| {
            let mut taken = taken.borrow_mut();
            match taken.get_mut(index) {
                Some(slot) if !*slot => {
                    *slot = true;
                    true
                }
                _ => false,
            }
        })
    }

    /// Returns the slot at `index` to the pool.
    pub fn release(&self, index: usize) {
        self.taken.lock(|taken| {
            if let Some(slot) = taken.borrow_mut().get_mut(index) {
                *slot = false;
            }
        })
    }

    pub fn is_taken(&self, index: usize) -> bool {
        self.taken
            .lock(|taken| taken.borrow().get(index).copied().unwrap_or(false))
    }

    /// Returns the number of free slots.
    pub fn available(&self) -> usize {
        self.taken
            .lock(|taken| taken.borrow().iter().filter(|slot| !**slot).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_lowest_free_slot() {
        let pool = ChannelPool::<3>::new();
        assert_eq!(pool.acquire(), Some(0));
        assert_eq!(pool.acquire(), Some(1));
        pool.release(0);
        assert_eq!(pool.acquire(), Some(0));
        assert_eq!(pool.acquire(), Some(2));
        assert_eq!(pool.acquire(), None);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn acquire_specific_slot() {
        let pool = ChannelPool::<4>::new();
        assert!(pool.acquire_index(2));
        assert!(!pool.acquire_index(2));
        assert!(!pool.acquire_index(4));
        assert!(pool.is_taken(2));
        assert!(!pool.is_taken(1));
        pool.release(2);
        assert!(!pool.is_taken(2));
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.capacity(), 4);
    }
}
