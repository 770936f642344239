// gpu/slots.rs — resource-slot allocator and slot→view table.
//
// A resource slot is the index a kernel reads an input surface through,
// the render-kernel equivalent of a texture unit. Slots are scarce: the
// pool is bounded by the number of sampled textures a fragment stage is
// guaranteed to bind simultaneously. The allocator is a bit-addressed
// set — one bit per slot, lowest free slot wins — and it is an explicit
// object handed by reference to every component that needs slots, never
// process-global state, so tests can instantiate independent pools.

use std::fmt;
use std::sync::Arc;

/// Upper bound on the pool size: WebGPU's guaranteed
/// `max_sampled_textures_per_shader_stage`.
pub const MAX_SLOTS: usize = 16;

/// A resource-slot index. Only obtainable from `SlotAllocator::acquire`,
/// which is what keeps the occupancy bookkeeping honest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(u8);

impl Slot {
    /// The raw pool index.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Every slot in the pool is occupied. Recoverable: release unused
    /// surfaces and retry.
    ExhaustedPool,
    /// Release of a slot that is not currently occupied — a lifecycle bug
    /// in the caller, rejected rather than ignored.
    NotOccupied(Slot),
    /// Binding a surface that already holds a slot.
    AlreadyBound(Slot),
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotError::ExhaustedPool => write!(f, "resource-slot pool exhausted"),
            SlotError::NotOccupied(s) => write!(f, "double release of {s}"),
            SlotError::AlreadyBound(s) => write!(f, "surface already bound to {s}"),
        }
    }
}

impl std::error::Error for SlotError {}

// ---------------------------------------------------------------------------
// SlotAllocator
// ---------------------------------------------------------------------------

/// Bit-addressed slot pool. Single-threaded, call-ordered; a future
/// multi-threaded port must wrap it in a mutex or move to an atomic
/// compare-and-swap bitmask.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    occupied: u16,
    pool_size: usize,
}

impl SlotAllocator {
    /// Create a pool of `pool_size` slots (clamped to `MAX_SLOTS`).
    pub fn new(pool_size: usize) -> Self {
        SlotAllocator {
            occupied: 0,
            pool_size: pool_size.min(MAX_SLOTS),
        }
    }

    /// Acquire the lowest-numbered free slot.
    pub fn acquire(&mut self) -> Result<Slot, SlotError> {
        // Original form of this search: `while ((1 << i) & used) ++i;`
        let free = (!self.occupied).trailing_zeros() as usize;
        if free >= self.pool_size {
            return Err(SlotError::ExhaustedPool);
        }
        self.occupied |= 1 << free;
        Ok(Slot(free as u8))
    }

    /// Release an occupied slot. Double release is rejected.
    pub fn release(&mut self, slot: Slot) -> Result<(), SlotError> {
        let bit = 1u16 << slot.index();
        if self.occupied & bit == 0 {
            return Err(SlotError::NotOccupied(slot));
        }
        self.occupied &= !bit;
        Ok(())
    }

    #[inline]
    pub fn is_occupied(&self, slot: Slot) -> bool {
        self.occupied & (1 << slot.index()) != 0
    }

    #[inline]
    pub fn occupied_count(&self) -> usize {
        self.occupied.count_ones() as usize
    }

    #[inline]
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        SlotAllocator::new(MAX_SLOTS)
    }
}

// ---------------------------------------------------------------------------
// SlotTable
// ---------------------------------------------------------------------------

/// The allocator plus the view registered at each occupied slot. Kernels
/// resolve their named samplers through this table at dispatch time, the
/// way a sampler uniform resolves a texture unit. There is exactly one
/// table per device context.
pub struct SlotTable {
    alloc: SlotAllocator,
    views: [Option<Arc<wgpu::TextureView>>; MAX_SLOTS],
}

impl SlotTable {
    pub fn new() -> Self {
        SlotTable {
            alloc: SlotAllocator::default(),
            views: Default::default(),
        }
    }

    /// Acquire a slot and register a view under it.
    pub fn bind(&mut self, view: Arc<wgpu::TextureView>) -> Result<Slot, SlotError> {
        let slot = self.alloc.acquire()?;
        self.views[slot.index()] = Some(view);
        Ok(slot)
    }

    /// Replace the view registered at an occupied slot. This is how
    /// external inputs are refreshed between frames without reallocating
    /// the slot.
    pub fn rebind(&mut self, slot: Slot, view: Arc<wgpu::TextureView>) -> Result<(), SlotError> {
        if !self.alloc.is_occupied(slot) {
            return Err(SlotError::NotOccupied(slot));
        }
        self.views[slot.index()] = Some(view);
        Ok(())
    }

    /// Release a slot and drop its view registration.
    pub fn unbind(&mut self, slot: Slot) -> Result<(), SlotError> {
        self.alloc.release(slot)?;
        self.views[slot.index()] = None;
        Ok(())
    }

    /// The view registered at a slot, if any.
    pub fn view(&self, slot: Slot) -> Option<&wgpu::TextureView> {
        self.views[slot.index()].as_deref()
    }

    pub fn allocator(&self) -> &SlotAllocator {
        &self.alloc
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        SlotTable::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_returns_lowest_free() {
        let mut pool = SlotAllocator::default();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);

        // Free the lower slot; the next acquire must reuse it.
        pool.release(a).unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!(c.index(), 0);
    }

    #[test]
    fn pool_of_two_exhausts_on_third() {
        let mut pool = SlotAllocator::new(2);
        pool.acquire().unwrap();
        pool.acquire().unwrap();
        assert_eq!(pool.acquire(), Err(SlotError::ExhaustedPool));
    }

    #[test]
    fn double_release_is_rejected() {
        let mut pool = SlotAllocator::default();
        let s = pool.acquire().unwrap();
        pool.release(s).unwrap();
        assert_eq!(pool.release(s), Err(SlotError::NotOccupied(s)));
    }

    #[test]
    fn occupancy_tracks_acquire_release_exactly() {
        // The set of occupied slots must always equal the set of slots
        // acquired and not yet released, for an arbitrary call sequence.
        let mut pool = SlotAllocator::new(8);
        let mut held: Vec<Slot> = Vec::new();

        for step in 0..50usize {
            if step % 3 == 2 && !held.is_empty() {
                let s = held.remove(step % held.len());
                pool.release(s).unwrap();
            } else if let Ok(s) = pool.acquire() {
                assert!(
                    !held.contains(&s),
                    "acquire returned an occupied slot: {s}"
                );
                held.push(s);
            }

            assert_eq!(pool.occupied_count(), held.len());
            for &s in &held {
                assert!(pool.is_occupied(s));
            }
        }
    }

    #[test]
    fn pool_size_is_clamped() {
        let pool = SlotAllocator::new(64);
        assert_eq!(pool.pool_size(), MAX_SLOTS);
    }
}
