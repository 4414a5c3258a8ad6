#![allow(unsafe_op_in_unsafe_fn)]

use crate::freelist::StaticList;
use std::alloc::{Layout, alloc, dealloc, handle_alloc_error};
use std::ptr::NonNull;
use std::sync::LazyLock;

/// Smallest size class, also the block alignment guarantee.
pub const MIN_BLOCK: usize = 64;
/// Largest size class; requests beyond this go to the global allocator.
pub const MAX_BLOCK: usize = 512;

/// Blocks of the largest class per line; every class line spans the same
/// number of bytes.
const BLOCK_COUNT: usize = 16;
const LINE_WIDTH: usize = MAX_BLOCK * BLOCK_COUNT;
const CLASS_COUNT: usize = 4;
const TOTAL: usize = CLASS_COUNT * LINE_WIDTH;

/// Fixed-capacity pool with four power-of-two size classes (64..512 bytes),
/// laid out as one contiguous line per class.
///
/// Backs the out-of-line storage of type-erased payloads — most importantly
/// the deleter closures parked on the hazard retire list, which must not
/// touch the global allocator from reclamation paths. Allocation walks the
/// smallest fitting class upward, never downward; exhaustion returns `None`
/// rather than failing over, and every operation is lock-free and
/// non-unwinding.
pub struct MemPool {
    base: NonNull<u8>,
    free0: StaticList<u32, { BLOCK_COUNT << 3 }>,
    free1: StaticList<u32, { BLOCK_COUNT << 2 }>,
    free2: StaticList<u32, { BLOCK_COUNT << 1 }>,
    free3: StaticList<u32, BLOCK_COUNT>,
}

// Safety: the base pointer is only handed out block-by-block through the
// free lists, which serialize ownership of each block.
unsafe impl Send for MemPool {}
unsafe impl Sync for MemPool {}

fn match_class(n: usize) -> Option<usize> {
    (0..CLASS_COUNT).find(|&i| n <= MIN_BLOCK << i)
}

fn block_size(class: usize) -> usize {
    MIN_BLOCK << class
}

impl MemPool {
    fn new() -> Self {
        let layout = Layout::from_size_align(TOTAL, MIN_BLOCK).expect("pool layout");
        // Safety: layout has non-zero size.
        let raw = unsafe { alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };

        let pool = MemPool {
            base,
            free0: StaticList::new(),
            free1: StaticList::new(),
            free2: StaticList::new(),
            free3: StaticList::new(),
        };

        // Seed each class line with its block offsets. Line `i` holds class
        // `i`, so a pointer's line locates its class on the way back.
        for class in 0..CLASS_COUNT {
            let line_base = class * LINE_WIDTH;
            let count = LINE_WIDTH / block_size(class);
            for j in 0..count {
                let off = (line_base + j * block_size(class)) as u32;
                let pushed = match class {
                    0 => pool.free0.push(off),
                    1 => pool.free1.push(off),
                    2 => pool.free2.push(off),
                    _ => pool.free3.push(off),
                };
                debug_assert!(pushed.is_ok());
            }
        }
        pool
    }

    /// Pops a block of at least `n` bytes, trying the smallest fitting
    /// class first and falling back to larger ones. `None` when `n` exceeds
    /// [`MAX_BLOCK`] or all fitting classes are exhausted.
    pub fn allocate(&self, n: usize) -> Option<NonNull<u8>> {
        let first = match_class(n)?;
        for class in first..CLASS_COUNT {
            let off = match class {
                0 => self.free0.pop(),
                1 => self.free1.pop(),
                2 => self.free2.pop(),
                _ => self.free3.pop(),
            };
            if let Some(off) = off {
                // Safety: offsets pushed to the free lists are in-bounds.
                let ptr = unsafe { self.base.add(off as usize) };
                return Some(ptr);
            }
        }
        None
    }

    /// Returns a block to its class, located by the pointer's line.
    ///
    /// Precondition: `ptr` came from [`allocate`](Self::allocate) on this
    /// pool and is not already free.
    pub fn deallocate(&self, ptr: NonNull<u8>) {
        let off = self.offset_of(ptr).expect("pointer does not belong to the pool");
        let pushed = match off as usize / LINE_WIDTH {
            0 => self.free0.push(off),
            1 => self.free1.push(off),
            2 => self.free2.push(off),
            _ => self.free3.push(off),
        };
        // A block can only be parked once per allocate, so the class list
        // cannot be over capacity here.
        debug_assert!(pushed.is_ok());
    }

    /// Whether `ptr` points into this pool's backing storage.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.offset_of(ptr).is_some()
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> Option<u32> {
        let base = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        if (base..base + TOTAL).contains(&addr) {
            Some((addr - base) as u32)
        } else {
            None
        }
    }
}

impl Drop for MemPool {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(TOTAL, MIN_BLOCK).expect("pool layout");
        // Safety: base came from `alloc` with this exact layout; blocks
        // hold no payloads of their own (callers destroyed theirs before
        // deallocate).
        unsafe { dealloc(self.base.as_ptr(), layout) };
    }
}

/// The process-wide pool. Never torn down; the backing storage lives for
/// the life of the process like the hazard registry it serves.
pub fn pool() -> &'static MemPool {
    static POOL: LazyLock<MemPool> = LazyLock::new(MemPool::new);
    &POOL
}
