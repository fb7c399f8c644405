use std::{
    alloc::{self, Layout},
    fmt,
    ptr::NonNull,
    sync::atomic::AtomicUsize,
    sync::atomic::Ordering::Relaxed,
    sync::OnceLock,
};

use crossbeam::channel;
use log::debug;

/// A source of memory for control blocks.
///
/// Every ownership group remembers the allocator that produced its control block and hands the
/// memory back to that same allocator once the last strong and weak handle are gone. Allocators
/// are referenced as `&'static dyn BlockAllocator`, so they are usually `static` items.
///
/// ```
/// # use shared_ptr::{alloc::{Counting, Global}, make_shared_in};
/// static ALLOC: Counting<Global> = Counting::new(Global);
///
/// let p = make_shared_in(5, &ALLOC);
/// assert!(ALLOC.allocations() == 1);
/// drop(p);
/// assert!(ALLOC.live() == 0);
/// ```
///
/// # Safety
///
/// `allocate` must return memory valid for `layout` that stays valid until it is passed back to
/// `deallocate` with the same layout. The layouts requested by this crate are never zero sized.
pub unsafe trait BlockAllocator: Sync {
    /// Allocates memory for one control block, or returns `None` when out of memory.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Releases memory previously returned by [`allocate`][BlockAllocator::allocate].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `self.allocate(layout)` and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process-wide allocator registered with `#[global_allocator]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Global;

/// The allocator used by the constructors that don't take one explicitly.
pub static GLOBAL: Global = Global;

unsafe impl BlockAllocator for Global {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() != 0);
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout)
    }
}

/// Wraps another allocator and counts the blocks flowing through it.
///
/// Mostly useful in tests to observe how many allocations an ownership group costs and to check
/// that every block is eventually released.
pub struct Counting<A> {
    inner: A,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
}

impl<A> Counting<A> {
    pub const fn new(inner: A) -> Self {
        Counting {
            inner,
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
        }
    }

    /// Number of successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Relaxed)
    }

    /// Number of blocks handed back so far.
    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Relaxed)
    }

    /// Blocks allocated but not yet released.
    pub fn live(&self) -> usize {
        self.allocations().saturating_sub(self.deallocations())
    }
}

impl<A> fmt::Debug for Counting<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counting")
            .field("allocations", &self.allocations())
            .field("deallocations", &self.deallocations())
            .finish()
    }
}

unsafe impl<A> BlockAllocator for Counting<A>
where
    A: BlockAllocator,
{
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let ptr = self.inner.allocate(layout)?;
        self.allocations.fetch_add(1, Relaxed);
        Some(ptr)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocations.fetch_add(1, Relaxed);
        self.inner.deallocate(ptr, layout)
    }
}

struct AllowSend<T>(T);

unsafe impl<T> Send for AllowSend<T> {}

/// An allocator that keeps released blocks around and reuses them.
///
/// The first layout ever requested becomes the pooled layout. Blocks of that layout are parked
/// in a channel when released and handed out again by later allocations; every other layout is
/// forwarded to [`Global`]. Pooled memory is returned to the process allocator only when the
/// `Recycler` itself is dropped, which for a `static` never happens.
///
/// ```
/// # use shared_ptr::{alloc::Recycler, make_shared_in};
/// static POOL: Recycler = Recycler::new();
///
/// let a = make_shared_in(1u64, &POOL);
/// let first = a.control_addr();
/// drop(a);
///
/// let b = make_shared_in(2u64, &POOL);
/// assert!(b.control_addr() == first);
/// assert!(POOL.pooled() == 0);
/// ```
pub struct Recycler {
    pool: OnceLock<(
        Layout,
        channel::Sender<AllowSend<NonNull<u8>>>,
        channel::Receiver<AllowSend<NonNull<u8>>>,
    )>,
}

impl Recycler {
    pub const fn new() -> Self {
        Recycler {
            pool: OnceLock::new(),
        }
    }

    /// Number of released blocks currently waiting to be reused.
    pub fn pooled(&self) -> usize {
        self.pool.get().map_or(0, |(_, _, recv)| recv.len())
    }
}

impl Default for Recycler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Recycler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recycler")
            .field("layout", &self.pool.get().map(|(layout, _, _)| *layout))
            .field("pooled", &self.pooled())
            .finish()
    }
}

unsafe impl BlockAllocator for Recycler {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let (pooled, _, recv) = self.pool.get_or_init(|| {
            let (send, recv) = channel::unbounded();
            (layout, send, recv)
        });

        if *pooled == layout {
            if let Ok(block) = recv.try_recv() {
                debug!("reusing pooled block {:p}", block.0);
                return Some(block.0);
            }
        }

        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        match self.pool.get() {
            Some((pooled, send, _)) if *pooled == layout => {
                // the receiver lives in the same tuple, so the channel cannot be disconnected.
                let _ = send.send(AllowSend(ptr));
            }
            _ => Global.deallocate(ptr, layout),
        }
    }
}

impl Drop for Recycler {
    fn drop(&mut self) {
        if let Some((layout, _, recv)) = self.pool.get() {
            while let Ok(block) = recv.try_recv() {
                unsafe { Global.deallocate(block.0, *layout) };
            }
        }
    }
}
