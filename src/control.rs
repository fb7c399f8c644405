use std::{
    alloc::Layout,
    mem::ManuallyDrop,
    process, ptr,
    ptr::NonNull,
    sync::atomic::AtomicUsize,
    sync::atomic::Ordering::Acquire,
    sync::atomic::Ordering::Relaxed,
    sync::atomic::Ordering::Release,
    sync::atomic::fence,
};

use log::trace;

use crate::alloc::BlockAllocator;

// beyond this many handles the counts could wrap, which would free a live object.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// Bookkeeping shared by every handle of one ownership group.
///
/// `weak` counts the observer handles plus one unit held collectively by all strong owners. That
/// unit is dropped by the strong count's transition to zero, so the block is released exactly
/// when the last handle of either kind goes away.
#[repr(C)]
pub(crate) struct ControlBlock {
    strong: AtomicUsize,
    weak: AtomicUsize,
    destroy: unsafe fn(NonNull<ControlBlock>),
    layout: Layout,
    alloc: &'static dyn BlockAllocator,
}

impl ControlBlock {
    fn new(
        destroy: unsafe fn(NonNull<ControlBlock>),
        layout: Layout,
        alloc: &'static dyn BlockAllocator,
    ) -> Self {
        ControlBlock {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            destroy,
            layout,
            alloc,
        }
    }

    pub(crate) fn strong_count(&self) -> usize {
        self.strong.load(Acquire)
    }

    /// Observer handles only, the implicit unit of the strong owners is not reported.
    pub(crate) fn weak_count(&self) -> usize {
        let weak = self.weak.load(Acquire);
        if self.strong.load(Acquire) > 0 {
            weak.saturating_sub(1)
        } else {
            weak
        }
    }

    /// Adds a strong owner. The caller must already hold one.
    pub(crate) fn increment_strong(&self) {
        let old = self.strong.fetch_add(1, Relaxed);
        debug_assert!(old > 0);
        if old > MAX_REFCOUNT {
            process::abort();
        }
    }

    /// Adds a strong owner only while the object is still alive.
    ///
    /// Returns `false` once the strong count has reached zero; from then on it never succeeds
    /// again for this block.
    pub(crate) fn try_increment_strong_from_weak(&self) -> bool {
        let mut n = self.strong.load(Relaxed);
        loop {
            if n == 0 {
                return false;
            }
            if n > MAX_REFCOUNT {
                process::abort();
            }

            match self
                .strong
                .compare_exchange_weak(n, n + 1, Acquire, Relaxed)
            {
                Ok(_) => return true,
                Err(strong) => n = strong,
            }
        }
    }

    pub(crate) fn increment_weak(&self) {
        let old = self.weak.fetch_add(1, Relaxed);
        if old > MAX_REFCOUNT {
            process::abort();
        }
    }

    /// Releases one strong owner, destroying the managed object when it was the last one.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must give up one strong unit. The block
    /// may be deallocated when this returns.
    pub(crate) unsafe fn decrement_strong(this: NonNull<ControlBlock>) {
        let block = this.as_ref();
        debug_assert!(block.strong.load(Relaxed) > 0);

        if block.strong.fetch_sub(1, Release) != 1 {
            return;
        }
        fence(Acquire);

        // a panicking destroyer still gives up the implicit weak unit before unwinding further.
        let guard = scopeguard::guard(this, |this| unsafe { ControlBlock::decrement_weak(this) });
        trace!("destroying object owned by block {:p}", this);
        (block.destroy)(this);
        drop(guard);
    }

    /// Releases one weak unit, deallocating the block when it was the last one.
    ///
    /// # Safety
    ///
    /// `this` must point to a live block and the caller must give up one weak unit.
    pub(crate) unsafe fn decrement_weak(this: NonNull<ControlBlock>) {
        let block = this.as_ref();
        debug_assert!(block.weak.load(Relaxed) > 0);

        if block.weak.fetch_sub(1, Release) != 1 {
            return;
        }
        fence(Acquire);

        let alloc = block.alloc;
        let layout = block.layout;
        trace!("deallocating block {:p}", this);
        alloc.deallocate(this.cast(), layout);
    }
}

/// A control block with the managed object stored inline, used by `make_shared`.
#[repr(C)]
pub(crate) struct Embedded<T> {
    block: ControlBlock,
    value: ManuallyDrop<T>,
}

impl<T> Embedded<T> {
    /// Allocates a block and constructs the value inside it.
    ///
    /// The value is produced only after the allocation succeeded; if `init` panics the memory is
    /// returned to `alloc` before the panic continues. Fails with the requested layout.
    pub(crate) fn allocate(
        init: impl FnOnce() -> T,
        alloc: &'static dyn BlockAllocator,
    ) -> Result<(NonNull<ControlBlock>, NonNull<T>), Layout> {
        let layout = Layout::new::<Self>();
        let raw = alloc.allocate(layout).ok_or(layout)?.cast::<Self>();

        let guard = scopeguard::guard(raw, |raw| unsafe { alloc.deallocate(raw.cast(), layout) });
        let value = init();
        let raw = scopeguard::ScopeGuard::into_inner(guard);

        unsafe {
            raw.as_ptr().write(Embedded {
                block: ControlBlock::new(Self::destroy, layout, alloc),
                value: ManuallyDrop::new(value),
            });
            let value = NonNull::new_unchecked(ptr::addr_of_mut!((*raw.as_ptr()).value).cast::<T>());
            trace!("allocated embedded block {:p}", raw);
            Ok((raw.cast(), value))
        }
    }

    unsafe fn destroy(this: NonNull<ControlBlock>) {
        let this = this.cast::<Self>().as_ptr();
        ManuallyDrop::drop(&mut *ptr::addr_of_mut!((*this).value));
    }
}

/// A control block for an object that lives in its own allocation and is released by `deleter`.
#[repr(C)]
pub(crate) struct Detached<T: ?Sized, D> {
    block: ControlBlock,
    ptr: NonNull<T>,
    deleter: ManuallyDrop<D>,
}

impl<T, D> Detached<T, D>
where
    T: ?Sized,
    D: FnOnce(NonNull<T>),
{
    /// Allocates a block taking over `ptr`. On failure `deleter` is handed back unused.
    pub(crate) fn allocate(
        ptr: NonNull<T>,
        deleter: D,
        alloc: &'static dyn BlockAllocator,
    ) -> Result<NonNull<ControlBlock>, (Layout, D)> {
        let layout = Layout::new::<Self>();
        let raw = match alloc.allocate(layout) {
            Some(raw) => raw.cast::<Self>(),
            None => return Err((layout, deleter)),
        };

        unsafe {
            raw.as_ptr().write(Detached {
                block: ControlBlock::new(Self::destroy, layout, alloc),
                ptr,
                deleter: ManuallyDrop::new(deleter),
            });
        }
        trace!("allocated detached block {:p}", raw);
        Ok(raw.cast())
    }

    unsafe fn destroy(this: NonNull<ControlBlock>) {
        let this = this.cast::<Self>().as_ptr();
        // the destroyer always sees the pointer the group was created with, never an alias.
        let ptr = (*this).ptr;
        let deleter = ManuallyDrop::take(&mut *ptr::addr_of_mut!((*this).deleter));
        deleter(ptr);
    }
}
