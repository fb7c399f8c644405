use std::{fmt, mem, ptr, ptr::NonNull};

use crate::{
    control::ControlBlock,
    owner::{self, OwnerBased},
    SharedPtr,
};

/// A non-owning observer of a [`SharedPtr`]'s ownership group.
///
/// A weak pointer keeps the control block alive but never the managed object. To reach the
/// object it must first be promoted with [`lock`][WeakPtr::lock], which fails cleanly once the
/// last strong owner is gone.
pub struct WeakPtr<T>
where
    T: ?Sized,
{
    ptr: Option<NonNull<T>>,
    ctrl: Option<NonNull<ControlBlock>>,
}

unsafe impl<T> Send for WeakPtr<T> where T: ?Sized + Send + Sync {}

unsafe impl<T> Sync for WeakPtr<T> where T: ?Sized + Send + Sync {}

impl<T> WeakPtr<T>
where
    T: ?Sized,
{
    /// Creates an empty weak pointer. It is always expired.
    pub const fn new() -> Self {
        WeakPtr {
            ptr: None,
            ctrl: None,
        }
    }

    /// Adopts one weak unit of `ctrl`.
    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, ctrl: NonNull<ControlBlock>) -> Self {
        WeakPtr {
            ptr: Some(ptr),
            ctrl: Some(ctrl),
        }
    }

    /// Promotes this weak pointer to a new strong owner.
    ///
    /// Returns an empty [`SharedPtr`] when the group has expired. The promotion never races with
    /// the last strong owner going away: either it observes a live count and the object stays
    /// alive until the returned owner is dropped, or it observes zero and fails.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::mem::drop;
    /// # use shared_ptr::make_shared;
    /// let s = make_shared(5);
    /// let w = s.downgrade();
    ///
    /// assert!(*w.lock() == 5);
    ///
    /// drop(s);
    /// assert!(w.lock().is_null());
    /// ```
    pub fn lock(&self) -> SharedPtr<T> {
        match (self.ptr, self.ctrl) {
            (Some(ptr), Some(ctrl)) => unsafe {
                if ctrl.as_ref().try_increment_strong_from_weak() {
                    SharedPtr::from_parts(ptr, ctrl)
                } else {
                    SharedPtr::null()
                }
            },
            _ => SharedPtr::null(),
        }
    }

    /// Whether the group has no strong owner left. Like [`use_count`][WeakPtr::use_count] the
    /// answer may be stale by the time it is used; only a `false` from a later `lock` is final.
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Number of strong owners in the observed group, `0` once expired or when empty.
    pub fn use_count(&self) -> usize {
        self.block().map_or(0, ControlBlock::strong_count)
    }

    /// Number of weak pointers observing the group, including this one.
    pub fn weak_count(&self) -> usize {
        self.block().map_or(0, ControlBlock::weak_count)
    }

    /// Stops observing and leaves the pointer empty.
    pub fn reset(&mut self) {
        *self = WeakPtr::new();
    }

    /// Exchanges the observed element and group with `other`. No count changes.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Whether this group orders before `other`'s group. See [`owner_before`][owner::owner_before].
    pub fn owner_before<P>(&self, other: &P) -> bool
    where
        P: OwnerBased + ?Sized,
    {
        owner::owner_before(self, other)
    }

    /// Address of the observed element, null for an empty pointer. Never dereference it.
    pub fn addr(&self) -> *const () {
        self.ptr
            .map_or(ptr::null(), |ptr| ptr.as_ptr() as *const ())
    }

    fn block(&self) -> Option<&ControlBlock> {
        self.ctrl.map(|ctrl| unsafe { &*ctrl.as_ptr() })
    }
}

impl<T> Drop for WeakPtr<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        if let Some(ctrl) = self.ctrl.take() {
            unsafe { ControlBlock::decrement_weak(ctrl) };
        }
    }
}

impl<T> Clone for WeakPtr<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        if let Some(block) = self.block() {
            block.increment_weak();
        }

        WeakPtr {
            ptr: self.ptr,
            ctrl: self.ctrl,
        }
    }
}

impl<T> Default for WeakPtr<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        WeakPtr::new()
    }
}

impl<T> From<&SharedPtr<T>> for WeakPtr<T>
where
    T: ?Sized,
{
    fn from(value: &SharedPtr<T>) -> Self {
        value.downgrade()
    }
}

impl<T> OwnerBased for WeakPtr<T>
where
    T: ?Sized,
{
    fn owner_id(&self) -> usize {
        self.ctrl.map_or(0, |ctrl| ctrl.as_ptr() as usize)
    }
}

impl<T> fmt::Debug for WeakPtr<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPtr")
            .field("ptr", &self.addr())
            .field("expired", &self.expired())
            .finish()
    }
}
