use std::{fmt, ptr::NonNull, sync::OnceLock};

use log::trace;

use crate::{
    alloc::{BlockAllocator, GLOBAL},
    make_shared_in, Error, SharedPtr, WeakPtr,
};

/// The back-reference an [`EnableSharedFromThis`] type stores inside itself.
///
/// It starts empty and is filled by the first ownership group created through one of the
/// `*_enabled` constructors. Later groups never overwrite it.
pub struct SelfSlot<T> {
    weak: OnceLock<WeakPtr<T>>,
}

impl<T> SelfSlot<T> {
    pub const fn new() -> Self {
        SelfSlot {
            weak: OnceLock::new(),
        }
    }

    /// Whether an ownership group has claimed the object.
    pub fn is_set(&self) -> bool {
        self.weak.get().is_some()
    }
}

impl<T> Default for SelfSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A copy of an object is a different object, so the copy starts unowned.
impl<T> Clone for SelfSlot<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SelfSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfSlot")
            .field("set", &self.is_set())
            .finish()
    }
}

/// Lets an object obtain new owners of itself from `&self`.
///
/// # Examples
///
/// ```
/// # use shared_ptr::{make_shared_enabled, EnableSharedFromThis, Error, SelfSlot};
/// struct Node {
///     this: SelfSlot<Node>,
/// }
///
/// impl EnableSharedFromThis for Node {
///     fn self_slot(&self) -> &SelfSlot<Node> {
///         &self.this
///     }
/// }
///
/// let foo = make_shared_enabled(Node { this: SelfSlot::new() });
/// let bar = foo.shared_from_this().unwrap();
/// assert!(!foo.owner_before(&bar) && !bar.owner_before(&foo));
///
/// let local = Node { this: SelfSlot::new() };
/// assert!(local.shared_from_this().unwrap_err() == Error::NotShared);
/// ```
pub trait EnableSharedFromThis: Sized + 'static {
    fn self_slot(&self) -> &SelfSlot<Self>;

    /// Creates a new owner in the group that owns `self`.
    ///
    /// Fails with [`Error::NotShared`] when the object was never placed under shared ownership
    /// and with [`Error::Expired`] when its group has already released it, which can only be
    /// observed from inside the object's own destructor.
    fn shared_from_this(&self) -> Result<SharedPtr<Self>, Error> {
        let weak = self.self_slot().weak.get().ok_or(Error::NotShared)?;
        SharedPtr::from_weak(weak)
    }

    /// A weak pointer to `self`, empty if the object was never placed under shared ownership.
    fn weak_from_this(&self) -> WeakPtr<Self> {
        self.self_slot().weak.get().cloned().unwrap_or_default()
    }
}

fn adopt<T>(owner: &SharedPtr<T>)
where
    T: EnableSharedFromThis,
{
    if let Some(value) = owner.get() {
        if value.self_slot().weak.set(owner.downgrade()).is_err() {
            trace!("self slot of {:p} already claimed", owner.addr());
        }
    }
}

/// [`make_shared`][crate::make_shared] for types with a self slot; the slot is filled with the
/// new group.
pub fn make_shared_enabled<T>(value: T) -> SharedPtr<T>
where
    T: EnableSharedFromThis,
{
    make_shared_enabled_in(value, &GLOBAL)
}

/// Like [`make_shared_enabled`], but the block comes from `alloc`.
pub fn make_shared_enabled_in<T>(value: T, alloc: &'static dyn BlockAllocator) -> SharedPtr<T>
where
    T: EnableSharedFromThis,
{
    let owner = make_shared_in(value, alloc);
    adopt(&owner);
    owner
}

impl<T> SharedPtr<T>
where
    T: EnableSharedFromThis,
{
    /// [`from_box`][SharedPtr::from_box] that also fills the object's self slot.
    pub fn from_box_enabled(value: Box<T>) -> Self {
        let owner = SharedPtr::from_box(value);
        adopt(&owner);
        owner
    }

    /// [`from_raw_with`][SharedPtr::from_raw_with] that also fills the object's self slot, unless
    /// an earlier group already did.
    ///
    /// # Safety
    ///
    /// See [`from_raw_with`][SharedPtr::from_raw_with].
    pub unsafe fn from_raw_enabled<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: FnOnce(NonNull<T>) + Send + 'static,
    {
        let owner = SharedPtr::from_raw_with(ptr, deleter);
        adopt(&owner);
        owner
    }
}
