use std::{
    alloc::{handle_alloc_error, Layout},
    any::Any,
    cmp, fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem::{self, ManuallyDrop},
    ops::Deref,
    ptr,
    ptr::NonNull,
};

use static_assertions::const_assert_eq;

use crate::{
    alloc::{BlockAllocator, GLOBAL},
    control::{ControlBlock, Detached, Embedded},
    owner::{self, OwnerBased},
    Error, WeakPtr,
};

/// An owning, atomically reference counted pointer.
///
/// A `SharedPtr` is a pair of the element it dereferences to and the control block of the
/// ownership group keeping that element alive. Usually both belong to the same object, but an
/// aliasing construction ([`alias`][SharedPtr::alias], [`map`][SharedPtr::map]) can point at a
/// sub-object or an upcast view while sharing the parent's ownership.
///
/// Cloning adds a strong owner; dropping the last strong owner destroys the managed object, even
/// when [`WeakPtr`]s to it still exist. An empty `SharedPtr` has neither element nor control block.
pub struct SharedPtr<T>
where
    T: ?Sized,
{
    ptr: Option<NonNull<T>>,
    ctrl: Option<NonNull<ControlBlock>>,
    _marker: PhantomData<T>,
}

const_assert_eq!(
    mem::size_of::<SharedPtr<u8>>(),
    2 * mem::size_of::<usize>()
);

unsafe impl<T> Send for SharedPtr<T> where T: ?Sized + Send + Sync {}

unsafe impl<T> Sync for SharedPtr<T> where T: ?Sized + Send + Sync {}

/// Places `value` and its control block in a single allocation.
///
/// # Examples
///
/// ```
/// # use shared_ptr::make_shared;
/// let s = make_shared(String::from("a"));
/// assert!(*s == "a");
/// assert!(s.use_count() == 1);
/// ```
pub fn make_shared<T>(value: T) -> SharedPtr<T>
where
    T: 'static,
{
    make_shared_in(value, &GLOBAL)
}

/// Like [`make_shared`], but the value is built by `init` once the allocation succeeded.
pub fn make_shared_with<T>(init: impl FnOnce() -> T) -> SharedPtr<T>
where
    T: 'static,
{
    allocate_embedded(init, &GLOBAL).unwrap_or_else(|layout| handle_alloc_error(layout))
}

/// Like [`make_shared`], but the block comes from `alloc`.
pub fn make_shared_in<T>(value: T, alloc: &'static dyn BlockAllocator) -> SharedPtr<T>
where
    T: 'static,
{
    allocate_embedded(|| value, alloc).unwrap_or_else(|layout| handle_alloc_error(layout))
}

/// The fallible form of [`make_shared_in`]. `init` is not called when the allocation fails.
pub fn try_make_shared_in<T>(
    init: impl FnOnce() -> T,
    alloc: &'static dyn BlockAllocator,
) -> Result<SharedPtr<T>, Error>
where
    T: 'static,
{
    allocate_embedded(init, alloc).map_err(|layout| Error::Alloc { layout })
}

fn allocate_embedded<T>(
    init: impl FnOnce() -> T,
    alloc: &'static dyn BlockAllocator,
) -> Result<SharedPtr<T>, Layout>
where
    T: 'static,
{
    let (ctrl, ptr) = Embedded::allocate(init, alloc)?;
    Ok(unsafe { SharedPtr::from_parts(ptr, ctrl) })
}

impl<T> SharedPtr<T> {
    /// Same as [`make_shared`].
    pub fn new(value: T) -> Self
    where
        T: 'static,
    {
        make_shared(value)
    }
}

impl<T> SharedPtr<T>
where
    T: ?Sized,
{
    /// Creates an empty pointer without a control block.
    pub const fn null() -> Self {
        SharedPtr {
            ptr: None,
            ctrl: None,
            _marker: PhantomData,
        }
    }

    /// Adopts one strong unit of `ctrl`.
    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, ctrl: NonNull<ControlBlock>) -> Self {
        SharedPtr {
            ptr: Some(ptr),
            ctrl: Some(ctrl),
            _marker: PhantomData,
        }
    }

    fn into_parts(self) -> (Option<NonNull<T>>, Option<NonNull<ControlBlock>>) {
        let this = ManuallyDrop::new(self);
        (this.ptr, this.ctrl)
    }

    /// Takes ownership of a boxed value. The box and the control block are separate allocations.
    ///
    /// The value may be unsized, so a `Box<dyn Trait>` becomes a `SharedPtr<dyn Trait>`.
    pub fn from_box(value: Box<T>) -> Self
    where
        T: 'static,
    {
        Self::from_box_in(value, &GLOBAL)
    }

    /// Like [`from_box`][SharedPtr::from_box], but the control block comes from `alloc`.
    pub fn from_box_in(value: Box<T>, alloc: &'static dyn BlockAllocator) -> Self
    where
        T: 'static,
    {
        let ptr = NonNull::from(Box::leak(value));
        unsafe {
            Self::from_raw_with_in(
                ptr,
                |ptr: NonNull<T>| drop(Box::from_raw(ptr.as_ptr())),
                alloc,
            )
        }
    }

    /// Takes ownership of `ptr`, which `deleter` releases once the last strong owner is gone.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for reads until `deleter` runs, and no other ownership group may
    /// manage the same object. Two groups for one object destroy it twice.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::ptr::NonNull;
    /// # use shared_ptr::SharedPtr;
    /// let raw = NonNull::from(Box::leak(Box::new(7)));
    /// let s = unsafe {
    ///     SharedPtr::from_raw_with(raw, |p: NonNull<i32>| drop(Box::from_raw(p.as_ptr())))
    /// };
    /// assert!(*s == 7);
    /// ```
    pub unsafe fn from_raw_with<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        T: 'static,
        D: FnOnce(NonNull<T>) + Send + 'static,
    {
        Self::from_raw_with_in(ptr, deleter, &GLOBAL)
    }

    /// Like [`from_raw_with`][SharedPtr::from_raw_with], but the control block comes from `alloc`.
    ///
    /// If the block cannot be allocated, `deleter` is run on `ptr` before reporting the failure.
    ///
    /// # Safety
    ///
    /// See [`from_raw_with`][SharedPtr::from_raw_with].
    pub unsafe fn from_raw_with_in<D>(
        ptr: NonNull<T>,
        deleter: D,
        alloc: &'static dyn BlockAllocator,
    ) -> Self
    where
        T: 'static,
        D: FnOnce(NonNull<T>) + Send + 'static,
    {
        match Detached::allocate(ptr, deleter, alloc) {
            Ok(ctrl) => Self::from_parts(ptr, ctrl),
            Err((layout, deleter)) => {
                deleter(ptr);
                handle_alloc_error(layout)
            }
        }
    }

    /// Creates a new owner from a weak pointer, failing with [`Error::Expired`] when the object
    /// is already gone. Unlike [`WeakPtr::lock`] an expired group is reported as an error.
    pub fn from_weak(weak: &WeakPtr<T>) -> Result<Self, Error> {
        let shared = weak.lock();
        if shared.is_null() {
            Err(Error::Expired)
        } else {
            Ok(shared)
        }
    }

    /// Gets a reference to the element, or `None` for an empty pointer.
    pub fn get(&self) -> Option<&T> {
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// Gets a reference to the element without checking for an empty pointer.
    ///
    /// # Safety
    ///
    /// The pointer must not be empty.
    pub unsafe fn get_unchecked(&self) -> &T {
        debug_assert!(self.ptr.is_some());
        &*self.ptr.unwrap_unchecked().as_ptr()
    }

    pub fn is_null(&self) -> bool {
        self.ctrl.is_none()
    }

    /// Number of strong owners in this group, `0` for an empty pointer.
    ///
    /// The value may already be stale when it is returned; never base an ownership decision on
    /// it while other threads hold handles to the same group.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::mem::drop;
    /// # use shared_ptr::make_shared;
    /// let s1 = make_shared(5);
    /// assert!(s1.use_count() == 1);
    ///
    /// let s2 = s1.clone();
    /// assert!(s1.use_count() == 2);
    ///
    /// drop(s2);
    /// assert!(s1.use_count() == 1);
    /// ```
    pub fn use_count(&self) -> usize {
        self.block().map_or(0, ControlBlock::strong_count)
    }

    /// Number of [`WeakPtr`]s observing this group.
    pub fn weak_count(&self) -> usize {
        self.block().map_or(0, ControlBlock::weak_count)
    }

    /// Creates a weak pointer to the same element and ownership group.
    ///
    /// # Examples
    ///
    /// ```
    /// # use std::mem::drop;
    /// # use shared_ptr::make_shared;
    /// let s = make_shared(5);
    /// let w = s.downgrade();
    ///
    /// assert!(s.weak_count() == 1);
    /// drop(s);
    /// assert!(w.expired());
    /// ```
    pub fn downgrade(&self) -> WeakPtr<T> {
        match (self.ptr, self.ctrl) {
            (Some(ptr), Some(ctrl)) => unsafe {
                ctrl.as_ref().increment_weak();
                WeakPtr::from_parts(ptr, ctrl)
            },
            _ => WeakPtr::new(),
        }
    }

    /// Releases this owner and leaves the pointer empty.
    pub fn reset(&mut self) {
        *self = SharedPtr::null();
    }

    /// Releases this owner and takes ownership of `value` as a new group.
    pub fn reset_with_box(&mut self, value: Box<T>)
    where
        T: 'static,
    {
        *self = SharedPtr::from_box(value);
    }

    /// Exchanges element and ownership group with `other`. No count changes.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Creates a new owner of this group that dereferences to a part of the element.
    ///
    /// Returns an empty pointer when `self` is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// # use shared_ptr::make_shared;
    /// struct Pair {
    ///     left: u32,
    ///     right: u32,
    /// }
    ///
    /// let pair = make_shared(Pair { left: 1, right: 2 });
    /// let right = pair.alias(|p| &p.right);
    ///
    /// assert!(*right == 2);
    /// assert!(pair.use_count() == 2);
    /// assert!(!pair.owner_before(&right) && !right.owner_before(&pair));
    /// ```
    pub fn alias<U>(&self, project: impl FnOnce(&T) -> &U) -> SharedPtr<U>
    where
        T: Send + Sync,
        U: ?Sized,
    {
        self.clone().map(project)
    }

    /// Like [`alias`][SharedPtr::alias], but reuses this owner instead of adding one.
    ///
    /// Also serves as the converting construction towards a trait object:
    ///
    /// ```
    /// # use std::fmt::Display;
    /// # use shared_ptr::{make_shared, SharedPtr};
    /// let s: SharedPtr<dyn Display + Send + Sync> = make_shared(3).map(|v| v as &(dyn Display + Send + Sync));
    /// assert!(s.to_string() == "3");
    /// ```
    pub fn map<U>(self, project: impl FnOnce(&T) -> &U) -> SharedPtr<U>
    where
        T: Send + Sync,
        U: ?Sized,
    {
        let ptr = self.get().map(|value| NonNull::from(project(value)));
        let (_, ctrl) = self.into_parts();
        SharedPtr {
            ptr,
            ctrl,
            _marker: PhantomData,
        }
    }

    /// Creates a new owner of this group that dereferences to `ptr`.
    ///
    /// Returns an empty pointer when `self` is empty.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for as long as the group's managed object is alive, and the managed
    /// object must be `Send + Sync` if the result is sent to or shared with other threads.
    pub unsafe fn alias_raw<U>(&self, ptr: NonNull<U>) -> SharedPtr<U>
    where
        U: ?Sized,
    {
        match self.block() {
            Some(block) => {
                block.increment_strong();
                SharedPtr {
                    ptr: Some(ptr),
                    ctrl: self.ctrl,
                    _marker: PhantomData,
                }
            }
            None => SharedPtr::null(),
        }
    }

    /// Address of the element, null for an empty pointer.
    pub fn addr(&self) -> *const () {
        self.ptr
            .map_or(ptr::null(), |ptr| ptr.as_ptr() as *const ())
    }

    /// Address of the control block, null for an empty pointer.
    pub fn control_addr(&self) -> *const () {
        self.ctrl
            .map_or(ptr::null(), |ctrl| ctrl.as_ptr() as *const ())
    }

    /// Whether this group orders before `other`'s group. See [`owner_before`][owner::owner_before].
    pub fn owner_before<P>(&self, other: &P) -> bool
    where
        P: OwnerBased + ?Sized,
    {
        owner::owner_before(self, other)
    }

    fn block(&self) -> Option<&ControlBlock> {
        self.ctrl.map(|ctrl| unsafe { &*ctrl.as_ptr() })
    }
}

impl SharedPtr<dyn Any + Send + Sync> {
    /// Recovers the concrete element type, keeping the ownership group.
    ///
    /// ```
    /// # use std::any::Any;
    /// # use shared_ptr::{make_shared, SharedPtr};
    /// let any: SharedPtr<dyn Any + Send + Sync> = make_shared(9u8).map(|v| v as &(dyn Any + Send + Sync));
    /// let any = any.downcast::<u16>().unwrap_err();
    /// assert!(*any.downcast::<u8>().unwrap() == 9);
    /// ```
    pub fn downcast<T>(self) -> Result<SharedPtr<T>, Self>
    where
        T: Any + Send + Sync,
    {
        let ptr = self
            .get()
            .and_then(|value| value.downcast_ref::<T>())
            .map(NonNull::from);

        match ptr {
            Some(ptr) => {
                let (_, ctrl) = self.into_parts();
                Ok(SharedPtr {
                    ptr: Some(ptr),
                    ctrl,
                    _marker: PhantomData,
                })
            }
            None => Err(self),
        }
    }
}

impl<T> Drop for SharedPtr<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        if let Some(ctrl) = self.ctrl.take() {
            unsafe { ControlBlock::decrement_strong(ctrl) };
        }
    }
}

impl<T> Clone for SharedPtr<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        if let Some(block) = self.block() {
            block.increment_strong();
        }

        SharedPtr {
            ptr: self.ptr,
            ctrl: self.ctrl,
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SharedPtr<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        SharedPtr::null()
    }
}

impl<T> Deref for SharedPtr<T>
where
    T: ?Sized,
{
    type Target = T;

    /// # Panics
    ///
    /// Panics on an empty pointer, use [`get`][SharedPtr::get] when emptiness is possible.
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<T> From<Box<T>> for SharedPtr<T>
where
    T: ?Sized + 'static,
{
    fn from(value: Box<T>) -> Self {
        SharedPtr::from_box(value)
    }
}

impl<T> OwnerBased for SharedPtr<T>
where
    T: ?Sized,
{
    fn owner_id(&self) -> usize {
        self.control_addr() as usize
    }
}

impl<T, U> PartialEq<SharedPtr<U>> for SharedPtr<T>
where
    T: ?Sized,
    U: ?Sized,
{
    fn eq(&self, other: &SharedPtr<U>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T> Eq for SharedPtr<T> where T: ?Sized {}

impl<T, U> PartialOrd<SharedPtr<U>> for SharedPtr<T>
where
    T: ?Sized,
    U: ?Sized,
{
    fn partial_cmp(&self, other: &SharedPtr<U>) -> Option<cmp::Ordering> {
        PartialOrd::partial_cmp(&self.addr(), &other.addr())
    }
}

impl<T> Ord for SharedPtr<T>
where
    T: ?Sized,
{
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Ord::cmp(&self.addr(), &other.addr())
    }
}

impl<T> Hash for SharedPtr<T>
where
    T: ?Sized,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        Hash::hash(&self.addr(), state)
    }
}

impl<T> fmt::Pointer for SharedPtr<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

impl<T> fmt::Debug for SharedPtr<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPtr")
            .field("ptr", &self.addr())
            .field("use_count", &self.use_count())
            .finish()
    }
}
