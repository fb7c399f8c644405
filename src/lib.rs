//! Atomically reference counted [`SharedPtr`] and [`WeakPtr`] handles.
//!
//! The two pointer types behave much like [`std::sync::Arc`] and [`std::sync::Weak`], but every
//! handle is a pair of the element it dereferences to and the control block of its ownership
//! group. This makes a few things possible that `Arc` cannot do: an owner can point at a field of
//! the object it keeps alive ([`SharedPtr::alias`]), any pointer can be adopted together with a
//! custom deleter ([`SharedPtr::from_raw_with`]), and handles can be ordered by ownership group
//! rather than by address ([`owner_before`], [`ByOwner`]).
//!
//! [`make_shared`] places the object inside its control block so the whole group costs a single
//! allocation. Control blocks are obtained from a [`BlockAllocator`][alloc::BlockAllocator],
//! which can be swapped per group, e.g. for the instrumented [`Counting`][alloc::Counting]
//! allocator or the block reusing [`Recycler`][alloc::Recycler].
//!
//! Types implementing [`EnableSharedFromThis`] can hand out new owners of themselves from
//! `&self` once they were placed under shared ownership by one of the `*_enabled` constructors.
//!
//! ```
//! # use std::mem::drop;
//! # use shared_ptr::{make_shared, WeakPtr};
//! let a = make_shared(42);
//! let w = WeakPtr::from(&a);
//! let b = a.clone();
//! assert!(a.use_count() == 2);
//!
//! drop(a);
//! let c = w.lock();
//! assert!(b.use_count() == 2);
//!
//! drop(b);
//! drop(c);
//! assert!(w.expired());
//! ```
//!
//! Reference cycles between owners are never collected; break them with a [`WeakPtr`].

pub mod alloc;
mod control;
mod enable;
mod error;
mod owner;
mod shared;
mod weak;

pub use crate::enable::{
    make_shared_enabled, make_shared_enabled_in, EnableSharedFromThis, SelfSlot,
};
pub use crate::error::Error;
pub use crate::owner::{owner_before, owner_cmp, ByOwner, OwnerBased};
pub use crate::shared::{
    make_shared, make_shared_in, make_shared_with, try_make_shared_in, SharedPtr,
};
pub use crate::weak::WeakPtr;
