use std::{
    cmp::Ordering,
    hash::{Hash, Hasher},
};

/// Handles that belong to an ownership group.
///
/// The id is the address of the group's control block, `0` for empty handles. It identifies a
/// group only while some handle keeps that control block allocated; once a block is released its
/// address may be reused by an unrelated group.
pub trait OwnerBased {
    fn owner_id(&self) -> usize;
}

impl<P> OwnerBased for &P
where
    P: OwnerBased + ?Sized,
{
    fn owner_id(&self) -> usize {
        (**self).owner_id()
    }
}

impl<P> OwnerBased for Box<P>
where
    P: OwnerBased + ?Sized,
{
    fn owner_id(&self) -> usize {
        (**self).owner_id()
    }
}

/// Strict weak ordering over ownership groups.
///
/// Handles of the same group are equivalent (`false` both ways) no matter which element they
/// point at, so an aliased [`SharedPtr`][crate::SharedPtr] and the [`WeakPtr`][crate::WeakPtr]
/// of its parent compare as the same owner. All empty handles are equivalent to each other.
///
/// ```
/// # use shared_ptr::{make_shared, owner_before};
/// let a = make_shared(1);
/// let b = make_shared(2);
/// let w = a.downgrade();
///
/// assert!(!owner_before(&a, &w) && !owner_before(&w, &a));
/// assert!(owner_before(&a, &b) != owner_before(&b, &a));
/// ```
pub fn owner_before<A, B>(a: &A, b: &B) -> bool
where
    A: OwnerBased + ?Sized,
    B: OwnerBased + ?Sized,
{
    a.owner_id() < b.owner_id()
}

/// Total order over ownership groups, consistent with [`owner_before`].
pub fn owner_cmp<A, B>(a: &A, b: &B) -> Ordering
where
    A: OwnerBased + ?Sized,
    B: OwnerBased + ?Sized,
{
    a.owner_id().cmp(&b.owner_id())
}

/// Keys a handle by its ownership group instead of the element it points at.
///
/// Lets shared and weak handles live together in a `BTreeSet` or `HashSet`, deduplicated per
/// group:
///
/// ```
/// # use std::collections::BTreeSet;
/// # use shared_ptr::{make_shared, ByOwner, OwnerBased};
/// let a = make_shared((1, 2));
/// let first = a.alias(|p| &p.0);
///
/// let mut set: BTreeSet<ByOwner<Box<dyn OwnerBased>>> = BTreeSet::new();
/// assert!(set.insert(ByOwner(Box::new(a.clone()))));
/// assert!(!set.insert(ByOwner(Box::new(first))));
/// assert!(!set.insert(ByOwner(Box::new(a.downgrade()))));
/// assert!(set.len() == 1);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ByOwner<P>(pub P);

impl<P> ByOwner<P> {
    pub fn into_inner(self) -> P {
        self.0
    }
}

impl<P> PartialEq for ByOwner<P>
where
    P: OwnerBased,
{
    fn eq(&self, other: &Self) -> bool {
        self.0.owner_id() == other.0.owner_id()
    }
}

impl<P> Eq for ByOwner<P> where P: OwnerBased {}

impl<P> PartialOrd for ByOwner<P>
where
    P: OwnerBased,
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for ByOwner<P>
where
    P: OwnerBased,
{
    fn cmp(&self, other: &Self) -> Ordering {
        owner_cmp(&self.0, &other.0)
    }
}

impl<P> Hash for ByOwner<P>
where
    P: OwnerBased,
{
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.owner_id().hash(state)
    }
}
