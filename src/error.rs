use std::alloc::Layout;

/// Failures reported by fallible operations of this crate.
///
/// An expired [`WeakPtr::lock`][crate::WeakPtr::lock] is not an error and never produces one of
/// these; it returns an empty [`SharedPtr`][crate::SharedPtr] instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The object was never placed under shared ownership, so its self slot is unset.
    #[error("object is not owned by any SharedPtr")]
    NotShared,

    /// The ownership group exists but its strong count already reached zero.
    #[error("ownership group has expired")]
    Expired,

    /// The block allocator could not provide memory for a control block.
    #[error("failed to allocate a control block of {} bytes", layout.size())]
    Alloc { layout: Layout },
}
