/// Driver hooks the reservation engine needs.
///
/// A sync object is an opaque completion token. Attaching one to a buffer
/// object marks outstanding GPU work on it.
pub trait Driver: Send + Sync + 'static {
    /// Completion token type.
    type SyncObj: Send + Sync + 'static;

    /// Take a new reference to `sync_obj`.
    ///
    /// Called with the LRU and fence spinlocks held; must not block.
    fn sync_obj_ref(&self, sync_obj: &Self::SyncObj) -> Self::SyncObj;

    /// Drop the reference in `slot` and leave `None` behind.
    ///
    /// Always called with no engine lock held, so it may take driver locks.
    fn sync_obj_unref(&self, slot: &mut Option<Self::SyncObj>);

    /// Whether the work behind `sync_obj` has completed. Called with the
    /// fence lock held.
    fn sync_obj_signaled(&self, sync_obj: &Self::SyncObj) -> bool;
}
