/// Typed errors for reservation lock acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReserveError {
    /// An older ticket owns the lock (or has wounded us) while we hold other
    /// locks. Drop everything and take the slow path on this lock.
    #[error("acquisition would deadlock against an older ticket")]
    WouldWound,
    /// Non-blocking acquisition found the lock held.
    #[error("reservation is held")]
    Busy,
    /// An interruptible wait was woken by a signal.
    #[error("wait interrupted by a signal")]
    Interrupted,
    /// The calling ticket already holds this lock.
    #[error("lock already held by this ticket")]
    AlreadyHeld,
}
