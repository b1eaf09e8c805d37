#![allow(unused_macros)]

/// Helper macro for locking items
///
/// Evaluates to the guard, or returns [`crate::Error::LockError`] from the enclosing
/// function if the mutex has been poisoned.
///
/// ```rust, ignore
///  let mut state = lock!(self.state);
///  state.current.clear();
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let sampler = read_lock!(self.sampling);
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().map_err(|_| crate::Error::LockError)?
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  *write_lock!(self.sampling) = Some(scheduler);
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().map_err(|_| crate::Error::LockError)?
    };
}
