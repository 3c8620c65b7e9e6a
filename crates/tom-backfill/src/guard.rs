/// CleanupGuard: deferred action bound to a scope.
///
/// The guard owns a value and an action. When the guard is dropped while
/// still armed, the action runs once with the value. `disarm` hands the
/// value back without running the action. Both consume the guard, so the
/// action can never run twice.
///
/// Guards declared later in a scope are dropped first, which gives the
/// reverse-registration unwinding order the backfill driver relies on.
use std::fmt;
use std::ops::{Deref, DerefMut};

pub struct CleanupGuard<T, F>
where
    F: FnOnce(T),
{
    slot: Option<(T, F)>,
}

impl<T, F> CleanupGuard<T, F>
where
    F: FnOnce(T),
{
    /// Arm a guard over `value`. `action` runs on drop unless disarmed.
    pub fn new(value: T, action: F) -> Self {
        Self {
            slot: Some((value, action)),
        }
    }

    /// Cancel the deferred action and return the guarded value.
    pub fn disarm(mut self) -> T {
        match self.slot.take() {
            Some((value, _action)) => value,
            None => unreachable!("cleanup guard emptied before disarm"),
        }
    }
}

impl<F> CleanupGuard<(), F>
where
    F: FnOnce(()),
{
    /// Run `action` on scope exit unless disarmed.
    pub fn on_exit(action: F) -> Self {
        Self::new((), action)
    }
}

impl<T, F> Deref for CleanupGuard<T, F>
where
    F: FnOnce(T),
{
    type Target = T;

    fn deref(&self) -> &T {
        match &self.slot {
            Some((value, _)) => value,
            None => unreachable!("cleanup guard emptied before drop"),
        }
    }
}

impl<T, F> DerefMut for CleanupGuard<T, F>
where
    F: FnOnce(T),
{
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.slot {
            Some((value, _)) => value,
            None => unreachable!("cleanup guard emptied before drop"),
        }
    }
}

impl<T, F> Drop for CleanupGuard<T, F>
where
    F: FnOnce(T),
{
    fn drop(&mut self) {
        if let Some((value, action)) = self.slot.take() {
            action(value);
        }
    }
}

impl<T: fmt::Debug, F> fmt::Debug for CleanupGuard<T, F>
where
    F: FnOnce(T),
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupGuard")
            .field("value", &self.slot.as_ref().map(|(v, _)| v))
            .finish()
    }
}
