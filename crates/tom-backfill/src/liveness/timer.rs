/// LivenessTimer: cancelable timer whose stop is synchronous.
///
/// Each arming gets its own `armed` flag. The tick callback runs with the
/// flag's lock held and only if the flag is still set; `stop()` clears the
/// flag under the same lock. Once `stop()` returns, no callback is running
/// and none will run, without waiting for the timer task to be polled.
///
/// The callback must not stop its own timer (the lock is not reentrant).
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;

pub(crate) struct LivenessTimer {
    armed: Arc<Mutex<bool>>,
    task: AbortOnDropHandle<()>,
}

fn lock(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LivenessTimer {
    /// Arm the timer to fire at `first`.
    ///
    /// `tick` receives the deadline that fired and returns the next one,
    /// or `None` to disarm.
    pub(crate) fn start<F>(first: Instant, mut tick: F) -> Self
    where
        F: FnMut(Instant) -> Option<Instant> + Send + 'static,
    {
        let armed = Arc::new(Mutex::new(true));
        let flag = armed.clone();

        let task = AbortOnDropHandle::new(tokio::spawn(async move {
            let mut deadline = first;
            loop {
                tokio::time::sleep_until(deadline).await;
                let next = {
                    let mut armed = lock(&flag);
                    if !*armed {
                        return;
                    }
                    let next = tick(deadline);
                    if next.is_none() {
                        *armed = false;
                    }
                    next
                };
                match next {
                    Some(at) => deadline = at,
                    None => return,
                }
            }
        }));

        Self { armed, task }
    }

    /// Disarm. Takes effect before returning.
    pub(crate) fn stop(&self) {
        *lock(&self.armed) = false;
        self.task.abort();
    }

    pub(crate) fn is_armed(&self) -> bool {
        *lock(&self.armed)
    }
}

impl Drop for LivenessTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn fires_until_tick_returns_none() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let period = Duration::from_millis(10);
        let timer = LivenessTimer::start(Instant::now() + period, move |at| {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            (n < 3).then(|| at + period)
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_immediate() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let period = Duration::from_millis(10);
        let timer = LivenessTimer::start(Instant::now() + period, move |at| {
            c.fetch_add(1, Ordering::SeqCst);
            Some(at + period)
        });

        tokio::time::sleep(Duration::from_millis(25)).await;
        timer.stop();
        let seen = count.load(Ordering::SeqCst);
        assert_eq!(seen, 2);
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_releases_the_task() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let period = Duration::from_millis(10);
        let timer = LivenessTimer::start(Instant::now() + period, move |at| {
            c.fetch_add(1, Ordering::SeqCst);
            Some(at + period)
        });
        assert_eq!(Arc::strong_count(&count), 2);

        drop(timer);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(Arc::strong_count(&count), 1, "tick closure still alive");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
