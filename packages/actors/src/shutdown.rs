//! Exactly-once completion for a pool shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::messages::QueueError;

/// Callback invoked when a shutdown completes.
pub type ShutdownCallback = Box<dyn FnOnce(Result<(), QueueError>) + Send>;

/// Counts workers down to zero and fires its callback once, on the last
/// decrement, with the first error reported (if any).
pub struct ShutdownCountdown {
    remaining: AtomicUsize,
    first_error: Mutex<Option<QueueError>>,
    callback: Mutex<Option<ShutdownCallback>>,
}

impl ShutdownCountdown {
    /// Start a countdown over `total` workers. With zero workers the callback
    /// fires before this returns.
    pub fn new(total: usize, callback: ShutdownCallback) -> Arc<Self> {
        let countdown = Arc::new(Self {
            remaining: AtomicUsize::new(total),
            first_error: Mutex::new(None),
            callback: Mutex::new(Some(callback)),
        });
        if total == 0 {
            countdown.fire();
        }
        countdown
    }

    /// Record one worker as done. Calls beyond the initial total are ignored.
    pub fn done(&self, result: Result<(), QueueError>) {
        if let Err(error) = result {
            let mut slot = self.first_error.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(error);
            }
        }

        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.fire();
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    fn fire(&self) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            let error = self
                .first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            callback(error.map_or(Ok(()), Err));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn recorder() -> (ShutdownCallback, mpsc::Receiver<Result<(), QueueError>>) {
        let (tx, rx) = mpsc::channel();
        (
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
            rx,
        )
    }

    #[test]
    fn empty_countdown_fires_immediately() {
        let (callback, rx) = recorder();
        let countdown = ShutdownCountdown::new(0, callback);

        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        countdown.done(Ok(()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fires_once_on_last_decrement() {
        let (callback, rx) = recorder();
        let countdown = ShutdownCountdown::new(3, callback);

        countdown.done(Ok(()));
        countdown.done(Ok(()));
        assert!(rx.try_recv().is_err());
        assert_eq!(countdown.remaining(), 1);

        countdown.done(Ok(()));
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));

        countdown.done(Ok(()));
        assert!(rx.try_recv().is_err());
        assert_eq!(countdown.remaining(), 0);
    }

    #[test]
    fn forwards_first_error() {
        let (callback, rx) = recorder();
        let countdown = ShutdownCountdown::new(3, callback);

        countdown.done(Err(QueueError::ShutdownTimeout));
        countdown.done(Err(QueueError::Actor("second".to_string())));
        countdown.done(Ok(()));

        assert!(matches!(rx.try_recv(), Ok(Err(QueueError::ShutdownTimeout))));
    }

    #[test]
    fn concurrent_decrements_fire_once() {
        let (callback, rx) = recorder();
        let countdown = ShutdownCountdown::new(64, callback);

        let threads: Vec<_> = (0..64)
            .map(|_| {
                let countdown = countdown.clone();
                std::thread::spawn(move || countdown.done(Ok(())))
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert!(rx.try_recv().is_err());
    }
}
