use std::collections::HashMap;
use std::time::Instant;

use depot_fetch::DownloadCancelled;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// At most one holder per key; other callers wait for the holder to finish.
///
/// Each held key maps to a token that is cancelled on release, which wakes
/// every waiter so they can race for the key again.
#[derive(Default)]
pub(crate) struct KeyGates {
    in_progress: Mutex<HashMap<String, CancellationToken>>,
}

impl KeyGates {
    pub(crate) async fn acquire(&self, key: &str, cancel: &CancellationToken) -> Result<GateGuard<'_>, DownloadCancelled> {
        let started = Instant::now();
        loop {
            let held = {
                let mut in_progress = self.in_progress.lock();
                match in_progress.get(key) {
                    Some(released) => released.clone(),
                    None => {
                        let released = CancellationToken::new();
                        in_progress.insert(key.to_string(), released.clone());
                        return Ok(GateGuard {
                            gates: self,
                            key: key.to_string(),
                            released,
                        });
                    }
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DownloadCancelled::new("acquire-limiter", started.elapsed(), None));
                }
                _ = held.cancelled() => {}
            }
        }
    }

    #[cfg(test)]
    fn is_held(&self, key: &str) -> bool { self.in_progress.lock().contains_key(key) }
}

pub(crate) struct GateGuard<'a> {
    gates:    &'a KeyGates,
    key:      String,
    released: CancellationToken,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gates.in_progress.lock().remove(&self.key);
        self.released.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn release_clears_the_key() {
        let gates = KeyGates::default();
        let guard = gates.acquire("k", &CancellationToken::new()).await.unwrap();
        assert!(gates.is_held("k"));
        drop(guard);
        assert!(!gates.is_held("k"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn one_holder_per_key() {
        let gates = Arc::new(KeyGates::default());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let (gates, active, peak) = (gates.clone(), active.clone(), peak.clone());
                tokio::spawn(async move {
                    let _guard = gates.acquire("same", &CancellationToken::new()).await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!gates.is_held("same"));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_wait() {
        let gates = KeyGates::default();
        let _a = gates.acquire("a", &CancellationToken::new()).await.unwrap();
        let b = tokio::time::timeout(Duration::from_millis(100), gates.acquire("b", &CancellationToken::new())).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn waiting_is_cancellable() {
        let gates = KeyGates::default();
        let _held = gates.acquire("k", &CancellationToken::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let err = gates.acquire("k", &cancel).await.err().unwrap();
        assert_eq!(err.phase, "acquire-limiter");
        assert!(err.written.is_none());
        assert!(err.duration >= Duration::from_millis(20));
    }
}
