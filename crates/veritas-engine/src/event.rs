use tokio::sync::watch;

/// One-shot broadcast condition: many waiters, single fire, idempotent.
/// Built on a `watch` channel rather than a `Notify` so a waiter that
/// arrives *after* the fire still observes it immediately — `watch`
/// retains its last value, `Notify` does not.
#[derive(Clone)]
pub struct OnceEvent {
    tx: watch::Sender<bool>,
}

impl OnceEvent {
    pub fn new() -> Self {
        Self {
            tx: watch::Sender::new(false),
        }
    }

    /// Fire the event. Idempotent — firing twice is a harmless repeat send.
    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until fired. Returns immediately if already fired.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        if *rx.borrow() {
            return;
        }
        while rx.changed().await.is_ok() {
            if *rx.borrow() {
                return;
            }
        }
    }

    /// Wait until fired, bounded by `timeout`. Returns `true` iff the event
    /// fired within the window.
    pub async fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok()
    }
}

impl Default for OnceEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_after_fire_returns_immediately() {
        let ev = OnceEvent::new();
        ev.fire();
        tokio::time::timeout(Duration::from_millis(50), ev.wait())
            .await
            .expect("must not block once already fired");
    }

    #[tokio::test]
    async fn wait_before_fire_blocks_then_unblocks() {
        let ev = OnceEvent::new();
        let waiter = ev.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        ev.fire();
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("waiter must unblock after fire")
            .unwrap();
    }

    #[tokio::test]
    async fn double_fire_is_harmless() {
        let ev = OnceEvent::new();
        ev.fire();
        ev.fire();
        assert!(ev.is_fired());
    }

    #[tokio::test]
    async fn wait_timeout_expires_when_never_fired() {
        let ev = OnceEvent::new();
        assert!(!ev.wait_timeout(Duration::from_millis(10)).await);
    }
}
