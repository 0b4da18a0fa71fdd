//! Fade handshake
//!
//! Before removed cells are cleared the client gets a chance to animate them.
//! The round loop opens a [`FadeGate`] wait, publishes the nonce, and awaits
//! either the matching acknowledgement, the timeout, or cancellation. The wait
//! resolves exactly once; late, duplicate or foreign acks are ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeResult {
    Acked,
    TimedOut,
    Cancelled,
}

#[derive(Debug)]
struct PendingFade {
    nonce: u64,
    tx: oneshot::Sender<()>,
}

/// One open wait per loop
#[derive(Debug, Default)]
pub struct FadeGate {
    pending: Mutex<Option<PendingFade>>,
    next_nonce: AtomicU64,
}

/// Receiving half of an open wait
#[derive(Debug)]
pub struct FadeWait {
    nonce: u64,
    rx: oneshot::Receiver<()>,
}

impl FadeWait {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

impl FadeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new wait, replacing any stale one
    pub fn begin(&self) -> FadeWait {
        let nonce = self.next_nonce.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(PendingFade { nonce, tx });
        FadeWait { nonce, rx }
    }

    /// Deliver an acknowledgement. Returns false if it matched nothing.
    pub fn ack(&self, nonce: u64) -> bool {
        let mut pending = self.pending.lock();
        match pending.take() {
            Some(p) if p.nonce == nonce => p.tx.send(()).is_ok(),
            other => {
                *pending = other;
                false
            }
        }
    }

    /// Wait for the ack, the timeout or cancellation, whichever comes first
    pub async fn wait(
        &self,
        wait: FadeWait,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> FadeResult {
        let FadeWait { nonce, rx } = wait;
        let result = tokio::select! {
            _ = cancel.cancelled() => FadeResult::Cancelled,
            res = tokio::time::timeout(timeout, rx) => match res {
                Ok(Ok(())) => FadeResult::Acked,
                Ok(Err(_)) => FadeResult::Cancelled,
                Err(_) => FadeResult::TimedOut,
            },
        };

        let mut pending = self.pending.lock();
        if pending.as_ref().map(|p| p.nonce) == Some(nonce) {
            *pending = None;
        }
        result
    }

    pub fn is_waiting(&self) -> bool {
        self.pending.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ack_resolves_wait() {
        let gate = FadeGate::new();
        let cancel = CancellationToken::new();
        let wait = gate.begin();
        let nonce = wait.nonce();

        assert!(!gate.ack(nonce + 1));
        assert!(gate.ack(nonce));
        assert!(!gate.ack(nonce));

        let result = gate.wait(wait, Duration::from_secs(1), &cancel).await;
        assert_eq!(result, FadeResult::Acked);
        assert!(!gate.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_client_times_out() {
        let gate = FadeGate::new();
        let cancel = CancellationToken::new();
        let wait = gate.begin();
        let result = gate.wait(wait, Duration::from_millis(500), &cancel).await;
        assert_eq!(result, FadeResult::TimedOut);
        assert!(!gate.is_waiting());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_timeout() {
        let gate = FadeGate::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let wait = gate.begin();
        let result = gate.wait(wait, Duration::from_secs(10), &cancel).await;
        assert_eq!(result, FadeResult::Cancelled);
    }
}
