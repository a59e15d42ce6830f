use anyhow::Result;
use std::{fmt, future::Future, time::Duration};
use tokio::sync::watch;

/// Error returned from a suspension point when the interrupt fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reporter interrupted")
    }
}

impl std::error::Error for Interrupted {}

/// Creates a linked trigger/token pair.
pub fn interrupt_channel() -> (InterruptTrigger, Interrupt) {
    let (tx, rx) = watch::channel(false);
    (InterruptTrigger { tx }, Interrupt { rx })
}

/// Raising side, held by whoever maps process signals to an abort.
#[derive(Debug)]
pub struct InterruptTrigger {
    tx: watch::Sender<bool>,
}

impl InterruptTrigger {
    pub fn raise(&self) {
        self.tx.send_replace(true);
    }
}

/// Token observed by the reporting loop at every suspension point.
///
/// Once raised it stays raised. A token whose trigger was dropped never fires.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    /// A token that can never be raised.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    async fn raised(&mut self) {
        if self.rx.wait_for(|raised| *raised).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Runs `fut` unless the interrupt fires first.
    pub async fn guard<F: Future>(&mut self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.raised() => Err(Interrupted.into()),
            out = fut => Ok(out),
        }
    }

    pub async fn sleep(&mut self, duration: Duration) -> Result<()> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

pub(crate) fn is_interrupted(e: &anyhow::Error) -> bool {
    e.downcast_ref::<Interrupted>().is_some()
}
