use super::{
    Transport,
    interrupt::{Interrupt, is_interrupted},
    state::ReporterHandle,
};
use anyhow::{Result, anyhow};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, time::Duration};

/// Pause after a failed report cycle before the next attempt.
pub(crate) const RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Drives `transport` until it is cancelled through `reporter` or `interrupt`
/// fires.
///
/// Failures other than an interrupt, panics inside a cycle included, are
/// logged and retried after `RETRY_BACKOFF`, indefinitely. Cancellation is only observed between
/// cycles, so a pending cancel waits for the current cycle (including its
/// sleep) to finish. Whichever way the loop ends, the transport is cleaned up
/// exactly once and the reporter, if any, is marked stopped afterwards.
pub(crate) async fn run(
    mut transport: Box<dyn Transport>,
    reporter: Option<ReporterHandle>,
    mut interrupt: Interrupt,
) {
    let name = transport.name().to_string();
    tracing::info!("{}: reporting started", name);

    loop {
        if let Err(e) = report_cycle(transport.as_mut(), &mut interrupt).await {
            if is_interrupted(&e) {
                tracing::info!("{}: interrupted, shutting down", name);
                break;
            }
            tracing::warn!("{}: report failed, retrying in {:?}: {:?}", name, RETRY_BACKOFF, e);
            if interrupt.sleep(RETRY_BACKOFF).await.is_err() {
                tracing::info!("{}: interrupted during backoff, shutting down", name);
                break;
            }
        }

        if reporter.as_ref().is_some_and(ReporterHandle::stop_requested) {
            tracing::info!("{}: cancellation observed, shutting down", name);
            break;
        }
    }

    transport.cleanup().await;
    if let Some(reporter) = reporter {
        reporter.mark_stopped();
    }
    tracing::info!("{}: stopped", name);
}

async fn report_cycle(transport: &mut dyn Transport, interrupt: &mut Interrupt) -> Result<()> {
    match AssertUnwindSafe(transport.report(interrupt))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(anyhow!(
            "report cycle panicked: {}",
            panic_message(&*panic)
        )),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string payload"
    }
}
