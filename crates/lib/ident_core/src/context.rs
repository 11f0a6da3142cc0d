//! Per-request cancellation and deadline handling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::client::Client;
use crate::error::{Error, Result};

/// Default deadline for a single operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Cancellation handle plus absolute deadline.
#[derive(Debug, Clone)]
pub struct Ctx {
    cancel: CancellationToken,
    deadline: Instant,
}

impl Ctx {
    pub fn new(timeout: Duration) -> Self {
        Self::with_token(CancellationToken::new(), timeout)
    }

    pub fn with_token(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
        }
    }

    /// Context for background work: no caller, default deadline.
    pub fn background() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }

    /// A child context sharing cancellation, with the earlier of both deadlines.
    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline.min(Instant::now() + timeout),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Race `fut` against cancellation and the deadline.
    ///
    /// Cancellation wins over an elapsed deadline when both are ready.
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::cancelled(op));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::cancelled(op)),
            res = tokio::time::timeout_at(self.deadline, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(Error::timeout(op)),
            },
        }
    }
}

impl Default for Ctx {
    fn default() -> Self {
        Self::background()
    }
}

/// Request-scoped carrier for the authenticated client.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ctx: Ctx,
    pub client: Arc<Client>,
}

impl ClientContext {
    pub fn new(ctx: Ctx, client: Arc<Client>) -> Self {
        Self { ctx, client }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn run_passes_result_through() {
        let ctx = Ctx::new(Duration::from_secs(1));
        let v = ctx.run("op", async { Ok::<_, Error>(7) }).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out() {
        let ctx = Ctx::new(Duration::from_millis(10));
        let err = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn run_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = Ctx::with_token(token.clone(), Duration::from_secs(5));
        token.cancel();
        let err = ctx
            .run("query", std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn child_never_extends_deadline() {
        let ctx = Ctx::new(Duration::from_secs(1));
        let child = ctx.child(Duration::from_secs(60));
        assert_eq!(child.deadline(), ctx.deadline());
    }
}
