use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Marker error returned when a future lost the race against cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled;

impl std::fmt::Display for Canceled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("canceled")
    }
}

impl std::error::Error for Canceled {}

/// Race a future against a [`CancellationToken`], used wherever the spec
/// requires a suspension point to "respect a context" (inbound frame read,
/// outbound frame write, response-channel wait, keep-alive tick).
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Canceled>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Canceled> {
        tokio::select! {
            _ = token.cancelled() => Err(Canceled),
            res = self => Ok(res),
        }
    }
}
