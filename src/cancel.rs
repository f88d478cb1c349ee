//! Stop flag shared between the caller and a running sweep

use std::sync::{ Arc, OnceLock };
use tokio_util::sync::CancellationToken as StopSignal;

/// Why a run was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason
{
    /// The operator pressed stop
    User,
    /// A monitored channel reached the compliance limit
    Compliance,
}

/// A one-way stop request for a single sweep run
///
/// Clones observe the same request. Once cancelled it stays cancelled; start a new run with a new
/// token. The sweep polls it between steps and the ramp between quantum moves, so nothing is
/// interrupted in the middle of a device round trip. Waits that aren't device round trips can
/// race against [`CancellationToken::cancelled`] instead.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken
{
    signal: StopSignal,
    reason: Arc<OnceLock<CancelReason>>,
}

impl CancellationToken
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Request a stop on behalf of the operator
    pub fn cancel(&self)
    {
        self.cancel_with(CancelReason::User);
    }

    /// Request a stop, recording the reason if this is the first request
    pub fn cancel_with(&self, reason: CancelReason)
    {
        // reason first, so anyone who sees the cancellation also sees why
        let _ = self.reason.set(reason);
        self.signal.cancel();
    }

    pub fn is_cancelled(&self) -> bool
    {
        self.signal.is_cancelled()
    }

    /// Completes once the token is cancelled
    pub async fn cancelled(&self)
    {
        self.signal.cancelled().await
    }

    /// The reason given by whoever cancelled first, if anyone has
    pub fn reason(&self) -> Option<CancelReason>
    {
        self.reason.get().copied()
    }
}
