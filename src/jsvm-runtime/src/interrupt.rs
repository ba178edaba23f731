use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rquickjs::{Ctx, Exception, JsLifetime};

/// Requests forced termination of whatever script the owning runtime is
/// running. Can be sent to, and used from, any thread.
///
/// Requests are counted: every [`kill`](Self::kill) must be matched by a
/// [`cancel`](Self::cancel) before the runtime runs code normally again. This
/// lets independent requesters (for instance nested watchdogs) withdraw their
/// own request without clearing somebody else's.
#[derive(Debug, Clone, Default, JsLifetime)]
pub struct InterruptHandle {
    pending: Arc<AtomicU32>,
}

impl InterruptHandle {
    /// Request termination. QuickJS polls the handle while running bytecode
    /// and unwinds the script with an uncatchable `InternalError: interrupted`.
    pub fn kill(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("termination requested");
    }

    /// Withdraw one termination request. Does nothing if none is pending.
    pub fn cancel(&self) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst) > 0
    }

    /// The handle of the runtime `ctx` belongs to.
    pub fn from_ctx(ctx: &Ctx<'_>) -> rquickjs::Result<Self> {
        match ctx.userdata::<Self>() {
            Some(handle) => Ok(handle.clone()),
            None => Err(Exception::throw_internal(ctx, "interrupt handle not installed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_are_counted() {
        let handle = InterruptHandle::default();
        handle.kill();
        handle.clone().kill();
        handle.cancel();
        assert!(handle.is_pending());
        handle.cancel();
        assert!(!handle.is_pending());
        handle.cancel();
        assert!(!handle.is_pending());
    }
}
