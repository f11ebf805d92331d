use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-local request to stop waiting.
///
/// Clones share the same flag. Cancelling never touches shared memory; a wait
/// that observes it simply gives up.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    canceled: AtomicBool,
    parent: Option<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is canceled when either it or `self` is.
    ///
    /// Canceling the child leaves `self` alone.
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(Inner {
                canceled: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.canceled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::Acquire)
            || self.inner.parent.as_ref().is_some_and(CancelToken::is_canceled)
    }

    /// Cancel this token when the returned guard goes out of scope.
    pub fn drop_guard(self) -> CancelOnDrop {
        CancelOnDrop { token: self }
    }
}

/// Cancels its token when dropped.
#[derive(Debug)]
pub struct CancelOnDrop {
    token: CancelToken,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
