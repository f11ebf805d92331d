/// How a cancel-aware stream call ended.
///
/// Timeouts are not a variant: they surface as [`crate::StreamError::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The call finished. For reads this may be short of the requested
    /// count when the writer finished the stream.
    Complete(usize),
    /// The cancel token fired while the call was waiting on the peer.
    Canceled { transferred: usize },
}

impl Transfer {
    pub fn transferred(self) -> usize {
        match self {
            Transfer::Complete(n) | Transfer::Canceled { transferred: n } => n,
        }
    }

    pub fn is_complete(self) -> bool {
        matches!(self, Transfer::Complete(_))
    }
}
