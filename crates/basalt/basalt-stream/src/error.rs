use basalt_config::ConfigError;
use basalt_icc::RegionError;
use std::io;
use std::time::Duration;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The call's total time budget ran out with bytes still outstanding.
    #[error("timed out after {elapsed:?} with {transferred} bytes transferred")]
    Timeout { transferred: usize, elapsed: Duration },

    /// The endpoint does not support the operation (wrong direction, seeking).
    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("background transfer task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl StreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StreamError::Timeout { .. })
    }

    pub fn is_out_of_range(&self) -> bool {
        matches!(self, StreamError::Region(RegionError::OutOfRange { .. }))
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::Timeout { .. } => io::ErrorKind::TimedOut,
            StreamError::InvalidOperation(_) => io::ErrorKind::Unsupported,
            StreamError::Region(RegionError::OutOfRange { .. }) => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
