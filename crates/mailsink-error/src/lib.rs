use mailsink_store::is_connection_error;
use thiserror::Error;

pub type IngestResult<T> = Result<T, IngestError>;

/// Error type for the ingestion pipeline.
///
/// Each variant carries a distinct propagation policy:
/// - `Config` aborts startup; nothing else does.
/// - `Connection` is retryable and triggers reconnection inside the store
///   client; reaching a caller means the retry was already spent.
/// - `Query` is surfaced to the caller without retry; the affected message
///   is dropped with a log line.
/// - `AdmissionDenied` is a silent drop - logged, never shown to the sender.
/// - `CapacityExceeded` maps to a transient SMTP rejection so the sender
///   retries later.
/// - `Provisioning` is terminal for the affected message; uniqueness
///   conflicts during provisioning are recovered by re-fetching and never
///   reach this type.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store connection error: {0}")]
    Connection(#[source] redis::RedisError),

    #[error("store query error: {0}")]
    Query(#[source] redis::RedisError),

    #[error("recipient not admitted: {0}")]
    AdmissionDenied(String),

    #[error("server busy")]
    CapacityExceeded,

    #[error("inbox provisioning failed: {0}")]
    Provisioning(#[source] sqlx::Error),
}

impl IngestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        IngestError::Config(msg.into())
    }

    /// True when the failure was transient from the sender's point of view.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            IngestError::Connection(_) | IngestError::CapacityExceeded
        )
    }
}

impl From<redis::RedisError> for IngestError {
    fn from(err: redis::RedisError) -> Self {
        if is_connection_error(&err) {
            IngestError::Connection(err)
        } else {
            IngestError::Query(err)
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Provisioning(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redis_errors_split_by_classification() {
        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(matches!(IngestError::from(io), IngestError::Connection(_)));

        let server = redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(matches!(IngestError::from(server), IngestError::Query(_)));
    }

    #[test]
    fn transient_errors_are_flagged() {
        assert!(IngestError::CapacityExceeded.is_transient());
        assert!(!IngestError::config("missing REDIS_URL").is_transient());
    }
}
