use thiserror::Error;

/// Why the broker refused a published message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("broker returned a negative acknowledgement")]
    Nacked,

    #[error("message could not be routed to the queue")]
    Unroutable,
}

#[derive(Error, Debug)]
pub enum QueueError {
    /// The broker rejected the configured credentials. Fatal for `open`;
    /// never retried automatically.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The broker could not be reached or the connection could not be
    /// established. Fatal for the current call.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The connection dropped mid-operation. The manager recovers from
    /// this once per operation with a forced reopen.
    #[error("Connection lost: {0}")]
    StreamLost(String),

    /// The broker reports the queue as absent. The manager force-closes
    /// the connection when it sees this.
    #[error("Queue '{queue}' does not exist on the broker")]
    QueueMissing { queue: String },

    /// A publish was refused while delivery confirmation was in effect.
    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryFailure),

    /// A fetched payload was not valid UTF-8.
    #[error("Malformed message payload: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// An operation reached the manager while no channel was established.
    #[error("Broker channel is not established")]
    NotConnected,

    /// Any other fault reported by the transport.
    #[error("Broker error: {0}")]
    Broker(String),
}

impl QueueError {
    /// True for faults that a forced reopen of the connection can fix.
    ///
    /// Only a mid-operation connection loss qualifies; everything else is
    /// either fatal for the call or must be surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::StreamLost(_))
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_lost_is_transient() {
        let error = QueueError::StreamLost("socket reset".to_string());
        assert!(error.is_transient());
        assert_eq!(format!("{}", error), "Connection lost: socket reset");
    }

    #[test]
    fn test_fatal_errors_are_not_transient() {
        let errors = vec![
            QueueError::Authentication("bad password".to_string()),
            QueueError::Connection("refused".to_string()),
            QueueError::QueueMissing {
                queue: "jobs".to_string(),
            },
            QueueError::Delivery(DeliveryFailure::Nacked),
            QueueError::NotConnected,
            QueueError::Broker("internal".to_string()),
        ];

        for error in errors {
            assert!(!error.is_transient(), "{error} should not be transient");
        }
    }

    #[test]
    fn test_delivery_failure_display() {
        assert_eq!(
            format!("{}", QueueError::Delivery(DeliveryFailure::Nacked)),
            "Delivery failed: broker returned a negative acknowledgement"
        );
        assert_eq!(
            format!("{}", QueueError::Delivery(DeliveryFailure::Unroutable)),
            "Delivery failed: message could not be routed to the queue"
        );
    }

    #[test]
    fn test_queue_missing_display() {
        let error = QueueError::QueueMissing {
            queue: "orders".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Queue 'orders' does not exist on the broker"
        );
    }

    #[test]
    fn test_error_from_delivery_failure() {
        let error: QueueError = DeliveryFailure::Unroutable.into();
        assert!(matches!(
            error,
            QueueError::Delivery(DeliveryFailure::Unroutable)
        ));
    }

    #[test]
    fn test_error_from_utf8_error() {
        let utf8_err = String::from_utf8(vec![0xff, 0xfe]).unwrap_err();
        let error: QueueError = utf8_err.into();

        assert!(!error.is_transient());
        assert!(matches!(error, QueueError::Decode(_)));
    }
}
