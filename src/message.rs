use crate::error::Result;

/// Broker-issued handle identifying one fetched-but-unacknowledged message.
///
/// Tags are only meaningful to the connection that produced them and exist
/// for the short window between a fetch and its acknowledgement; the
/// manager never stores them.
pub type DeliveryTag = u64;

/// A single message as handed back by the transport.
///
/// The body is the raw payload exactly as the broker stored it. Use
/// [`Delivery::into_text`] to decode it once the delivery tag has been
/// acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Tag to acknowledge this delivery with.
    pub tag: DeliveryTag,
    /// Raw message payload.
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(tag: DeliveryTag, body: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            body: body.into(),
        }
    }

    /// Decodes the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Decode`](crate::QueueError::Decode) when the
    /// payload is not valid UTF-8.
    pub fn into_text(self) -> Result<String> {
        Ok(String::from_utf8(self.body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;

    #[test]
    fn test_into_text_decodes_utf8() {
        let delivery = Delivery::new(7, "hello queue");
        assert_eq!(delivery.into_text().unwrap(), "hello queue");
    }

    #[test]
    fn test_into_text_rejects_invalid_utf8() {
        let delivery = Delivery::new(7, vec![0xff, 0xfe, 0xfd]);
        assert!(matches!(delivery.into_text(), Err(QueueError::Decode(_))));
    }

    #[test]
    fn test_delivery_preserves_tag_and_body() {
        let delivery = Delivery::new(42, vec![1, 2, 3]);
        assert_eq!(delivery.tag, 42);
        assert_eq!(delivery.body, vec![1, 2, 3]);
    }
}
