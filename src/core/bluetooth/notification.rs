//! Turns raw characteristic values into observer-facing data events

use log::{debug, warn};
use uuid::Uuid;

use crate::core::bluetooth::events::DataEvent;
use crate::core::bluetooth::types::{GattOperation, PeripheralId};
use crate::error::SessionError;

/// Builds a [`DataEvent`], decoding the payload as UTF-8 text where it is valid.
///
/// A payload that is not text is still delivered; the decode failure rides along.
pub fn data_event(
    peripheral: PeripheralId,
    characteristic: Uuid,
    operation: GattOperation,
    payload: Vec<u8>,
    error: Option<String>,
) -> DataEvent {
    let (text, decode_error) = match std::str::from_utf8(&payload) {
        Ok(text) => (Some(text.to_string()), None),
        Err(e) => {
            warn!("Value from {} is not UTF-8: {}", characteristic, e);
            (None, Some(SessionError::DecodeError(e.to_string())))
        }
    };
    if let Some(e) = &error {
        warn!("{:?} on {} failed: {}", operation, characteristic, e);
    } else {
        debug!("{:?} on {}: {:?}", operation, characteristic, payload);
    }
    DataEvent {
        peripheral,
        characteristic,
        operation,
        payload,
        text,
        decode_error,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_payload_is_decoded() {
        let event = data_event(
            PeripheralId::from("p"),
            Uuid::nil(),
            GattOperation::Notify,
            b"1111".to_vec(),
            None,
        );
        assert_eq!(event.text.as_deref(), Some("1111"));
        assert!(event.decode_error.is_none());
    }

    #[test]
    fn binary_payload_keeps_bytes_and_reports_decode_error() {
        let event = data_event(
            PeripheralId::from("p"),
            Uuid::nil(),
            GattOperation::Read,
            vec![0xff, 0xfe, 0x00],
            None,
        );
        assert_eq!(event.payload, vec![0xff, 0xfe, 0x00]);
        assert!(event.text.is_none());
        assert!(matches!(event.decode_error, Some(SessionError::DecodeError(_))));
    }

    #[test]
    fn per_call_error_is_carried() {
        let event = data_event(
            PeripheralId::from("p"),
            Uuid::nil(),
            GattOperation::Write,
            Vec::new(),
            Some("write not permitted".into()),
        );
        assert_eq!(event.error.as_deref(), Some("write not permitted"));
        assert_eq!(event.text.as_deref(), Some(""));
    }
}
