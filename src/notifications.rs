//! Phone-notification forwarding
//!
//! Notifications ride a different channel from the register protocol: the
//! packet is a fixed header, a type byte, a 15-byte ASCII timestamp, then
//! four length-prefixed strings (app, title, short text, text), and the
//! whole buffer is XORed with 0xFF before transmission.

use crate::codec::truncate_utf8;
use crate::types::{GShockError, Result};

const PACKET_HEADER: [u8; 6] = [0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
const TIMESTAMP_LEN: usize = 15;

const MAX_TEXT_BYTES: usize = 193;
const MAX_SHORT_TEXT_BYTES: usize = 40;
const MAX_COMBINED_BYTES: usize = 206;
const MAX_FIELD_BYTES: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationType {
    Generic = 0,
    PhoneCallUrgent = 1,
    PhoneCall = 2,
    Email = 3,
    Message = 4,
    Calendar = 5,
    EmailSms = 6,
}

impl NotificationType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Generic),
            1 => Ok(Self::PhoneCallUrgent),
            2 => Ok(Self::PhoneCall),
            3 => Ok(Self::Email),
            4 => Ok(Self::Message),
            5 => Ok(Self::Calendar),
            6 => Ok(Self::EmailSms),
            other => Err(GShockError::MalformedResponse(format!(
                "unknown notification type {other}"
            ))),
        }
    }
}

/// A phone notification ready to be forwarded to the watch.
///
/// Construction enforces the watch's display limits, truncating at UTF-8
/// boundaries so a clipped multi-byte character never reaches the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppNotification {
    kind: NotificationType,
    timestamp: String,
    app: String,
    title: String,
    short_text: String,
    text: String,
}

impl AppNotification {
    /// `timestamp` must be the 15-character ASCII form `yyyyMMdd'T'HHmmss`
    /// without the century, e.g. `20231002T203950`.
    pub fn new(
        kind: NotificationType,
        timestamp: &str,
        app: &str,
        title: &str,
        short_text: &str,
        text: &str,
    ) -> Result<Self> {
        if timestamp.len() != TIMESTAMP_LEN || !timestamp.is_ascii() {
            return Err(GShockError::InvalidArgument(format!(
                "notification timestamp must be {TIMESTAMP_LEN} ASCII characters, got {timestamp:?}"
            )));
        }
        let mut text = truncate_utf8(text, MAX_TEXT_BYTES);
        let short_text = truncate_utf8(short_text, MAX_SHORT_TEXT_BYTES);
        if text.len() + short_text.len() > MAX_COMBINED_BYTES {
            text = truncate_utf8(text, MAX_COMBINED_BYTES - short_text.len());
        }
        Ok(Self {
            kind,
            timestamp: timestamp.to_string(),
            app: truncate_utf8(app, MAX_FIELD_BYTES).to_string(),
            title: truncate_utf8(title, MAX_FIELD_BYTES).to_string(),
            short_text: short_text.to_string(),
            text: text.to_string(),
        })
    }

    pub fn kind(&self) -> NotificationType {
        self.kind
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn short_text(&self) -> &str {
        &self.short_text
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

fn push_string(out: &mut Vec<u8>, value: &str) {
    out.push(value.len() as u8);
    out.push(0x00);
    out.extend_from_slice(value.as_bytes());
}

/// Build the cleartext notification packet (before obfuscation)
pub fn encode_notification_packet(notification: &AppNotification) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        PACKET_HEADER.len()
            + 1
            + TIMESTAMP_LEN
            + notification.app.len()
            + notification.title.len()
            + notification.short_text.len()
            + notification.text.len()
            + 8,
    );
    out.extend_from_slice(&PACKET_HEADER);
    out.push(notification.kind as u8);
    out.extend_from_slice(notification.timestamp.as_bytes());
    push_string(&mut out, &notification.app);
    push_string(&mut out, &notification.title);
    push_string(&mut out, &notification.short_text);
    push_string(&mut out, &notification.text);
    out
}

/// Parse a cleartext notification packet back into its fields, validating
/// every length prefix against the remaining buffer
pub fn decode_notification_packet(raw: &[u8]) -> Result<AppNotification> {
    let min_len = PACKET_HEADER.len() + 1 + TIMESTAMP_LEN;
    if raw.len() < min_len {
        return Err(GShockError::ResponseTooShort {
            expected: min_len,
            got: raw.len(),
        });
    }
    let kind = NotificationType::from_u8(raw[PACKET_HEADER.len()])?;
    let timestamp = std::str::from_utf8(&raw[PACKET_HEADER.len() + 1..min_len])
        .map_err(|e| GShockError::MalformedResponse(format!("bad timestamp: {e}")))?
        .to_string();

    let mut offset = min_len;
    let mut fields = Vec::with_capacity(4);
    for name in ["app", "title", "short text", "text"] {
        if raw.len() < offset + 2 {
            return Err(GShockError::MalformedResponse(format!(
                "truncated {name} length prefix at offset {offset}"
            )));
        }
        let len = raw[offset] as usize;
        offset += 2;
        if raw.len() < offset + len {
            return Err(GShockError::MalformedResponse(format!(
                "{name} field overruns packet: {len} bytes at offset {offset}"
            )));
        }
        let value = std::str::from_utf8(&raw[offset..offset + len])
            .map_err(|e| GShockError::MalformedResponse(format!("bad {name} field: {e}")))?;
        fields.push(value.to_string());
        offset += len;
    }

    let text = fields.pop().unwrap_or_default();
    let short_text = fields.pop().unwrap_or_default();
    let title = fields.pop().unwrap_or_default();
    let app = fields.pop().unwrap_or_default();
    AppNotification::new(kind, &timestamp, &app, &title, &short_text, &text)
}

/// XOR every byte with 0xFF. Symmetric, so it both obfuscates an outbound
/// packet and recovers an inbound one.
pub fn xor_buffer(buffer: &[u8]) -> Vec<u8> {
    buffer.iter().map(|b| b ^ 0xff).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AppNotification {
        AppNotification::new(
            NotificationType::Calendar,
            "20231002T203950",
            "Calendar",
            "Meeting",
            "Standup at 10",
            "Standup at 10 in the blue room",
        )
        .unwrap()
    }

    #[test]
    fn test_notification_roundtrip() {
        let notification = sample();
        let packet = encode_notification_packet(&notification);
        assert_eq!(&packet[..6], &PACKET_HEADER);
        assert_eq!(packet[6], 5);
        assert_eq!(decode_notification_packet(&packet).unwrap(), notification);
    }

    #[test]
    fn test_xor_is_symmetric() {
        let packet = encode_notification_packet(&sample());
        let obfuscated = xor_buffer(&packet);
        assert_ne!(obfuscated, packet);
        assert_eq!(xor_buffer(&obfuscated), packet);
    }

    #[test]
    fn test_text_truncation_caps() {
        let long = "x".repeat(400);
        let notification = AppNotification::new(
            NotificationType::Message,
            "20231002T203950",
            "Messages",
            "Bob",
            &long,
            &long,
        )
        .unwrap();
        assert_eq!(notification.short_text().len(), 40);
        // combined cap binds harder than the per-field cap
        assert_eq!(notification.text().len(), 206 - 40);
    }

    #[test]
    fn test_truncation_respects_utf8() {
        let text = "é".repeat(200);
        let notification = AppNotification::new(
            NotificationType::Generic,
            "20231002T203950",
            "App",
            "",
            "",
            &text,
        )
        .unwrap();
        assert!(notification.text().len() <= 193);
        assert_eq!(notification.text().len() % 2, 0);
        assert!(std::str::from_utf8(notification.text().as_bytes()).is_ok());
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        assert!(AppNotification::new(
            NotificationType::Generic,
            "2023-10-02",
            "App",
            "",
            "",
            ""
        )
        .is_err());
    }

    #[test]
    fn test_decode_rejects_overrun_field() {
        let mut packet = encode_notification_packet(&sample());
        // inflate the app length prefix past the end of the buffer
        packet[6 + 1 + 15] = 0xf0;
        assert!(decode_notification_packet(&packet).is_err());
    }

    #[test]
    fn test_decode_rejects_short_packet() {
        assert!(decode_notification_packet(&[0x00; 10]).is_err());
    }
}
