//! Synthetic request/response protocol
//!
//! ## Protocol Format
//!
//! Request (binary, little-endian, 48 bytes):
//! ```text
//! [tag: u64][count: u64][delay_0: u64][delay_1: u64][delay_2: u64][delay_3: u64]
//! ```
//!
//! Response (binary, little-endian, 8 bytes):
//! ```text
//! [tag: u64]
//! ```
//!
//! The server spends `delay_0 + .. + delay_{count-1}` microseconds on the
//! request, then answers with the tag unchanged. The tag is opaque to the
//! server and is the only way the client correlates responses.

use crate::{Error, Result};

/// Number of delay slots in a request
pub const MAX_DELAYS: usize = 4;

/// Request sent to the synthetic service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RequestPacket {
    pub tag: u64,
    /// Number of populated entries in `delays`
    pub count: u64,
    /// Requested service time per stage, in microseconds
    pub delays: [u64; MAX_DELAYS],
}

impl RequestPacket {
    pub const SIZE: usize = 8 + 8 + 8 * MAX_DELAYS;

    /// Single-stage request asking for `service_us` of work
    pub fn single(tag: u64, service_us: u64) -> Self {
        let mut delays = [0; MAX_DELAYS];
        delays[0] = service_us;
        Self { tag, count: 1, delays }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.tag.to_le_bytes());
        buf[8..16].copy_from_slice(&self.count.to_le_bytes());
        for (i, delay) in self.delays.iter().enumerate() {
            let start = 16 + i * 8;
            buf[start..start + 8].copy_from_slice(&delay.to_le_bytes());
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Protocol(format!(
                "Request needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }

        let tag = read_u64(data, 0);
        let count = read_u64(data, 8);
        if count > MAX_DELAYS as u64 {
            return Err(Error::Protocol(format!(
                "Request carries {count} delays, at most {MAX_DELAYS} allowed"
            )));
        }

        let mut delays = [0; MAX_DELAYS];
        for (i, delay) in delays.iter_mut().enumerate() {
            *delay = read_u64(data, 16 + i * 8);
        }

        Ok(Self { tag, count, delays })
    }

    /// Total requested service time over the populated stages
    pub fn total_delay_us(&self) -> u64 {
        self.delays.iter().take(self.count as usize).fold(0u64, |acc, d| acc.saturating_add(*d))
    }
}

/// Response from the synthetic service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponsePacket {
    pub tag: u64,
}

impl ResponsePacket {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.tag.to_le_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::Protocol(format!(
                "Response needs {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        Ok(Self { tag: read_u64(data, 0) })
    }
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let packet = RequestPacket::single(0x0102_0304_0506_0708, 500);
        let bytes = packet.encode();

        assert_eq!(RequestPacket::SIZE, 48);
        assert_eq!(&bytes[0..8], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        assert_eq!(u64::from_le_bytes(bytes[8..16].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(bytes[16..24].try_into().unwrap()), 500);
        assert!(bytes[24..].iter().all(|b| *b == 0));

        assert_eq!(RequestPacket::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_request_rejects_too_many_delays() {
        let mut bytes = RequestPacket::single(1, 10).encode();
        bytes[8..16].copy_from_slice(&5u64.to_le_bytes());
        assert!(matches!(RequestPacket::decode(&bytes), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_request_rejects_short_input() {
        let bytes = RequestPacket::single(1, 10).encode();
        assert!(RequestPacket::decode(&bytes[..47]).is_err());
    }

    #[test]
    fn test_total_delay_counts_populated_stages_only() {
        let packet = RequestPacket { tag: 1, count: 2, delays: [100, 50, 999, 999] };
        assert_eq!(packet.total_delay_us(), 150);
        assert_eq!(RequestPacket::single(1, 0).total_delay_us(), 0);
    }

    #[test]
    fn test_response_echoes_tag() {
        let response = ResponsePacket { tag: u64::MAX - 3 };
        let bytes = response.encode();
        assert_eq!(bytes.len(), ResponsePacket::SIZE);
        assert_eq!(ResponsePacket::decode(&bytes).unwrap(), response);
        assert!(ResponsePacket::decode(&bytes[..7]).is_err());
    }
}
