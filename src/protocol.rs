/// Wire format: packet framing and serialization.
///
/// Data packet layout (all integers big-endian):
///   [0..2]  sequence number (u16)
///   [2]     final flag (0 or 1)
///   [3..5]  payload length (u16)
///   [5..]   payload, exactly `length` bytes
///
/// Acknowledgment layout:
///   [0..2]  acknowledged sequence number (u16)
///   [2]     marker byte, always 1
///
/// Datagrams are capped at 1024 bytes, so a payload carries at most
/// 1024 - 5 = 1019 bytes. Sequence numbers start at 0 and never wrap;
/// a transfer is limited to 65536 packets.
use thiserror::Error;

/// Bytes of framing in front of every data payload.
pub const HEADER_SIZE: usize = 5;
/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM: usize = 1024;
/// Largest payload that fits a datagram after the header.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_SIZE;
/// Acknowledgments are fixed-size.
pub const ACK_SIZE: usize = 3;
/// Trailing byte of every acknowledgment.
pub const ACK_MARKER: u8 = 1;
/// The sequence space is 16-bit and never wraps.
pub const MAX_PACKETS: u64 = 1 << 16;

/// Why an incoming datagram could not be decoded. Malformed datagrams are
/// logged and dropped; they never abort a transfer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {len} bytes")]
    Truncated { len: usize },
    #[error("declared payload length {declared} exceeds the 1019-byte limit")]
    Oversize { declared: usize },
    #[error("declared payload length {declared}, datagram carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("final flag byte is {0}, expected 0 or 1")]
    BadFinalFlag(u8),
    #[error("acknowledgment marker byte is {0}, expected 1")]
    BadAckMarker(u8),
}

/// One data packet, decoded from or headed for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub sequence: u16,
    pub is_final: bool,
    pub payload: Vec<u8>,
}

impl DataPacket {
    /// Serialize to wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        debug_assert!(self.payload.len() <= MAX_PAYLOAD);
        let mut buf = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.push(self.is_final as u8);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse from wire format. The datagram must carry exactly the payload
    /// the header declares.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::Truncated { len: buf.len() });
        }
        let sequence = u16::from_be_bytes([buf[0], buf[1]]);
        let is_final = match buf[2] {
            0 => false,
            1 => true,
            other => return Err(WireError::BadFinalFlag(other)),
        };
        let declared = u16::from_be_bytes([buf[3], buf[4]]) as usize;
        if declared > MAX_PAYLOAD {
            return Err(WireError::Oversize { declared });
        }
        let actual = buf.len() - HEADER_SIZE;
        if declared != actual {
            return Err(WireError::LengthMismatch { declared, actual });
        }
        Ok(DataPacket {
            sequence,
            is_final,
            payload: buf[HEADER_SIZE..].to_vec(),
        })
    }
}

/// Encode an acknowledgment for `sequence`.
pub fn encode_ack(sequence: u16) -> [u8; ACK_SIZE] {
    let seq = sequence.to_be_bytes();
    [seq[0], seq[1], ACK_MARKER]
}

/// Decode an acknowledgment, returning the acknowledged sequence number.
/// Bytes past the marker are ignored.
pub fn decode_ack(buf: &[u8]) -> Result<u16, WireError> {
    if buf.len() < ACK_SIZE {
        return Err(WireError::Truncated { len: buf.len() });
    }
    if buf[2] != ACK_MARKER {
        return Err(WireError::BadAckMarker(buf[2]));
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Number of packets a stream of `len` bytes occupies on the wire. An empty
/// stream still needs one (empty, final) packet so the receiver learns the
/// stream ended.
pub fn packets_for(len: u64) -> u64 {
    if len == 0 {
        1
    } else {
        (len + MAX_PAYLOAD as u64 - 1) / MAX_PAYLOAD as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_packet() {
        let packet = DataPacket {
            sequence: 42,
            is_final: false,
            payload: vec![1, 2, 3, 4, 5],
        };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 5);
        let parsed = DataPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn roundtrip_final_packet_with_empty_payload() {
        let packet = DataPacket {
            sequence: 7,
            is_final: true,
            payload: Vec::new(),
        };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        let parsed = DataPacket::from_bytes(&bytes).unwrap();
        assert!(parsed.is_final);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn roundtrip_max_payload() {
        let packet = DataPacket {
            sequence: 0,
            is_final: true,
            payload: vec![0xAB; MAX_PAYLOAD],
        };
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), MAX_DATAGRAM);
        let parsed = DataPacket::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.payload.len(), MAX_PAYLOAD);
    }

    #[test]
    fn sequence_above_signed_range_survives() {
        // 0xBEEF has the high bit set; the codec must not sign-extend.
        let packet = DataPacket {
            sequence: 0xBEEF,
            is_final: false,
            payload: vec![9],
        };
        let parsed = DataPacket::from_bytes(&packet.to_bytes()).unwrap();
        assert_eq!(parsed.sequence, 0xBEEF);
    }

    #[test]
    fn reject_short_datagram() {
        let err = DataPacket::from_bytes(&[0, 1, 0, 0]).unwrap_err();
        assert_eq!(err, WireError::Truncated { len: 4 });
    }

    #[test]
    fn reject_length_mismatch() {
        let mut bytes = DataPacket {
            sequence: 3,
            is_final: false,
            payload: vec![1, 2, 3],
        }
        .to_bytes();
        bytes.pop();
        let err = DataPacket::from_bytes(&bytes).unwrap_err();
        assert_eq!(
            err,
            WireError::LengthMismatch {
                declared: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn reject_oversize_length() {
        // Hand-built header declaring one byte more than the cap.
        let declared = (MAX_PAYLOAD + 1) as u16;
        let mut bytes = vec![0, 0, 0];
        bytes.extend_from_slice(&declared.to_be_bytes());
        bytes.extend_from_slice(&vec![0u8; MAX_PAYLOAD + 1]);
        let err = DataPacket::from_bytes(&bytes).unwrap_err();
        assert_eq!(
            err,
            WireError::Oversize {
                declared: MAX_PAYLOAD + 1
            }
        );
    }

    #[test]
    fn reject_bad_final_flag() {
        let mut bytes = DataPacket {
            sequence: 1,
            is_final: false,
            payload: vec![5],
        }
        .to_bytes();
        bytes[2] = 7;
        let err = DataPacket::from_bytes(&bytes).unwrap_err();
        assert_eq!(err, WireError::BadFinalFlag(7));
    }

    #[test]
    fn roundtrip_ack() {
        let bytes = encode_ack(0xBEEF);
        assert_eq!(bytes.len(), ACK_SIZE);
        assert_eq!(decode_ack(&bytes).unwrap(), 0xBEEF);
    }

    #[test]
    fn reject_short_ack() {
        let err = decode_ack(&[0, 5]).unwrap_err();
        assert_eq!(err, WireError::Truncated { len: 2 });
    }

    #[test]
    fn reject_bad_ack_marker() {
        let err = decode_ack(&[0, 5, 0]).unwrap_err();
        assert_eq!(err, WireError::BadAckMarker(0));
    }

    #[test]
    fn packet_count_for_stream_lengths() {
        assert_eq!(packets_for(0), 1);
        assert_eq!(packets_for(1), 1);
        assert_eq!(packets_for(MAX_PAYLOAD as u64), 1);
        assert_eq!(packets_for(MAX_PAYLOAD as u64 + 1), 2);
        assert_eq!(packets_for(MAX_PAYLOAD as u64 * MAX_PACKETS), MAX_PACKETS);
    }
}
