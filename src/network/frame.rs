use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Cap on how much capacity an incomplete frame may reserve up front. The
/// length prefix is attacker-controlled, so growth beyond this is left to
/// the reads that actually deliver body bytes.
const MAX_EAGER_RESERVE: usize = 64 * 1024;

/// Length-prefixed wire framing.
///
/// A frame is `length (4 bytes, unsigned, little-endian) || body (length bytes)`.
/// There is no magic number, version byte, or checksum; the body is opaque to
/// this layer. The codec enforces no maximum frame size itself — owners that
/// need one check `declared_len` before unpacking.
pub struct Frame;

impl Frame {
    /// Wraps a payload into a wire frame.
    pub fn pack(payload: &[u8]) -> Bytes {
        let mut frame = BytesMut::with_capacity(4 + payload.len());
        frame.put_u32_le(payload.len() as u32);
        frame.put_slice(payload);
        frame.freeze()
    }

    /// Peeks the length prefix without consuming anything.
    ///
    /// Returns `None` while fewer than 4 bytes are buffered.
    pub fn declared_len(buffer: &BytesMut) -> Option<usize> {
        if buffer.remaining() < 4 {
            return None;
        }
        let prefix = buffer.get(0..4).unwrap();
        Some(u32::from_le_bytes(prefix.try_into().unwrap()) as usize)
    }

    /// Extracts one complete frame from the front of the buffer.
    ///
    /// Returns `None` if the buffer holds less than a whole frame; nothing is
    /// consumed in that case, though capacity is reserved toward the known
    /// remainder (bounded, since the prefix is untrusted) so the next read
    /// can make progress. Multiple frames may arrive coalesced in one read,
    /// so callers loop until `None`.
    pub fn unpack(buffer: &mut BytesMut) -> Option<Bytes> {
        let body_len = Frame::declared_len(buffer)?;
        if buffer.remaining() < body_len + 4 {
            let needed = body_len + 4 - buffer.remaining();
            buffer.reserve(needed.min(MAX_EAGER_RESERVE));
            return None;
        }
        buffer.advance(4);
        Some(buffer.split_to(body_len).freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Vec::new())]
    #[case(b"hello".to_vec())]
    #[case(vec![0xA5; 70 * 1024])]
    fn test_pack_unpack_round_trip(#[case] payload: Vec<u8>) {
        let mut buffer = BytesMut::from(&Frame::pack(&payload)[..]);
        let unpacked = Frame::unpack(&mut buffer).unwrap();
        assert_eq!(&unpacked[..], &payload[..]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_partial_frame_stability() {
        let frame = Frame::pack(b"partial");
        let mut buffer = BytesMut::new();
        for &byte in &frame[..frame.len() - 1] {
            buffer.put_u8(byte);
            assert!(Frame::unpack(&mut buffer).is_none());
        }
        buffer.put_u8(frame[frame.len() - 1]);
        let unpacked = Frame::unpack(&mut buffer).unwrap();
        assert_eq!(&unpacked[..], b"partial");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_coalesced_frames_drain_in_order() {
        let mut buffer = BytesMut::new();
        buffer.put_slice(&Frame::pack(b"first"));
        buffer.put_slice(&Frame::pack(b"second"));

        assert_eq!(&Frame::unpack(&mut buffer).unwrap()[..], b"first");
        assert_eq!(&Frame::unpack(&mut buffer).unwrap()[..], b"second");
        assert!(Frame::unpack(&mut buffer).is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_declared_len_needs_full_prefix() {
        let mut buffer = BytesMut::new();
        buffer.put_slice(&[0x05, 0x00, 0x00]);
        assert_eq!(Frame::declared_len(&buffer), None);
        buffer.put_u8(0x00);
        assert_eq!(Frame::declared_len(&buffer), Some(5));
    }

    #[test]
    fn test_hostile_length_prefix_does_not_reserve_declared_size() {
        let mut buffer = BytesMut::new();
        buffer.put_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(Frame::unpack(&mut buffer).is_none());
        assert!(buffer.capacity() <= 2 * MAX_EAGER_RESERVE);
        assert_eq!(buffer.len(), 4);
    }

    #[test]
    fn test_prefix_is_little_endian() {
        let frame = Frame::pack(&[0u8; 258]);
        assert_eq!(&frame[0..4], &[0x02, 0x01, 0x00, 0x00]);
    }
}
