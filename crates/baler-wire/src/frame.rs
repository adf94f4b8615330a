//! Frame encode/decode.
//!
//! The sender writes `hdr_len (u16 BE) ‖ header_json ‖ payload` and the
//! receiver must read exactly `comp_len` payload bytes after the header.
//! Any short read or parse failure is a protocol error; the caller closes
//! the connection.

use std::io::{Read, Write};

use bytes::{BufMut, Bytes, BytesMut};

use baler_types::Limits;

use crate::error::{WireError, WireResult};
use crate::header::FrameHeader;

/// Size of the header length prefix.
pub const FRAME_LEN_PREFIX: usize = 2;

/// A framed batch: header plus compressed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Builds a frame, checking that the payload matches `header.comp_len`.
    pub fn new(header: FrameHeader, payload: Bytes) -> WireResult<Self> {
        if header.comp_len != payload.len() as u64 {
            return Err(WireError::PayloadLenMismatch {
                expected: header.comp_len,
                actual: payload.len(),
            });
        }
        Ok(Self { header, payload })
    }

    /// Serialized size of this frame on the wire.
    pub fn encoded_len(&self) -> WireResult<usize> {
        let header_json = serde_json::to_vec(&self.header)
            .map_err(|e| WireError::BadHeader(e.to_string()))?;
        Ok(FRAME_LEN_PREFIX + header_json.len() + self.payload.len())
    }

    /// Encodes the frame into `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> WireResult<()> {
        let header_json = serde_json::to_vec(&self.header)
            .map_err(|e| WireError::BadHeader(e.to_string()))?;
        if header_json.len() > usize::from(u16::MAX) {
            return Err(WireError::HeaderTooLong(header_json.len()));
        }
        buf.reserve(FRAME_LEN_PREFIX + header_json.len() + self.payload.len());
        buf.put_u16(header_json.len() as u16);
        buf.put_slice(&header_json);
        buf.put_slice(&self.payload);
        Ok(())
    }

    /// Writes the frame to a blocking writer as one contiguous buffer.
    ///
    /// A single `write_all` keeps the frame atomic from the shipper's point
    /// of view: either the whole frame reaches the socket buffer or the
    /// write error surfaces before any partial state is considered sent.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> WireResult<()> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Reads one frame from a blocking reader.
    ///
    /// Returns [`WireError::Eof`] only when the peer closed the connection
    /// cleanly before the first length byte; a close anywhere else inside
    /// the frame is a protocol error.
    pub fn read_from<R: Read>(reader: &mut R, limits: &Limits) -> WireResult<Self> {
        let hdr_len = read_len_prefix(reader)?;
        if hdr_len == 0 {
            return Err(WireError::BadHeader("zero-length header".to_owned()));
        }

        let mut header_json = vec![0u8; hdr_len];
        reader.read_exact(&mut header_json)?;
        let header: FrameHeader = serde_json::from_slice(&header_json)
            .map_err(|e| WireError::BadHeader(e.to_string()))?;
        header.validate(limits)?;

        let mut payload = vec![0u8; header.comp_len as usize];
        reader.read_exact(&mut payload)?;

        Ok(Self {
            header,
            payload: Bytes::from(payload),
        })
    }
}

/// Reads the 2-byte BE length prefix, distinguishing a clean close (no
/// bytes at all) from a truncated prefix.
fn read_len_prefix<R: Read>(reader: &mut R) -> WireResult<usize> {
    let mut prefix = [0u8; FRAME_LEN_PREFIX];
    let mut filled = 0;
    while filled < FRAME_LEN_PREFIX {
        let n = reader.read(&mut prefix[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Err(WireError::Eof);
            }
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed inside frame length prefix",
            )));
        }
        filled += n;
    }
    Ok(usize::from(u16::from_be_bytes(prefix)))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use proptest::prelude::*;

    use crate::header::PROTOCOL_VERSION;

    use super::*;

    fn frame_for(payload: &[u8], raw_len: u64, count: u64) -> Frame {
        Frame::new(
            FrameHeader {
                comp_len: payload.len() as u64,
                count,
                dict_id: 0,
                level: 7,
                raw_len,
                topic: "t".to_owned(),
                v: PROTOCOL_VERSION,
            },
            Bytes::copy_from_slice(payload),
        )
        .unwrap()
    }

    #[test]
    fn roundtrip() {
        let frame = frame_for(b"compressed-bytes", 100, 2);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf.to_vec());
        let decoded = Frame::read_from(&mut cursor, &Limits::default()).unwrap();
        assert_eq!(decoded, frame);
        // Nothing left behind.
        assert_eq!(cursor.position() as usize, cursor.get_ref().len());
    }

    #[test]
    fn length_prefix_is_big_endian() {
        let frame = frame_for(b"x", 10, 1);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let header_json = serde_json::to_vec(&frame.header).unwrap();
        assert_eq!(buf[..2], (header_json.len() as u16).to_be_bytes());
    }

    #[test]
    fn comp_len_matches_payload_on_the_wire() {
        let frame = frame_for(b"abcdef", 32, 1);
        assert_eq!(frame.header.comp_len, 6);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        assert_eq!(
            buf.len(),
            frame.encoded_len().unwrap()
        );
    }

    #[test]
    fn new_rejects_mismatched_payload() {
        let header = FrameHeader {
            comp_len: 5,
            count: 1,
            dict_id: 0,
            level: 7,
            raw_len: 10,
            topic: "t".to_owned(),
            v: PROTOCOL_VERSION,
        };
        let err = Frame::new(header, Bytes::from_static(b"four")).unwrap_err();
        assert!(matches!(
            err,
            WireError::PayloadLenMismatch { expected: 5, actual: 4 }
        ));
    }

    #[test]
    fn clean_eof_before_frame() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(matches!(
            Frame::read_from(&mut cursor, &Limits::default()),
            Err(WireError::Eof)
        ));
    }

    #[test]
    fn truncated_prefix_is_protocol_error() {
        let mut cursor = Cursor::new(vec![0x00]);
        assert!(matches!(
            Frame::read_from(&mut cursor, &Limits::default()),
            Err(WireError::Io(_))
        ));
    }

    #[test]
    fn truncated_payload_is_protocol_error() {
        let frame = frame_for(b"full-payload", 64, 1);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).unwrap();
        let cut = buf.len() - 4;
        let mut cursor = Cursor::new(buf[..cut].to_vec());
        assert!(matches!(
            Frame::read_from(&mut cursor, &Limits::default()),
            Err(WireError::Io(_))
        ));
    }

    #[test]
    fn garbage_header_is_protocol_error() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&5u16.to_be_bytes());
        wire.extend_from_slice(b"not-j");
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            Frame::read_from(&mut cursor, &Limits::default()),
            Err(WireError::BadHeader(_))
        ));
    }

    #[test]
    fn invalid_header_fields_are_rejected() {
        let mut wire = Vec::new();
        let json = r#"{"comp_len":1,"count":0,"dict_id":0,"level":7,"raw_len":1,"topic":"t","v":1}"#;
        wire.extend_from_slice(&(json.len() as u16).to_be_bytes());
        wire.extend_from_slice(json.as_bytes());
        wire.push(0xFF);
        let mut cursor = Cursor::new(wire);
        assert!(matches!(
            Frame::read_from(&mut cursor, &Limits::default()),
            Err(WireError::Invalid(_))
        ));
    }

    #[test]
    fn frames_decode_back_to_back() {
        let a = frame_for(b"first", 32, 1);
        let b = frame_for(b"second!", 64, 2);
        let mut buf = BytesMut::new();
        a.encode(&mut buf).unwrap();
        b.encode(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf.to_vec());
        assert_eq!(Frame::read_from(&mut cursor, &Limits::default()).unwrap(), a);
        assert_eq!(Frame::read_from(&mut cursor, &Limits::default()).unwrap(), b);
        assert!(matches!(
            Frame::read_from(&mut cursor, &Limits::default()),
            Err(WireError::Eof)
        ));
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary_payloads(
            payload in prop::collection::vec(any::<u8>(), 0..2048),
            count in 1u64..50,
        ) {
            // raw_len must stay plausible against comp_len and count.
            let raw_len = (payload.len() as u64).max(count - 1).max(1) * 2 + 512;
            let frame = Frame::new(
                FrameHeader {
                    comp_len: payload.len() as u64,
                    count,
                    dict_id: 3,
                    level: 7,
                    raw_len,
                    topic: "prop.topic".to_owned(),
                    v: PROTOCOL_VERSION,
                },
                Bytes::from(payload),
            ).unwrap();

            let mut buf = BytesMut::new();
            frame.encode(&mut buf).unwrap();
            let mut cursor = Cursor::new(buf.to_vec());
            let decoded = Frame::read_from(&mut cursor, &Limits::default()).unwrap();
            prop_assert_eq!(decoded, frame);
        }
    }
}
