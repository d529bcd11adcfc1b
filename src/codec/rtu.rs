// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use log::{trace, warn};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    bytes::{Buf as _, BufMut as _, Bytes, BytesMut},
    frame::{Adu, ExceptionResponse, Request, Response, ResponsePdu},
    DecodeError, Error,
};

use super::{
    crc::{check_crc, crc16},
    encode_exception_response_pdu, encode_request_pdu, encode_response_pdu,
};

const CRC_LEN: usize = 2;

const MIN_ADU_LEN: usize = 1 + 1 + CRC_LEN; // addr + function + crc

const MAX_ADU_LEN: usize = 1 + super::MAX_PDU_SIZE + CRC_LEN;

/// Append the CRC trailer (low byte first) to `pdu`.
#[must_use]
pub fn frame(pdu: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(pdu.len() + CRC_LEN);
    buf.put_slice(pdu);
    buf.put_u16_le(crc16(pdu));
    buf.freeze()
}

/// Verify and strip the CRC trailer of `buf`.
pub fn deframe(buf: &[u8]) -> Result<&[u8], DecodeError> {
    check_crc(buf)
}

/// Frame length as far as it can be told from the bytes at hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameLen {
    /// More header bytes are needed.
    Incomplete,
    /// Total length including slave id and CRC.
    Known(usize),
    /// The function code has no fixed shape, the whole buffer is the frame.
    Unknown,
}

fn with_payload(payload_len: usize) -> FrameLen {
    FrameLen::Known(MIN_ADU_LEN + payload_len)
}

fn request_frame_len(buf: &[u8]) -> FrameLen {
    if buf.len() < 2 {
        return FrameLen::Incomplete;
    }
    match buf[1] {
        0x01..=0x06 => with_payload(4),
        0x0F | 0x10 => match buf.get(6) {
            Some(byte_count) => with_payload(5 + usize::from(*byte_count)),
            None => FrameLen::Incomplete,
        },
        _ => FrameLen::Unknown,
    }
}

fn response_frame_len(buf: &[u8]) -> FrameLen {
    if buf.len() < 2 {
        return FrameLen::Incomplete;
    }
    match buf[1] {
        0x01..=0x04 => match buf.get(2) {
            Some(byte_count) => with_payload(1 + usize::from(*byte_count)),
            None => FrameLen::Incomplete,
        },
        0x05 | 0x06 | 0x0F | 0x10 => with_payload(4),
        fn_code if fn_code & 0x80 != 0 => with_payload(1),
        _ => FrameLen::Unknown,
    }
}

/// Find and decode the first valid frame in `buf`.
///
/// Decoding starts at the first byte. If that fails, later start offsets are
/// tried so that leading line noise does not hide a complete frame behind it.
/// As long as the frame at the first byte is still incomplete nothing else is
/// tried. Bytes in front of a decoded frame are dropped. The buffer is left
/// untouched if no frame could be decoded.
fn decode_frame<T>(
    buf: &mut BytesMut,
    frame_len: fn(&[u8]) -> FrameLen,
    decode: fn(&[u8]) -> Result<T, DecodeError>,
) -> Result<Option<Adu<T>>, Error> {
    let mut first_error = None;
    for offset in 0..buf.len() {
        let window = &buf[offset..];
        if window.len() < MIN_ADU_LEN {
            if offset == 0 {
                return Ok(None);
            }
            break;
        }
        let len = match frame_len(window) {
            FrameLen::Known(len) if len <= window.len() => len,
            FrameLen::Known(_) | FrameLen::Incomplete => {
                if offset == 0 {
                    return Ok(None);
                }
                continue;
            }
            FrameLen::Unknown if window.len() > MAX_ADU_LEN => {
                if offset == 0 {
                    first_error = Some(DecodeError::Malformed("PDU size exceeded"));
                }
                continue;
            }
            FrameLen::Unknown => window.len(),
        };
        match decode(&window[..len]) {
            Ok(pdu) => {
                if offset > 0 {
                    warn!("Dropping {offset} byte(s) in front of a valid frame");
                    buf.advance(offset);
                }
                let raw = buf.split_to(len).freeze();
                trace!("Decoded RTU frame: {raw:02X?}");
                return Ok(Some(Adu { pdu, raw }));
            }
            Err(err) => {
                if offset == 0 {
                    first_error = Some(err);
                }
            }
        }
    }
    first_error.map_or(Ok(None), |err| Err(err.into()))
}

fn put_crc(buf: &mut BytesMut, start: usize) {
    let crc = crc16(&buf[start..]);
    buf.put_u16_le(crc);
}

/// Client side: sends requests, receives responses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = Adu<ResponsePdu>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        decode_frame(buf, response_frame_len, ResponsePdu::from_raw_crc)
    }
}

impl<'a> Encoder<&'a Request> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, req: &'a Request, buf: &mut BytesMut) -> Result<(), Error> {
        let start = buf.len();
        encode_request_pdu(buf, req);
        put_crc(buf, start);
        Ok(())
    }
}

/// Server side: receives requests, sends responses and exceptions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = Adu<Request>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        decode_frame(buf, request_frame_len, Request::from_raw_crc)
    }
}

impl<'a> Encoder<&'a Response> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, rsp: &'a Response, buf: &mut BytesMut) -> Result<(), Error> {
        let start = buf.len();
        encode_response_pdu(buf, rsp);
        put_crc(buf, start);
        Ok(())
    }
}

impl<'a> Encoder<&'a ExceptionResponse> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, rsp: &'a ExceptionResponse, buf: &mut BytesMut) -> Result<(), Error> {
        let start = buf.len();
        encode_exception_response_pdu(buf, *rsp);
        put_crc(buf, start);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ExceptionCode, FunctionCode};

    #[test]
    fn frame_and_deframe() {
        let pdu = [0x11, 0x03, 0x00, 0x10, 0x00, 0x03];
        let framed = frame(&pdu);
        assert_eq!(
            &framed[..],
            &[0x11, 0x03, 0x00, 0x10, 0x00, 0x03, 0x06, 0x9E]
        );
        assert_eq!(deframe(&framed).unwrap(), &pdu);
    }

    #[test]
    fn test_request_frame_len() {
        let mut buf = [0x66, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(request_frame_len(&buf[..1]), FrameLen::Incomplete);

        for fn_code in 0x01..=0x06 {
            buf[1] = fn_code;
            assert_eq!(request_frame_len(&buf), FrameLen::Known(8));
        }

        buf[1] = 0x0F;
        assert_eq!(request_frame_len(&buf[..6]), FrameLen::Incomplete);
        buf[6] = 99;
        assert_eq!(request_frame_len(&buf), FrameLen::Known(108));

        buf[1] = 0x10;
        assert_eq!(request_frame_len(&buf), FrameLen::Known(108));

        buf[1] = 0x08;
        assert_eq!(request_frame_len(&buf), FrameLen::Unknown);

        buf[1] = 0x41;
        assert_eq!(request_frame_len(&buf), FrameLen::Unknown);
    }

    #[test]
    fn test_response_frame_len() {
        let mut buf = [0x66, 0x01, 99, 0x00];
        assert_eq!(response_frame_len(&buf[..2]), FrameLen::Incomplete);

        for fn_code in 0x01..=0x04 {
            buf[1] = fn_code;
            assert_eq!(response_frame_len(&buf), FrameLen::Known(104));
        }

        for fn_code in [0x05, 0x06, 0x0F, 0x10] {
            buf[1] = fn_code;
            assert_eq!(response_frame_len(&buf), FrameLen::Known(8));
        }

        for fn_code in 0x81..=0xAB {
            buf[1] = fn_code;
            assert_eq!(response_frame_len(&buf), FrameLen::Known(5));
        }

        buf[1] = 0x08;
        assert_eq!(response_frame_len(&buf), FrameLen::Unknown);
    }

    mod client {
        use super::*;

        #[test]
        fn decode_partly_received_client_message() {
            let mut codec = ClientCodec;
            let mut buf = BytesMut::from(
                &[
                    0x12, // slave address
                    0x02, // function code
                    0x03, // byte count
                    0x00, // data
                    0x00, // data
                    0x00, // data
                    0x00, // CRC first byte
                          // missing crc second byte
                ][..],
            );
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 7);
        }

        #[test]
        fn decode_rtu_message() {
            let mut codec = ClientCodec;
            let mut buf = BytesMut::from(
                &[
                    0x01, // slave address
                    0x03, // function code
                    0x04, // byte count
                    0x89, //
                    0x02, //
                    0x42, //
                    0xC7, //
                    0x00, // crc
                    0x9D, // crc
                    0x00,
                ][..],
            );
            let Adu { pdu, raw } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(buf.len(), 1);
            assert_eq!(raw.len(), 9);
            let rsp = pdu.0.unwrap();
            assert_eq!(rsp.slave(), 0x01);
            assert_eq!(rsp.words(), Some(vec![0x8902, 0x42C7]));
        }

        #[test]
        fn decode_exception_message() {
            let mut codec = ClientCodec;
            let mut buf = BytesMut::from(
                &[
                    0x66, //
                    0x82, // exception = 0x80 + 0x02
                    0x03, //
                    0xB1, // crc
                    0x7E, // crc
                ][..],
            );

            let Adu { pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
            let err = pdu.0.unwrap_err();
            assert_eq!(format!("{err}"), "Modbus function 2: Illegal data value");
            assert_eq!(buf.len(), 0);
        }

        #[test]
        fn decode_message_with_invalid_crc() {
            let mut codec = ClientCodec;
            let mut buf = BytesMut::from(&[0x66, 0x82, 0x03, 0xB1, 0x7F][..]);
            let err = codec.decode(&mut buf).unwrap_err();
            assert!(err.is_recoverable());
            assert!(matches!(
                err,
                Error::Decode(DecodeError::InvalidCrc { .. })
            ));
            // Nothing is consumed, more bytes may still complete a frame.
            assert_eq!(buf.len(), 5);
        }

        #[test]
        fn skip_leading_noise() {
            let mut codec = ClientCodec;
            let mut buf = BytesMut::from(&[0xFF, 0x00, 0x13][..]);
            assert!(codec.decode(&mut buf).unwrap().is_none());
            buf.extend_from_slice(&[0x11, 0x83, 0x02, 0xC1, 0x34]);

            let Adu { pdu, raw } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(&raw[..], &[0x11, 0x83, 0x02, 0xC1, 0x34]);
            assert_eq!(
                pdu.0,
                Err(ExceptionResponse {
                    slave: 0x11,
                    function: FunctionCode::ReadHoldingRegisters,
                    exception: ExceptionCode::IllegalDataAddress,
                })
            );
            assert!(buf.is_empty());
        }

        #[test]
        fn wait_for_incomplete_frame_at_start() {
            let mut codec = ClientCodec;
            // A register read whose data happens to contain an exception frame.
            let frame = [
                0x11, 0x03, 0x0A, 0x11, 0x83, 0x02, 0xC1, 0x34, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x6A, 0x21,
            ];
            let mut buf = BytesMut::from(&frame[..8]);
            assert!(codec.decode(&mut buf).unwrap().is_none());
            assert_eq!(buf.len(), 8);

            buf.extend_from_slice(&frame[8..]);
            let Adu { pdu, raw } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(&raw[..], &frame);
            assert_eq!(pdu.0.unwrap().count(), 5);
            assert!(buf.is_empty());
        }

        #[test]
        fn oversized_unknown_frame() {
            let mut codec = ClientCodec;
            let mut buf = BytesMut::from(&[0x11, 0x41][..]);
            buf.extend_from_slice(&[0x00; MAX_ADU_LEN]);
            let err = codec.decode(&mut buf).unwrap_err();
            assert!(err.is_recoverable());
            assert_eq!(buf.len(), MAX_ADU_LEN + 2);
        }

        #[test]
        fn encode_read_request() {
            let mut codec = ClientCodec;
            let mut buf = BytesMut::new();
            let req = Request::read_holding_registers(0x01, 0x082b, 2);
            codec.encode(&req, &mut buf).unwrap();

            assert_eq!(
                buf,
                Bytes::from_static(&[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02, 0xB6, 0x63])
            );
        }

        #[test]
        fn encode_after_existing_data() {
            let mut codec = ClientCodec;
            let mut buf = BytesMut::from(&[0xAA, 0xBB][..]);
            let req = Request::read_holding_registers(0x11, 0x0010, 3);
            codec.encode(&req, &mut buf).unwrap();
            assert_eq!(&buf[2..], &[0x11, 0x03, 0x00, 0x10, 0x00, 0x03, 0x06, 0x9E]);
        }
    }

    mod server {
        use super::*;

        #[test]
        fn decode_partly_received_server_message_0x10() {
            let mut codec = ServerCodec;
            let mut buf = BytesMut::from(
                &[
                    0x11, // slave address
                    0x10, // function code
                    0x00, // irrelevant
                    0x00, // irrelevant
                ][..],
            );
            assert_eq!(buf.len(), MIN_ADU_LEN);

            let res = codec.decode(&mut buf).unwrap();

            assert!(res.is_none());
            assert_eq!(buf.len(), MIN_ADU_LEN);
        }

        #[test]
        fn decode_write_multiple_registers() {
            let mut codec = ServerCodec;
            let mut buf = BytesMut::from(
                &[
                    0x11, 0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02, 0x06, 0x30,
                ][..],
            );
            let Adu { pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(
                pdu,
                Request::write_multiple_registers(0x11, 0x0010, &[0x000A, 0x0102])
            );
        }

        #[test]
        fn encode_response_and_exception() {
            let mut codec = ServerCodec;
            let mut buf = BytesMut::new();
            let rsp = Response::new(0x11, FunctionCode::WriteMultipleRegisters, 0x0010, 2);
            codec.encode(&rsp, &mut buf).unwrap();
            assert_eq!(
                &buf[..],
                &[0x11, 0x10, 0x00, 0x10, 0x00, 0x02, 0x42, 0x9D]
            );

            let mut buf = BytesMut::new();
            let ex = ExceptionResponse {
                slave: 0x11,
                function: FunctionCode::ReadHoldingRegisters,
                exception: ExceptionCode::IllegalDataAddress,
            };
            codec.encode(&ex, &mut buf).unwrap();
            assert_eq!(&buf[..], &[0x11, 0x83, 0x02, 0xC1, 0x34]);
        }
    }
}
