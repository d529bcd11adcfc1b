// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

use log::{trace, warn};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    bytes::{Buf as _, BufMut as _, Bytes, BytesMut},
    frame::{
        tcp::{Header, TransactionId},
        Adu, ExceptionResponse, Request, Response, ResponsePdu,
    },
    DecodeError, Error,
};

use super::{
    encode_exception_response_pdu, encode_request_pdu, encode_response_pdu, u16_len, MAX_PDU_SIZE,
};

const HEADER_LEN: usize = 6;

const PROTOCOL_ID: u16 = 0x0000; // TCP

/// Largest value of the length field: slave id plus PDU.
const MAX_LENGTH: usize = 1 + MAX_PDU_SIZE;

/// Prepend an MBAP header to `pdu`.
#[must_use]
pub fn frame(pdu: &[u8], transaction_id: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + pdu.len());
    buf.put_u16(transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16(u16_len(pdu.len()));
    buf.put_slice(pdu);
    buf.freeze()
}

/// Split a complete MBAP frame into its transaction id and payload.
pub fn deframe(buf: &[u8]) -> Result<(u16, &[u8]), DecodeError> {
    let header = parse_header(buf)?.ok_or(DecodeError::Malformed("too short"))?;
    let payload = &buf[HEADER_LEN..];
    if payload.len() != usize::from(header.length) {
        return Err(DecodeError::Malformed("length field does not match frame"));
    }
    Ok((header.transaction_id, payload))
}

fn parse_header(buf: &[u8]) -> Result<Option<Header>, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }
    let transaction_id = u16::from_be_bytes([buf[0], buf[1]]);
    let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
    let length = u16::from_be_bytes([buf[4], buf[5]]);
    if protocol_id != PROTOCOL_ID {
        return Err(DecodeError::Malformed("invalid protocol id"));
    }
    if length == 0 || usize::from(length) > MAX_LENGTH {
        return Err(DecodeError::Malformed("invalid length field"));
    }
    Ok(Some(Header {
        transaction_id,
        length,
    }))
}

/// Split off the next complete frame.
///
/// `check` runs on the header before the payload is looked at. A payload
/// that fails to decode is dropped with its header, the bytes behind it stay
/// buffered. An invalid header is skipped up to the next offset that could
/// start a header.
fn decode_frame<T>(
    buf: &mut BytesMut,
    check: impl FnOnce(Header) -> Result<(), Error>,
    decode: fn(&[u8]) -> Result<T, DecodeError>,
) -> Result<Option<(Header, Adu<T>)>, Error> {
    let header = match parse_header(buf) {
        Ok(Some(header)) => header,
        Ok(None) => return Ok(None),
        Err(err) => {
            let skip = (1..buf.len())
                .find(|&offset| parse_header(&buf[offset..]).is_ok())
                .unwrap_or(buf.len());
            warn!("Dropping {skip} byte(s) in front of an invalid header: {err}");
            buf.advance(skip);
            return Err(err.into());
        }
    };
    let len = HEADER_LEN + usize::from(header.length);
    if buf.len() < len {
        return Ok(None);
    }
    check(header)?;
    match decode(&buf[HEADER_LEN..len]) {
        Ok(pdu) => {
            let raw = buf.split_to(len).freeze();
            trace!("Decoded TCP frame: {raw:02X?}");
            Ok(Some((header, Adu { pdu, raw })))
        }
        Err(err) => {
            warn!("Dropping undecodable frame (transaction {}): {err}", header.transaction_id);
            buf.advance(len);
            Err(err.into())
        }
    }
}

/// Write the header, let `encode_pdu` append the payload and fix up the length.
fn encode_frame(
    buf: &mut BytesMut,
    transaction_id: TransactionId,
    encode_pdu: impl FnOnce(&mut BytesMut),
) {
    let start = buf.len();
    buf.put_u16(transaction_id);
    buf.put_u16(PROTOCOL_ID);
    buf.put_u16(0); // length, see below
    encode_pdu(buf);
    let length = u16_len(buf.len() - start - HEADER_LEN);
    buf[start + 4..start + HEADER_LEN].copy_from_slice(&length.to_be_bytes());
}

/// Client side: numbers requests and matches replies to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClientCodec {
    next_transaction_id: TransactionId,
    pending: Option<TransactionId>,
}

impl ClientCodec {
    pub(crate) const fn new(first_transaction_id: TransactionId) -> Self {
        Self {
            next_transaction_id: first_transaction_id,
            pending: None,
        }
    }

    /// Transaction id of the request sent last, if still unanswered.
    pub(crate) const fn pending(&self) -> Option<TransactionId> {
        self.pending
    }
}

impl Default for ClientCodec {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Decoder for ClientCodec {
    type Item = Adu<ResponsePdu>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        let pending = self.pending;
        let check = |header: Header| match pending {
            Some(expected) if expected != header.transaction_id => Err(Error::InvalidMessageId {
                expected,
                received: header.transaction_id,
            }),
            _ => Ok(()),
        };
        let Some((_, adu)) = decode_frame(buf, check, ResponsePdu::from_raw)? else {
            return Ok(None);
        };
        self.pending = None;
        Ok(Some(adu))
    }
}

impl<'a> Encoder<&'a Request> for ClientCodec {
    type Error = Error;

    fn encode(&mut self, req: &'a Request, buf: &mut BytesMut) -> Result<(), Error> {
        let transaction_id = self.next_transaction_id;
        encode_frame(buf, transaction_id, |buf| encode_request_pdu(buf, req));
        self.next_transaction_id = transaction_id.wrapping_add(1);
        self.pending = Some(transaction_id);
        Ok(())
    }
}

/// Server side: echoes the transaction id of the request being answered.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ServerCodec {
    transaction_id: TransactionId,
}

impl Decoder for ServerCodec {
    type Item = Adu<Request>;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Error> {
        let Some((header, adu)) = decode_frame(buf, |_| Ok(()), Request::from_raw)? else {
            return Ok(None);
        };
        self.transaction_id = header.transaction_id;
        Ok(Some(adu))
    }
}

impl<'a> Encoder<&'a Response> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, rsp: &'a Response, buf: &mut BytesMut) -> Result<(), Error> {
        encode_frame(buf, self.transaction_id, |buf| encode_response_pdu(buf, rsp));
        Ok(())
    }
}

impl<'a> Encoder<&'a ExceptionResponse> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, rsp: &'a ExceptionResponse, buf: &mut BytesMut) -> Result<(), Error> {
        encode_frame(buf, self.transaction_id, |buf| {
            encode_exception_response_pdu(buf, *rsp);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ExceptionCode, FunctionCode, Value};

    #[test]
    fn frame_and_deframe() {
        let framed = frame(&[0x11, 0x03, 0x00, 0x10, 0x00, 0x03], 1);
        assert_eq!(
            &framed[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x10, 0x00, 0x03]
        );
        let (transaction_id, pdu) = deframe(&framed).unwrap();
        assert_eq!(transaction_id, 1);
        assert_eq!(pdu, &[0x11, 0x03, 0x00, 0x10, 0x00, 0x03]);
    }

    #[test]
    fn deframe_rejects_broken_headers() {
        assert_eq!(
            deframe(&[0x00, 0x01, 0x00]),
            Err(DecodeError::Malformed("too short"))
        );
        assert_eq!(
            deframe(&[0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x11]),
            Err(DecodeError::Malformed("invalid protocol id"))
        );
        assert_eq!(
            deframe(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00]),
            Err(DecodeError::Malformed("invalid length field"))
        );
        assert_eq!(
            deframe(&[0x00, 0x01, 0x00, 0x00, 0x00, 0xFF]),
            Err(DecodeError::Malformed("invalid length field"))
        );
        assert_eq!(
            deframe(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x11, 0x83]),
            Err(DecodeError::Malformed("length field does not match frame"))
        );
    }

    mod client {
        use super::*;

        #[test]
        fn decode_header_fragment() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00][..]);
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 5);
        }

        #[test]
        fn decode_partly_received_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x00, // transaction id HI
                    0x11, // transaction id LO
                    0x00, // protocol id HI
                    0x00, // protocol id LO
                    0x00, // length HI
                    0x03, // length LO
                    0x66, // unit id
                    0x02, // function code
                ][..],
            );
            let res = codec.decode(&mut buf).unwrap();
            assert!(res.is_none());
            assert_eq!(buf.len(), 8);
        }

        #[test]
        fn decode_exception_message() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x66, //
                    0x82, // exception = 0x80 + 0x02
                    0x03, //
                    0x00,
                ][..],
            );
            let Adu { pdu, raw } = codec.decode(&mut buf).unwrap().unwrap();

            assert_eq!(buf.len(), 1);
            assert_eq!(raw.len(), 9);
            assert_eq!(
                pdu.0,
                Err(ExceptionResponse {
                    slave: 0x66,
                    function: FunctionCode::ReadDiscreteInputs,
                    exception: ExceptionCode::IllegalDataValue,
                })
            );
        }

        #[test]
        fn decode_with_invalid_protocol_id() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x00, //
                    0x00, //
                    0x33, // protocol id HI
                    0x12, // protocol id LO
                    0x00, // length HI
                    0x03, // length LO
                    0x66, // unit id
                    0x82, 0x03,
                ][..],
            );
            let err = codec.decode(&mut buf).unwrap_err();
            assert!(err.is_recoverable());
            assert_eq!(format!("{err}"), "malformed frame: invalid protocol id");
            // Too short for another header.
            assert_eq!(buf.len(), 5);
        }

        #[test]
        fn resync_after_invalid_header() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // garbage
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x11, 0x03, 0x02, 0x00, 0x01,
                ][..],
            );
            assert!(codec.decode(&mut buf).unwrap_err().is_recoverable());
            assert_eq!(buf.len(), 11);
            let Adu { pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(pdu.0.unwrap().words(), Some(vec![0x0001]));
            assert!(buf.is_empty());
        }

        #[test]
        fn decode_with_invalid_transaction_id() {
            let mut codec = ClientCodec::default();
            let req = Request::read_holding_registers(0x11, 0x10, 1);
            codec.encode(&req, &mut BytesMut::new()).unwrap();
            assert_eq!(codec.pending(), Some(1));

            let mut buf = BytesMut::from(
                &[0x00, 0x07, 0x00, 0x00, 0x00, 0x05, 0x11, 0x03, 0x02, 0x00, 0x01][..],
            );
            let err = codec.decode(&mut buf).unwrap_err();
            assert!(!err.is_recoverable());
            assert!(matches!(
                err,
                Error::InvalidMessageId {
                    expected: 1,
                    received: 7
                }
            ));
        }

        #[test]
        fn decode_matching_transaction_id() {
            let mut codec = ClientCodec::new(0x0100);
            let req = Request::read_holding_registers(0x11, 0x10, 1);
            codec.encode(&req, &mut BytesMut::new()).unwrap();

            let mut buf = BytesMut::from(
                &[0x01, 0x00, 0x00, 0x00, 0x00, 0x05, 0x11, 0x03, 0x02, 0x00, 0x01][..],
            );
            let Adu { pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(pdu.0.unwrap().words(), Some(vec![0x0001]));
            assert_eq!(codec.pending(), None);
        }

        #[test]
        fn drop_undecodable_frame() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::from(
                &[
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x11, 0x03, 0x05, // broken
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x11, 0x03, 0x02, 0x00, 0x01,
                ][..],
            );
            assert!(codec.decode(&mut buf).unwrap_err().is_recoverable());
            assert_eq!(buf.len(), 11);
            assert!(codec.decode(&mut buf).unwrap().is_some());
            assert!(buf.is_empty());
        }

        #[test]
        fn encode_read_request() {
            let mut codec = ClientCodec::default();
            let mut buf = BytesMut::new();
            let req = Request::read_holding_registers(0x11, 0x0010, 3);
            codec.encode(&req, &mut buf).unwrap();
            assert_eq!(
                buf,
                Bytes::from_static(&[
                    0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x10, 0x00, 0x03
                ])
            );
        }

        #[test]
        fn encode_transaction_id() {
            let mut codec = ClientCodec::new(0);
            let req = Request::read_input_registers(0x00, 0x00, 1);

            let mut buf = BytesMut::new();
            codec.encode(&req, &mut buf).unwrap();
            assert_eq!(buf[1], 0x0);

            let mut buf = BytesMut::new();
            codec.encode(&req, &mut buf).unwrap();
            assert_eq!(buf[1], 0x1);

            let mut buf = BytesMut::new();
            codec.encode(&req, &mut buf).unwrap();
            assert_eq!(buf[1], 0x2);

            let mut codec = ClientCodec::new(u16::MAX);
            let mut buf = BytesMut::new();
            codec.encode(&req, &mut buf).unwrap();
            assert_eq!(&buf[..2], &[0xFF, 0xFF]);

            let mut buf = BytesMut::new();
            codec.encode(&req, &mut buf).unwrap();
            assert_eq!(&buf[..2], &[0x00, 0x00]);
        }
    }

    mod server {
        use super::*;

        #[test]
        fn echo_transaction_id() {
            let mut codec = ServerCodec::default();
            let mut buf = BytesMut::from(
                &[0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0x11, 0x03, 0x00, 0x10, 0x00, 0x01][..],
            );
            let Adu { pdu, .. } = codec.decode(&mut buf).unwrap().unwrap();
            assert_eq!(pdu, Request::read_holding_registers(0x11, 0x0010, 1));

            let rsp = Response::with_values(
                0x11,
                FunctionCode::ReadHoldingRegisters,
                0,
                vec![Value::Word(0xABCD)],
            );
            let mut buf = BytesMut::new();
            codec.encode(&rsp, &mut buf).unwrap();
            assert_eq!(
                &buf[..],
                &[0x12, 0x34, 0x00, 0x00, 0x00, 0x05, 0x11, 0x03, 0x02, 0xAB, 0xCD]
            );

            let ex = ExceptionResponse {
                slave: 0x11,
                function: FunctionCode::ReadHoldingRegisters,
                exception: ExceptionCode::SlaveDeviceBusy,
            };
            let mut buf = BytesMut::new();
            codec.encode(&ex, &mut buf).unwrap();
            assert_eq!(
                &buf[..],
                &[0x12, 0x34, 0x00, 0x00, 0x00, 0x03, 0x11, 0x83, 0x06]
            );
        }
    }
}
