// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversion between typed messages and their byte representation.
//!
//! Every buffer handled here starts with the slave id, followed by the
//! function code and the function specific data. Transport framing (CRC
//! trailer, MBAP header) lives in the [`rtu`] and [`tcp`] submodules.

use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt as _};
use log::warn;

use crate::{
    bytes::{BufMut as _, Bytes, BytesMut},
    frame::{
        ExceptionCode, ExceptionResponse, FunctionCode, Quantity, Request, Response,
        ResponsePdu, Value,
    },
    DecodeError,
};

pub(crate) mod crc;

#[cfg(feature = "rtu")]
pub(crate) mod rtu;

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

/// Maximum request/response PDU size (function code and data).
///
/// The same for RTU and TCP.
const MAX_PDU_SIZE: usize = 253;

/// Slave id + function code + exception code.
const EXCEPTION_FRAME_LEN: usize = 3;

// Most values that fit into a single PDU.
const MAX_READ_COILS: usize = 2000;
const MAX_READ_REGISTERS: usize = 125;
const MAX_WRITE_COILS: usize = 1968;
const MAX_WRITE_REGISTERS: usize = 123;
const MAX_DIAGNOSTICS_WORDS: usize = (MAX_PDU_SIZE - 3) / 2;
const MAX_CUSTOM_DATA: usize = MAX_PDU_SIZE - 1;

pub(crate) fn u16_len(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

fn u8_len(len: usize) -> u8 {
    debug_assert!(len <= usize::from(u8::MAX));
    u8::try_from(len).unwrap_or(u8::MAX)
}

/// Number of values to encode: the declared count, capped at what a single
/// PDU of `function` can hold.
fn encoded_count(function: FunctionCode, count: Quantity, max: usize) -> usize {
    let count = usize::from(count);
    if count > max {
        warn!("Truncating {count} values of function {function} to {max}");
        return max;
    }
    count
}

/// Whether `buf` is shaped like an exception reply.
///
/// The function code byte has its high bit set and the buffer holds at
/// least slave id, function code and exception code, plus the CRC trailer
/// if `with_crc` is set.
#[must_use]
pub fn is_exception_frame(buf: &[u8], with_crc: bool) -> bool {
    let min_len = EXCEPTION_FRAME_LEN + if with_crc { 2 } else { 0 };
    buf.len() >= min_len && buf[1] & 0x80 != 0
}

fn strip_crc(buf: &[u8], verify_crc: bool) -> Result<&[u8], DecodeError> {
    if verify_crc {
        crc::check_crc(buf)
    } else {
        Ok(buf)
    }
}

/// The values of a message, padded to its declared count.
fn cells<'a>(
    function: FunctionCode,
    count: Quantity,
    values: &'a [Value],
) -> impl Iterator<Item = Value> + 'a {
    (0..usize::from(count)).map(move |i| values.get(i).copied().unwrap_or(Value::blank(function)))
}

fn encode_request_pdu(buf: &mut BytesMut, req: &Request) {
    use FunctionCode::*;
    buf.put_u8(req.slave());
    buf.put_u8(req.function().value());
    let mut cells = cells(req.function(), req.count(), req.values());
    match req.function() {
        ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters => {
            buf.put_u16(req.address());
            buf.put_u16(req.count());
        }
        WriteSingleCoil => {
            buf.put_u16(req.address());
            buf.put_u16(bool_to_coil(cells.next().map_or(false, Value::to_bit)));
        }
        WriteSingleRegister => {
            buf.put_u16(req.address());
            buf.put_u16(cells.next().map_or(0, Value::to_word));
        }
        WriteMultipleCoils => {
            let count = encoded_count(req.function(), req.count(), MAX_WRITE_COILS);
            let coils: Vec<bool> = cells.take(count).map(Value::to_bit).collect();
            buf.put_u16(req.address());
            buf.put_u16(u16_len(coils.len()));
            buf.put_u8(u8_len(packed_coils_size(&coils)));
            encode_packed_coils(buf, &coils);
        }
        WriteMultipleRegisters => {
            let count = encoded_count(req.function(), req.count(), MAX_WRITE_REGISTERS);
            buf.put_u16(req.address());
            buf.put_u16(u16_len(count));
            buf.put_u8(u8_len(count * 2));
            for w in cells.take(count) {
                buf.put_u16(w.to_word());
            }
        }
        Diagnostics => {
            let count = encoded_count(req.function(), req.count(), MAX_DIAGNOSTICS_WORDS);
            buf.put_u16(req.address());
            for w in cells.take(count) {
                buf.put_u16(w.to_word());
            }
        }
        _ => {
            let count = encoded_count(req.function(), req.count(), MAX_CUSTOM_DATA);
            for b in cells.take(count) {
                buf.put_u8(b.to_raw());
            }
        }
    }
}

fn encode_response_pdu(buf: &mut BytesMut, rsp: &Response) {
    use FunctionCode::*;
    buf.put_u8(rsp.slave());
    buf.put_u8(rsp.function().value());
    let mut cells = cells(rsp.function(), rsp.count(), rsp.values());
    match rsp.function() {
        ReadCoils | ReadDiscreteInputs => {
            let count = encoded_count(rsp.function(), rsp.count(), MAX_READ_COILS);
            let coils: Vec<bool> = cells.take(count).map(Value::to_bit).collect();
            buf.put_u8(u8_len(packed_coils_size(&coils)));
            encode_packed_coils(buf, &coils);
        }
        ReadHoldingRegisters | ReadInputRegisters => {
            let count = encoded_count(rsp.function(), rsp.count(), MAX_READ_REGISTERS);
            buf.put_u8(u8_len(count * 2));
            for r in cells.take(count) {
                buf.put_u16(r.to_word());
            }
        }
        WriteSingleCoil => {
            buf.put_u16(rsp.address());
            buf.put_u16(bool_to_coil(cells.next().map_or(false, Value::to_bit)));
        }
        WriteSingleRegister => {
            buf.put_u16(rsp.address());
            buf.put_u16(cells.next().map_or(0, Value::to_word));
        }
        WriteMultipleCoils | WriteMultipleRegisters => {
            buf.put_u16(rsp.address());
            buf.put_u16(rsp.count());
        }
        Diagnostics => {
            let count = encoded_count(rsp.function(), rsp.count(), MAX_DIAGNOSTICS_WORDS);
            buf.put_u16(rsp.address());
            for w in cells.take(count) {
                buf.put_u16(w.to_word());
            }
        }
        _ => {
            let count = encoded_count(rsp.function(), rsp.count(), MAX_CUSTOM_DATA);
            for b in cells.take(count) {
                buf.put_u8(b.to_raw());
            }
        }
    }
}

fn encode_exception_response_pdu(buf: &mut BytesMut, rsp: ExceptionResponse) {
    buf.put_u8(rsp.slave);
    buf.put_u8(rsp.function.value() | 0x80);
    buf.put_u8(rsp.exception.into());
}

type Reader<'a> = Cursor<&'a [u8]>;

fn too_short<E>(_: E) -> DecodeError {
    DecodeError::Malformed("too short")
}

fn read_u8(rdr: &mut Reader<'_>) -> Result<u8, DecodeError> {
    rdr.read_u8().map_err(too_short)
}

fn read_u16_be(rdr: &mut Reader<'_>) -> Result<u16, DecodeError> {
    rdr.read_u16::<BigEndian>().map_err(too_short)
}

fn read_bytes<'a>(rdr: &mut Reader<'a>, len: usize) -> Result<&'a [u8], DecodeError> {
    let buf: &'a [u8] = *rdr.get_ref();
    let start = remaining_offset(rdr);
    let bytes = buf.get(start..start + len).ok_or(DecodeError::Malformed("too short"))?;
    rdr.set_position((start + len) as u64);
    Ok(bytes)
}

fn remaining_offset(rdr: &Reader<'_>) -> usize {
    usize::try_from(rdr.position()).map_or(rdr.get_ref().len(), |pos| pos.min(rdr.get_ref().len()))
}

fn read_remaining<'a>(rdr: &mut Reader<'a>) -> &'a [u8] {
    let buf: &'a [u8] = *rdr.get_ref();
    let start = remaining_offset(rdr);
    rdr.set_position(buf.len() as u64);
    &buf[start..]
}

fn read_words(rdr: &mut Reader<'_>, count: usize) -> Result<Vec<Value>, DecodeError> {
    let mut data = Vec::with_capacity(count);
    for _ in 0..count {
        data.push(Value::Word(read_u16_be(rdr)?));
    }
    Ok(data)
}

fn read_remaining_words(rdr: &mut Reader<'_>) -> Result<Vec<Value>, DecodeError> {
    let rest = read_remaining(rdr);
    if rest.len() % 2 != 0 {
        return Err(DecodeError::Malformed("odd number of data bytes"));
    }
    Ok(rest
        .chunks_exact(2)
        .map(|w| Value::Word(u16::from_be_bytes([w[0], w[1]])))
        .collect())
}

fn read_packed_coils(rdr: &mut Reader<'_>, count: Quantity) -> Result<Vec<Value>, DecodeError> {
    let byte_count = usize::from(read_u8(rdr)?);
    if byte_count != packed_size(usize::from(count)) {
        return Err(DecodeError::Malformed("byte count does not match quantity"));
    }
    let packed_coils = read_bytes(rdr, byte_count)?;
    Ok(decode_packed_coils(packed_coils, count)
        .into_iter()
        .map(Value::Bit)
        .collect())
}

fn ensure_consumed(rdr: &Reader<'_>) -> Result<(), DecodeError> {
    // Verify that all data has been consumed and decoded.
    if remaining_offset(rdr) < rdr.get_ref().len() {
        return Err(DecodeError::Malformed("undecoded trailing data"));
    }
    Ok(())
}

fn check_pdu_size(buf: &[u8]) -> Result<(), DecodeError> {
    if buf.len() > 1 + MAX_PDU_SIZE {
        return Err(DecodeError::Malformed("PDU size exceeded"));
    }
    Ok(())
}

fn decode_request_pdu(buf: &[u8]) -> Result<Request, DecodeError> {
    use FunctionCode::*;
    check_pdu_size(buf)?;
    let rdr = &mut Cursor::new(buf);
    let slave = read_u8(rdr)?;
    let fn_code = read_u8(rdr)?;
    if fn_code & 0x80 != 0 {
        return Err(DecodeError::UnknownFunction(fn_code));
    }
    let function = FunctionCode::new(fn_code);
    let req = match function {
        ReadCoils | ReadDiscreteInputs | ReadHoldingRegisters | ReadInputRegisters => {
            Request::new(slave, function, read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        WriteSingleCoil => {
            let address = read_u16_be(rdr)?;
            let coil = coil_to_bool(read_u16_be(rdr)?)?;
            Request::with_values(slave, function, address, vec![Value::Bit(coil)])
        }
        WriteSingleRegister => {
            let address = read_u16_be(rdr)?;
            let word = read_u16_be(rdr)?;
            Request::with_values(slave, function, address, vec![Value::Word(word)])
        }
        WriteMultipleCoils => {
            let address = read_u16_be(rdr)?;
            let quantity = read_u16_be(rdr)?;
            let coils = read_packed_coils(rdr, quantity)?;
            Request::with_values(slave, function, address, coils)
        }
        WriteMultipleRegisters => {
            let address = read_u16_be(rdr)?;
            let quantity = read_u16_be(rdr)?;
            let byte_count = read_u8(rdr)?;
            if usize::from(byte_count) != usize::from(quantity) * 2 {
                return Err(DecodeError::Malformed("byte count does not match quantity"));
            }
            let words = read_words(rdr, quantity.into())?;
            Request::with_values(slave, function, address, words)
        }
        Diagnostics => {
            let sub_function = read_u16_be(rdr)?;
            let words = read_remaining_words(rdr)?;
            Request::with_values(slave, function, sub_function, words)
        }
        _ => {
            // Consume all remaining bytes as custom data.
            let data = read_remaining(rdr).iter().copied().map(Value::Raw).collect();
            Request::with_values(slave, function, 0, data)
        }
    };
    ensure_consumed(rdr)?;
    Ok(req)
}

fn decode_response_pdu(buf: &[u8]) -> Result<Response, DecodeError> {
    use FunctionCode::*;
    check_pdu_size(buf)?;
    let rdr = &mut Cursor::new(buf);
    let slave = read_u8(rdr)?;
    let fn_code = read_u8(rdr)?;
    if fn_code & 0x80 != 0 {
        return Err(DecodeError::UnknownFunction(fn_code));
    }
    let function = FunctionCode::new(fn_code);
    let rsp = match function {
        ReadCoils | ReadDiscreteInputs => {
            let byte_count = read_u8(rdr)?;
            let packed_coils = read_bytes(rdr, byte_count.into())?;
            // Here we have no information about the exact requested quantity so we just
            // unpack the whole byte.
            let quantity = u16::from(byte_count) * 8;
            let coils = decode_packed_coils(packed_coils, quantity)
                .into_iter()
                .map(Value::Bit)
                .collect();
            Response::with_values(slave, function, 0, coils)
        }
        ReadHoldingRegisters | ReadInputRegisters => {
            let byte_count = read_u8(rdr)?;
            if byte_count % 2 != 0 {
                return Err(DecodeError::Malformed("odd register byte count"));
            }
            let words = read_words(rdr, usize::from(byte_count / 2))?;
            Response::with_values(slave, function, 0, words)
        }
        WriteSingleCoil => {
            let address = read_u16_be(rdr)?;
            let coil = coil_to_bool(read_u16_be(rdr)?)?;
            Response::with_values(slave, function, address, vec![Value::Bit(coil)])
        }
        WriteSingleRegister => {
            let address = read_u16_be(rdr)?;
            let word = read_u16_be(rdr)?;
            Response::with_values(slave, function, address, vec![Value::Word(word)])
        }
        WriteMultipleCoils | WriteMultipleRegisters => {
            Response::new(slave, function, read_u16_be(rdr)?, read_u16_be(rdr)?)
        }
        Diagnostics => {
            let sub_function = read_u16_be(rdr)?;
            let words = read_remaining_words(rdr)?;
            Response::with_values(slave, function, sub_function, words)
        }
        _ => {
            let data = read_remaining(rdr).iter().copied().map(Value::Raw).collect();
            Response::with_values(slave, function, 0, data)
        }
    };
    ensure_consumed(rdr)?;
    Ok(rsp)
}

fn decode_exception_response_pdu(buf: &[u8]) -> Result<ExceptionResponse, DecodeError> {
    if buf.len() != EXCEPTION_FRAME_LEN {
        return Err(DecodeError::Malformed("invalid exception frame length"));
    }
    let fn_err_code = buf[1];
    if fn_err_code & 0x80 == 0 {
        return Err(DecodeError::Malformed("invalid exception function code"));
    }
    Ok(ExceptionResponse {
        slave: buf[0],
        function: FunctionCode::new(fn_err_code & 0x7F),
        exception: ExceptionCode::new(buf[2]),
    })
}

impl Request {
    /// Raw bytes ready to be framed by a transport.
    #[must_use]
    pub fn to_raw(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_request_pdu(&mut buf, self);
        buf.freeze()
    }

    /// Decode a request, optionally checking and stripping a CRC trailer.
    pub fn decode(buf: &[u8], verify_crc: bool) -> Result<Self, DecodeError> {
        decode_request_pdu(strip_crc(buf, verify_crc)?)
    }

    /// Decode a request without CRC trailer.
    pub fn from_raw(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf, false)
    }

    /// Decode a request with CRC trailer.
    pub fn from_raw_crc(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf, true)
    }
}

impl Response {
    /// Raw bytes ready to be framed by a transport.
    #[must_use]
    pub fn to_raw(&self) -> Bytes {
        let mut buf = BytesMut::new();
        encode_response_pdu(&mut buf, self);
        buf.freeze()
    }

    /// Decode a response, optionally checking and stripping a CRC trailer.
    ///
    /// Exception replies are rejected, use [`ResponsePdu::decode`] to accept
    /// both.
    pub fn decode(buf: &[u8], verify_crc: bool) -> Result<Self, DecodeError> {
        decode_response_pdu(strip_crc(buf, verify_crc)?)
    }

    pub fn from_raw(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf, false)
    }

    pub fn from_raw_crc(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf, true)
    }
}

impl ExceptionResponse {
    #[must_use]
    pub fn to_raw(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(EXCEPTION_FRAME_LEN);
        encode_exception_response_pdu(&mut buf, *self);
        buf.freeze()
    }

    pub fn decode(buf: &[u8], verify_crc: bool) -> Result<Self, DecodeError> {
        decode_exception_response_pdu(strip_crc(buf, verify_crc)?)
    }

    pub fn from_raw(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf, false)
    }

    pub fn from_raw_crc(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf, true)
    }
}

impl ResponsePdu {
    /// Decode either an exception or a regular response.
    ///
    /// The exception shape is checked first because an exception frame may
    /// also pass as a (truncated) regular response.
    pub fn decode(buf: &[u8], verify_crc: bool) -> Result<Self, DecodeError> {
        let pdu = strip_crc(buf, verify_crc)?;
        if is_exception_frame(pdu, false) {
            return decode_exception_response_pdu(pdu).map(Into::into);
        }
        decode_response_pdu(pdu).map(Into::into)
    }

    pub fn from_raw(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf, false)
    }

    pub fn from_raw_crc(buf: &[u8]) -> Result<Self, DecodeError> {
        Self::decode(buf, true)
    }
}

fn bool_to_coil(state: bool) -> u16 {
    if state {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_to_bool(coil: u16) -> Result<bool, DecodeError> {
    match coil {
        0xFF00 => Ok(true),
        0x0000 => Ok(false),
        _ => Err(DecodeError::Malformed("invalid coil value")),
    }
}

fn packed_size(bit_count: usize) -> usize {
    (bit_count + 7) / 8
}

fn packed_coils_size(coils: &[bool]) -> usize {
    packed_size(coils.len())
}

fn encode_packed_coils(buf: &mut BytesMut, coils: &[bool]) -> usize {
    let packed_coils_size = packed_coils_size(coils);
    let offset = buf.len();
    buf.resize(offset + packed_coils_size, 0);
    let buf = &mut buf[offset..];
    for (i, b) in coils.iter().enumerate() {
        let v = u8::from(*b); // 0 or 1
        buf[i / 8] |= v << (i % 8);
    }
    packed_coils_size
}

fn decode_packed_coils(bytes: &[u8], count: u16) -> Vec<bool> {
    let mut res = Vec::with_capacity(count.into());
    for i in 0usize..count.into() {
        res.push((bytes[i / 8] >> (i % 8)) & 0b1 > 0);
    }
    res
}
