// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::io;

use thiserror::Error;

use crate::frame::{FunctionCode, SlaveId};

/// Failure to turn a byte buffer into a typed message.
///
/// These errors describe the bytes, not the link: inside a read loop they
/// are recovered by waiting for more data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The CRC trailer does not match the frame contents.
    #[error("invalid CRC: expected {expected:#06X}, received {received:#06X}")]
    InvalidCrc { expected: u16, received: u16 },

    /// The buffer is too short or inconsistent for its function code.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// The function code has no shape this codec can decode.
    #[error("unknown function code: 0x{0:02X}")]
    UnknownFunction(u8),
}

/// Transport level error of a _Modbus_ exchange.
///
/// A _Modbus_ exception sent by the slave is *not* an [`Error`], see
/// [`crate::Result`].
#[derive(Debug, Error)]
pub enum Error {
    /// The received bytes could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// No (complete) frame arrived in time.
    #[error("timeout while waiting for a frame")]
    Timeout,

    /// The peer closed the channel.
    #[error("connection closed")]
    ConnectionClosed,

    /// The MBAP transaction identifier does not match the outstanding request.
    #[error("invalid transaction id: expected {expected}, received {received}")]
    InvalidMessageId { expected: u16, received: u16 },

    /// Reading from the serial line failed.
    #[error("slave device failure: {0}")]
    SlaveDeviceFailure(#[source] io::Error),

    /// Reading from the TCP stream failed.
    #[error("protocol error: {0}")]
    Protocol(#[source] io::Error),

    /// The decoded reply does not belong to the outstanding request.
    #[error(
        "unexpected response from slave {slave} for function {function}, \
         expected slave {expected_slave} and function {expected_function}"
    )]
    UnexpectedResponse {
        slave: SlaveId,
        function: FunctionCode,
        expected_slave: SlaveId,
        expected_function: FunctionCode,
    },

    /// The connection has already been closed.
    #[error("not connected")]
    NotConnected,

    /// Any other I/O error, e.g. while writing.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether a read loop may keep reading after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
