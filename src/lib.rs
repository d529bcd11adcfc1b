// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A synchronous [Modbus](https://en.wikipedia.org/wiki/Modbus) codec
//! with a framing read loop for RTU and TCP.
//!
//! Modbus is based on a [master/slave](https://en.wikipedia.org/wiki/Master/slave_(technology))
//! model. Requests and responses are plain values ([`Request`], [`Response`],
//! [`ExceptionResponse`]) that are converted to and from bytes by this crate.
//! A [`rtu::Connection`] or [`tcp::Connection`] exchanges them over any
//! [`Channel`], retrying on line noise and giving up on transport failures.
//!
//! Opening serial ports or sockets is left to the caller.
//!
//! ## Installation
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! modbus-link = "*"
//! ```
//!
//! If you like to use the bundled serial port channel, enable the `serial`
//! feature:
//!
//! ```toml
//! [dependencies]
//! modbus-link = { version = "*", features = ["serial"] }
//! ```
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(feature = "tcp")]
//! # fn main() -> anyhow::Result<()> {
//! use std::net::TcpStream;
//!
//! use modbus_link::prelude::*;
//!
//! let stream = TcpStream::connect("127.0.0.1:502")?;
//! let mut conn = tcp::Connection::new(stream);
//! let rsp = conn.call(&Request::read_holding_registers(0x11, 0x0010, 3))??;
//! println!("Registers: {:?}", rsp.words());
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "tcp"))]
//! # fn main() {}
//! ```

pub mod prelude;

pub mod channel;
pub use self::channel::Channel;

mod codec;
pub use self::codec::{crc::crc16, is_exception_frame};

mod config;
pub use self::config::Config;

mod connection;

mod error;
pub use self::error::{DecodeError, Error};

mod frame;
pub use self::frame::{
    classify, Address, ExceptionCode, ExceptionResponse, FunctionCode, FunctionType, Quantity,
    RegisterCategory, Request, Response, ResponsePdu, SlaveId, Value,
};

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

/// Specialized [`std::result::Result`] type for _Modbus_ exchanges.
///
/// The outer error is a failure of the link, the inner one an exception
/// reported by the slave.
pub type Result<T> = std::result::Result<std::result::Result<T, ExceptionResponse>, Error>;

pub use bytes;
