// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types and traits

///////////////////////////////////////////////////////////////////
/// Modules
///////////////////////////////////////////////////////////////////
#[cfg(feature = "rtu")]
pub use crate::rtu;

#[cfg(feature = "tcp")]
pub use crate::tcp;

///////////////////////////////////////////////////////////////////
/// Types
///////////////////////////////////////////////////////////////////
pub use crate::{
    Address, Config, DecodeError, Error, ExceptionCode, ExceptionResponse, FunctionCode,
    Quantity, Request, Response, SlaveId, Value,
};

///////////////////////////////////////////////////////////////////
/// Traits
///////////////////////////////////////////////////////////////////
pub use crate::Channel;
