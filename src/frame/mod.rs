// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

#[cfg(feature = "tcp")]
pub(crate) mod tcp;

use std::{
    error,
    fmt::{self, Display},
};

use crate::{bytes::Bytes, Error};

/// A single byte for addressing Modbus slave devices.
pub type SlaveId = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
///
/// This *protocol address* uses 0-based indexing, while the *coil address* or
/// *register address* is often specified as a number with 1-based indexing.
pub type Address = u16;

/// Number of items to process.
pub type Quantity = u16;

/// A Modbus function code.
///
/// All function codes as defined by the protocol specification V1.1b3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    /// 01 (0x01) Read Coils.
    ReadCoils,

    /// 02 (0x02) Read Discrete Inputs
    ReadDiscreteInputs,

    /// 03 (0x03) Read Holding Registers
    ReadHoldingRegisters,

    /// 04 (0x04) Read Input Registers
    ReadInputRegisters,

    /// 05 (0x05) Write Single Coil
    WriteSingleCoil,

    /// 06 (0x06) Write Single Register
    WriteSingleRegister,

    /// 07 (0x07) Read Exception Status (Serial Line only)
    ReadExceptionStatus,

    /// 08 (0x08) Diagnostics (Serial Line only)
    Diagnostics,

    /// 11 (0x0B) Get Comm Event Counter (Serial Line only)
    GetCommEventCounter,

    /// 12 (0x0C) Get Comm Event Log (Serial Line only)
    GetCommEventLog,

    /// 15 (0x0F) Write Multiple Coils
    WriteMultipleCoils,

    /// 16 (0x10) Write Multiple Registers
    WriteMultipleRegisters,

    /// 17 (0x11) Report Slave ID (Serial Line only)
    ReportServerId,

    /// 20 (0x14) Read File Record
    ReadFileRecord,

    /// 21 (0x15) Write File Record
    WriteFileRecord,

    /// 22 (0x16) Mask Write Register
    MaskWriteRegister,

    /// 23 (0x17) Read/Write Multiple Registers
    ReadWriteMultipleRegisters,

    /// 24 (0x18) Read FIFO Queue
    ReadFifoQueue,

    /// 43 (0x2B) Encapsulated Interface Transport
    EncapsulatedInterfaceTransport,

    /// Custom Modbus Function Code.
    Custom(u8),
}

impl FunctionCode {
    /// Create a new [`FunctionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        match value {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x07 => Self::ReadExceptionStatus,
            0x08 => Self::Diagnostics,
            0x0B => Self::GetCommEventCounter,
            0x0C => Self::GetCommEventLog,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x11 => Self::ReportServerId,
            0x14 => Self::ReadFileRecord,
            0x15 => Self::WriteFileRecord,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::ReadWriteMultipleRegisters,
            0x18 => Self::ReadFifoQueue,
            0x2B => Self::EncapsulatedInterfaceTransport,
            code => Self::Custom(code),
        }
    }

    /// Gets the [`u8`] value of the current [`FunctionCode`].
    #[must_use]
    pub const fn value(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::ReadExceptionStatus => 0x07,
            Self::Diagnostics => 0x08,
            Self::GetCommEventCounter => 0x0B,
            Self::GetCommEventLog => 0x0C,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportServerId => 0x11,
            Self::ReadFileRecord => 0x14,
            Self::WriteFileRecord => 0x15,
            Self::MaskWriteRegister => 0x16,
            Self::ReadWriteMultipleRegisters => 0x17,
            Self::ReadFifoQueue => 0x18,
            Self::EncapsulatedInterfaceTransport => 0x2B,
            Self::Custom(code) => code,
        }
    }

    /// The kind of operation selected by this code.
    #[must_use]
    pub const fn function_type(self) -> FunctionType {
        classify(self.value()).0
    }

    /// The data model this code operates on.
    #[must_use]
    pub const fn register_category(self) -> RegisterCategory {
        classify(self.value()).1
    }
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value().fmt(f)
    }
}

impl From<u8> for FunctionCode {
    fn from(from: u8) -> Self {
        Self::new(from)
    }
}

impl From<FunctionCode> for u8 {
    fn from(from: FunctionCode) -> Self {
        from.value()
    }
}

/// Operation selected by a function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionType {
    Read,
    Write,
    Diagnostics,
    /// A function code with its high bit set, i.e. an exception reply.
    Exception,
    Unknown,
}

/// Data model addressed by a function code.
///
/// Coil categories carry one bit per value, register categories one
/// big-endian word per value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterCategory {
    Coil,
    DiscreteInput,
    HoldingRegister,
    InputRegister,
    Unknown,
}

impl RegisterCategory {
    /// Coils and discrete inputs, which are bit packed on the wire.
    #[must_use]
    pub const fn is_bit(self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    /// Holding and input registers, which are 16 bit words on the wire.
    #[must_use]
    pub const fn is_word(self) -> bool {
        matches!(self, Self::HoldingRegister | Self::InputRegister)
    }
}

/// Classify a raw function code.
///
/// Codes outside of the generic read/write set classify as
/// `(Unknown, Unknown)` and never fail.
#[must_use]
pub const fn classify(code: u8) -> (FunctionType, RegisterCategory) {
    use FunctionType as F;
    use RegisterCategory as R;
    if code & 0x80 != 0 {
        return match classify(code & 0x7F) {
            (F::Unknown, _) => (F::Unknown, R::Unknown),
            (_, category) => (F::Exception, category),
        };
    }
    match code {
        0x01 => (F::Read, R::Coil),
        0x02 => (F::Read, R::DiscreteInput),
        0x03 => (F::Read, R::HoldingRegister),
        0x04 => (F::Read, R::InputRegister),
        0x05 | 0x0F => (F::Write, R::Coil),
        0x06 | 0x10 => (F::Write, R::HoldingRegister),
        0x08 => (F::Diagnostics, R::Unknown),
        _ => (F::Unknown, R::Unknown),
    }
}

/// One register's worth of data.
///
/// Which variant is meaningful follows from the [`RegisterCategory`] of the
/// message that owns the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    /// State of a coil or discrete input.
    ///
    /// - `true` is equivalent to `ON`, `1` and `0xFF00`.
    /// - `false` is equivalent to `OFF`, `0` and `0x0000`.
    Bit(bool),

    /// Content of a holding or input register.
    Word(u16),

    /// A payload byte of a function code without a known shape.
    Raw(u8),
}

impl Value {
    /// The zero value used when a message is padded to its count.
    #[must_use]
    pub const fn blank(function: FunctionCode) -> Self {
        match classify(function.value()) {
            (_, category) if category.is_bit() => Self::Bit(false),
            (FunctionType::Unknown, _) => Self::Raw(0),
            _ => Self::Word(0),
        }
    }

    #[must_use]
    pub const fn bit(self) -> Option<bool> {
        match self {
            Self::Bit(bit) => Some(bit),
            _ => None,
        }
    }

    #[must_use]
    pub const fn word(self) -> Option<u16> {
        match self {
            Self::Word(word) => Some(word),
            _ => None,
        }
    }

    #[must_use]
    pub const fn raw(self) -> Option<u8> {
        match self {
            Self::Raw(raw) => Some(raw),
            _ => None,
        }
    }

    // Coercions used by the encoder. A mismatched cell is still encoded.
    pub(crate) const fn to_bit(self) -> bool {
        match self {
            Self::Bit(bit) => bit,
            Self::Word(word) => word != 0,
            Self::Raw(raw) => raw != 0,
        }
    }

    pub(crate) const fn to_word(self) -> u16 {
        match self {
            Self::Bit(bit) => bit as u16,
            Self::Word(word) => word,
            Self::Raw(raw) => raw as u16,
        }
    }

    pub(crate) const fn to_raw(self) -> u8 {
        match self {
            Self::Bit(bit) => bit as u8,
            Self::Word(word) => word.to_be_bytes()[1],
            Self::Raw(raw) => raw,
        }
    }
}

impl From<bool> for Value {
    fn from(from: bool) -> Self {
        Self::Bit(from)
    }
}

impl From<u16> for Value {
    fn from(from: u16) -> Self {
        Self::Word(from)
    }
}

macro_rules! message_accessors {
    ($msg:ident) => {
        impl $msg {
            /// Build a message, resizing `values` to `count`.
            #[must_use]
            pub fn from_parts(
                slave: SlaveId,
                function: FunctionCode,
                address: Address,
                count: Quantity,
                values: Vec<Value>,
            ) -> Self {
                let mut msg = Self {
                    slave,
                    function,
                    address,
                    count,
                    values,
                };
                msg.set_count(count);
                msg
            }

            /// Build a message whose count is the number of `values`.
            #[must_use]
            pub fn with_values(
                slave: SlaveId,
                function: FunctionCode,
                address: Address,
                values: Vec<Value>,
            ) -> Self {
                let mut msg = Self::new(slave, function, address, 0);
                msg.set_values(values);
                msg
            }

            #[must_use]
            pub const fn slave(&self) -> SlaveId {
                self.slave
            }

            #[must_use]
            pub const fn function(&self) -> FunctionCode {
                self.function
            }

            #[must_use]
            pub const fn function_type(&self) -> FunctionType {
                self.function.function_type()
            }

            #[must_use]
            pub const fn register_category(&self) -> RegisterCategory {
                self.function.register_category()
            }

            #[must_use]
            pub const fn address(&self) -> Address {
                self.address
            }

            #[must_use]
            pub const fn count(&self) -> Quantity {
                self.count
            }

            #[must_use]
            pub fn values(&self) -> &[Value] {
                &self.values
            }

            pub fn set_slave(&mut self, slave: SlaveId) {
                self.slave = slave;
            }

            pub fn set_function(&mut self, function: FunctionCode) {
                self.function = function;
            }

            pub fn set_address(&mut self, address: Address) {
                self.address = address;
            }

            /// Change the declared count.
            ///
            /// The values are truncated or padded with [`Value::blank`] so that
            /// `values().len() == count` holds afterwards.
            pub fn set_count(&mut self, count: Quantity) {
                self.count = count;
                self.values
                    .resize(usize::from(count), Value::blank(self.function));
            }

            /// Replace the values, updating the count accordingly.
            ///
            /// Counts are limited to `u16`, surplus values are dropped.
            pub fn set_values(&mut self, mut values: Vec<Value>) {
                values.truncate(usize::from(Quantity::MAX));
                self.count = crate::codec::u16_len(values.len());
                self.values = values;
            }
        }
    };
}

/// A request represents a message from the client (master) to the server (slave).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    slave: SlaveId,
    function: FunctionCode,
    address: Address,
    count: Quantity,
    values: Vec<Value>,
}

message_accessors!(Request);

impl Request {
    /// A request without values, e.g. for reading `count` items.
    #[must_use]
    pub const fn new(
        slave: SlaveId,
        function: FunctionCode,
        address: Address,
        count: Quantity,
    ) -> Self {
        Self {
            slave,
            function,
            address,
            count,
            values: Vec::new(),
        }
    }

    #[must_use]
    pub const fn read_coils(slave: SlaveId, address: Address, count: Quantity) -> Self {
        Self::new(slave, FunctionCode::ReadCoils, address, count)
    }

    #[must_use]
    pub const fn read_discrete_inputs(slave: SlaveId, address: Address, count: Quantity) -> Self {
        Self::new(slave, FunctionCode::ReadDiscreteInputs, address, count)
    }

    #[must_use]
    pub const fn read_holding_registers(
        slave: SlaveId,
        address: Address,
        count: Quantity,
    ) -> Self {
        Self::new(slave, FunctionCode::ReadHoldingRegisters, address, count)
    }

    #[must_use]
    pub const fn read_input_registers(slave: SlaveId, address: Address, count: Quantity) -> Self {
        Self::new(slave, FunctionCode::ReadInputRegisters, address, count)
    }

    #[must_use]
    pub fn write_single_coil(slave: SlaveId, address: Address, coil: bool) -> Self {
        Self::with_values(
            slave,
            FunctionCode::WriteSingleCoil,
            address,
            vec![Value::Bit(coil)],
        )
    }

    #[must_use]
    pub fn write_single_register(slave: SlaveId, address: Address, word: u16) -> Self {
        Self::with_values(
            slave,
            FunctionCode::WriteSingleRegister,
            address,
            vec![Value::Word(word)],
        )
    }

    #[must_use]
    pub fn write_multiple_coils(slave: SlaveId, address: Address, coils: &[bool]) -> Self {
        Self::with_values(
            slave,
            FunctionCode::WriteMultipleCoils,
            address,
            coils.iter().copied().map(Value::Bit).collect(),
        )
    }

    #[must_use]
    pub fn write_multiple_registers(slave: SlaveId, address: Address, words: &[u16]) -> Self {
        Self::with_values(
            slave,
            FunctionCode::WriteMultipleRegisters,
            address,
            words.iter().copied().map(Value::Word).collect(),
        )
    }
}

/// The data of a successful request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    slave: SlaveId,
    function: FunctionCode,
    address: Address,
    count: Quantity,
    values: Vec<Value>,
}

message_accessors!(Response);

impl Response {
    /// A response without values, e.g. acknowledging a multiple write.
    #[must_use]
    pub const fn new(
        slave: SlaveId,
        function: FunctionCode,
        address: Address,
        count: Quantity,
    ) -> Self {
        Self {
            slave,
            function,
            address,
            count,
            values: Vec::new(),
        }
    }

    /// Bit values, if this response carries coils or discrete inputs.
    #[must_use]
    pub fn coils(&self) -> Option<Vec<bool>> {
        self.values.iter().map(|value| value.bit()).collect()
    }

    /// Word values, if this response carries registers.
    #[must_use]
    pub fn words(&self) -> Option<Vec<u16>> {
        self.values.iter().map(|value| value.word()).collect()
    }
}

/// A server (slave) exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    SlaveDeviceFailure,
    /// 0x05
    Acknowledge,
    /// 0x06
    SlaveDeviceBusy,
    /// 0x07
    NegativeAcknowledge,
    /// 0x08
    MemoryParityError,
    /// 0x0A
    GatewayPathUnavailable,
    /// 0x0B
    GatewayTargetDevice,
    /// None of the above.
    ///
    /// Prefer [`Self::new()`] over encoding one of the predefined values as this.
    Custom(u8),
}

impl From<ExceptionCode> for u8 {
    fn from(from: ExceptionCode) -> Self {
        use crate::frame::ExceptionCode::*;
        match from {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            SlaveDeviceFailure => 0x04,
            Acknowledge => 0x05,
            SlaveDeviceBusy => 0x06,
            NegativeAcknowledge => 0x07,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDevice => 0x0B,
            Custom(code) => code,
        }
    }
}

impl ExceptionCode {
    /// Create a new [`ExceptionCode`] with `value`.
    #[must_use]
    pub const fn new(value: u8) -> Self {
        use crate::frame::ExceptionCode::*;
        match value {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => SlaveDeviceFailure,
            0x05 => Acknowledge,
            0x06 => SlaveDeviceBusy,
            0x07 => NegativeAcknowledge,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDevice,
            other => Custom(other),
        }
    }

    pub(crate) fn description(&self) -> &str {
        use crate::frame::ExceptionCode::*;
        match *self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            SlaveDeviceFailure => "Slave device failure",
            Acknowledge => "Acknowledge",
            SlaveDeviceBusy => "Slave device busy",
            NegativeAcknowledge => "Negative acknowledge",
            MemoryParityError => "Memory parity error",
            GatewayPathUnavailable => "Gateway path unavailable",
            GatewayTargetDevice => "Gateway target device failed to respond",
            Custom(_) => "Custom",
        }
    }
}

/// A server (slave) exception response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub slave: SlaveId,
    /// The function code of the rejected request, without the high bit.
    pub function: FunctionCode,
    pub exception: ExceptionCode,
}

/// Represents a message from the server (slave) to the client (master).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePdu(pub Result<Response, ExceptionResponse>);

impl From<Response> for ResponsePdu {
    fn from(from: Response) -> Self {
        Self(Ok(from))
    }
}

impl From<ExceptionResponse> for ResponsePdu {
    fn from(from: ExceptionResponse) -> Self {
        Self(Err(from))
    }
}

impl From<ResponsePdu> for Result<Response, ExceptionResponse> {
    fn from(from: ResponsePdu) -> Self {
        from.0
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for ExceptionCode {}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}

/// A decoded message together with the bytes it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Adu<T> {
    pub(crate) pdu: T,
    pub(crate) raw: Bytes,
}

/// What a client remembers about its outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RequestContext {
    pub(crate) slave: SlaveId,
    pub(crate) function: FunctionCode,
    pub(crate) count: Quantity,
}

impl RequestContext {
    pub(crate) fn new(request: &Request) -> Self {
        Self {
            slave: request.slave(),
            function: request.function(),
            count: request.count(),
        }
    }

    /// Match a reply against the request it answers.
    ///
    /// Bit read responses are padded to whole bytes on the wire and get
    /// narrowed to the requested count.
    pub(crate) fn try_into_response(
        self,
        pdu: ResponsePdu,
    ) -> Result<Result<Response, ExceptionResponse>, Error> {
        let (slave, function) = match &pdu.0 {
            Ok(rsp) => (rsp.slave(), rsp.function()),
            Err(ex) => (ex.slave, ex.function),
        };
        if slave != self.slave || function != self.function {
            return Err(Error::UnexpectedResponse {
                slave,
                function,
                expected_slave: self.slave,
                expected_function: self.function,
            });
        }
        Ok(pdu.0.map(|mut rsp| {
            if rsp.function_type() == FunctionType::Read
                && rsp.register_category().is_bit()
                && rsp.count() > self.count
            {
                rsp.set_count(self.count);
            }
            rsp
        }))
    }
}
