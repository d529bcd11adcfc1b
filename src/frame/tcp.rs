// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

pub(crate) type TransactionId = u16;

/// The MBAP header preceding every _Modbus_ TCP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub(crate) transaction_id: TransactionId,
    /// Number of bytes following the header, starting with the slave id.
    pub(crate) length: u16,
}
