// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Calculate the _Modbus_ CRC-16 of `buf`.
///
/// Polynomial `0xA001` (reflected `0x8005`), initial value `0xFFFF`,
/// no final XOR. The result is transmitted low byte first.
#[must_use]
pub fn crc16(buf: &[u8]) -> u16 {
    let mut crc = 0xFFFF;
    for x in buf {
        crc ^= u16::from(*x);
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Split a CRC trailed frame into its payload after checking the trailer.
pub(crate) fn check_crc(buf: &[u8]) -> Result<&[u8], crate::DecodeError> {
    if buf.len() < 2 {
        return Err(crate::DecodeError::Malformed("too short for a CRC"));
    }
    let (payload, trailer) = buf.split_at(buf.len() - 2);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    let expected = crc16(payload);
    if expected != received {
        return Err(crate::DecodeError::InvalidCrc { expected, received });
    }
    Ok(payload)
}
