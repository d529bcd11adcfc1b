// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection settings.

use std::time::Duration;

/// Timing and buffering of a [`Connection`](crate::rtu::Connection).
///
/// ```
/// use std::time::Duration;
/// use modbus_link::Config;
///
/// let config = Config::default()
///     .with_read_timeout(Duration::from_millis(200))
///     .with_response_timeout(Duration::from_secs(1));
/// assert_eq!(config.chunk_size, 1024);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Upper bound for a single read from the channel.
    pub read_timeout: Duration,

    /// Upper bound for a whole exchange, from the first read until a
    /// complete frame has been decoded.
    pub response_timeout: Duration,

    /// Maximum number of bytes requested per read.
    pub chunk_size: usize,

    /// Transaction id of the first TCP request.
    pub initial_transaction_id: u16,
}

impl Config {
    pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
    pub const DEFAULT_CHUNK_SIZE: usize = 1024;

    #[must_use]
    pub const fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    #[must_use]
    pub const fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    /// Zero is treated as one.
    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub const fn with_initial_transaction_id(mut self, initial_transaction_id: u16) -> Self {
        self.initial_transaction_id = initial_transaction_id;
        self
    }

    pub(crate) fn effective_chunk_size(&self) -> usize {
        self.chunk_size.max(1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            read_timeout: Self::DEFAULT_READ_TIMEOUT,
            response_timeout: Self::DEFAULT_RESPONSE_TIMEOUT,
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            initial_transaction_id: 1,
        }
    }
}
