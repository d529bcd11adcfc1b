// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte channels a [`Connection`](crate::rtu::Connection) runs on.

use std::{
    io::{self, Read as _, Write as _},
    net::TcpStream,
    time::Duration,
};

/// A bidirectional, blocking byte channel.
///
/// Opening and configuring the underlying device or socket is up to the
/// caller, a connection only sends and receives bytes.
pub trait Channel {
    /// Send all of `buf` or fail.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Receive at most `buf.len()` bytes, waiting no longer than `timeout`.
    ///
    /// Returns `Ok(0)` if the peer has closed the channel. Running out of
    /// time is reported as [`io::ErrorKind::TimedOut`] or
    /// [`io::ErrorKind::WouldBlock`].
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

impl<T: Channel + ?Sized> Channel for &mut T {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).send(buf)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).recv(buf, timeout)
    }
}

impl<T: Channel + ?Sized> Channel for Box<T> {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).send(buf)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).recv(buf, timeout)
    }
}

/// Socket timeouts of zero are rejected by the OS.
const MIN_TIMEOUT: Duration = Duration::from_millis(1);

pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

impl Channel for TcpStream {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)?;
        self.flush()
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.set_read_timeout(Some(timeout.max(MIN_TIMEOUT)))?;
        self.read(buf)
    }
}

#[cfg(feature = "serial")]
impl Channel for dyn tokio_serial::SerialPort {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_all(buf)?;
        self.flush()
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        self.set_timeout(timeout.max(MIN_TIMEOUT))?;
        self.read(buf)
    }
}
