// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The read loop shared by all transports.

use std::{
    io,
    time::{Duration, Instant},
};

use log::{debug, trace};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    bytes::{Bytes, BytesMut},
    channel::{is_timeout, Channel},
    frame::Adu,
    Config, Error,
};

/// A channel together with the bytes received but not yet decoded.
///
/// The channel is `None` after [`Framed::close`].
#[derive(Debug)]
pub(crate) struct Framed<C> {
    channel: Option<C>,
    read_buf: BytesMut,
    config: Config,
    read_fault: fn(io::Error) -> Error,
}

impl<C> Framed<C>
where
    C: Channel,
{
    /// `read_fault` maps hard read errors of the channel.
    pub(crate) fn new(channel: C, config: Config, read_fault: fn(io::Error) -> Error) -> Self {
        Self {
            channel: Some(channel),
            read_buf: BytesMut::with_capacity(config.effective_chunk_size()),
            config,
            read_fault,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.channel.is_some()
    }

    pub(crate) fn close(&mut self) -> Option<C> {
        self.channel.take()
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// Encode `item` and write it out as a whole.
    ///
    /// Pending received bytes are discarded first, a reply to an earlier
    /// message must not be mistaken for a reply to this one.
    pub(crate) fn send<E, I>(&mut self, encoder: &mut E, item: I) -> Result<Bytes, Error>
    where
        E: Encoder<I, Error = Error>,
    {
        let channel = self.channel.as_mut().ok_or(Error::NotConnected)?;
        self.read_buf.clear();
        let mut buf = BytesMut::new();
        encoder.encode(item, &mut buf)?;
        let raw = buf.freeze();
        trace!("Sending {raw:02X?}");
        channel.send(&raw)?;
        Ok(raw)
    }

    /// Read until `decoder` yields a frame that `accept` takes, a fatal error
    /// occurs or the response timeout has passed.
    ///
    /// Frames rejected by `accept` with `Ok(None)` are skipped like noise.
    pub(crate) fn receive<D, T, R>(
        &mut self,
        decoder: &mut D,
        mut accept: impl FnMut(Adu<T>) -> Result<Option<R>, Error>,
    ) -> Result<R, Error>
    where
        D: Decoder<Item = Adu<T>, Error = Error>,
    {
        let Self {
            channel,
            read_buf,
            config,
            read_fault,
        } = self;
        let channel = channel.as_mut().ok_or(Error::NotConnected)?;
        // No deadline if it lies beyond what `Instant` can represent.
        let deadline = Instant::now().checked_add(config.response_timeout);
        let mut chunk = vec![0; config.effective_chunk_size()];
        loop {
            // Leftover bytes may already hold a complete frame.
            if !read_buf.is_empty() {
                let buffered = read_buf.len();
                match decoder.decode(read_buf) {
                    Ok(Some(adu)) => {
                        if let Some(item) = accept(adu)? {
                            return Ok(item);
                        }
                    }
                    Ok(None) => {}
                    Err(err) if err.is_recoverable() => {
                        debug!("Waiting for more data: {err}");
                    }
                    Err(err) => return Err(err),
                }
                // Bytes were consumed, decode the rest before reading again.
                if !read_buf.is_empty() && read_buf.len() < buffered {
                    continue;
                }
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                debug!("No complete frame within {:?}", config.response_timeout);
                return Err(Error::Timeout);
            }
            match channel.recv(&mut chunk, config.read_timeout.min(remaining)) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(len) => {
                    trace!("Received {:02X?}", &chunk[..len]);
                    read_buf.extend_from_slice(&chunk[..len]);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if is_timeout(&err) => return Err(Error::Timeout),
                Err(err) => return Err((*read_fault)(err)),
            }
        }
    }
}
