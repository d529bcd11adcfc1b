// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! _Modbus_ RTU: frames with a CRC-16 trailer, typically on a serial line.

use log::{debug, warn};

use crate::{
    bytes::Bytes,
    channel::Channel,
    codec::rtu::{ClientCodec, ServerCodec},
    connection::Framed,
    frame::{ExceptionResponse, Request, RequestContext, Response},
    Config, Error, Result,
};

pub use crate::codec::rtu::{deframe, frame};

/// A _Modbus_ RTU connection on top of a [`Channel`].
///
/// The same connection can act as client (send requests, await responses)
/// or as server (await requests, send responses). Read errors of the channel
/// are reported as [`Error::SlaveDeviceFailure`].
#[derive(Debug)]
pub struct Connection<C> {
    framed: Framed<C>,
    client: ClientCodec,
    server: ServerCodec,
    request_context: Option<RequestContext>,
}

impl<C> Connection<C>
where
    C: Channel,
{
    pub fn new(channel: C) -> Self {
        Self::with_config(channel, Config::default())
    }

    pub fn with_config(channel: C, config: Config) -> Self {
        Self {
            framed: Framed::new(channel, config, Error::SlaveDeviceFailure),
            client: ClientCodec,
            server: ServerCodec,
            request_context: None,
        }
    }

    pub fn config(&self) -> &Config {
        self.framed.config()
    }

    pub fn is_open(&self) -> bool {
        self.framed.is_open()
    }

    /// Release the channel. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.framed.close().is_some() {
            debug!("Closed RTU connection");
        }
        self.request_context = None;
    }

    /// Send a request and return the bytes put on the line.
    pub fn send_request(&mut self, request: &Request) -> std::result::Result<Bytes, Error> {
        debug!("Sending request {request:?}");
        let raw = self.framed.send(&mut self.client, request)?;
        self.request_context = Some(RequestContext::new(request));
        Ok(raw)
    }

    pub fn send_response(&mut self, response: &Response) -> std::result::Result<Bytes, Error> {
        debug!("Sending response {response:?}");
        self.framed.send(&mut self.server, response)
    }

    pub fn send_exception(
        &mut self,
        exception: &ExceptionResponse,
    ) -> std::result::Result<Bytes, Error> {
        debug!("Sending exception {exception:?}");
        self.framed.send(&mut self.server, exception)
    }

    /// Wait for the reply to the last request.
    ///
    /// An exception reply of the slave is returned as `Ok(Err(_))`. Replies
    /// of other slaves or to other functions are skipped, on a shared bus they
    /// may be late answers to an earlier request.
    pub fn await_response(&mut self) -> Result<(Response, Bytes)> {
        let request_context = self.request_context;
        let rsp = self.framed.receive(&mut self.client, |adu| {
            let Some(request_context) = request_context else {
                return Ok(Some(adu.pdu.0.map(|rsp| (rsp, adu.raw))));
            };
            match request_context.try_into_response(adu.pdu) {
                Ok(rsp) => Ok(Some(rsp.map(|rsp| (rsp, adu.raw)))),
                Err(err) => {
                    warn!("Skipping reply: {err}");
                    Ok(None)
                }
            }
        })?;
        self.request_context = None;
        debug!("Received response {rsp:?}");
        Ok(rsp)
    }

    /// Wait for the next request.
    pub fn await_request(&mut self) -> std::result::Result<(Request, Bytes), Error> {
        let adu = self.framed.receive(&mut self.server, |adu| Ok(Some(adu)))?;
        debug!("Received request {:?}", adu.pdu);
        Ok((adu.pdu, adu.raw))
    }

    /// Send a request and wait for its reply.
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        self.send_request(request)?;
        Ok(self.await_response()?.map(|(rsp, _)| rsp))
    }
}
