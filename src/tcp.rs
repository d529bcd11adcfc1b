// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! _Modbus_ TCP: frames with an MBAP header.

use log::debug;

use crate::{
    bytes::Bytes,
    channel::Channel,
    codec::tcp::{ClientCodec, ServerCodec},
    connection::Framed,
    frame::{ExceptionResponse, Request, RequestContext, Response},
    Config, Error, Result,
};

pub use crate::codec::tcp::{deframe, frame};

/// A _Modbus_ TCP connection on top of a [`Channel`].
///
/// Requests are numbered starting at [`Config::initial_transaction_id`] and
/// a reply carrying another transaction id fails with
/// [`Error::InvalidMessageId`]. Responses sent by the server side echo the
/// transaction id of the request received last. Read errors of the channel
/// are reported as [`Error::Protocol`].
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
            client: ClientCodec::new(config.initial_transaction_id),
            server: ServerCodec::default(),
            framed: Framed::new(channel, config, Error::Protocol),
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
            debug!("Closed TCP connection");
        }
        self.request_context = None;
    }

    /// Transaction id of the request awaiting its reply.
    pub fn pending_transaction_id(&self) -> Option<u16> {
        self.client.pending()
    }

    /// Send a request under the next transaction id.
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
    /// An exception reply of the slave is returned as `Ok(Err(_))`. A reply
    /// carrying the right transaction id but another slave or function is
    /// an [`Error::UnexpectedResponse`].
    pub fn await_response(&mut self) -> Result<(Response, Bytes)> {
        let adu = self.framed.receive(&mut self.client, |adu| Ok(Some(adu)))?;
        let rsp = match self.request_context {
            Some(request_context) => request_context.try_into_response(adu.pdu)?,
            None => adu.pdu.0,
        };
        self.request_context = None;
        debug!("Received response {rsp:?}");
        Ok(rsp.map(|rsp| (rsp, adu.raw)))
    }

    /// Wait for the next request and remember its transaction id.
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
