use std::io::{BufReader, BufWriter, Read, Write};
use std::sync::{Arc, Mutex};

use dap::errors::ServerError;
use dap::events::Event;
use dap::requests::Request;
use dap::responses::{Response, ResponseBody, ResponseMessage};
use dap::server::{Server, ServerOutput};

/// Thin wrapper over the `dap` crate's server: sequential request polling
/// plus response/event helpers. The shared output handle is the session's
/// single serialized writer.
pub struct DapServer<R: Read, W: Write> {
    server: Server<R, W>,
}

impl<R: Read, W: Write> DapServer<R, W> {
    pub fn new(input: R, output: W) -> DapServer<R, W> {
        let server = Server::new(BufReader::new(input), BufWriter::new(output));
        DapServer { server }
    }

    pub fn output(&self) -> Arc<Mutex<ServerOutput<W>>> {
        self.server.output.clone()
    }

    pub fn poll_request(&mut self) -> Result<Option<Request>, ServerError> {
        let Some(req) = self.server.poll_request()? else {
            return Ok(None);
        };

        log::debug!("{}: {:?}", req.seq, req.command);

        Ok(Some(req))
    }

    pub fn respond_success(&mut self, seq: i64, body: ResponseBody) -> Result<(), ServerError> {
        log::debug!("success {seq}: {body:?}");

        self.server.respond(Response {
            request_seq: seq,
            success: true,
            message: None,
            body: Some(body),
            error: None,
        })
    }

    pub fn respond_error(&mut self, seq: i64, error: impl Into<String>) -> Result<(), ServerError> {
        let error = error.into();

        log::debug!("error {seq}: {error}");

        self.server.respond(Response {
            request_seq: seq,
            success: false,
            message: Some(ResponseMessage::Error(error)),
            body: None,
            error: None,
        })
    }

    pub fn send_event(&mut self, event: Event) -> Result<(), ServerError> {
        self.server.send_event(event)
    }
}
