//! Per-request state seen by the SSO evaluator.

use anyhow::{bail, Result};
use http::StatusCode;

use crate::authentication::Credential;
use crate::ticket::{Service, TicketId};

/// Outbound response of the underlying transport.
pub trait ExternalResponse: Send {
    fn status(&self) -> StatusCode;

    /// Turn the response into a redirect to `url`.
    fn send_redirect(&mut self, url: &str) -> Result<()>;
}

/// Response that records what was sent. Used by the CLI and in tests.
#[derive(Debug, Clone)]
pub struct RecordedResponse {
    status: StatusCode,
    location: Option<String>,
    committed: bool,
}

impl RecordedResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            location: None,
            committed: false,
        }
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Prevent further redirects, as a transport does once headers are sent.
    pub fn commit(&mut self) {
        self.committed = true;
    }
}

impl Default for RecordedResponse {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl ExternalResponse for RecordedResponse {
    fn status(&self) -> StatusCode {
        self.status
    }

    fn send_redirect(&mut self, url: &str) -> Result<()> {
        if self.committed {
            bail!("Response already committed");
        }
        self.status = StatusCode::FOUND;
        self.location = Some(url.to_string());
        self.committed = true;
        Ok(())
    }
}

/// Request state passed explicitly through the SSO flow.
pub struct RequestContext {
    /// Service the user is trying to reach.
    pub service: Option<Service>,
    /// Ticket-granting ticket presented with the request, if any.
    pub ticket_granting_ticket: Option<TicketId>,
    /// Credential slot filled during the flow.
    pub credential: Option<Credential>,
    response: Box<dyn ExternalResponse>,
}

impl RequestContext {
    pub fn new(response: Box<dyn ExternalResponse>) -> Self {
        Self {
            service: None,
            ticket_granting_ticket: None,
            credential: None,
            response,
        }
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.service = Some(service);
        self
    }

    pub fn with_ticket_granting_ticket(mut self, id: TicketId) -> Self {
        self.ticket_granting_ticket = Some(id);
        self
    }

    pub fn response(&self) -> &dyn ExternalResponse {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> &mut dyn ExternalResponse {
        self.response.as_mut()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("service", &self.service)
            .field("ticket_granting_ticket", &self.ticket_granting_ticket)
            .field("credential", &self.credential)
            .field("status", &self.response.status())
            .finish()
    }
}
