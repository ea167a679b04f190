//! Echo responder: answers every request with a plain-text dump of its
//! parameters and body.

use fcgi_protocol::RequestContext;
use tracing::debug;

use crate::{BoxedRole, Role, RoleContext, RoleError, RoleOutput, ServiceRegistry};

/// Service name for an optional greeting line.
pub const GREETING_SERVICE: &str = "greeting";

/// Greeting printed above the echoed request.
#[derive(Debug, Clone)]
pub struct Greeting(pub String);

pub struct EchoResponder<'a> {
    request: &'a RequestContext,
    output: RoleOutput<'a>,
    services: &'a ServiceRegistry,
}

impl<'a> EchoResponder<'a> {
    pub fn new(ctx: RoleContext<'a>) -> Self {
        Self {
            request: ctx.request,
            output: ctx.output,
            services: ctx.services,
        }
    }

    fn render(&self) -> String {
        let mut text = String::new();
        if let Some(greeting) = self.services.get::<Greeting>(GREETING_SERVICE) {
            text.push_str(&greeting.0);
            text.push('\n');
        }

        let mut params: Vec<_> = self.request.params.iter().collect();
        params.sort();
        for (name, value) in params {
            text.push_str(&format!("{name}={value}\n"));
        }

        text.push_str(&format!("\n{} byte body\n", self.request.stdin.len()));
        text
    }
}

/// Role factory for the registry.
pub fn factory<'a>(ctx: RoleContext<'a>) -> BoxedRole<'a> {
    Box::new(EchoResponder::new(ctx))
}

impl Role for EchoResponder<'_> {
    async fn run(&mut self) -> Result<i32, RoleError> {
        let text = self.render();
        let body = self.request.body();
        debug!(
            "Echoing request {}: {} params, {} body bytes",
            self.request.request_id,
            self.request.params.len(),
            body.len()
        );

        let headers = format!(
            "Status: 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
            text.len() + body.len()
        );
        self.output.print(&headers);
        self.output.print(&text);
        self.output.write_stdout(body);
        Ok(0)
    }

    async fn flush(&mut self, is_final: bool) -> Result<(), RoleError> {
        Ok(self.output.flush(is_final).await?)
    }
}
