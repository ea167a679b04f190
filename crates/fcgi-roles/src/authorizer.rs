//! Allow-list authorizer.
//!
//! Looks up one request parameter (`REMOTE_USER` unless configured
//! otherwise) in the [`AuthorizedUsers`] service. An authorized request gets
//! `Status: 200` plus a `Variable-AUTH_USER` header, which the front end
//! passes on to the next stage; anything else gets `Status: 403`.

use std::collections::HashSet;

use fcgi_protocol::RequestContext;
use tracing::{debug, info};

use crate::{BoxedRole, Role, RoleContext, RoleError, RoleOutput, ServiceRegistry};

/// Service name for the allow-list.
pub const AUTHORIZED_USERS_SERVICE: &str = "authorized_users";

const DEFAULT_USER_PARAM: &str = "REMOTE_USER";

#[derive(Debug, Clone)]
pub struct AuthorizedUsers {
    users: HashSet<String>,
    param: String,
}

impl AuthorizedUsers {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            param: DEFAULT_USER_PARAM.to_string(),
        }
    }

    /// Check `param` instead of `REMOTE_USER`.
    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = param.into();
        self
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    pub fn allows(&self, user: &str) -> bool {
        self.users.contains(user)
    }
}

pub struct ParamAuthorizer<'a> {
    request: &'a RequestContext,
    output: RoleOutput<'a>,
    services: &'a ServiceRegistry,
}

impl<'a> ParamAuthorizer<'a> {
    pub fn new(ctx: RoleContext<'a>) -> Self {
        Self {
            request: ctx.request,
            output: ctx.output,
            services: ctx.services,
        }
    }
}

/// Role factory for the registry.
pub fn factory<'a>(ctx: RoleContext<'a>) -> BoxedRole<'a> {
    Box::new(ParamAuthorizer::new(ctx))
}

impl Role for ParamAuthorizer<'_> {
    async fn run(&mut self) -> Result<i32, RoleError> {
        let allow_list = self
            .services
            .get::<AuthorizedUsers>(AUTHORIZED_USERS_SERVICE)
            .ok_or_else(|| RoleError::MissingService(AUTHORIZED_USERS_SERVICE.into()))?;

        match self.request.param(allow_list.param()) {
            Some(user) if allow_list.allows(user) => {
                debug!("Authorized {user:?} for request {}", self.request.request_id);
                self.output
                    .print(&format!("Status: 200 OK\r\nVariable-AUTH_USER: {user}\r\n\r\n"));
            }
            user => {
                info!(
                    "Denied {:?} for request {}",
                    user.unwrap_or("<none>"),
                    self.request.request_id
                );
                self.output.print(
                    "Status: 403 Forbidden\r\nContent-Type: text/plain\r\n\r\nForbidden\n",
                );
            }
        }
        Ok(0)
    }

    async fn flush(&mut self, is_final: bool) -> Result<(), RoleError> {
        Ok(self.output.flush(is_final).await?)
    }
}
