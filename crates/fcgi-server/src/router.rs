//! FastCGI Server: serves sequential requests on each connection and
//! dispatches them to roles.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fcgi_protocol::{FAILURE_EXIT_CODE, ProtocolStatus, RequestContext};
use fcgi_roles::{BoxedRole, RoleContext, RoleError, RoleOutput, ServiceRegistry};
use fcgi_transport::{ConnectionHandler, Transceiver, TransportError};
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::{RequestLimits, ServerInfo};
use crate::registry::{RoleRegistry, RoleSlot};
use crate::request::{AbortReason, Request, RunOutcome};

/// How a role invocation ended.
enum RoleOutcome {
    Finished(i32),
    Failed(RoleError),
    Panicked(String),
}

/// The FastCGI server: owns the role table and the services container.
pub struct FcgiServer {
    roles: RoleRegistry,
    services: Arc<ServiceRegistry>,
    limits: RequestLimits,
    info: ServerInfo,
}

impl FcgiServer {
    pub fn new(roles: RoleRegistry, services: Arc<ServiceRegistry>) -> Self {
        info!(
            "FastCGI server ready (roles: {:?}, services: {:?})",
            roles.supported(),
            services.names()
        );
        Self {
            roles,
            services,
            limits: RequestLimits::default(),
            info: ServerInfo::default(),
        }
    }

    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_server_info(mut self, info: ServerInfo) -> Self {
        self.info = info;
        self
    }

    /// Serve requests on one connection until it closes or a request
    /// does not ask to keep it.
    pub async fn serve(&self, mut tx: Transceiver) -> Result<(), TransportError> {
        let mut previous_id = None;
        loop {
            let mut request = Request::new(self.limits, self.info).following(previous_id);
            let outcome = match request.run(&mut tx).await {
                Ok(outcome) => outcome,
                Err(TransportError::Closed { mid_frame }) => {
                    if mid_frame || request.reply_id().is_some() {
                        debug!("{} closed mid-request ({:?})", tx.peer(), request.state());
                    } else {
                        debug!("{} closed", tx.peer());
                    }
                    return Ok(());
                }
                Err(TransportError::Timeout(limit)) if request.reply_id().is_none() => {
                    debug!("{} idle for {limit:?}, closing", tx.peer());
                    tx.close().await;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            previous_id = request.reply_id();
            let keep = match outcome {
                RunOutcome::Complete => self.dispatch(&mut tx, request.context()).await?,
                RunOutcome::Aborted(reason) => Self::refuse(&mut tx, &request, reason).await?,
            };
            if !keep {
                tx.close().await;
                return Ok(());
            }
        }
    }

    /// Answer an aborted request with a failure completion.
    async fn refuse(
        tx: &mut Transceiver,
        request: &Request,
        reason: AbortReason,
    ) -> Result<bool, TransportError> {
        warn!("{} aborted request: {reason}", tx.peer());
        let keep = request.context().keep_connection && reason.preserves_framing();

        let Some(id) = request.reply_id() else {
            return Ok(false);
        };
        tx.send_end_request(id, ProtocolStatus::RequestComplete, FAILURE_EXIT_CODE, keep)
            .await?;
        Ok(keep)
    }

    /// Resolve and run the role for a completed request. Returns whether
    /// the connection stays open.
    async fn dispatch(
        &self,
        tx: &mut Transceiver,
        request: &RequestContext,
    ) -> Result<bool, TransportError> {
        let id = request.request_id;
        let keep = request.keep_connection;

        let factory = match self.roles.resolve(request.role) {
            RoleSlot::Supported(factory) => factory,
            RoleSlot::Unsupported => {
                warn!("{} requested unsupported role {}", tx.peer(), request.role);
                tx.send_end_request(id, ProtocolStatus::UnknownRole, 0, keep)
                    .await?;
                return Ok(keep);
            }
        };

        let outcome = {
            let ctx = RoleContext {
                request,
                output: RoleOutput::new(tx, id),
                services: &self.services,
            };
            invoke(factory.build(ctx)).await
        };

        match outcome {
            RoleOutcome::Finished(code) => {
                debug!("{} request {id} finished with exit code {code}", tx.peer());
                tx.send_end_request(id, ProtocolStatus::RequestComplete, code, keep)
                    .await?;
                Ok(keep)
            }
            RoleOutcome::Failed(RoleError::Transport(e)) => Err(e),
            RoleOutcome::Failed(e) => {
                error!("{} role failed on request {id}: {e}", tx.peer());
                tx.send_end_request(id, ProtocolStatus::RequestComplete, FAILURE_EXIT_CODE, false)
                    .await?;
                Ok(false)
            }
            RoleOutcome::Panicked(message) => {
                error!("{} role panicked on request {id}: {message}", tx.peer());
                tx.end_open_streams(id).await?;
                tx.send_end_request(id, ProtocolStatus::RequestComplete, FAILURE_EXIT_CODE, false)
                    .await?;
                Ok(false)
            }
        }
    }
}

/// Run a role and flush its output. A failed role still gets a final flush
/// so every stream it started is terminated.
async fn invoke(mut role: BoxedRole<'_>) -> RoleOutcome {
    let guarded = AssertUnwindSafe(async move {
        match role.run_dyn().await {
            Ok(code) => role.flush_dyn(true).await.map(|()| code),
            Err(e) => {
                if let Err(flush_err) = role.flush_dyn(true).await {
                    debug!("Final flush after role failure also failed: {flush_err}");
                }
                Err(e)
            }
        }
    });

    match guarded.catch_unwind().await {
        Ok(Ok(code)) => RoleOutcome::Finished(code),
        Ok(Err(e)) => RoleOutcome::Failed(e),
        Err(payload) => RoleOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl ConnectionHandler for FcgiServer {
    async fn handle_connection(
        &self,
        transceiver: Transceiver,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.serve(transceiver).await?;
        Ok(())
    }
}
