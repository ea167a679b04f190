//! FastCGI Roles
//!
//! A role is the application behaviour requested by BEGIN_REQUEST
//! (responder, authorizer, filter). Each implements the [`Role`] trait and
//! is built per request by a [`RoleFactory`] from a [`RoleContext`]: the
//! completed request, an output buffer bound to the connection, and the
//! injected [`ServiceRegistry`]. Roles never manage the socket themselves.

pub mod authorizer;
pub mod error;
pub mod output;
pub mod responder;
pub mod services;

use std::future::Future;
use std::pin::Pin;

use fcgi_protocol::RequestContext;

pub use error::RoleError;
pub use output::RoleOutput;
pub use services::ServiceRegistry;

/// Trait implemented by all roles.
pub trait Role: Send {
    /// Run the application logic and return its exit code.
    fn run(&mut self) -> impl Future<Output = Result<i32, RoleError>> + Send;

    /// Write buffered output to the connection. When `is_final` is set the
    /// output streams are also terminated.
    fn flush(&mut self, is_final: bool) -> impl Future<Output = Result<(), RoleError>> + Send;
}

type RoleFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RoleError>> + Send + 'a>>;

/// Object-safe wrapper for the Role trait.
pub trait DynRole: Send {
    fn run_dyn(&mut self) -> RoleFuture<'_, i32>;
    fn flush_dyn(&mut self, is_final: bool) -> RoleFuture<'_, ()>;
}

impl<T: Role> DynRole for T {
    fn run_dyn(&mut self) -> RoleFuture<'_, i32> {
        Box::pin(self.run())
    }

    fn flush_dyn(&mut self, is_final: bool) -> RoleFuture<'_, ()> {
        Box::pin(self.flush(is_final))
    }
}

pub type BoxedRole<'a> = Box<dyn DynRole + 'a>;

/// Everything a role may touch while it runs.
pub struct RoleContext<'a> {
    pub request: &'a RequestContext,
    pub output: RoleOutput<'a>,
    pub services: &'a ServiceRegistry,
}

/// Builds a role instance for one completed request.
pub trait RoleFactory: Send + Sync + 'static {
    fn build<'a>(&self, ctx: RoleContext<'a>) -> BoxedRole<'a>;
}

impl<F> RoleFactory for F
where
    F: for<'a> Fn(RoleContext<'a>) -> BoxedRole<'a> + Send + Sync + 'static,
{
    fn build<'a>(&self, ctx: RoleContext<'a>) -> BoxedRole<'a> {
        self(ctx)
    }
}
