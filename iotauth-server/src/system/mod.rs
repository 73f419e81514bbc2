mod domain;
mod policy;
mod token;

use iotauth_policy::PolicyEngineClient;

use crate::context::Context;

pub use token::Principal;

/// Composes C1–C4 into the public operations of §4.5. One struct, one
/// orchestration path, reused verbatim by both the HTTP and gRPC transports
/// the way the teacher's `system::*` handlers are reused by every route that
/// shares a concern.
pub struct AuthService<C: PolicyEngineClient> {
    ctx: Context<C>,
}

impl<C: PolicyEngineClient> Clone for AuthService<C> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<C: PolicyEngineClient> AuthService<C> {
    #[must_use]
    pub fn new(ctx: Context<C>) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub fn ctx(&self) -> &Context<C> {
        &self.ctx
    }
}
