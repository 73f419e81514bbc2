use std::sync::Arc;

use iotauth_policy::{PolicyAgent, PolicyEngineClient};
use tokio::sync::broadcast;

use crate::{repos::Repos, tokenizer::Tokenizer, Config};

/// Shared state threaded through every HTTP/gRPC handler, mirroring the
/// teacher's `Context` (config + repos + a broadcast stop signal), minus the
/// mount router the teacher needed for its pluggable-backend design.
pub struct Context<C: PolicyEngineClient> {
    pub config: Arc<Config>,
    pub repos: Repos,
    pub tokenizer: Arc<Tokenizer>,
    pub policy_agent: Arc<PolicyAgent<C>>,
    pub stop_tx: broadcast::Sender<()>,
}

impl<C: PolicyEngineClient> Clone for Context<C> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            repos: self.repos.clone(),
            tokenizer: Arc::clone(&self.tokenizer),
            policy_agent: Arc::clone(&self.policy_agent),
            stop_tx: self.stop_tx.clone(),
        }
    }
}
