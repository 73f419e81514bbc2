pub mod domain;
pub mod key;
pub mod policy_copy;

use std::sync::Arc;

use iotauth_storage::Pool;

use self::{domain::DomainRepo, key::KeyRepo, policy_copy::PolicyCopyRepo};

#[derive(Clone)]
pub struct Repos {
    pub key: KeyRepo,
    pub domain: DomainRepo,
    pub policy_copy: PolicyCopyRepo,
    pub pool: Arc<Pool>,
}

impl Repos {
    #[must_use]
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            key: KeyRepo::new(Arc::clone(&pool)),
            domain: DomainRepo::new(Arc::clone(&pool)),
            policy_copy: PolicyCopyRepo::new(Arc::clone(&pool)),
            pool,
        }
    }
}
