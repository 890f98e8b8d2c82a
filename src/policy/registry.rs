//! A fixed, ordered list of registered policies (spec §4.5). Order does
//! not affect correctness but is preserved for log output.

use std::sync::Arc;

use super::Policy;

#[derive(Clone)]
pub struct PolicyRegistry {
    policies: Vec<Arc<dyn Policy>>,
}

impl PolicyRegistry {
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Self {
        Self { policies }
    }

    pub fn all(&self) -> &[Arc<dyn Policy>] {
        &self.policies
    }

    /// Narrow the registry to a single named policy (the `--policy` CLI
    /// flag, spec §6). `None` if no policy with that name is registered.
    pub fn restrict_to(&self, name: &str) -> Option<PolicyRegistry> {
        self.policies
            .iter()
            .find(|p| p.name() == name)
            .map(|p| PolicyRegistry {
                policies: vec![p.clone()],
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.policies.iter().any(|p| p.name() == name)
    }
}
