use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::training::config::{BktParams, PolicyParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelParams {
    pub version: u64,
    pub bkt: BktParams,
    pub policy: PolicyParams,
}

/// Hyperparameters read by the live path. Each decision takes one snapshot; a commit swaps
/// the whole set at once so no decision mixes old and new values.
pub struct LiveParams {
    current: RwLock<Arc<ModelParams>>,
}

impl LiveParams {
    pub fn new(bkt: BktParams, policy: PolicyParams) -> Self {
        Self {
            current: RwLock::new(Arc::new(ModelParams {
                version: 1,
                bkt: bkt.sanitized(),
                policy: policy.sanitized(),
            })),
        }
    }

    pub fn snapshot(&self) -> Arc<ModelParams> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn commit(&self, bkt: BktParams, policy: PolicyParams) -> Arc<ModelParams> {
        let mut guard = self.current.write();
        let next = Arc::new(ModelParams {
            version: guard.version + 1,
            bkt: bkt.sanitized(),
            policy: policy.sanitized(),
        });
        *guard = Arc::clone(&next);
        next
    }

    /// Commits only when nothing else committed since `expected_version` was read.
    pub fn commit_if_version(
        &self,
        expected_version: u64,
        bkt: BktParams,
        policy: PolicyParams,
    ) -> Result<Arc<ModelParams>, Arc<ModelParams>> {
        let mut guard = self.current.write();
        if guard.version != expected_version {
            return Err(Arc::clone(&guard));
        }
        let next = Arc::new(ModelParams {
            version: expected_version + 1,
            bkt: bkt.sanitized(),
            policy: policy.sanitized(),
        });
        *guard = Arc::clone(&next);
        Ok(next)
    }
}

impl Default for LiveParams {
    fn default() -> Self {
        Self::new(BktParams::default(), PolicyParams::default())
    }
}
