//! Rolling update: choose pool members to delete under a disruption budget
//!
//! One call looks at the current members and returns the ones to delete
//! this pass. Re-running on the post-delete state converges: failed and
//! deleting members go first, nothing is deleted while the pool is short of
//! ready members, over-provisioned pools shed stale members first, and
//! otherwise stale members are replaced at most `disruption budget` at a time.

use std::collections::HashMap;

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

use capz_common::crd::{
    AzureMachinePoolDeploymentStrategy, AzureMachinePoolInstance, DeletePolicy,
    MachineRollingUpdateDeployment, ProvisioningState,
};
use capz_common::Result;

use crate::intstr::scaled_value_from_int_or_percent;

/// Surge used when none is configured
pub const DEFAULT_MAX_SURGE: i32 = 1;

/// Max unavailable used when none is configured
pub const DEFAULT_MAX_UNAVAILABLE: i32 = 0;

/// Rolling update strategy of a machine pool
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RollingUpdateStrategy {
    /// Extra instances allowed above the desired count
    pub max_surge: Option<IntOrString>,
    /// Instances allowed to be unavailable
    pub max_unavailable: Option<IntOrString>,
    /// Order in which instances are deleted
    pub delete_policy: DeletePolicy,
}

impl From<&MachineRollingUpdateDeployment> for RollingUpdateStrategy {
    fn from(ru: &MachineRollingUpdateDeployment) -> Self {
        Self {
            max_surge: ru.max_surge.clone(),
            max_unavailable: ru.max_unavailable.clone(),
            delete_policy: ru.delete_policy,
        }
    }
}

impl From<&AzureMachinePoolDeploymentStrategy> for RollingUpdateStrategy {
    fn from(strategy: &AzureMachinePoolDeploymentStrategy) -> Self {
        strategy
            .rolling_update
            .as_ref()
            .map(Self::from)
            .unwrap_or_default()
    }
}

impl RollingUpdateStrategy {
    /// Instances that may be created above `desired` (percentages round up)
    pub fn surge(&self, desired: i32) -> Result<i32> {
        match &self.max_surge {
            Some(v) => scaled_value_from_int_or_percent(v, desired, true),
            None => Ok(DEFAULT_MAX_SURGE),
        }
    }

    /// Instances that may be unavailable (percentages round down)
    pub fn max_unavailable(&self, desired: i32) -> Result<i32> {
        match &self.max_unavailable {
            Some(v) => scaled_value_from_int_or_percent(v, desired, false),
            None => Ok(DEFAULT_MAX_UNAVAILABLE),
        }
    }

    /// Members to delete this pass, ordering random policies from the wall clock
    pub fn select_machines_to_delete(
        &self,
        desired: i32,
        members: &HashMap<String, AzureMachinePoolInstance>,
    ) -> Result<Vec<AzureMachinePoolInstance>> {
        let seed = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        self.select_machines_to_delete_seeded(desired, members, seed)
    }

    /// Members to delete this pass, with an explicit seed for random ordering
    pub fn select_machines_to_delete_seeded(
        &self,
        desired: i32,
        members: &HashMap<String, AzureMachinePoolInstance>,
        seed: u64,
    ) -> Result<Vec<AzureMachinePoolInstance>> {
        let max_unavailable = self.max_unavailable(desired)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order = |selected: Vec<&AzureMachinePoolInstance>| {
            let mut ordered: Vec<AzureMachinePoolInstance> =
                selected.into_iter().cloned().collect();
            // Stable base order so ties and shuffles are reproducible.
            ordered.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
            match self.delete_policy {
                DeletePolicy::Oldest => {
                    ordered.sort_by(|a, b| a.creation_timestamp.cmp(&b.creation_timestamp))
                }
                DeletePolicy::Newest => {
                    ordered.sort_by(|a, b| b.creation_timestamp.cmp(&a.creation_timestamp))
                }
                DeletePolicy::Random => ordered.shuffle(&mut rng),
            }
            // Members marked for deletion jump the queue.
            ordered.sort_by_key(|m| !m.delete_requested);
            ordered
        };

        let failed = order(filter(members, |m| {
            m.provisioning_state == ProvisioningState::Failed
        }));
        let deleting = order(filter(members, |m| {
            m.provisioning_state == ProvisioningState::Deleting
        }));
        let ready = order(filter(members, is_ready));
        let stale = order(filter(members, |m| !m.latest_model_applied));

        let ready_count = i32::try_from(ready.len()).unwrap_or(i32::MAX);
        let over_provision = ready_count.saturating_sub(desired);
        let disruption_budget = desired
            .min(over_provision.saturating_add(max_unavailable))
            .max(0);

        debug!(
            desired,
            ready = ready_count,
            failed = failed.len(),
            deleting = deleting.len(),
            stale = stale.len(),
            max_unavailable,
            disruption_budget,
            "selecting machine pool members to delete"
        );

        if !failed.is_empty() || !deleting.is_empty() {
            return Ok(failed.into_iter().chain(deleting).collect());
        }

        if ready_count < desired {
            return Ok(Vec::new());
        }

        if over_provision > 0 {
            let limit = usize::try_from(over_provision).unwrap_or_default();
            let mut to_delete: Vec<AzureMachinePoolInstance> = Vec::with_capacity(limit);
            for candidate in stale.into_iter().chain(ready) {
                if to_delete.len() >= limit {
                    break;
                }
                if !to_delete.iter().any(|m| m.provider_id == candidate.provider_id) {
                    to_delete.push(candidate);
                }
            }
            return Ok(to_delete);
        }

        if stale.is_empty() || disruption_budget <= 0 {
            return Ok(Vec::new());
        }

        let limit = usize::try_from(disruption_budget).unwrap_or_default();
        Ok(ready
            .into_iter()
            .filter(|m| !m.latest_model_applied)
            .take(limit)
            .collect())
    }
}

fn is_ready(m: &AzureMachinePoolInstance) -> bool {
    m.ready && m.provisioning_state == ProvisioningState::Succeeded
}

fn filter(
    members: &HashMap<String, AzureMachinePoolInstance>,
    pred: impl Fn(&AzureMachinePoolInstance) -> bool,
) -> Vec<&AzureMachinePoolInstance> {
    members.values().filter(|m| pred(m)).collect()
}
