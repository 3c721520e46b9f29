//! Kapsule node pool operations for a Scaleway session.
//!
//! Pools have no power state. Stopping one records its shape in a restore
//! tag and scales it to zero; starting one scales it back from that tag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::ScalewaySession;
use super::types::{PoolShape, normalise_pool_state, parse_tags, replace_restore_tag};
use crate::model::{ActionKind, Resource, ResourceKind, TagFilter};
use crate::provider::ProviderError;

const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ClusterList {
    #[serde(default)]
    clusters: Vec<ClusterSummary>,
}

#[derive(Debug, Deserialize)]
struct ClusterSummary {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PoolList {
    #[serde(default)]
    pools: Vec<Pool>,
}

#[derive(Clone, Debug, Deserialize)]
pub(super) struct Pool {
    id: String,
    #[serde(default)]
    name: String,
    status: String,
    size: u32,
    #[serde(default)]
    min_size: u32,
    #[serde(default)]
    max_size: u32,
    #[serde(default)]
    autoscaling: bool,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    zone: String,
}

impl Pool {
    fn state(&self) -> String {
        normalise_pool_state(&self.status, self.size)
    }

    fn into_resource(self) -> Resource {
        Resource {
            current_state: self.state(),
            tags: parse_tags(&self.tags),
            id: self.id,
            kind: ResourceKind::NodeGroup,
            name: self.name,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub(super) struct PoolUpdate {
    autoscaling: bool,
    size: u32,
    min_size: u32,
    max_size: u32,
    tags: Vec<String>,
}

/// Builds the update that moves `pool` towards `action`'s target.
pub(super) fn plan_update(pool: &Pool, action: ActionKind) -> PoolUpdate {
    match action {
        ActionKind::Stop => PoolUpdate {
            autoscaling: false,
            size: 0,
            min_size: 0,
            max_size: pool.max_size.max(1),
            tags: replace_restore_tag(
                &pool.tags,
                Some(
                    PoolShape {
                        size: pool.size,
                        min_size: pool.min_size,
                        autoscaling: pool.autoscaling,
                    }
                    .to_tag(),
                ),
            ),
        },
        ActionKind::Start => {
            let shape = PoolShape::from_tags(&pool.tags);
            PoolUpdate {
                autoscaling: shape.autoscaling,
                size: shape.size,
                min_size: shape.min_size,
                max_size: pool.max_size.max(shape.size),
                tags: replace_restore_tag(&pool.tags, None),
            }
        }
    }
}

impl ScalewaySession {
    fn k8s_path(&self, suffix: &str) -> String {
        format!("/k8s/v1/regions/{}{suffix}", self.zone.region())
    }

    async fn cluster_ids(&self) -> Result<Vec<String>, ProviderError> {
        let mut ids = Vec::new();
        for page in 1.. {
            let query = [
                ("project_id", self.account_id.clone()),
                ("page", page.to_string()),
                ("page_size", PAGE_SIZE.to_string()),
            ];
            let list: ClusterList = self.client.get(&self.k8s_path("/clusters"), &query).await?;
            let last = list.clusters.len() < PAGE_SIZE;
            ids.extend(list.clusters.into_iter().map(|cluster| cluster.id));
            if last {
                break;
            }
        }
        Ok(ids)
    }

    async fn cluster_pools(&self, cluster_id: &str) -> Result<Vec<Pool>, ProviderError> {
        let mut pools = Vec::new();
        let path = self.k8s_path(&format!("/clusters/{cluster_id}/pools"));
        for page in 1.. {
            let query = [
                ("page", page.to_string()),
                ("page_size", PAGE_SIZE.to_string()),
            ];
            let list: PoolList = self.client.get(&path, &query).await?;
            let last = list.pools.len() < PAGE_SIZE;
            pools.extend(list.pools);
            if last {
                break;
            }
        }
        Ok(pools)
    }

    pub(super) async fn find_tagged_pools(
        &self,
        filter: &TagFilter,
    ) -> Result<Vec<Resource>, ProviderError> {
        let mut resources = Vec::new();
        for cluster_id in self.cluster_ids().await? {
            for pool in self.cluster_pools(&cluster_id).await? {
                if pool.zone == self.zone.as_str() && filter.matches(&parse_tags(&pool.tags)) {
                    resources.push(pool.into_resource());
                }
            }
        }
        Ok(resources)
    }

    async fn pool(&self, id: &str) -> Result<Pool, ProviderError> {
        self.client
            .get(&self.k8s_path(&format!("/pools/{id}")), &[])
            .await
    }

    pub(super) async fn describe_pools(
        &self,
        ids: &[String],
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let mut states = BTreeMap::new();
        for id in ids {
            match self.pool(id).await {
                Ok(pool) => {
                    states.insert(pool.id.clone(), pool.state());
                }
                Err(ProviderError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(states)
    }

    /// Moves one pool towards the action's target and returns its state
    /// before and right after the call.
    pub(super) async fn act_on_pool(
        &self,
        id: &str,
        action: ActionKind,
    ) -> Result<(String, String), ProviderError> {
        let pool = self.pool(id).await?;
        let previous = pool.state();
        if previous == action.target_state() {
            return Ok((previous.clone(), previous));
        }
        let update = plan_update(&pool, action);
        let updated: Pool = self
            .client
            .patch(&self.k8s_path(&format!("/pools/{id}")), &update)
            .await?;
        Ok((previous, updated.state()))
    }
}
