//! Instance (server) operations for a Scaleway session.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::debug;

use super::ScalewaySession;
use super::error::classify_sdk_error;
use super::types::{normalise_server_state, parse_tags, render_tag};
use crate::model::{ActionKind, Resource, ResourceKind, TagFilter};
use crate::provider::ProviderError;

/// Page size used for server listings.
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<ServerSummary>,
}

#[derive(Debug, Deserialize)]
struct ServerSummary {
    id: String,
    #[serde(default)]
    name: String,
    state: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl ServerSummary {
    fn into_resource(self) -> Resource {
        Resource {
            tags: parse_tags(&self.tags),
            id: self.id,
            kind: ResourceKind::Instance,
            name: self.name,
            current_state: normalise_server_state(&self.state),
        }
    }
}

/// Scaleway action name for a lifecycle action.
pub(super) const fn server_action(action: ActionKind, force: bool) -> &'static str {
    match (action, force) {
        (ActionKind::Start, _) => "poweron",
        (ActionKind::Stop, false) => "poweroff",
        (ActionKind::Stop, true) => "stop_in_place",
    }
}

/// State a server reports right after accepting `action`.
pub(super) const fn transitional_state(action: ActionKind) -> &'static str {
    match action {
        ActionKind::Start => "starting",
        ActionKind::Stop => "stopping",
    }
}

impl ScalewaySession {
    fn servers_path(&self) -> String {
        format!("/instance/v1/zones/{}/servers", self.zone)
    }

    async fn list_page(
        &self,
        mut query: Vec<(&str, String)>,
        page: usize,
    ) -> Result<Vec<ServerSummary>, ProviderError> {
        query.push(("per_page", PAGE_SIZE.to_string()));
        query.push(("page", page.to_string()));
        let list: ServerList = self.client.get(&self.servers_path(), &query).await?;
        Ok(list.servers)
    }

    async fn list_all(
        &self,
        query: &[(&str, String)],
    ) -> Result<Vec<ServerSummary>, ProviderError> {
        let mut servers = Vec::new();
        for page in 1.. {
            let batch = self.list_page(query.to_vec(), page).await?;
            let last = batch.len() < PAGE_SIZE;
            servers.extend(batch);
            if last {
                break;
            }
        }
        Ok(servers)
    }

    pub(super) async fn find_tagged_servers(
        &self,
        filter: &TagFilter,
    ) -> Result<Vec<Resource>, ProviderError> {
        let query = [
            ("project", self.account_id.clone()),
            ("tags", render_tag(&filter.key, &filter.value)),
        ];
        let servers = self.list_all(&query).await?;
        debug!(zone = %self.zone, listed = servers.len(), "listed tagged servers");
        Ok(servers
            .into_iter()
            .map(ServerSummary::into_resource)
            .collect())
    }

    pub(super) async fn describe_servers(
        &self,
        ids: &[String],
    ) -> Result<BTreeMap<String, String>, ProviderError> {
        let mut states = BTreeMap::new();
        for chunk in ids.chunks(PAGE_SIZE) {
            let query = [
                ("project", self.account_id.clone()),
                ("servers", chunk.join(",")),
            ];
            for server in self.list_all(&query).await? {
                states.insert(server.id, normalise_server_state(&server.state));
            }
        }
        Ok(states)
    }

    pub(super) async fn act_on_server(
        &self,
        id: &str,
        action: ActionKind,
        force: bool,
    ) -> Result<(), ProviderError> {
        self.api
            .perform_instance_action_async(self.zone.as_str(), id, server_action(action, force))
            .await
            .map(|_| ())
            .map_err(classify_sdk_error)
    }
}
