//! Operation API endpoints
//!
//! Synchronous calls run against one host and return its record keyed by the
//! host name. The `_async` variants launch a background job and return its jid.

use std::collections::BTreeMap;

use crate::VolleyClient;
use crate::error::Result;
use volley_core::domain::result::ResultRecord;
use volley_core::dto::job::LaunchResponse;
use volley_core::dto::operation::{
    DeployRequest, ExecuteQuery, ExecuteRequest, HostQuery, ServiceQuery, ServiceRequest,
    TargetQuery, TargetsRequest, TaskPluginInfo, TaskRequest,
};

/// `{host: record}`, the result of a synchronous operation
pub type HostResult = BTreeMap<String, ResultRecord>;

impl VolleyClient {
    // =============================================================================
    // Targets
    // =============================================================================

    /// List the hosts matching a glob pattern (`*` when absent)
    pub async fn target(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.url("/target"))
            .query(&TargetQuery {
                pattern: pattern.map(str::to_string),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Synchronous operations
    // =============================================================================

    /// Check that a host is reachable
    pub async fn ping(&self, host: &str) -> Result<HostResult> {
        self.get_on_host("/ping", host).await
    }

    /// Collect the facts of a host
    pub async fn facter(&self, host: &str) -> Result<HostResult> {
        self.get_on_host("/facter", host).await
    }

    /// Drive a service on a host
    ///
    /// # Arguments
    /// * `host` - Host to operate on
    /// * `name` - Service name
    /// * `state` - 0 started, 1 stopped, 2 restarted
    /// * `graceful` - Reload instead of restarting where possible
    pub async fn service(
        &self,
        host: &str,
        name: &str,
        state: i64,
        graceful: bool,
    ) -> Result<HostResult> {
        let response = self
            .client
            .get(self.url("/service"))
            .query(&ServiceQuery {
                target: Some(host.to_string()),
                name: Some(name.to_string()),
                state: Some(state),
                graceful,
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Run a raw command on a host
    pub async fn execute(&self, host: &str, cmd: &str) -> Result<HostResult> {
        let response = self
            .client
            .get(self.url("/execute"))
            .query(&ExecuteQuery {
                target: Some(host.to_string()),
                cmd: Some(cmd.to_string()),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    async fn get_on_host(&self, path: &str, host: &str) -> Result<HostResult> {
        let response = self
            .client
            .get(self.url(path))
            .query(&HostQuery {
                target: Some(host.to_string()),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Background jobs
    // =============================================================================

    /// Launch a background ping
    pub async fn ping_async(&self, targets: Vec<String>) -> Result<LaunchResponse> {
        self.launch("/ping", &TargetsRequest { targets }).await
    }

    /// Launch a background fact collection
    pub async fn facter_async(&self, targets: Vec<String>) -> Result<LaunchResponse> {
        self.launch("/facter", &TargetsRequest { targets }).await
    }

    /// Launch a background service operation
    pub async fn service_async(&self, req: ServiceRequest) -> Result<LaunchResponse> {
        self.launch("/service", &req).await
    }

    /// Launch a background command run
    pub async fn execute_async(&self, req: ExecuteRequest) -> Result<LaunchResponse> {
        self.launch("/execute", &req).await
    }

    /// Launch a role deployment
    pub async fn deploy(&self, req: DeployRequest) -> Result<LaunchResponse> {
        self.launch("/deploy", &req).await
    }

    /// Launch a task plugin
    pub async fn run_task(&self, req: TaskRequest) -> Result<LaunchResponse> {
        self.launch("/task", &req).await
    }

    /// List the registered task plugins
    pub async fn list_tasks(&self) -> Result<Vec<TaskPluginInfo>> {
        let response = self.client.get(self.url("/task")).send().await?;

        self.handle_response(response).await
    }

    async fn launch<T: serde::Serialize>(&self, path: &str, body: &T) -> Result<LaunchResponse> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let launched: LaunchResponse = self.handle_response(response).await?;

        tracing::debug!("Launched {} job {}", path.trim_start_matches('/'), launched.jid);
        Ok(launched)
    }
}
