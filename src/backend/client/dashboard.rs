use log::debug;
use serde_json::Value;

use super::core::BackendClient;
use crate::error::Result;

impl BackendClient {
    /// `GET /api/pipelines`
    pub async fn fetch_pipelines(&self) -> Result<Value> {
        self.get_json(self.endpoint("api/pipelines")?).await
    }

    /// `GET /api/metrics/overall`, flat or enveloped.
    pub async fn fetch_overall_metrics(&self) -> Result<Value> {
        self.get_json(self.endpoint("api/metrics/overall")?).await
    }

    /// `GET /api/pipelines/{name}/builds?limit=N`
    ///
    /// The pipeline name is percent-encoded as a single path segment.
    pub async fn fetch_builds(&self, pipeline_name: &str, limit: usize) -> Result<Value> {
        let mut url = self.endpoint(&format!(
            "api/pipelines/{}/builds",
            urlencoding::encode(pipeline_name)
        ))?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string());
        self.get_json(url).await
    }

    /// `GET /api/jenkins-node-health`
    pub async fn fetch_node_health(&self) -> Result<Value> {
        self.get_json(self.endpoint("api/jenkins-node-health")?).await
    }

    /// Asks the backend for a collection pass. Only acceptance is reported;
    /// the response body is ignored.
    pub async fn trigger_collection(&self, manual: bool) -> Result<()> {
        let mut url = self.endpoint("api/trigger-collection")?;
        url.query_pairs_mut()
            .append_pair("manual", if manual { "1" } else { "0" });

        self.send(self.client().get(url)).await?;
        debug!("Backend accepted collection trigger (manual: {manual})");
        Ok(())
    }
}
