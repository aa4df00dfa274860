use serde::Serialize;
use serde_json::Value;

use super::core::BackendClient;
use crate::error::Result;

#[derive(Serialize)]
struct ViewedRequest<'a> {
    pipeline_name: &'a str,
    build_number: u64,
}

impl BackendClient {
    /// `GET /api/failed-builds`
    pub async fn fetch_failed_builds(&self) -> Result<Value> {
        self.get_json(self.endpoint("api/failed-builds")?).await
    }

    /// `POST /api/failed-builds/viewed`
    pub async fn mark_failed_build_viewed(
        &self,
        pipeline_name: &str,
        build_number: u64,
    ) -> Result<()> {
        let url = self.endpoint("api/failed-builds/viewed")?;
        let body = ViewedRequest {
            pipeline_name,
            build_number,
        };

        self.send(self.client().post(url).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn posts_acknowledgment_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/failed-builds/viewed")
            .match_body(Matcher::Json(json!({
                "pipeline_name": "api",
                "build_number": 12
            })))
            .with_status(200)
            .create_async()
            .await;

        let client = BackendClient::new(&server.url(), 4).unwrap();
        client.mark_failed_build_viewed("api", 12).await.unwrap();

        mock.assert_async().await;
    }
}
