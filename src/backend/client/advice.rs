use serde::Serialize;

use super::core::BackendClient;
use crate::error::Result;
use crate::snapshot::Advice;

#[derive(Serialize)]
struct AdviceEmailRequest<'a> {
    recipients: &'a [String],
    pipeline: Option<&'a str>,
}

/// Splits a comma-separated recipient list, dropping blanks.
pub fn parse_recipients(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl BackendClient {
    /// `GET /api/advice`, optionally scoped to one pipeline.
    pub async fn fetch_advice(&self, pipeline: Option<&str>) -> Result<Advice> {
        let mut url = self.endpoint("api/advice")?;
        if let Some(pipeline) = pipeline.filter(|p| !p.is_empty()) {
            url.query_pairs_mut().append_pair("pipeline", pipeline);
        }

        let value = self.get_json(url).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// `POST /api/email/advice`. A rejected send carries the backend's error
    /// text in `PipePulseError::Api`.
    pub async fn send_advice_email(
        &self,
        recipients: &[String],
        pipeline: Option<&str>,
    ) -> Result<()> {
        let url = self.endpoint("api/email/advice")?;
        let body = AdviceEmailRequest {
            recipients,
            pipeline: pipeline.filter(|p| !p.is_empty()),
        };

        self.send(self.client().post(url).json(&body)).await?;
        Ok(())
    }
}
