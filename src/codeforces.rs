use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::config::CodeforcesConfig;
use crate::error::{ExternalApiError, ExternalApiErrorKind};
use crate::models::{ApiRatingChange, ApiResponse, ApiSubmission, ContestResult, Profile, Submission};

/// Largest page `user.status` will return in one call.
pub const PAGE_SIZE: usize = 1000;

/// Read-only view of a student's activity on the judge.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    async fn fetch_profile(&self, handle: &str) -> Result<Profile, ExternalApiError>;

    async fn fetch_rating_history(&self, handle: &str)
        -> Result<Vec<ContestResult>, ExternalApiError>;

    /// One page of submissions, newest first. `from` is 1-based.
    async fn fetch_submissions(
        &self,
        handle: &str,
        from: usize,
        count: usize,
    ) -> Result<Vec<Submission>, ExternalApiError>;
}

pub struct CodeforcesClient {
    base_url: String,
    client: Client,
}

impl CodeforcesClient {
    pub fn new(config: &CodeforcesConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        handle: &str,
        facet: &'static str,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, ExternalApiError> {
        let fail = |kind: ExternalApiErrorKind| ExternalApiError::new(handle, facet, kind);
        let url = format!("{}/{}", self.base_url, method);

        debug!("GET {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| fail(e.into()))?;

        // Failures come back as 400 with a JSON body, so the status field is
        // the source of truth rather than the HTTP code.
        let status = response.status();
        let text = response.text().await.map_err(|e| fail(e.into()))?;

        let body: ApiResponse<T> = serde_json::from_str(&text).map_err(|e| {
            fail(ExternalApiErrorKind::Decode(format!(
                "HTTP {}: {}",
                status, e
            )))
        })?;

        if body.status != "OK" {
            let comment = body
                .comment
                .unwrap_or_else(|| format!("Failed to fetch {}", facet));
            return Err(fail(ExternalApiErrorKind::Status(comment)));
        }

        body.result
            .ok_or_else(|| fail(ExternalApiErrorKind::Decode("missing result".to_string())))
    }
}

#[async_trait]
impl ActivitySource for CodeforcesClient {
    async fn fetch_profile(&self, handle: &str) -> Result<Profile, ExternalApiError> {
        let users: Vec<Profile> = self
            .call(handle, "user info", "user.info", &[("handles", handle.to_string())])
            .await?;

        users.into_iter().next().ok_or_else(|| {
            ExternalApiError::new(
                handle,
                "user info",
                ExternalApiErrorKind::Decode("empty user list".to_string()),
            )
        })
    }

    async fn fetch_rating_history(
        &self,
        handle: &str,
    ) -> Result<Vec<ContestResult>, ExternalApiError> {
        let changes: Vec<ApiRatingChange> = self
            .call(handle, "rating history", "user.rating", &[("handle", handle.to_string())])
            .await?;

        Ok(changes.into_iter().map(ContestResult::from).collect())
    }

    async fn fetch_submissions(
        &self,
        handle: &str,
        from: usize,
        count: usize,
    ) -> Result<Vec<Submission>, ExternalApiError> {
        let submissions: Vec<ApiSubmission> = self
            .call(
                handle,
                "submissions",
                "user.status",
                &[
                    ("handle", handle.to_string()),
                    ("from", from.to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;

        Ok(submissions.into_iter().map(Submission::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_failed_envelope_comment() {
        let body = json!({"status": "FAILED", "comment": "handle: User with handle nobody not found"});
        let parsed: ApiResponse<Vec<Profile>> = serde_json::from_value(body).unwrap();

        assert_eq!(parsed.status, "FAILED");
        assert!(parsed.result.is_none());
        assert_eq!(
            parsed.comment.as_deref(),
            Some("handle: User with handle nobody not found")
        );
    }

    #[test]
    fn profile_without_rating_parses() {
        let body = json!({"status": "OK", "result": [{"handle": "newbie"}]});
        let parsed: ApiResponse<Vec<Profile>> = serde_json::from_value(body).unwrap();
        let profile = &parsed.result.unwrap()[0];

        assert_eq!(profile.handle, "newbie");
        assert_eq!(profile.rating, None);
        assert_eq!(profile.max_rating, None);
    }

    #[test]
    fn submission_defaults_missing_contest_and_rating() {
        let body = json!({
            "id": 42,
            "creationTimeSeconds": 1_700_000_000,
            "problem": {"index": "A", "name": "Gym Problem"},
            "verdict": "OK"
        });
        let sub: Submission = serde_json::from_value::<ApiSubmission>(body).unwrap().into();

        assert_eq!(sub.submission_id, 42);
        assert_eq!(sub.contest_id, 0);
        assert_eq!(sub.problem_rating, 0);
        assert_eq!(sub.problem_index, "A");
        assert_eq!(sub.verdict, "OK");
    }

    #[test]
    fn rating_change_maps_every_field() {
        let body = json!({
            "contestId": 1900,
            "contestName": "Codeforces Round 911",
            "handle": "alice",
            "rank": 312,
            "ratingUpdateTimeSeconds": 1_701_000_000,
            "oldRating": 1450,
            "newRating": 1500
        });
        let result: ContestResult = serde_json::from_value::<ApiRatingChange>(body).unwrap().into();

        assert_eq!(result.contest_id, 1900);
        assert_eq!(result.contest_name, "Codeforces Round 911");
        assert_eq!(result.rank, 312);
        assert_eq!(result.old_rating, 1450);
        assert_eq!(result.new_rating, 1500);
    }
}
