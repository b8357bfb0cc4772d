//! TMDB `find` endpoint: IMDb id to TMDB id.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;

use crate::request::{MediaType, ResolvedId};

pub const TMDB_API_BASE: &str = "https://api.themoviedb.org";

pub struct TmdbClient {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct FindResponse {
    #[serde(default)]
    pub movie_results: Vec<FindResult>,
    #[serde(default)]
    pub tv_results: Vec<FindResult>,
}

#[derive(Debug, Deserialize)]
pub struct FindResult {
    pub id: u64,
}

impl FindResponse {
    /// First match of the requested kind.
    pub fn provider_id(&self, media_type: MediaType) -> Option<ResolvedId> {
        let results = match media_type {
            MediaType::Movie => &self.movie_results,
            MediaType::Series => &self.tv_results,
        };
        results.first().map(|r| ResolvedId(r.id))
    }
}

impl TmdbClient {
    pub fn new(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn find_url(&self, external_id: &str) -> String {
        format!("{}/3/find/{external_id}?external_source=imdb_id", self.base_url)
    }

    pub async fn find(&self, external_id: &str) -> Result<FindResponse> {
        let resp = self
            .client
            .get(self.find_url(external_id))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!("TMDB API error: {}", resp.status()));
        }

        Ok(resp.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_url_format() {
        let client = TmdbClient::new(Client::new(), "https://api.themoviedb.org/", "t");
        assert_eq!(
            client.find_url("tt0903747"),
            "https://api.themoviedb.org/3/find/tt0903747?external_source=imdb_id"
        );
    }

    #[test]
    fn picks_result_by_media_type() {
        let found: FindResponse = serde_json::from_str(
            r#"{"movie_results":[],"person_results":[],"tv_results":[{"id":1396,"name":"Breaking Bad"}]}"#,
        )
        .unwrap();
        assert_eq!(found.provider_id(MediaType::Series), Some(ResolvedId(1396)));
        assert_eq!(found.provider_id(MediaType::Movie), None);
    }

    #[test]
    fn missing_lists_are_empty() {
        let found: FindResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(found.provider_id(MediaType::Movie), None);
    }

    #[tokio::test]
    async fn sends_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/3/find/tt0903747")
            .match_query(mockito::Matcher::Any)
            .match_header("authorization", "Bearer secret")
            .with_status(200)
            .with_body(r#"{"movie_results":[],"tv_results":[{"id":1396}]}"#)
            .create_async()
            .await;

        let client = TmdbClient::new(Client::new(), &server.url(), "secret");
        let found = client.find("tt0903747").await.unwrap();
        assert_eq!(found.provider_id(MediaType::Series), Some(ResolvedId(1396)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/3/find/tt0000001")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body(r#"{"status_code":7,"status_message":"Invalid API key"}"#)
            .create_async()
            .await;

        let client = TmdbClient::new(Client::new(), &server.url(), "bad");
        let err = client.find("tt0000001").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}
