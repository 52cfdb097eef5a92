//! Client for the remote user service
//!
//! Two endpoints are used: `GET /users` lists every identifier and
//! `GET /users/{id}` returns the metric values of one user.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, FetchError, Result};
use crate::types::{Identifier, Record};

#[derive(Debug, Deserialize)]
struct UserPayload {
    user_id: Identifier,
    values: UserValues,
}

#[derive(Debug, Deserialize)]
struct UserValues {
    country: Vec<Option<String>>,
    #[serde(rename = "R")]
    r: Vec<Option<serde_json::Number>>,
    #[serde(rename = "F")]
    f: Vec<Option<serde_json::Number>>,
    #[serde(rename = "M")]
    m: Vec<Option<serde_json::Number>>,
}

fn first<T: Clone>(values: &[Option<T>]) -> Option<T> {
    values.first().cloned().flatten()
}

/// Parse a `/users/{id}` body into the record for `requested`.
///
/// Every key must be present; an empty list (or a `null` element) yields an
/// absent value. A body describing some other user is rejected.
pub fn parse_user(requested: &Identifier, body: &[u8]) -> std::result::Result<Record, FetchError> {
    let payload: UserPayload =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed(e.to_string()))?;

    if payload.user_id != *requested {
        return Err(FetchError::Malformed(format!(
            "asked for user {requested}, got user {}",
            payload.user_id
        )));
    }

    Ok(Record {
        country: first(&payload.values.country),
        r: first(&payload.values.r),
        f: first(&payload.values.f),
        m: first(&payload.values.m),
        user_id: payload.user_id,
    })
}

/// Shared session against the user service. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: reqwest::Url,
    timeout: Duration,
}

impl ApiClient {
    /// Build a client rooted at `base_url`, bounding every request by `timeout`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = reqwest::Url::parse(base_url)
            .map_err(|e| Error::config("base_url", format!("invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config("base_url", "base URL cannot carry a path"));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config("base_url", format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get(&self, url: reqwest::Url) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).timeout(self.timeout).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FetchError::Status(status));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// One attempt at `GET /users`.
    pub async fn list_users(&self) -> std::result::Result<Vec<Identifier>, FetchError> {
        let body = self.get(self.endpoint(&["users"])).await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    /// One attempt at `GET /users/{id}`.
    pub async fn fetch_user(&self, id: &Identifier) -> std::result::Result<Record, FetchError> {
        let body = self.get(self.endpoint(&["users", id.as_str()])).await?;
        parse_user(id, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_lists_become_absent_values() {
        let body = br#"{"user_id":"u7","values":{"country":[],"R":[],"F":[2],"M":[null]}}"#;
        let record = parse_user(&"u7".into(), body).unwrap();
        assert_eq!(record.user_id, Identifier::from("u7"));
        assert_eq!(record.country, None);
        assert_eq!(record.r, None);
        assert_eq!(record.f, Some(2.into()));
        assert_eq!(record.m, None);
    }

    #[test]
    fn missing_key_is_malformed() {
        let body = br#"{"user_id":"u1","values":{"country":["ES"],"R":[3],"F":[5]}}"#;
        let err = parse_user(&"u1".into(), body).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(ref msg) if msg.contains("M")));
    }

    #[test]
    fn payload_for_another_user_is_malformed() {
        let body = br#"{"user_id":"u2","values":{"country":[],"R":[],"F":[],"M":[]}}"#;
        let err = parse_user(&"u1".into(), body).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn numeric_user_id_matches_textual_request() {
        let body = br#"{"user_id":17,"values":{"country":["FR"],"R":[1],"F":[1],"M":[9.5]}}"#;
        let record = parse_user(&"17".into(), body).unwrap();
        assert_eq!(record.to_row(), ["17", "FR", "1", "1", "9.5"]);
    }

    #[test]
    fn endpoints_extend_the_base_path() {
        let api = ApiClient::new("http://localhost:8080/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            api.endpoint(&["users", "a b"]).as_str(),
            "http://localhost:8080/api/users/a%20b"
        );

        let api = ApiClient::new("http://localhost:8080", Duration::from_secs(1)).unwrap();
        assert_eq!(api.endpoint(&["users"]).as_str(), "http://localhost:8080/users");
    }
}
