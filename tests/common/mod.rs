//! Shared fixtures for pipeline tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rfm_harvester::{Config, RetryConfig};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::{MockServer, Request, Respond, ResponseTemplate};

/// Config pointing at `server`, with files under `dir` and short timings.
pub fn config(server: &MockServer, dir: &Path) -> Config {
    Config {
        base_url: server.uri(),
        pending_path: dir.join("user_ids.txt"),
        output_path: dir.join("users.csv"),
        max_concurrent: 6,
        request_timeout: Duration::from_millis(200),
        compact_every: 64,
        retry: RetryConfig {
            initial_delay: Duration::from_millis(10),
            ..RetryConfig::default()
        },
    }
}

pub fn user_body(id: &str, country: &str, r: i64, f: i64, m: i64) -> Value {
    json!({
        "user_id": id,
        "values": { "country": [country], "R": [r], "F": [f], "M": [m] }
    })
}

/// Answers `/users/{id}` with a record for `{id}`, optionally cancelling a
/// token when the n-th request arrives or running a hook before every reply.
pub struct EchoUser {
    seen: AtomicUsize,
    cancel_at: Option<(usize, CancellationToken)>,
    delay: Duration,
    before_reply: Option<Box<dyn Fn() + Send + Sync>>,
}

impl EchoUser {
    pub fn new() -> Self {
        Self {
            seen: AtomicUsize::new(0),
            cancel_at: None,
            delay: Duration::ZERO,
            before_reply: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn cancel_on_request(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_at = Some((n, token));
        self
    }

    pub fn before_reply(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.before_reply = Some(Box::new(hook));
        self
    }
}

impl Respond for EchoUser {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request.url.path().rsplit('/').next().unwrap_or_default();
        let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = &self.cancel_at {
            if n == *at {
                token.cancel();
            }
        }
        if let Some(hook) = &self.before_reply {
            hook();
        }
        ResponseTemplate::new(200)
            .set_body_json(user_body(id, "ES", 1, 2, 3))
            .set_delay(self.delay)
    }
}

/// Data rows of the CSV at `path`, header excluded.
pub fn data_rows(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

pub fn write_pending(path: &Path, ids: &[&str]) {
    let contents: String = ids.iter().map(|id| format!("{id}\n")).collect();
    std::fs::write(path, contents).unwrap();
}
