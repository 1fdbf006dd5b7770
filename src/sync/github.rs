//! GitHub Issues client over the REST API.
//!
//! Every request has a bounded timeout. Rate limiting (429), server errors
//! and transport failures are retried with exponential backoff up to
//! `sync.max_attempts`; other statuses fail immediately. POST is not
//! idempotent, so it is only retried when the server cannot have acted on
//! it: a 429 or a failure to connect.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::sync::tracker::{Comment, Issue, IssueState, IssueTracker};

const USER_AGENT: &str = concat!("weave/", env!("CARGO_PKG_VERSION"));
const BACKOFF_BASE_MS: u64 = 500;
const MAX_RETRY_AFTER_SECS: u64 = 30;

/// Environment variables searched for an API token, in order
pub const TOKEN_VARS: [&str; 2] = ["WV_SYNC_TOKEN", "GITHUB_TOKEN"];

/// How a request attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Throttled,
    Server,
    Connect,
    Transport,
}

fn should_retry(method: &str, failure: Failure) -> bool {
    match failure {
        Failure::Throttled | Failure::Connect => true,
        Failure::Server | Failure::Transport => method != "POST",
    }
}

#[derive(Debug)]
pub struct GitHubTracker {
    agent: ureq::Agent,
    api_url: String,
    repo: String,
    token: String,
    max_attempts: u32,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    state: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    comments: u64,
}

#[derive(Debug, Deserialize)]
struct GhUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhComment {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    user: Option<GhUser>,
}

impl From<GhIssue> for Issue {
    fn from(raw: GhIssue) -> Self {
        Issue {
            number: raw.number,
            title: raw.title,
            body: raw.body.unwrap_or_default(),
            state: if raw.state.eq_ignore_ascii_case("closed") {
                IssueState::Closed
            } else {
                IssueState::Open
            },
            labels: raw.labels.into_iter().map(|label| label.name).collect(),
            comments: raw.comments,
        }
    }
}

impl GitHubTracker {
    pub fn new(config: &SyncConfig, token: String) -> Result<Self> {
        let repo = config
            .repo
            .clone()
            .ok_or_else(|| Error::InvalidConfig("sync.repo is not set (owner/name)".to_string()))?;
        if token.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "no API token; set one of {}",
                TOKEN_VARS.join(", ")
            )));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build();
        Ok(Self {
            agent,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            repo,
            token,
            max_attempts: config.max_attempts.max(1),
        })
    }

    /// Build from config, reading the token from the environment.
    pub fn from_env(config: &SyncConfig) -> Result<Self> {
        let token = TOKEN_VARS
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|value| !value.trim().is_empty()))
            .unwrap_or_default();
        Self::new(config, token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}{path}", self.api_url, self.repo)
    }

    fn send(&self, method: &str, path: &str, body: Option<&Value>) -> Result<ureq::Response> {
        let url = self.url(path);
        let mut attempt = 1;
        loop {
            let request = self
                .agent
                .request(method, &url)
                .set("Accept", "application/vnd.github+json")
                .set("Authorization", &format!("Bearer {}", self.token))
                .set("X-GitHub-Api-Version", "2022-11-28");
            let result = match body {
                Some(body) => request.send_json(body),
                None => request.call(),
            };

            let retry_after = match result {
                Ok(response) => return Ok(response),
                Err(ureq::Error::Status(code, response)) if code == 429 || code >= 500 => {
                    let hinted = response
                        .header("Retry-After")
                        .and_then(|value| value.trim().parse::<u64>().ok())
                        .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)));
                    let failure = if code == 429 {
                        Failure::Throttled
                    } else {
                        Failure::Server
                    };
                    if attempt >= self.max_attempts || !should_retry(method, failure) {
                        return Err(Error::ExternalApi(format!(
                            "{method} {path}: HTTP {code} after {attempt} attempt(s)"
                        )));
                    }
                    tracing::warn!(method, path, code, attempt, "tracker request throttled or failed; retrying");
                    hinted
                }
                Err(ureq::Error::Status(code, response)) => {
                    let message = response
                        .into_json::<Value>()
                        .ok()
                        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
                        .unwrap_or_default();
                    return Err(Error::ExternalApi(format!(
                        "{method} {path}: HTTP {code} {message}"
                    )));
                }
                Err(ureq::Error::Transport(transport)) => {
                    let failure = match transport.kind() {
                        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => Failure::Connect,
                        _ => Failure::Transport,
                    };
                    if attempt >= self.max_attempts || !should_retry(method, failure) {
                        return Err(Error::ExternalApi(format!(
                            "{method} {path}: {transport}"
                        )));
                    }
                    tracing::warn!(method, path, attempt, error = %transport, "tracker transport error; retrying");
                    None
                }
            };

            let delay = retry_after
                .unwrap_or_else(|| Duration::from_millis(BACKOFF_BASE_MS << (attempt - 1)));
            std::thread::sleep(delay);
            attempt += 1;
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(response: ureq::Response) -> Result<T> {
        response
            .into_json::<T>()
            .map_err(|err| Error::ExternalApi(format!("unreadable tracker response: {err}")))
    }
}

impl IssueTracker for GitHubTracker {
    fn get_issue(&mut self, number: u64) -> Result<Issue> {
        let response = self.send("GET", &format!("/issues/{number}"), None)?;
        Ok(Self::read_json::<GhIssue>(response)?.into())
    }

    fn latest_comment(&mut self, issue: &Issue) -> Result<Option<Comment>> {
        if issue.comments == 0 {
            return Ok(None);
        }
        let path = format!(
            "/issues/{}/comments?per_page=1&page={}",
            issue.number, issue.comments
        );
        let comments: Vec<GhComment> = Self::read_json(self.send("GET", &path, None)?)?;
        Ok(comments.into_iter().last().map(|raw| Comment {
            body: raw.body.unwrap_or_default(),
            author: raw.user.map(|user| user.login),
        }))
    }

    fn create_issue(&mut self, title: &str, body: &str, labels: &[String]) -> Result<Issue> {
        let payload = json!({ "title": title, "body": body, "labels": labels });
        let response = self.send("POST", "/issues", Some(&payload))?;
        Ok(Self::read_json::<GhIssue>(response)?.into())
    }

    fn set_state(&mut self, number: u64, state: IssueState) -> Result<()> {
        let state = match state {
            IssueState::Open => "open",
            IssueState::Closed => "closed",
        };
        self.send(
            "PATCH",
            &format!("/issues/{number}"),
            Some(&json!({ "state": state })),
        )?;
        Ok(())
    }

    fn set_labels(&mut self, number: u64, labels: &[String]) -> Result<()> {
        self.send(
            "PUT",
            &format!("/issues/{number}/labels"),
            Some(&json!({ "labels": labels })),
        )?;
        Ok(())
    }

    fn set_body(&mut self, number: u64, body: &str) -> Result<()> {
        self.send(
            "PATCH",
            &format!("/issues/{number}"),
            Some(&json!({ "body": body })),
        )?;
        Ok(())
    }

    fn comment(&mut self, number: u64, body: &str) -> Result<()> {
        self.send(
            "POST",
            &format!("/issues/{number}/comments"),
            Some(&json!({ "body": body })),
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn config() -> SyncConfig {
        SyncConfig {
            repo: Some("acme/widgets".to_string()),
            api_url: "https://api.example.test/".to_string(),
            ..SyncConfig::default()
        }
    }

    #[test]
    fn requires_repo_and_token() {
        let missing_repo = SyncConfig::default();
        assert!(matches!(
            GitHubTracker::new(&missing_repo, "t".to_string()),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            GitHubTracker::new(&config(), "  ".to_string()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn urls_are_scoped_to_repo() {
        let tracker = GitHubTracker::new(&config(), "t".to_string()).unwrap();
        assert_eq!(
            tracker.url("/issues/7"),
            "https://api.example.test/repos/acme/widgets/issues/7"
        );
    }

    #[test]
    fn post_is_only_retried_when_nothing_was_sent() {
        assert!(should_retry("POST", Failure::Throttled));
        assert!(should_retry("POST", Failure::Connect));
        assert!(!should_retry("POST", Failure::Server));
        assert!(!should_retry("POST", Failure::Transport));
        for method in ["GET", "PATCH", "PUT"] {
            assert!(should_retry(method, Failure::Server));
            assert!(should_retry(method, Failure::Transport));
        }
    }

    /// Serve `responses` in order on a local port, counting requests.
    fn serve(responses: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        thread::spawn(move || {
            for (response, stream) in responses.into_iter().zip(listener.incoming()) {
                let mut stream = stream.unwrap();
                read_request(&mut stream);
                counter.fetch_add(1, Ordering::SeqCst);
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        (url, hits)
    }

    fn read_request(stream: &mut TcpStream) {
        let mut reader = BufReader::new(stream);
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if line == "\r\n" || line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0; content_length];
        reader.read_exact(&mut body).unwrap();
    }

    const BAD_GATEWAY: &str =
        "HTTP/1.1 502 Bad Gateway\r\nRetry-After: 0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const ISSUE: &str = "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 44\r\nConnection: close\r\n\r\n{\"number\":2,\"title\":\"Fix it\",\"state\":\"open\"}";

    fn tracker_at(url: String) -> GitHubTracker {
        let config = SyncConfig {
            api_url: url,
            max_attempts: 3,
            ..config()
        };
        GitHubTracker::new(&config, "t".to_string()).unwrap()
    }

    #[test]
    fn create_issue_is_not_retried_after_a_server_error() {
        let (url, hits) = serve(vec![BAD_GATEWAY, ISSUE]);
        let mut tracker = tracker_at(url);

        let err = tracker.create_issue("Fix it", "", &[]).unwrap_err();
        assert!(matches!(err, Error::ExternalApi(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reads_are_retried_after_a_server_error() {
        let (url, hits) = serve(vec![BAD_GATEWAY, ISSUE]);
        let mut tracker = tracker_at(url);

        let issue = tracker.get_issue(2).unwrap();
        assert_eq!(issue.number, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn issue_payload_maps_state_and_labels() {
        let raw: GhIssue = serde_json::from_value(json!({
            "number": 12,
            "title": "Fix it",
            "body": null,
            "state": "closed",
            "labels": [{"name": "wv:done"}, {"name": "bug"}],
            "comments": 3
        }))
        .unwrap();
        let issue: Issue = raw.into();
        assert_eq!(issue.state, IssueState::Closed);
        assert_eq!(issue.body, "");
        assert_eq!(issue.labels, vec!["wv:done", "bug"]);
        assert_eq!(issue.comments, 3);
    }
}
