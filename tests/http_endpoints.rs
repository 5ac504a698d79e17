//! Integration tests for the automove HTTP surface.
//!
//! Each test spins up the service on a random port with a real `SlackClient`
//! pointed at a mock Web API (also on a random port), and drives it with
//! signed requests the way Slack would.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, header},
    routing::any,
};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use automove::config::{AppConfig, MigrationConfig, VoteConfig};
use automove::server::{AppState, build_router};
use automove::slack::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER, now_unix};
use automove::slack::{SignatureVerifier, SlackClient, SlackTokens};
use automove::store::JsonSettingsStore;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

const SECRET: &str = "itest-secret";
const ROOT: &str = "100.000001";
const REPLY: &str = "100.000002";

// ── Mock Web API ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ApiCall {
    method: String,
    authorization: Option<String>,
    params: Value,
}

/// Records every call and answers with canned workspace data.
#[derive(Default)]
struct MockSlack {
    calls: Mutex<Vec<ApiCall>>,
    next_ts: AtomicU64,
}

impl MockSlack {
    fn calls_to(&self, method: &str) -> Vec<ApiCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    fn respond(&self, method: &str, params: &Value) -> Value {
        match method {
            "conversations.replies" => json!({
                "ok": true,
                "messages": [
                    { "ts": ROOT, "thread_ts": ROOT, "user": "U1", "text": "Ship it?" },
                    { "ts": REPLY, "thread_ts": ROOT, "user": "U2", "text": "Shipped" },
                ],
                "response_metadata": { "next_cursor": "" },
            }),
            "conversations.history" => json!({
                "ok": true,
                "messages": [{ "ts": ROOT, "user": "U1", "text": "Ship it?" }],
            }),
            "users.info" => json!({
                "ok": true,
                "user": {
                    "id": params["user"],
                    "real_name": "Ada Lovelace",
                    "profile": { "image_72": "https://img.test/ada.png" },
                },
            }),
            "chat.postMessage" => {
                let n = self.next_ts.fetch_add(1, Ordering::SeqCst) + 1;
                json!({ "ok": true, "ts": format!("900.{n:06}") })
            }
            "chat.update" | "chat.delete" | "chat.postEphemeral" => json!({ "ok": true }),
            "oauth.v2.access" => match params["code"].as_str() {
                Some("bad") | None => json!({ "ok": false, "error": "invalid_code" }),
                Some(code) => json!({
                    "ok": true,
                    "access_token": format!("xoxb-{code}"),
                    "bot_user_id": "UBOT",
                    "team": { "id": "T9" },
                    "authed_user": { "id": "U1", "access_token": format!("xoxp-{code}") },
                }),
            },
            _ => json!({ "ok": false, "error": "unknown_method" }),
        }
    }
}

async fn mock_api(
    State(mock): State<Arc<MockSlack>>,
    Path(method): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Value> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    let params = if is_json {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    } else {
        let raw = if body.is_empty() {
            query.unwrap_or_default()
        } else {
            String::from_utf8_lossy(&body).into_owned()
        };
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(&raw).unwrap_or_default();
        Value::Object(pairs.into_iter().map(|(k, v)| (k, Value::String(v))).collect())
    };

    let response = mock.respond(&method, &params);
    mock.calls.lock().unwrap().push(ApiCall {
        method,
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        params,
    });
    Json(response)
}

// ── Harness ─────────────────────────────────────────────────────────────

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Harness {
    base: String,
    mock: Arc<MockSlack>,
    settings: PathBuf,
    http: reqwest::Client,
    verifier: SignatureVerifier,
    _dir: tempfile::TempDir,
}

impl Harness {
    /// Start the mock API and the service. `seed` becomes the initial settings file.
    async fn start(seed: Option<Value>) -> Self {
        let mock = Arc::new(MockSlack::default());
        let mock_addr = spawn(
            Router::new()
                .route("/api/{method}", any(mock_api))
                .with_state(Arc::clone(&mock)),
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.json");
        if let Some(seed) = seed {
            std::fs::write(&settings, serde_json::to_vec(&seed).unwrap()).unwrap();
        }

        let config = AppConfig {
            signing_secret: SecretString::from(SECRET),
            client_id: "cid".into(),
            client_secret: SecretString::from("csecret"),
            app_id: String::new(),
            bot_token: Some(SecretString::from("xoxb-env")),
            user_token: Some(SecretString::from("xoxp-env")),
            api_url: format!("http://{mock_addr}/api/"),
            listen_port: 0,
            public_url: "https://automove.test".into(),
            settings_path: settings.clone(),
            log_dir: None,
            votes: VoteConfig::default(),
            migration: MigrationConfig {
                upload_poll_delay: Duration::from_millis(10),
                ..MigrationConfig::default()
            },
            prompt_timeout: TEST_TIMEOUT,
        };

        let client = Arc::new(SlackClient::new(
            &config.api_url,
            &config.client_id,
            config.client_secret.clone(),
            SlackTokens {
                bot: config.bot_token.clone(),
                user: config.user_token.clone(),
            },
        ));
        let store = Arc::new(JsonSettingsStore::open(&config.settings_path).await.unwrap());
        let addr = spawn(build_router(AppState::new(&config, client, store))).await;

        Self {
            base: format!("http://{addr}"),
            mock,
            settings,
            http: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .unwrap(),
            verifier: SignatureVerifier::new(SecretString::from(SECRET)),
            _dir: dir,
        }
    }

    async fn post_signed(&self, path: &str, content_type: &str, body: &str) -> reqwest::Response {
        let ts = now_unix().to_string();
        let signature = self.verifier.sign(&ts, body.as_bytes());
        self.http
            .post(format!("{}{path}", self.base))
            .header(header::CONTENT_TYPE, content_type)
            .header(TIMESTAMP_HEADER, ts)
            .header(SIGNATURE_HEADER, signature)
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn command(&self, path: &str, text: &str) -> reqwest::Response {
        let body = serde_urlencoded::to_string([
            ("command", path),
            ("text", text),
            ("user_id", "U1"),
            ("team_id", "T9"),
            ("channel_id", "C1"),
        ])
        .unwrap();
        self.post_signed(path, "application/x-www-form-urlencoded", &body)
            .await
    }

    async fn reaction(&self, reaction: &str, channel: &str, ts: &str) -> reqwest::Response {
        let body = json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {
                "type": "reaction_added",
                "user": "U7",
                "reaction": reaction,
                "item": { "type": "message", "channel": channel, "ts": ts },
                "event_ts": "200.000001",
            },
        });
        self.post_signed("/", "application/json", &body.to_string())
            .await
    }

    /// Wait until the mock has seen at least `n` calls to `method`.
    async fn wait_for(&self, method: &str, n: usize) -> Vec<ApiCall> {
        timeout(TEST_TIMEOUT, async {
            loop {
                let calls = self.mock.calls_to(method);
                if calls.len() >= n {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {n} {method} call(s)"))
    }

    fn settings_json(&self) -> Value {
        serde_json::from_slice(&std::fs::read(&self.settings).unwrap()).unwrap()
    }
}

fn truck_rule() -> Value {
    json!({
        "automoves": [{
            "trigger": "truck",
            "from_channel": "C1",
            "to_channel": "C2",
            "owner": { "id": "U1", "team_id": "T9", "privilege": "member" },
        }],
    })
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_answers() {
    let h = Harness::start(None).await;
    let resp = h
        .http
        .get(format!("{}/health", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn url_verification_returns_challenge() {
    let h = Harness::start(None).await;
    let resp = h
        .post_signed(
            "/",
            "application/json",
            r#"{"type":"url_verification","challenge":"c-123"}"#,
        )
        .await;
    assert_eq!(resp.status(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["challenge"], "c-123");
}

#[tokio::test]
async fn forged_signature_is_rejected() {
    let h = Harness::start(None).await;
    let resp = h
        .http
        .post(format!("{}/", h.base))
        .header(TIMESTAMP_HEADER, now_unix().to_string())
        .header(SIGNATURE_HEADER, "v0=deadbeef")
        .body(r#"{"type":"url_verification","challenge":"x"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    assert_eq!(resp.text().await.unwrap(), "403! Forbidden");
}

#[tokio::test]
async fn stale_signature_is_rejected() {
    let h = Harness::start(None).await;
    let body = r#"{"type":"url_verification","challenge":"x"}"#;
    let ts = (now_unix() - 600).to_string();
    let resp = h
        .http
        .post(format!("{}/", h.base))
        .header(TIMESTAMP_HEADER, &ts)
        .header(SIGNATURE_HEADER, h.verifier.sign(&ts, body.as_bytes()))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn trigger_reaction_moves_thread() {
    let h = Harness::start(Some(truck_rule())).await;

    let resp = h.reaction("truck", "C1", ROOT).await;
    assert_eq!(resp.status(), 200);

    let deletes = h.wait_for("chat.delete", 2).await;
    let posts = h.mock.calls_to("chat.postMessage");
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p.params["channel"] == "C2"));
    assert!(posts[0].params.get("thread_ts").is_none_or(Value::is_null));
    assert_eq!(posts[1].params["thread_ts"], "900.000001");

    // Reply first, root last, with the user credential.
    let deleted: Vec<_> = deletes.iter().map(|d| d.params["ts"].clone()).collect();
    assert_eq!(deleted, vec![json!(REPLY), json!(ROOT)]);
    assert!(deletes.iter().all(|d| d.params["channel"] == "C1"));
    assert!(
        deletes
            .iter()
            .all(|d| d.authorization.as_deref() == Some("Bearer xoxp-env"))
    );
}

#[tokio::test]
async fn unrelated_reaction_is_ignored() {
    let h = Harness::start(Some(truck_rule())).await;

    let resp = h.reaction("tada", "C1", ROOT).await;
    assert_eq!(resp.status(), 200);
    let resp = h.reaction("truck", "C3", ROOT).await;
    assert_eq!(resp.status(), 200);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.mock.calls_to("conversations.replies").is_empty());
    assert!(h.mock.calls_to("chat.postMessage").is_empty());
}

#[tokio::test]
async fn automove_command_configures_rule_from_reaction() {
    let h = Harness::start(None).await;

    let resp = h.command("/automove", "from #C1 to #C2").await;
    assert_eq!(resp.status(), 200);

    let prompts = h.wait_for("chat.postMessage", 1).await;
    assert_eq!(prompts[0].params["channel"], "C1");

    // React to the prompt with the trigger of choice.
    let resp = h.reaction("truck", "C1", "900.000001").await;
    assert_eq!(resp.status(), 200);

    let updates = h.wait_for("chat.update", 1).await;
    assert_eq!(updates[0].params["ts"], "900.000001");
    assert_eq!(updates[0].params["text"], "Got it!");

    let rules = &h.settings_json()["automoves"];
    assert_eq!(rules.as_array().unwrap().len(), 1);
    assert_eq!(rules[0]["trigger"], "truck");
    assert_eq!(rules[0]["from_channel"], "C1");
    assert_eq!(rules[0]["to_channel"], "C2");
}

#[tokio::test]
async fn automove_without_channels_prints_usage() {
    let h = Harness::start(None).await;
    let resp = h.command("/automove", "please").await;
    assert_eq!(resp.status(), 200);
    let json: Value = resp.json().await.unwrap();
    assert_eq!(json["text"], "Usage: from #ch1 to #ch2 or just to #ch2");
    assert!(h.mock.calls_to("chat.postMessage").is_empty());
}

#[tokio::test]
async fn showautomoves_lists_rules_ephemerally() {
    let h = Harness::start(Some(truck_rule())).await;

    let resp = h.command("/showautomoves", "").await;
    assert_eq!(resp.status(), 200);

    let ephemeral = h.wait_for("chat.postEphemeral", 1).await;
    assert_eq!(ephemeral[0].params["user"], "U1");
    assert_eq!(
        ephemeral[0].params["text"],
        "Automoves:\nfrom <#C1> to <#C2> on :truck:"
    );
}

#[tokio::test]
async fn noautomove_removes_own_rule() {
    let h = Harness::start(Some(truck_rule())).await;

    let resp = h.command("/noautomove", "#C1 #C2").await;
    assert_eq!(resp.status(), 200);

    let ephemeral = h.wait_for("chat.postEphemeral", 1).await;
    assert_eq!(
        ephemeral[0].params["text"],
        "Deleted automove:\nFrom <#C1> to <#C2>"
    );
    assert!(h.settings_json()["automoves"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn setup_redirects_to_slack_authorize() {
    let h = Harness::start(None).await;
    let resp = h
        .http
        .get(format!("{}/setup", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 303);
    let location = resp.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://slack.com/oauth/v2/authorize?"));
    assert!(location.contains("redirect_uri=https%3A%2F%2Fautomove.test%2FoAuth"));
}

#[tokio::test]
async fn oauth_install_persists_and_swaps_tokens() {
    let h = Harness::start(None).await;
    let resp = h
        .http
        .get(format!("{}/oAuth?code=fresh", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "Automove installed");

    let exchange = h.wait_for("oauth.v2.access", 1).await;
    assert_eq!(exchange[0].params["client_id"], "cid");
    assert!(exchange[0].authorization.is_none());

    let creds = &h.settings_json()["credentials"];
    assert_eq!(creds["team_id"], "T9");
    assert_eq!(creds["bot_token"], "xoxb-fresh");
    assert_eq!(creds["user_token"], "xoxp-fresh");

    // Later calls use the installed bot token.
    h.command("/showautomoves", "").await;
    let ephemeral = h.wait_for("chat.postEphemeral", 1).await;
    assert_eq!(
        ephemeral[0].authorization.as_deref(),
        Some("Bearer xoxb-fresh")
    );
}

#[tokio::test]
async fn oauth_failure_is_reported() {
    let h = Harness::start(None).await;
    let resp = h
        .http
        .get(format!("{}/oAuth?code=bad", h.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().starts_with("Installation failed:"));
    assert!(!h.settings.exists());
}
