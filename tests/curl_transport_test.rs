#![cfg(unix)]

use async_trait::async_trait;
use card_proxy::adapters::CurlTransport;
use card_proxy::core::{ForwardRequest, Forwarder, RetryPolicy, Sleeper};
use card_proxy::domain::model::forwarded_headers;
use card_proxy::ProxyError;
use reqwest::Method;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// 同時寫入並執行腳本可能遇到 ETXTBSY，測試間序列化
static SCRIPT_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

const FAKE_CURL: &str = r#"#!/bin/sh
STATE="__STATE__"
n=$(cat "$STATE/count" 2>/dev/null || echo 0)
n=$((n + 1))
echo "$n" > "$STATE/count"
printf '%s\n' "$@" > "$STATE/args-$n"
for arg in "$@"; do
  case "$arg" in
    @*) cp "${arg#@}" "$STATE/body-$n" ;;
  esac
done
if [ "$n" -le __FAILURES__ ]; then
  echo "curl: (7) Failed to connect to api.example.com" >&2
  exit 7
fi
printf '%s\n%s' '__BODY__' '__STATUS__'
"#;

#[derive(Clone, Default)]
struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

struct FakeCurl {
    state: TempDir,
    payloads: TempDir,
    program: PathBuf,
}

impl FakeCurl {
    fn install(script: &str) -> Self {
        let state = TempDir::new().unwrap();
        let payloads = TempDir::new().unwrap();
        let program = state.path().join("curl");

        let script = script.replace("__STATE__", state.path().to_str().unwrap());
        std::fs::write(&program, script).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        Self {
            state,
            payloads,
            program,
        }
    }

    fn scripted(failures: u32, status: u16, body: &str) -> Self {
        Self::install(
            &FAKE_CURL
                .replace("__FAILURES__", &failures.to_string())
                .replace("__STATUS__", &status.to_string())
                .replace("__BODY__", body),
        )
    }

    fn transport(&self) -> CurlTransport {
        CurlTransport::new(&self.program)
            .with_network_proxy(Some("http://127.0.0.1:7890".to_string()))
            .with_temp_dir(Some(self.payloads.path().to_path_buf()))
    }

    fn invocations(&self) -> u32 {
        std::fs::read_to_string(self.state.path().join("count"))
            .map(|s| s.trim().parse().unwrap())
            .unwrap_or(0)
    }

    fn read(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.state.path().join(name)).ok()
    }

    fn payload_dir(&self) -> &Path {
        self.payloads.path()
    }
}

fn post_request() -> ForwardRequest {
    ForwardRequest::new(Method::POST, "https://api.example.com/v1/x")
        .with_headers(forwarded_headers(vec![("authorization", "Bearer t")]))
        .with_body(Some("{\"a\":1}".to_string()))
}

fn remaining_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn test_two_failures_then_success() {
    let _guard = SCRIPT_LOCK.lock().await;
    let curl = FakeCurl::scripted(2, 200, "{\"ok\":true}");
    let sleeper = RecordingSleeper::default();
    let forwarder =
        Forwarder::with_sleeper(curl.transport(), sleeper.clone(), RetryPolicy::default());

    let response = forwarder
        .forward_with_attempts(&post_request(), 3)
        .await
        .unwrap();

    assert!(response.ok);
    assert_eq!(response.status, 200);
    assert_eq!(response.data, b"{\"ok\":true}");
    assert_eq!(curl.invocations(), 3);
    assert_eq!(
        *sleeper.waits.lock().unwrap(),
        vec![Duration::from_millis(3000), Duration::from_millis(6000)]
    );

    // 每次嘗試都寫入一份 payload，結束後全部刪除
    for attempt in 1..=3 {
        assert_eq!(
            curl.read(&format!("body-{}", attempt)).as_deref(),
            Some("{\"a\":1}")
        );
    }
    assert_eq!(remaining_files(curl.payload_dir()), 0);

    let args = curl.read("args-1").unwrap();
    assert_eq!(args.lines().next(), Some("-q"));
    assert!(args.contains("Authorization: Bearer t"));
    assert!(args.contains("Content-Type: application/json"));
    assert!(args.contains("--http1.1"));
    assert!(args.contains("https://api.example.com/v1/x"));
}

#[tokio::test]
async fn test_exhausted_attempts_surface_last_error() {
    let _guard = SCRIPT_LOCK.lock().await;
    let curl = FakeCurl::scripted(99, 200, "{}");
    let sleeper = RecordingSleeper::default();
    let forwarder =
        Forwarder::with_sleeper(curl.transport(), sleeper.clone(), RetryPolicy::default());

    let err = forwarder
        .forward_with_attempts(&post_request(), 3)
        .await
        .unwrap_err();

    match err {
        ProxyError::TransportError { message } => {
            assert!(message.contains("code 7"));
            assert!(message.contains("Failed to connect"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(curl.invocations(), 3);
    assert_eq!(sleeper.waits.lock().unwrap().len(), 2);
    assert_eq!(remaining_files(curl.payload_dir()), 0);
}

#[tokio::test]
async fn test_upstream_error_status_is_not_retried() {
    let _guard = SCRIPT_LOCK.lock().await;
    let curl = FakeCurl::scripted(0, 404, "{\"error\":\"model not found\"}");
    let sleeper = RecordingSleeper::default();
    let forwarder =
        Forwarder::with_sleeper(curl.transport(), sleeper.clone(), RetryPolicy::default());

    let response = forwarder.forward(&post_request()).await.unwrap();

    assert!(!response.ok);
    assert_eq!(response.status, 404);
    assert_eq!(response.data, b"{\"error\":\"model not found\"}");
    assert_eq!(curl.invocations(), 1);
    assert!(sleeper.waits.lock().unwrap().is_empty());
    assert_eq!(remaining_files(curl.payload_dir()), 0);
}

#[tokio::test]
async fn test_empty_output_is_retried_as_malformed() {
    let _guard = SCRIPT_LOCK.lock().await;
    let curl = FakeCurl::install(
        r#"#!/bin/sh
STATE="__STATE__"
n=$(cat "$STATE/count" 2>/dev/null || echo 0)
echo $((n + 1)) > "$STATE/count"
exit 0
"#,
    );
    let forwarder = Forwarder::with_sleeper(
        curl.transport(),
        RecordingSleeper::default(),
        RetryPolicy::default(),
    );

    let err = forwarder
        .forward_with_attempts(&post_request(), 2)
        .await
        .unwrap_err();

    assert!(matches!(err, ProxyError::MalformedResponse { .. }));
    assert_eq!(curl.invocations(), 2);
}

#[tokio::test]
async fn test_non_utf8_body_is_relayed_unchanged() {
    let _guard = SCRIPT_LOCK.lock().await;
    let curl = FakeCurl::install(
        r#"#!/bin/sh
printf 'ab\377cd\n200'
"#,
    );
    let forwarder = Forwarder::with_sleeper(
        curl.transport(),
        RecordingSleeper::default(),
        RetryPolicy::default(),
    );

    let response = forwarder.forward(&post_request()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.data, b"ab\xffcd");
}

#[tokio::test]
async fn test_get_request_writes_no_payload() {
    let _guard = SCRIPT_LOCK.lock().await;
    let curl = FakeCurl::scripted(0, 200, "{\"data\":[]}");
    let forwarder = Forwarder::with_sleeper(
        curl.transport(),
        RecordingSleeper::default(),
        RetryPolicy::default(),
    );
    let request = ForwardRequest::new(Method::GET, "https://api.openai.com/v1/models")
        .with_network_proxy(true);

    let response = forwarder.forward(&request).await.unwrap();

    assert_eq!(response.data, b"{\"data\":[]}");
    assert!(curl.read("body-1").is_none());
    let args = curl.read("args-1").unwrap();
    assert!(!args.contains("--data-binary"));
    assert!(args.contains("http://127.0.0.1:7890"));
}

#[tokio::test]
async fn test_spawn_failure_is_retried() {
    let _guard = SCRIPT_LOCK.lock().await;
    let payloads = TempDir::new().unwrap();
    let transport = CurlTransport::new("/nonexistent/bin/curl")
        .with_temp_dir(Some(payloads.path().to_path_buf()));
    let sleeper = RecordingSleeper::default();
    let forwarder = Forwarder::with_sleeper(
        transport,
        sleeper.clone(),
        RetryPolicy::new(4, Duration::from_millis(3000)),
    );

    let err = forwarder.forward(&post_request()).await.unwrap_err();

    assert!(matches!(err, ProxyError::TransportError { .. }));
    assert_eq!(
        *sleeper.waits.lock().unwrap(),
        vec![
            Duration::from_millis(3000),
            Duration::from_millis(6000),
            Duration::from_millis(9000)
        ]
    );
    assert_eq!(remaining_files(payloads.path()), 0);
}
