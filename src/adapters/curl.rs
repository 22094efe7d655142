use crate::domain::model::{ForwardRequest, UpstreamResponse};
use crate::domain::ports::Transport;
use crate::utils::error::{ProxyError, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::Command;

pub const DEFAULT_MAX_TIME: Duration = Duration::from_secs(180);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// 透過外部 curl 程序發送請求，以便走本地代理
#[derive(Debug, Clone)]
pub struct CurlTransport {
    program: PathBuf,
    network_proxy: Option<String>,
    max_time: Duration,
    connect_timeout: Duration,
    temp_dir: Option<PathBuf>,
}

impl CurlTransport {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            network_proxy: None,
            max_time: DEFAULT_MAX_TIME,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            temp_dir: None,
        }
    }

    pub fn with_network_proxy(mut self, proxy_url: Option<String>) -> Self {
        self.network_proxy = proxy_url;
        self
    }

    pub fn with_timeouts(mut self, max_time: Duration, connect_timeout: Duration) -> Self {
        self.max_time = max_time;
        self.connect_timeout = connect_timeout;
        self
    }

    /// Directory for request payload files; the system temp dir when unset.
    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    /// 組出 curl 參數；body_path 為 payload 暫存檔路徑
    pub fn build_args(
        &self,
        request: &ForwardRequest,
        body_path: Option<&Path>,
    ) -> Result<Vec<String>> {
        // -q 必須是第一個參數，忽略使用者的 .curlrc
        let mut args = vec![
            "-q".to_string(),
            "-s".to_string(),
            "-S".to_string(),
            "-w".to_string(),
            "\n%{http_code}".to_string(),
            "--max-time".to_string(),
            self.max_time.as_secs().to_string(),
            "--connect-timeout".to_string(),
            self.connect_timeout.as_secs().to_string(),
            "--http1.1".to_string(),
            "-H".to_string(),
            "Connection: close".to_string(),
            "-X".to_string(),
            request.method.as_str().to_string(),
        ];

        for (name, value) in &request.headers {
            args.push("-H".to_string());
            args.push(format!("{}: {}", name, value));
        }

        if request.use_network_proxy {
            let proxy = self
                .network_proxy
                .as_ref()
                .ok_or_else(|| ProxyError::MissingConfigError {
                    field: "network_proxy.url".to_string(),
                })?;
            args.push("-x".to_string());
            args.push(proxy.clone());
        }

        if let Some(path) = body_path {
            args.push("--data-binary".to_string());
            args.push(format!("@{}", path.display()));
        }

        args.push(request.target_url.clone());
        Ok(args)
    }

    fn write_payload(&self, body: &[u8]) -> Result<NamedTempFile> {
        // 隨機名稱加時間戳，避免並行請求互相覆蓋
        let prefix = format!("card-proxy-{}-", chrono::Utc::now().timestamp_millis());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(".json");
        let mut file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(body)?;
        file.flush()?;
        Ok(file)
    }

    async fn run(&self, args: &[String]) -> Result<UpstreamResponse> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| ProxyError::TransportError {
                message: format!("failed to spawn {}: {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(ProxyError::TransportError {
                message: format!("curl exited with code {}: {}", code, stderr.trim()),
            });
        }

        parse_output(&output.stdout)
    }
}

#[async_trait]
impl Transport for CurlTransport {
    async fn send(&self, request: &ForwardRequest) -> Result<UpstreamResponse> {
        let payload = match &request.body {
            Some(body) => Some(self.write_payload(body)?),
            None => None,
        };

        let result = match self.build_args(request, payload.as_ref().map(|f| f.path())) {
            Ok(args) => self.run(&args).await,
            Err(e) => Err(e),
        };

        // 不論成功與否都刪除暫存檔
        if let Some(file) = payload {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                tracing::warn!("Failed to remove payload file {}: {}", path.display(), e);
            }
        }

        result
    }

    fn name(&self) -> &'static str {
        "curl"
    }
}

/// 最後一行是狀態碼，其餘是回應內容（以位元組切分，不做解碼）
pub fn parse_output(output: &[u8]) -> Result<UpstreamResponse> {
    if output.is_empty() {
        return Err(ProxyError::MalformedResponse {
            message: "empty output from curl".to_string(),
        });
    }

    let (body, status_line) = match output.iter().rposition(|&b| b == b'\n') {
        Some(idx) => (&output[..idx], &output[idx + 1..]),
        None => (&output[..0], output),
    };
    let status_line = String::from_utf8_lossy(status_line);
    let status_line = status_line.trim();

    let status = status_line
        .parse::<u16>()
        .ok()
        .filter(|s| (100..=599).contains(s))
        .ok_or_else(|| ProxyError::MalformedResponse {
            message: format!("invalid status trailer '{}'", status_line),
        })?;

    Ok(UpstreamResponse {
        status,
        body: body.to_vec(),
        content_type: None,
    })
}
