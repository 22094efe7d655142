use crate::config::ProxyConfig;
use crate::domain::model::{SearchEngine, SearchResult};
use crate::utils::error::{ProxyError, Result};
use regex::Regex;
use reqwest::header::USER_AGENT;
use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: Option<String>,
    pub max_results: Option<usize>,
    pub engine: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub source: String,
}

/// 從搜尋結果頁 HTML 擷取標題、連結與摘要
#[derive(Debug, Clone)]
pub struct ResultParser {
    duckduckgo_result: Regex,
    duckduckgo_snippet: Regex,
    baidu_title: Regex,
    tag: Regex,
}

impl ResultParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            duckduckgo_result: compile(
                r#"<a[^>]*class="result__a"[^>]*href="([^"]*)"[^>]*>([^<]*)</a>"#,
            )?,
            duckduckgo_snippet: compile(
                r#"<a[^>]*class="result__snippet"[^>]*>([^<]*(?:<[^>]*>[^<]*)*?)</a>"#,
            )?,
            baidu_title: compile(
                r#"<h3[^>]*class="[^"]*t[^"]*"[^>]*>[\s\S]*?<a[^>]*href="([^"]*)"[^>]*>([\s\S]*?)</a>"#,
            )?,
            tag: compile(r"<[^>]*>")?,
        })
    }

    pub fn parse_duckduckgo(&self, html: &str, max_results: usize) -> Vec<SearchResult> {
        let links: Vec<(String, String)> = self
            .duckduckgo_result
            .captures_iter(html)
            .take(max_results)
            .map(|caps| (caps[1].to_string(), unescape(&caps[2])))
            .collect();

        let snippets: Vec<String> = self
            .duckduckgo_snippet
            .captures_iter(html)
            .take(max_results)
            .map(|caps| unescape(&self.tag.replace_all(&caps[1], "")))
            .collect();

        links
            .into_iter()
            .enumerate()
            .map(|(i, (url, title))| SearchResult {
                title,
                url,
                snippet: snippets.get(i).cloned().unwrap_or_default(),
            })
            .collect()
    }

    pub fn parse_baidu(&self, html: &str, max_results: usize) -> Vec<SearchResult> {
        self.baidu_title
            .captures_iter(html)
            .filter_map(|caps| {
                let title = self
                    .tag
                    .replace_all(&caps[2], "")
                    .replace("&amp;", "&")
                    .trim()
                    .to_string();
                (!title.is_empty()).then(|| SearchResult {
                    title,
                    url: caps[1].to_string(),
                    snippet: String::new(),
                })
            })
            .take(max_results)
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| ProxyError::ConfigError {
        message: format!("invalid search pattern: {}", e),
    })
}

fn unescape(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}

pub struct SearchService {
    direct: Client,
    proxied: Option<Client>,
    parser: ResultParser,
    duckduckgo_url: String,
    baidu_url: String,
    user_agent: String,
    default_engine: SearchEngine,
    default_max_results: usize,
}

impl SearchService {
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let direct = Client::builder()
            .timeout(config.max_time())
            .no_proxy()
            .build()?;
        let proxied = match config.network_proxy_url() {
            Some(url) => Some(
                Client::builder()
                    .timeout(config.max_time())
                    .proxy(Proxy::all(url)?)
                    .build()?,
            ),
            None => None,
        };

        Ok(Self {
            direct,
            proxied,
            parser: ResultParser::new()?,
            duckduckgo_url: config.duckduckgo_url().to_string(),
            baidu_url: config.baidu_url().to_string(),
            user_agent: config.user_agent().to_string(),
            default_engine: config.default_search_engine(),
            default_max_results: config.search_max_results(),
        })
    }

    /// 除 "baidu" 以外一律使用 DuckDuckGo
    pub fn resolve_engine(&self, engine: Option<&str>) -> SearchEngine {
        match engine {
            Some(name) if name.eq_ignore_ascii_case("baidu") => SearchEngine::Baidu,
            Some(_) => SearchEngine::DuckDuckGo,
            None => self.default_engine,
        }
    }

    pub async fn handle(&self, request: SearchRequest) -> Result<SearchResponse> {
        let query = request
            .query
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ProxyError::BadRequest {
                message: "Query is required".to_string(),
            })?;
        let max_results = request.max_results.unwrap_or(self.default_max_results);
        let engine = self.resolve_engine(request.engine.as_deref());

        tracing::info!("🔍 [Search] Query: \"{}\" (engine: {})", query, engine.as_str());
        let results = self.search(&query, engine, max_results).await;
        tracing::info!("[Search] Found {} results", results.len());

        Ok(SearchResponse {
            query,
            results,
            source: engine.as_str().to_string(),
        })
    }

    /// 搜尋失敗只記錄錯誤並回傳空結果
    pub async fn search(
        &self,
        query: &str,
        engine: SearchEngine,
        max_results: usize,
    ) -> Vec<SearchResult> {
        let outcome = match engine {
            SearchEngine::DuckDuckGo => {
                let client = self.proxied.as_ref().unwrap_or(&self.direct);
                self.fetch_html(client, &self.duckduckgo_url, "q", query)
                    .await
                    .map(|html| self.parser.parse_duckduckgo(&html, max_results))
            }
            SearchEngine::Baidu => self
                .fetch_html(&self.direct, &self.baidu_url, "wd", query)
                .await
                .map(|html| self.parser.parse_baidu(&html, max_results)),
        };

        outcome.unwrap_or_else(|e| {
            tracing::error!("[Search] {} error: {}", engine.as_str(), e);
            Vec::new()
        })
    }

    async fn fetch_html(
        &self,
        client: &Client,
        base_url: &str,
        param: &str,
        query: &str,
    ) -> Result<String> {
        let response = client
            .get(base_url)
            .query(&[(param, query)])
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await?;
        Ok(response.text().await?)
    }
}
