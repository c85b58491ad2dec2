// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求分发
//!
//! 每个被拦截的请求先交给本地的内容服务器（虚拟 zip 存档），
//! 状态码 >= 400 或者内容服务器不可达时，再交给回退层处理。
//! 最终的响应统一在这里协商 Content-Type，并补上跨域与长连接相关的头部。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::Client;

use crate::{
    config::{Config, LegacyMode},
    content_type,
    exception::Exception,
    legacy::LegacyServer,
    param::*,
    request::Request,
    response::Response,
};

/// 内容服务器：以 `content/<host>/<path>` 为键的静态文件服务，未命中时返回 4xx
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentServer: Send + Sync {
    async fn fetch(&self, request: &Request, id: u128) -> Result<Response, Exception>;
}

/// 通过 HTTP 访问本机内容服务器
pub struct HttpContentServer {
    base_url: String,
    client: Client,
}

impl HttpContentServer {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, Exception> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Exception::Config(format!("无法构建HTTP客户端: {}", e)))?;
        Ok(Self {
            base_url: format!("http://127.0.0.1:{}", port),
            client,
        })
    }

    pub fn url_for(&self, request: &Request) -> String {
        format!(
            "{}/content/{}{}",
            self.base_url,
            request.host(),
            request.path_and_query()
        )
    }
}

#[async_trait]
impl ContentServer for HttpContentServer {
    async fn fetch(&self, request: &Request, id: u128) -> Result<Response, Exception> {
        let url = self.url_for(request);
        debug!("[ID{}]请求内容服务器: {}", id, url);
        let response = forward(&self.client, request, &url).await?;
        Response::from_upstream(response, id).await
    }
}

/// 外部旧版服务器：以 HTTP 代理的方式接收指向原始 URL 的请求
pub struct ExternalLegacy {
    client: Client,
}

impl ExternalLegacy {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, Exception> {
        let proxy = reqwest::Proxy::all(format!("http://127.0.0.1:{}", port))
            .map_err(|e| Exception::Config(format!("Invalid proxy URL: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .proxy(proxy)
            .build()
            .map_err(|e| Exception::Config(format!("无法构建HTTP客户端: {}", e)))?;
        Ok(Self { client })
    }

    pub async fn handle(&self, request: &Request, id: u128) -> Result<Response, Exception> {
        let url = format!("http://{}{}", request.host(), request.path_and_query());
        debug!("[ID{}]转交外部旧版服务器: {}", id, url);
        let response = forward(&self.client, request, &url).await?;
        Response::from_upstream(response, id).await
    }
}

/// 以原请求的方法、头部与请求体向 `url` 发出一次请求
async fn forward(client: &Client, request: &Request, url: &str) -> Result<reqwest::Response, Exception> {
    let mut builder = client.request(request.method().as_reqwest(), url);
    for (name, value) in request.headers() {
        let lower = name.to_lowercase();
        if HOP_BY_HOP_HEADERS.contains(&lower.as_str())
            || lower == "host"
            || lower == "content-length"
        {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !request.body().is_empty() {
        builder = builder.body(request.body().clone());
    }
    Ok(builder.send().await?)
}

pub enum Fallback {
    Internal(LegacyServer),
    External(ExternalLegacy),
}

pub struct Dispatcher {
    config: Arc<Config>,
    content: Box<dyn ContentServer>,
    fallback: Fallback,
}

impl Dispatcher {
    /// 按配置构建内容服务器客户端与回退层
    pub fn new(config: Arc<Config>) -> Result<Self, Exception> {
        let content = HttpContentServer::new(
            config.content_server_port(),
            Duration::from_secs(config.live_timeout_secs()),
        )?;
        Self::with_content_server(config, Box::new(content))
    }

    pub fn with_content_server(
        config: Arc<Config>,
        content: Box<dyn ContentServer>,
    ) -> Result<Self, Exception> {
        let fallback = match config.legacy_mode() {
            LegacyMode::Internal => Fallback::Internal(LegacyServer::new(Arc::clone(&config))?),
            LegacyMode::External => Fallback::External(ExternalLegacy::new(
                config.legacy_external_port(),
                Duration::from_secs(config.live_timeout_secs()),
            )?),
        };
        Ok(Self {
            config,
            content,
            fallback,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// 进程内回退层，外部模式下为 `None`
    pub fn legacy(&self) -> Option<&LegacyServer> {
        match &self.fallback {
            Fallback::Internal(server) => Some(server),
            Fallback::External(_) => None,
        }
    }

    pub async fn handle(&self, request: &Request, id: u128) -> Response {
        let mut response = match self.content.fetch(request, id).await {
            Ok(response) if response.status_code() < 400 => {
                debug!("[ID{}]内容服务器命中", id);
                response
            }
            Ok(response) => {
                if response.status_code() >= 500 {
                    error!("[ID{}]内容服务器错误: {}", id, response.status_code());
                } else {
                    debug!("[ID{}]内容服务器未命中: {}", id, response.status_code());
                }
                self.fall_back(request, id, Some(response)).await
            }
            Err(e) => {
                warn!("[ID{}]内容服务器不可达，进入回退: {}", id, e);
                self.fall_back(request, id, None).await
            }
        };

        content_type::apply(&self.config, request.path(), &mut response, id);
        response.remove_header(ZIPSVR_FILENAME);
        response
            .set_header("Access-Control-Allow-Origin", "*")
            .set_header("Access-Control-Allow-Methods", "*")
            .set_header("Access-Control-Allow-Headers", "*");
        if request.requested_keep_alive() {
            response
                .set_header("Connection", "Keep-Alive")
                .set_header("Keep-Alive", KEEP_ALIVE_PARAMS);
        }
        response
    }

    async fn fall_back(&self, request: &Request, id: u128, tier0: Option<Response>) -> Response {
        match &self.fallback {
            Fallback::Internal(server) => {
                let outcome = server.serve(request, id).await;
                if let Some(tier) = outcome.tier() {
                    info!("[ID{}]由{}提供", id, tier);
                }
                outcome.into_response()
            }
            Fallback::External(external) => match external.handle(request, id).await {
                Ok(response) => {
                    info!("[ID{}]由外部旧版服务器提供", id);
                    response
                }
                Err(e) => {
                    error!("[ID{}]外部旧版服务器失败: {}", id, e);
                    match tier0 {
                        Some(response) => response,
                        None => Response::from_exception(&e),
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::path::Path;

    fn config(htdocs: &Path) -> Arc<Config> {
        Arc::new(
            Config::from_toml_str(&format!(
                "legacy_htdocs_path = \"{}\"\n[ext_mime_types]\nsvg = \"image/svg+xml\"\nhtm = \"text/html\"",
                htdocs.display()
            ))
            .unwrap(),
        )
    }

    fn request(raw: &str) -> Request {
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    #[tokio::test]
    async fn test_tier0_hit_is_served_with_headers() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = MockContentServer::new();
        content.expect_fetch().times(1).returning(|_, _| {
            let mut response = Response::from_bytes(Some("application/octet-stream"), Bytes::from("<svg/>"));
            response.set_header(ZIPSVR_FILENAME, "content/example.com/logo.svg");
            Ok(response)
        });

        let dispatcher = Dispatcher::with_content_server(config(dir.path()), Box::new(content)).unwrap();
        let response = dispatcher
            .handle(&request("GET http://example.com:80/logo.svg HTTP/1.1\r\nConnection: keep-alive\r\n\r\n"), 0)
            .await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.header("Content-Type"), Some("image/svg+xml"));
        assert_eq!(response.header(ZIPSVR_FILENAME), None);
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(response.header("Connection"), Some("Keep-Alive"));
        assert_eq!(response.header("Keep-Alive"), Some("timeout=5; max=100"));
    }

    #[tokio::test]
    async fn test_no_keep_alive_echo_without_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = MockContentServer::new();
        content
            .expect_fetch()
            .returning(|_, _| Ok(Response::from_bytes(None, Bytes::from("x"))));

        let dispatcher = Dispatcher::with_content_server(config(dir.path()), Box::new(content)).unwrap();
        let response = dispatcher.handle(&request("GET http://example.com/a HTTP/1.1\r\n\r\n"), 0).await;
        assert_eq!(response.header("Keep-Alive"), None);
    }

    #[tokio::test]
    async fn test_tier0_miss_falls_back_to_local() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("example.com/game")).unwrap();
        std::fs::write(dir.path().join("example.com/game/index.htm"), b"<html></html>").unwrap();

        let mut content = MockContentServer::new();
        content
            .expect_fetch()
            .withf(|r, _| r.host() == "example.com" && r.path() == "/game/")
            .times(1)
            .returning(|_, _| Ok(Response::response_404()));

        let dispatcher = Dispatcher::with_content_server(config(dir.path()), Box::new(content)).unwrap();
        let response = dispatcher.handle(&request("GET http://example.com/game/ HTTP/1.1\r\n\r\n"), 0).await;

        assert_eq!(response.status_code(), 200);
        assert_eq!(response.header("Content-Type"), Some("text/html"));
        assert!(response.header("Last-Modified").is_some());
        assert_eq!(response.header(ZIPSVR_FILENAME), None);
        assert_eq!(response.content_length(), 13);
    }

    #[tokio::test]
    async fn test_tier0_unreachable_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("example.com")).unwrap();
        std::fs::write(dir.path().join("example.com/a.txt"), b"local").unwrap();

        let mut content = MockContentServer::new();
        content
            .expect_fetch()
            .returning(|_, _| Err(Exception::Network("connection refused".to_string())));

        let dispatcher = Dispatcher::with_content_server(config(dir.path()), Box::new(content)).unwrap();
        let response = dispatcher.handle(&request("GET http://example.com/a.txt HTTP/1.1\r\n\r\n"), 0).await;
        assert_eq!(response.status_code(), 200);
        assert_eq!(response.read_body().await.unwrap().as_ref(), b"local");
    }

    #[tokio::test]
    async fn test_everything_misses_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = MockContentServer::new();
        content
            .expect_fetch()
            .returning(|_, _| {
                let mut r = Response::response_500();
                r.set_code(503);
                Ok(r)
            });

        let dispatcher = Dispatcher::with_content_server(config(dir.path()), Box::new(content)).unwrap();
        let response = dispatcher.handle(&request("GET http://nowhere.example/x.swf HTTP/1.1\r\n\r\n"), 0).await;
        assert_eq!(response.status_code(), 404);
        assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
    }

    #[test]
    fn test_content_server_url() {
        let server = HttpContentServer::new(22501, Duration::from_secs(1)).unwrap();
        let r = request("GET http://Example.com:8080/dir/a.swf?x=1 HTTP/1.1\r\n\r\n");
        assert_eq!(server.url_for(&r), "http://127.0.0.1:22501/content/example.com/dir/a.swf?x=1");
    }
}
