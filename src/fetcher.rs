// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 出站请求与限流重试
//!
//! 所有访问镜像与源站的请求都经过 `Fetcher`。只有 200 被视为成功；
//! 429 会按 `Retry-After` 等待后重试，总尝试次数不超过 `MAX_FETCH_ATTEMPTS`；
//! 其余状态码与网络错误立即失败，不会重试。

use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use reqwest::{header::HeaderMap, Client, Method, StatusCode};
use tokio::time::sleep;

use crate::{exception::Exception, param::*};

/// 一次出站请求的全部内容，可以被重复发送
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl OutboundRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    /// 429 之后单次等待的上限，与请求超时相同
    max_wait: Duration,
}

impl Fetcher {
    /// 构建带超时的客户端，`proxy` 不为空时所有请求都经由该代理发出
    pub fn new(timeout: Duration, proxy: Option<&str>) -> Result<Self, Exception> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy_url) = proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Exception::Config(format!("Invalid proxy URL {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Exception::Config(format!("无法构建HTTP客户端: {}", e)))?;
        Ok(Self {
            client,
            max_wait: timeout,
        })
    }

    /// 发送请求，成功时返回状态码为 200 的响应
    pub async fn fetch(
        &self,
        request: &OutboundRequest,
        id: u128,
    ) -> Result<reqwest::Response, Exception> {
        for attempt in 1..=MAX_FETCH_ATTEMPTS {
            let mut builder = self.client.request(request.method.clone(), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body.clone());
            }

            let response = builder.send().await.map_err(|e| {
                debug!("[ID{}]请求{}失败: {}", id, request.url, e);
                Exception::from(e)
            })?;

            match response.status() {
                StatusCode::OK => return Ok(response),
                StatusCode::TOO_MANY_REQUESTS => {
                    if attempt == MAX_FETCH_ATTEMPTS {
                        break;
                    }
                    let wait = retry_after(response.headers()).min(self.max_wait);
                    warn!(
                        "[ID{}]{}返回429，第{}次尝试，{}秒后重试",
                        id,
                        request.url,
                        attempt,
                        wait.as_secs()
                    );
                    drop(response);
                    sleep(wait).await;
                }
                status => {
                    debug!("[ID{}]{}返回{}", id, request.url, status);
                    return Err(Exception::UpstreamStatus {
                        status: status.as_u16(),
                        reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                    });
                }
            }
        }

        warn!(
            "[ID{}]{}连续{}次返回429，放弃",
            id, request.url, MAX_FETCH_ATTEMPTS
        );
        Err(Exception::RetryExhausted {
            attempts: MAX_FETCH_ATTEMPTS,
        })
    }
}

/// `Retry-After` 只接受整数秒，缺失或无法解析时使用默认值
pub fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> Fetcher {
        Fetcher::new(Duration::from_secs(10), None).unwrap()
    }

    #[test]
    fn test_retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), Duration::from_secs(2));

        headers.insert("Retry-After", HeaderValue::from_static("7"));
        assert_eq!(retry_after(&headers), Duration::from_secs(7));

        headers.insert("Retry-After", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), Duration::from_secs(2));

        headers.insert("Retry-After", HeaderValue::from_static("-1"));
        assert_eq!(retry_after(&headers), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_retry_after_is_capped_by_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "86400"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(Duration::from_secs(1), None).unwrap();
        let start = Instant::now();
        let response = tokio::time::timeout(
            Duration::from_secs(10),
            fetcher.fetch(&OutboundRequest::get(format!("{}/x", server.uri())), 0),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let result = Fetcher::new(Duration::from_secs(1), Some("::not a url::"));
        assert!(matches!(result, Err(Exception::Config(_))));
    }

    #[tokio::test]
    async fn test_success_returns_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.swf"))
            .and(header("User-Agent", "tester"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"swf".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let request = OutboundRequest::get(format!("{}/a.swf", server.uri())).header("User-Agent", "tester");
        let response = fetcher().fetch(&request, 0).await.unwrap();
        assert_eq!(response.bytes().await.unwrap().as_ref(), b"swf");
    }

    #[tokio::test]
    async fn test_429_then_200_waits_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let start = Instant::now();
        let response = fetcher()
            .fetch(&OutboundRequest::get(format!("{}/x", server.uri())), 0)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_429_exhausts_after_four_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .expect(4)
            .mount(&server)
            .await;

        let result = fetcher()
            .fetch(&OutboundRequest::get(format!("{}/x", server.uri())), 0)
            .await;
        assert!(matches!(result, Err(Exception::RetryExhausted { attempts: 4 })));
    }

    #[tokio::test]
    async fn test_other_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetcher()
            .fetch(&OutboundRequest::get(format!("{}/x", server.uri())), 0)
            .await;
        match result {
            Err(Exception::UpstreamStatus { status, reason }) => {
                assert_eq!(status, 404);
                assert_eq!(reason, "Not Found");
            }
            other => panic!("unexpected: {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn test_network_error_is_not_retried() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = fetcher()
            .fetch(&OutboundRequest::get(format!("http://{}/x", addr)), 0)
            .await;
        assert!(matches!(result, Err(Exception::Network(_))));
    }
}
