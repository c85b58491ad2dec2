#![allow(dead_code)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use legacy_proxy::{Config, ContentServer, Exception, Request, Response};

/// 只会应答固定报文的源站，记录收到的每个请求头
pub struct RawOrigin {
    pub port: u16,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl RawOrigin {
    pub fn request_lines(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.lines().next().unwrap_or("").to_string())
            .collect()
    }
}

pub async fn spawn_origin(response: &'static [u8]) -> RawOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    let n = stream.read(&mut chunk).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    buffer.extend_from_slice(&chunk[..n]);
                    if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                seen.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&buffer).to_string());
                let _ = stream.write_all(response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    RawOrigin { port, requests }
}

/// 内容服务器永远未命中
pub struct EmptyContentServer;

#[async_trait]
impl ContentServer for EmptyContentServer {
    async fn fetch(&self, _request: &Request, _id: u128) -> Result<Response, Exception> {
        Ok(Response::response_404())
    }
}

/// 内容服务器无法连接
pub struct UnreachableContentServer;

#[async_trait]
impl ContentServer for UnreachableContentServer {
    async fn fetch(&self, _request: &Request, _id: u128) -> Result<Response, Exception> {
        Err(Exception::Network("connection refused".to_string()))
    }
}

pub fn config(htdocs: &Path, extra: &str) -> Arc<Config> {
    Arc::new(
        Config::from_toml_str(&format!(
            "legacy_htdocs_path = \"{}\"\n{}",
            htdocs.display(),
            extra
        ))
        .unwrap(),
    )
}

pub fn write_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

pub fn request(raw: &str) -> Request {
    Request::try_from(raw.as_bytes(), 0).unwrap()
}
