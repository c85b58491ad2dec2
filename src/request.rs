// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 负责把客户端（旧式浏览器或插件）发来的代理请求解析为 `Request`。它涵盖了：
//! 1. 请求行的解析，同时支持绝对形式（`GET http://host/path HTTP/1.1`）与源站形式（`GET /path` + `Host`）。
//! 2. 主机名去端口、路径百分号解码、原始查询串的保留。
//! 3. 全部请求头的保存，以便原样转发给上游。
//! 4. 请求体的一次性读取与缓冲：请求体会被多个回退层重复使用，而 socket 只能读一次。

use bytes::Bytes;
use log::{debug, error};
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{exception::Exception, param::*};

/// 一个完整的入站请求。
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP 请求方法
    method: HttpRequestMethod,
    /// 原始 URL 的协议，源站形式的请求默认为 `http`
    scheme: String,
    /// 去掉端口后的小写主机名
    host: String,
    /// 未解码的路径，以 `/` 开头
    raw_path: String,
    /// 百分号解码后的路径
    path: String,
    /// 原始查询串（不含 `?`）
    raw_query: String,
    /// HTTP 协议版本
    version: HttpVersion,
    /// 按接收顺序保存的全部请求头
    headers: Vec<(String, String)>,
    /// 已缓冲的请求体，可被多次重放
    body: Bytes,
}

impl Request {
    /// 从已经完整接收的字节缓冲区构建 `Request`。
    ///
    /// 缓冲区中请求头之后的数据按 `Content-Length` 截取为请求体。
    pub fn try_from(buffer: &[u8], id: u128) -> Result<Self, Exception> {
        let (head, rest) = match find_head_end(buffer) {
            Some(pos) => (&buffer[..pos], &buffer[pos + 4..]),
            None => (buffer, &buffer[buffer.len()..]),
        };
        let mut request = Self::parse_head(head, id)?;
        let body_len = request.content_length()?.min(rest.len());
        request.body = Bytes::copy_from_slice(&rest[..body_len]);
        Ok(request)
    }

    /// 从连接中读取下一个请求。
    ///
    /// `buffer` 在同一连接的多次调用之间保留，用于存放已读取但尚未消费的数据。
    /// 对端在请求开始之前关闭连接时返回 `Ok(None)`。
    pub async fn read_from<R>(
        reader: &mut R,
        buffer: &mut Vec<u8>,
        id: u128,
    ) -> Result<Option<Self>, Exception>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = vec![0u8; 8192];

        let head_end = loop {
            if let Some(pos) = find_head_end(buffer) {
                break pos;
            }
            if buffer.len() > MAX_HEADER_BYTES {
                error!("[ID{}]请求头超过{}字节", id, MAX_HEADER_BYTES);
                return Err(Exception::RequestTooLarge);
            }
            let n = reader
                .read(&mut chunk)
                .await
                .map_err(|e| Exception::Network(e.to_string()))?;
            if n == 0 {
                if buffer.iter().all(|b| b.is_ascii_whitespace()) {
                    return Ok(None);
                }
                error!("[ID{}]请求头尚未接收完整，连接已关闭", id);
                return Err(Exception::MalformedRequest);
            }
            buffer.extend_from_slice(&chunk[..n]);
        };

        let mut request = Self::parse_head(&buffer[..head_end], id)?;
        let body_len = request.content_length()?;
        let total = head_end + 4 + body_len;

        while buffer.len() < total {
            let n = reader
                .read(&mut chunk)
                .await
                .map_err(|e| Exception::Network(e.to_string()))?;
            if n == 0 {
                error!("[ID{}]请求体尚未接收完整，连接已关闭", id);
                return Err(Exception::MalformedRequest);
            }
            buffer.extend_from_slice(&chunk[..n]);
        }

        request.body = Bytes::copy_from_slice(&buffer[head_end + 4..total]);
        buffer.drain(..total);
        debug!("[ID{}]请求体接收完毕，长度: {}", id, body_len);
        Ok(Some(request))
    }

    /// 解析请求行与请求头，不含请求体。
    fn parse_head(head: &[u8], id: u128) -> Result<Self, Exception> {
        // 1. 请求头必须是合法的 UTF-8
        let request_string = match std::str::from_utf8(head) {
            Ok(string) => string.trim_start_matches(['\r', '\n']),
            Err(_) => {
                error!("[ID{}]无法解析HTTP请求", id);
                return Err(Exception::RequestIsNotUtf8);
            }
        };

        let mut request_lines = request_string.split(CRLF);

        // 2. 解析请求行 (e.g., "GET http://example.com/index.html HTTP/1.1")
        let request_line = request_lines.next().unwrap_or("");
        let first_line_parts: Vec<&str> = request_line.split(' ').filter(|s| !s.is_empty()).collect();
        if first_line_parts.len() != 3 {
            error!("[ID{}]HTTP请求行格式不正确：{}", id, request_line);
            return Err(Exception::MalformedRequest);
        }

        let method_str = first_line_parts[0].to_uppercase();
        let method = match method_str.as_str() {
            "GET" => HttpRequestMethod::Get,
            "HEAD" => HttpRequestMethod::Head,
            "OPTIONS" => HttpRequestMethod::Options,
            "POST" => HttpRequestMethod::Post,
            "PUT" => HttpRequestMethod::Put,
            "DELETE" => HttpRequestMethod::Delete,
            "PATCH" => HttpRequestMethod::Patch,
            "CONNECT" => HttpRequestMethod::Connect,
            _ => {
                error!("[ID{}]不支持的HTTP请求方法：{}", id, &method_str);
                return Err(Exception::UnSupportedRequestMethod);
            }
        };

        let version_str = first_line_parts[2].to_uppercase();
        let version = match version_str.as_str() {
            "HTTP/1.1" => HttpVersion::V1_1,
            "HTTP/1.0" => HttpVersion::V1_0,
            _ => {
                error!("[ID{}]不支持的HTTP协议版本：{}", id, &version_str);
                return Err(Exception::UnsupportedHttpVersion);
            }
        };

        // 3. 解析请求头
        let mut headers = Vec::new();
        for line in request_lines {
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.push((name.trim().to_string(), value.trim().to_string()))
                }
                None => {
                    error!("[ID{}]无法解析的请求头：{}", id, line);
                    return Err(Exception::MalformedRequest);
                }
            }
        }

        // 4. 解析请求目标，确定协议、主机、路径与查询串
        let target = first_line_parts[1];
        let (scheme, authority, path_and_query) = if method == HttpRequestMethod::Connect {
            ("https", target, "/")
        } else if let Some((scheme, rest)) = target.split_once("://") {
            match rest.find('/') {
                Some(pos) => (scheme, &rest[..pos], &rest[pos..]),
                None => match rest.find('?') {
                    Some(pos) => (scheme, &rest[..pos], &rest[pos..]),
                    None => (scheme, rest, "/"),
                },
            }
        } else {
            let host = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("host"))
                .map(|(_, v)| v.as_str())
                .unwrap_or("");
            ("http", host, target)
        };

        let host = strip_port(authority).to_lowercase();
        if !valid_host(&host) {
            error!("[ID{}]无法确定请求的主机名：{}", id, target);
            return Err(Exception::MalformedRequest);
        }

        let path_and_query = path_and_query.split('#').next().unwrap_or("");
        let (raw_path, raw_query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, q),
            None => (path_and_query, ""),
        };
        let raw_path = if raw_path.starts_with('/') {
            raw_path.to_string()
        } else {
            format!("/{}", raw_path)
        };
        let path = percent_decode_str(&raw_path).decode_utf8_lossy().to_string();

        Ok(Self {
            method,
            scheme: scheme.to_lowercase(),
            host,
            raw_path,
            path,
            raw_query: raw_query.to_string(),
            version,
            headers,
            body: Bytes::new(),
        })
    }

    /// 根据 `Content-Length` 计算请求体长度
    fn content_length(&self) -> Result<usize, Exception> {
        if self
            .header("transfer-encoding")
            .map_or(false, |v| v.to_lowercase().contains("chunked"))
        {
            return Err(Exception::MalformedRequest);
        }
        let len = match self.header("content-length") {
            Some(v) => v.parse::<usize>().map_err(|_| Exception::MalformedRequest)?,
            None => 0,
        };
        if len > MAX_BODY_BYTES {
            return Err(Exception::RequestTooLarge);
        }
        Ok(len)
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

/// 去掉 `host:port` 中的端口，兼容 `[::1]:80` 形式
fn strip_port(authority: &str) -> &str {
    let authority = authority.rsplit('@').next().unwrap_or(authority);
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(pos) => &authority[..=pos],
            None => authority,
        };
    }
    authority.split(':').next().unwrap_or(authority)
}

fn valid_host(host: &str) -> bool {
    !host.is_empty()
        && host != "."
        && host != ".."
        && !host.contains(['/', '\\'])
        && !host.chars().any(|c| c.is_control() || c.is_whitespace())
}

// --- Getter 访问器实现 ---

impl Request {
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// 未解码的路径，转发给上游时使用
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    /// 解码后的路径，映射到文件系统时使用
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn raw_query(&self) -> &str {
        &self.raw_query
    }

    pub fn has_query(&self) -> bool {
        !self.raw_query.is_empty()
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 大小写不敏感地查找第一个同名请求头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// `raw_path` 加上查询串
    pub fn path_and_query(&self) -> String {
        if self.has_query() {
            format!("{}?{}", self.raw_path, self.raw_query)
        } else {
            self.raw_path.clone()
        }
    }

    /// 请求原本指向的历史 URL
    pub fn origin_url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path_and_query())
    }

    /// 客户端是否显式请求了 `Connection: keep-alive`
    pub fn requested_keep_alive(&self) -> bool {
        self.header("connection")
            .map_or(false, |v| v.to_lowercase().contains("keep-alive"))
    }

    /// 处理完本请求后连接是否可以继续复用
    pub fn is_persistent(&self) -> bool {
        let close = self
            .header("connection")
            .map_or(false, |v| v.to_lowercase().contains("close"));
        if close {
            return false;
        }
        self.version == HttpVersion::V1_1 || self.requested_keep_alive()
    }
}
