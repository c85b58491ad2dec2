// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 响应模块
//!
//! `Response` 是各个回退层共同产出的结果。响应体可以来自内存、磁盘文件或上游连接，
//! 后两者在写回客户端时按 `chunk_size` 分块流式发送，避免大文件整体进入内存。

use crate::{
    exception::Exception,
    param::*,
    util::{format_http_date, HtmlBuilder},
};

use bytes::Bytes;
use chrono::prelude::*;
use log::{debug, error, warn};
use tokio::{
    fs::File,
    io::{self, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

/// 响应体的来源
#[derive(Debug)]
pub enum Body {
    Empty,
    /// 已在内存中的内容
    Full(Bytes),
    /// 需要从磁盘分块读取的文件
    File { file: File, len: u64 },
    /// 尚未读取的上游响应体，长度由上游的 `Content-Length` 给出
    Upstream { inner: reqwest::Response, len: u64 },
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Empty => 0,
            Body::Full(bytes) => bytes.len() as u64,
            Body::File { len, .. } | Body::Upstream { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Body::File { .. } | Body::Upstream { .. })
    }
}

#[derive(Debug)]
pub struct Response {
    version: HttpVersion,
    status_code: u16,
    information: String,
    headers: Vec<(String, String)>,
    body: Body,
}

impl Response {
    pub fn new() -> Self {
        Self {
            version: HttpVersion::V1_1,
            status_code: 200,
            information: "OK".to_string(),
            headers: Vec::new(),
            body: Body::Empty,
        }
    }

    /// 内存中的内容
    pub fn from_bytes(content_type: Option<&str>, content: Bytes) -> Self {
        let mut response = Self::new();
        if let Some(t) = content_type {
            response.set_header("Content-Type", t);
        }
        response.body = Body::Full(content);
        response
    }

    /// 以状态码生成带说明页面的响应
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let content = HtmlBuilder::from_status_code(code, note).build();
        let mut response = Self::from_bytes(Some("text/html;charset=utf-8"), Bytes::from(content));
        response.set_code(code);
        response
    }

    /// 把上游（内容服务器、外部旧版服务器）的响应转换为 `Response`。
    ///
    /// 上游给出 `Content-Length` 时响应体保持流式，否则先完整读入内存，
    /// 以便向客户端发送准确的长度。
    pub async fn from_upstream(inner: reqwest::Response, id: u128) -> Result<Self, Exception> {
        let mut response = Self::new();
        let status = inner.status();
        response.set_status(
            status.as_u16(),
            status
                .canonical_reason()
                .or_else(|| STATUS_CODES.get(&status.as_u16()).copied())
                .unwrap_or("Unknown"),
        );

        let mut declared_len = None;
        for (name, value) in inner.headers() {
            let name = name.as_str();
            if name == "content-length" {
                declared_len = value.to_str().ok().and_then(|v| v.trim().parse::<u64>().ok());
                continue;
            }
            if HOP_BY_HOP_HEADERS.contains(&name) {
                continue;
            }
            match value.to_str() {
                Ok(v) => response.headers.push((name.to_string(), v.to_string())),
                Err(_) => warn!("[ID{}]丢弃无法解析的上游响应头：{}", id, name),
            }
        }

        response.body = match declared_len {
            Some(0) => Body::Empty,
            Some(len) => Body::Upstream { inner, len },
            None => {
                let bytes = inner.bytes().await?;
                debug!("[ID{}]上游未给出长度，已缓冲{}字节", id, bytes.len());
                if bytes.is_empty() {
                    Body::Empty
                } else {
                    Body::Full(bytes)
                }
            }
        };
        Ok(response)
    }

    /// 设置状态码，原因短语取自标准表
    pub fn set_code(&mut self, code: u16) -> &mut Self {
        self.status_code = code;
        self.information = match STATUS_CODES.get(&code) {
            Some(&info) => info.to_string(),
            None => {
                warn!("未知的状态码：{}", code);
                "Unknown".to_string()
            }
        };
        self
    }

    /// 设置状态码与自定义原因短语
    pub fn set_status(&mut self, code: u16, information: &str) -> &mut Self {
        self.status_code = code;
        self.information = information.to_string();
        self
    }

    pub fn set_version(&mut self, version: HttpVersion) -> &mut Self {
        self.version = version;
        self
    }

    /// 设置响应头，已有的同名头部（大小写不敏感）会被替换
    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.remove_header(name);
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// 追加响应头，不影响已有的同名头部
    pub fn append_header(&mut self, name: &str, value: &str) -> &mut Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn remove_header(&mut self, name: &str) -> &mut Self {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self
    }

    pub fn set_body(&mut self, body: Body) -> &mut Self {
        self.body = body;
        self
    }

    pub fn response_400() -> Self {
        Self::from_status_code(400, Some(r"<h2>噢！</h2><p>代理无法理解这个请求。</p>"))
    }

    pub fn response_404() -> Self {
        Self::from_status_code(
            404,
            Some(r"<h2>噢！</h2><p>本地存档、镜像与实时抓取均未找到该资源。</p>"),
        )
    }

    pub fn response_500() -> Self {
        Self::from_status_code(500, Some(r"<h2>噢！</h2><p>代理在读写本地存档时出现了内部错误。</p>"))
    }

    pub fn response_501() -> Self {
        Self::from_status_code(501, Some(r"<h2>噢！</h2><p>本代理不处理 CONNECT 隧道请求。</p>"))
    }

    /// 按异常类别生成错误页
    pub fn from_exception(e: &Exception) -> Self {
        match e.status_code() {
            400 => Self::response_400(),
            404 => Self::response_404(),
            500 => Self::response_500(),
            code => Self::from_status_code(code, None),
        }
    }

    /// 状态行与全部响应头，`Content-Length`、`Date`、`Server` 由这里补齐
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut head = [
            self.version.to_string().as_str(),
            " ",
            &self.status_code.to_string(),
            " ",
            &self.information,
            CRLF,
        ]
        .concat();

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("transfer-encoding")
            {
                continue;
            }
            head.push_str(&[name.as_str(), ": ", value, CRLF].concat());
        }
        head.push_str(&["Content-Length: ", &self.body.len().to_string(), CRLF].concat());
        if self.header("date").is_none() {
            head.push_str(&["Date: ", &format_http_date(&Utc::now()), CRLF].concat());
        }
        if self.header("server").is_none() {
            head.push_str(&["Server: ", SERVER_NAME, CRLF].concat());
        }
        head.push_str(CRLF);
        head.into_bytes()
    }

    /// 内存中的完整报文，流式响应体不包含在内
    pub fn as_bytes(&self) -> Vec<u8> {
        let head = self.head_bytes();
        match &self.body {
            Body::Full(c) => [head.as_slice(), &c[..]].concat(),
            _ => head,
        }
    }

    /// 把响应写入客户端连接，返回写出的响应体字节数。
    ///
    /// 响应头一旦写出，之后的失败就无法再转换成错误页，只能记录日志并断开连接。
    pub async fn write_to<W>(
        self,
        stream: &mut W,
        headonly: bool,
        chunk_size: usize,
        id: u128,
    ) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        stream.write_all(&self.head_bytes()).await?;
        let expected = self.body.len();
        if headonly {
            stream.flush().await?;
            return Ok(0);
        }

        let mut total_sent = 0u64;
        match self.body {
            Body::Empty => {}
            Body::Full(content) => {
                stream.write_all(&content).await?;
                total_sent = content.len() as u64;
            }
            Body::File { mut file, len } => {
                debug!("[ID{}]开始流式传输，文件大小: {} bytes", id, len);
                let mut buffer = vec![0u8; chunk_size.max(1)];
                while total_sent < len {
                    let n = file.read(&mut buffer).await?;
                    if n == 0 {
                        break;
                    }
                    stream.write_all(&buffer[..n]).await?;
                    total_sent += n as u64;
                }
            }
            Body::Upstream { mut inner, len } => {
                debug!("[ID{}]开始转发上游响应体，长度: {} bytes", id, len);
                loop {
                    match inner.chunk().await {
                        Ok(Some(chunk)) => {
                            stream.write_all(&chunk).await?;
                            total_sent += chunk.len() as u64;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            error!("[ID{}]读取上游响应体失败: {}", id, e);
                            return Err(io::Error::new(io::ErrorKind::Other, e));
                        }
                    }
                }
            }
        }
        stream.flush().await?;

        if total_sent < expected {
            warn!(
                "[ID{}]响应体提前结束：声明 {} 字节，实际发送 {} 字节",
                id, expected, total_sent
            );
        } else {
            debug!("[ID{}]响应体发送完毕，共 {} 字节", id, total_sent);
        }
        Ok(total_sent)
    }

    /// 把响应体完整读入内存
    pub async fn read_body(self) -> Result<Bytes, Exception> {
        match self.body {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(content) => Ok(content),
            Body::File { mut file, len } => {
                let mut buffer = Vec::with_capacity(len as usize);
                file.read_to_end(&mut buffer)
                    .await
                    .map_err(|e| Exception::Network(e.to_string()))?;
                Ok(Bytes::from(buffer))
            }
            Body::Upstream { inner, .. } => Ok(inner.bytes().await?),
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn information(&self) -> &str {
        &self.information
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// 大小写不敏感地查找第一个同名响应头
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn content_length(&self) -> u64 {
        self.body.len()
    }

    pub fn is_streaming(&self) -> bool {
        self.body.is_streaming()
    }
}
