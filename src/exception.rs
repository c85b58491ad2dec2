// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了代理在处理请求的生命周期中可能遇到的各类异常情况。
//!
//! ## 分类
//! - **请求解析错误**：客户端报文不合法，通常映射为 400 / 405 / 413。
//! - **未命中（Miss）**：某一层没有任何候选命中，不是错误，驱动回退到下一层。
//! - **上游失败**：镜像或源站返回非 200、重试耗尽或网络错误，同样驱动回退。
//! - **本地 I/O 失败**：文件已确认存在却无法读取，或抓取结果无法落盘，必须以 500 暴露。

use std::{fmt, io, path::PathBuf};

/// 代理处理请求过程中发生的异常类型。
#[derive(Debug)]
pub enum Exception {
    /// 客户端发送的请求头无法解析为合法的 UTF-8 字符串。
    RequestIsNotUtf8,
    /// 请求行或请求头格式错误。
    MalformedRequest,
    /// 客户端使用了代理无法识别的 HTTP 方法。
    UnSupportedRequestMethod,
    /// 客户端使用了代理不支持的 HTTP 协议版本。
    UnsupportedHttpVersion,
    /// 请求头或请求体超过了允许的大小。
    RequestTooLarge,
    /// 当前层没有任何候选命中。
    Miss,
    /// 上游返回了既不是 200 也不是 429 的状态码。
    UpstreamStatus { status: u16, reason: String },
    /// 上游持续返回 429，已达到最大尝试次数。
    RetryExhausted { attempts: u32 },
    /// DNS、连接、超时等网络层错误，不会重试。
    Network(String),
    /// 本地文件读写失败，附带出错的路径。
    LocalIo { path: PathBuf, source: io::Error },
    /// 脚本解释器无法启动、超时或输出无法解析。
    ScriptExecuteFailed(String),
    /// 配置文件缺失、无法解析或取值非法。
    Config(String),
}

use Exception::*;

impl Exception {
    /// 构造一个附带路径的本地 I/O 错误
    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        LocalIo {
            path: path.into(),
            source,
        }
    }

    /// 是否属于必须以 500 返回给客户端的本地故障
    pub fn is_local_failure(&self) -> bool {
        matches!(self, LocalIo { .. } | ScriptExecuteFailed(_))
    }

    /// 是否属于可以通过回退到下一层来恢复的上游故障
    pub fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            UpstreamStatus { .. } | RetryExhausted { .. } | Network(_)
        )
    }

    /// 请求解析阶段的错误对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            RequestIsNotUtf8 | MalformedRequest | UnsupportedHttpVersion => 400,
            UnSupportedRequestMethod => 405,
            RequestTooLarge => 413,
            Miss => 404,
            UpstreamStatus { .. } | RetryExhausted { .. } | Network(_) => 502,
            LocalIo { .. } | ScriptExecuteFailed(_) | Config(_) => 500,
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIsNotUtf8 => write!(f, "Request bytes can't be parsed in UTF-8"),
            MalformedRequest => write!(f, "Malformed HTTP request"),
            UnSupportedRequestMethod => write!(f, "Unsupported request method"),
            UnsupportedHttpVersion => write!(f, "Unsupported HTTP version"),
            RequestTooLarge => write!(f, "Request too large"),
            Miss => write!(f, "No candidate matched"),
            UpstreamStatus { status, reason } => write!(f, "{} {}", status, reason),
            RetryExhausted { attempts } => {
                write!(f, "Too many 429 responses ({} attempts)", attempts)
            }
            Network(e) => write!(f, "Network error: {}", e),
            LocalIo { path, source } => write!(f, "I/O error on {}: {}", path.display(), source),
            ScriptExecuteFailed(e) => write!(f, "Couldn't execute script: {}", e),
            Config(e) => write!(f, "Invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for Exception {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LocalIo { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Exception {
    fn from(e: reqwest::Error) -> Self {
        Network(e.to_string())
    }
}
