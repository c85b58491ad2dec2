// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # CGI 桥接
//!
//! 存档中的旧式脚本交给外部解释器（通常是 `php-cgi`）执行。
//! 请求以 CGI/1.1 环境变量和标准输入传给解释器，解释器的输出按
//! "头部、空行、正文" 的格式解析为 HTTP 响应。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, error, info, warn};
use regex::Regex;
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};

use crate::{
    config::Config, exception::Exception, param::SERVER_NAME, request::Request,
    response::Response,
};

#[derive(Debug, Clone)]
pub struct CgiBridge {
    interpreter: PathBuf,
    document_root: PathBuf,
    timeout: Duration,
}

impl CgiBridge {
    pub fn new(config: &Config) -> Self {
        Self {
            interpreter: config.cgi_path().to_path_buf(),
            document_root: config.legacy_htdocs_path().to_path_buf(),
            timeout: Duration::from_secs(config.cgi_timeout_secs()),
        }
    }

    /// 探测解释器版本，找不到解释器时返回 `None`
    pub fn probe_version(&self) -> Option<String> {
        let output = match std::process::Command::new(&self.interpreter).arg("-v").output() {
            Ok(o) => o,
            Err(_) => {
                warn!(
                    "无法找到脚本解释器{}。服务器将继续运行，但将无法处理脚本请求。",
                    self.interpreter.display()
                );
                return None;
            }
        };
        let text = String::from_utf8_lossy(&output.stdout);
        let re = Regex::new(r"PHP (\d+\.\d+\.\d+)").ok()?;
        match re.captures(&text).and_then(|c| c.get(1)) {
            Some(version) => {
                info!("找到脚本解释器，版本：{}", version.as_str());
                Some(version.as_str().to_string())
            }
            None => {
                let first_line = text.lines().next().unwrap_or("").trim().to_string();
                info!("找到脚本解释器：{}", first_line);
                Some(first_line)
            }
        }
    }

    /// 执行脚本并把输出转换为响应
    pub async fn execute(
        &self,
        script: &Path,
        request: &Request,
        id: u128,
    ) -> Result<Response, Exception> {
        debug!("[ID{}]执行脚本: {}", id, script.display());
        let mut command = Command::new(&self.interpreter);
        command
            .arg(script)
            .env_clear()
            .envs(self.environment(script, request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = script.parent() {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            error!("[ID{}]无法启动脚本解释器{}: {}", id, self.interpreter.display(), e);
            Exception::ScriptExecuteFailed(e.to_string())
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let body = request.body().clone();
            tokio::spawn(async move {
                let _ = stdin.write_all(&body).await;
            });
        }

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Exception::ScriptExecuteFailed(e.to_string())),
            Err(_) => {
                error!("[ID{}]脚本{}执行超时", id, script.display());
                return Err(Exception::ScriptExecuteFailed("timed out".to_string()));
            }
        };

        if !output.stderr.is_empty() {
            warn!(
                "[ID{}]脚本解释器输出错误信息：{}",
                id,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        if !output.status.success() && output.stdout.is_empty() {
            return Err(Exception::ScriptExecuteFailed(format!(
                "interpreter exited with {}",
                output.status
            )));
        }
        parse_cgi_output(&output.stdout)
    }

    fn environment(&self, script: &Path, request: &Request) -> Vec<(String, String)> {
        let mut env = vec![
            ("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string()),
            ("SERVER_SOFTWARE".to_string(), SERVER_NAME.to_string()),
            ("SERVER_PROTOCOL".to_string(), request.version().to_string()),
            ("SERVER_NAME".to_string(), request.host().to_string()),
            ("REQUEST_METHOD".to_string(), request.method().to_string()),
            ("REQUEST_URI".to_string(), request.path_and_query()),
            ("SCRIPT_NAME".to_string(), request.path().to_string()),
            ("SCRIPT_FILENAME".to_string(), script.display().to_string()),
            ("DOCUMENT_ROOT".to_string(), self.document_root.display().to_string()),
            ("QUERY_STRING".to_string(), request.raw_query().to_string()),
            ("REDIRECT_STATUS".to_string(), "200".to_string()),
            ("CONTENT_LENGTH".to_string(), request.body().len().to_string()),
        ];
        if let Ok(path) = std::env::var("PATH") {
            env.push(("PATH".to_string(), path));
        }
        for (name, value) in request.headers() {
            let lower = name.to_lowercase();
            if lower == "content-type" {
                env.push(("CONTENT_TYPE".to_string(), value.clone()));
                continue;
            }
            if lower == "content-length" || lower == "proxy-authorization" {
                continue;
            }
            env.push((
                format!("HTTP_{}", name.to_uppercase().replace('-', "_")),
                value.clone(),
            ));
        }
        env
    }
}

/// 解析 CGI 输出：`Status:` 决定状态码，其余行作为响应头，空行之后是正文
pub fn parse_cgi_output(output: &[u8]) -> Result<Response, Exception> {
    let (head_end, sep_len) = match output.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => (pos, 4),
        None => match output.windows(2).position(|w| w == b"\n\n") {
            Some(pos) => (pos, 2),
            None => {
                return Err(Exception::ScriptExecuteFailed(
                    "missing header terminator in CGI output".to_string(),
                ))
            }
        },
    };

    let head = String::from_utf8_lossy(&output[..head_end]);
    let mut response = Response::from_bytes(None, Bytes::copy_from_slice(&output[head_end + sep_len..]));
    let mut has_status = false;

    for line in head.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (name, value) = match line.split_once(':') {
            Some((n, v)) => (n.trim(), v.trim()),
            None => {
                return Err(Exception::ScriptExecuteFailed(format!(
                    "malformed CGI header: {}",
                    line
                )))
            }
        };
        if name.eq_ignore_ascii_case("status") {
            let (code, reason) = value.split_once(' ').unwrap_or((value, ""));
            let code = code.parse::<u16>().map_err(|_| {
                Exception::ScriptExecuteFailed(format!("invalid CGI status: {}", value))
            })?;
            if reason.is_empty() {
                response.set_code(code);
            } else {
                response.set_status(code, reason.trim());
            }
            has_status = true;
        } else {
            if name.eq_ignore_ascii_case("location") && !has_status {
                response.set_code(302);
            }
            response.append_header(name, value);
        }
    }
    Ok(response)
}
