//! # 实时抓取
//!
//! 本地与镜像都没有结果时，把原始请求原样发往它本来的源站，
//! 成功后保存到 `content/<host>/<path>`，供以后离线使用。

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};

use crate::{
    capture::persist,
    config::Config,
    exception::Exception,
    fetcher::{Fetcher, OutboundRequest},
    param::*,
    request::Request,
    resolver::ServedFile,
    util::join_host_path,
};

#[derive(Debug, Clone)]
pub struct LiveCapture {
    content_root: PathBuf,
    index_file: String,
    fetcher: Fetcher,
}

impl LiveCapture {
    pub fn new(config: &Config) -> Result<Self, Exception> {
        let index_ext = config
            .ext_index_types()
            .first()
            .map(String::as_str)
            .unwrap_or("html");
        Ok(Self {
            content_root: config.legacy_htdocs_path().join("content"),
            index_file: format!("index.{}", index_ext),
            fetcher: Fetcher::new(
                Duration::from_secs(config.live_timeout_secs()),
                config.live_capture_proxy(),
            )?,
        })
    }

    /// 抓取结果在本地的保存位置。以 `/` 结尾的路径保存为目录下的索引文件。
    pub fn destination(&self, request: &Request) -> PathBuf {
        let mut dest = self
            .content_root
            .join(join_host_path(request.host(), request.path()));
        if request.path().is_empty() || request.path().ends_with('/') {
            dest.push(&self.index_file);
        }
        dest
    }

    /// 复制原始请求，去掉逐跳头部与压缩协商，并在 User-Agent 后追加抓取标识。
    ///
    /// HEAD 以 GET 发出，保证落盘的是完整内容，响应体由写回阶段丢弃。
    pub fn outbound(request: &Request) -> OutboundRequest {
        let mut headers: Vec<(String, String)> = request
            .headers()
            .iter()
            .filter(|(k, _)| {
                let k = k.to_lowercase();
                !HOP_BY_HOP_HEADERS.contains(&k.as_str())
                    && k != "host"
                    && k != "accept-encoding"
                    && k != "content-length"
                    && k != "user-agent"
            })
            .cloned()
            .collect();

        let user_agent = match request.user_agent() {
            "" => LIVE_CAPTURE_AGENT_SUFFIX.to_string(),
            ua => format!("{} {}", ua, LIVE_CAPTURE_AGENT_SUFFIX),
        };
        headers.push(("User-Agent".to_string(), user_agent));

        let method = match request.method() {
            HttpRequestMethod::Head => reqwest::Method::GET,
            method => method.as_reqwest(),
        };

        OutboundRequest {
            method,
            url: request.origin_url(),
            headers,
            body: request.body().clone(),
        }
    }

    /// 源站失败时返回 `Ok(None)`，只有落盘失败才会返回错误
    pub async fn resolve(
        &self,
        request: &Request,
        id: u128,
    ) -> Result<Option<ServedFile>, Exception> {
        let outbound = Self::outbound(request);
        match self.fetcher.fetch(&outbound, id).await {
            Ok(response) => {
                let dest = self.destination(request);
                info!("[ID{}]实时抓取成功: {} -> {}", id, outbound.url, dest.display());
                persist(response, &dest, id).await.map(Some)
            }
            Err(e) if e.is_upstream_failure() => {
                debug!("[ID{}]实时抓取失败 {}: {}", id, outbound.url, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
