// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 多层回退
//!
//! 内容服务器没有结果时，按 本地存档 → 远程镜像 → 实时抓取 的顺序依次尝试，
//! 第一个给出结果的层结束整个流程，之后不会再回头尝试前面的层。
//!
//! 这里只决定"提供什么"，结果以 `LegacyOutcome` 返回，
//! 响应头的写入统一由 `LegacyOutcome::into_response` 完成。

use std::fmt;
use std::sync::Arc;

use log::{error, info, warn};

use crate::{
    candidate::CandidateSet,
    cgi::CgiBridge,
    config::Config,
    exception::Exception,
    live::LiveCapture,
    mirror::MirrorResolver,
    param::ZIPSVR_FILENAME,
    request::Request,
    resolver::{self, Resolved, ServedFile},
    response::Response,
    util::format_http_date,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local,
    Mirror,
    LiveCapture,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Local => write!(f, "local"),
            Tier::Mirror => write!(f, "mirror"),
            Tier::LiveCapture => write!(f, "live capture"),
        }
    }
}

#[derive(Debug)]
pub enum LegacyOutcome {
    Served { file: ServedFile, tier: Tier },
    /// 脚本执行的结果，已经是完整的响应
    Script(Response),
    NotFound,
    /// 本地读写失败，以 500 返回
    Failed(Exception),
}

impl LegacyOutcome {
    pub fn into_response(self) -> Response {
        match self {
            LegacyOutcome::Served { file, .. } => {
                let mut response = Response::new();
                response
                    .set_header("Last-Modified", &format_http_date(&file.last_modified))
                    .set_header(ZIPSVR_FILENAME, &file.path.display().to_string())
                    .set_body(file.body);
                response
            }
            LegacyOutcome::Script(response) => response,
            LegacyOutcome::NotFound => Response::from_exception(&Exception::Miss),
            LegacyOutcome::Failed(e) => Response::from_exception(&e),
        }
    }

    pub fn tier(&self) -> Option<Tier> {
        match self {
            LegacyOutcome::Served { tier, .. } => Some(*tier),
            LegacyOutcome::Script(_) => Some(Tier::Local),
            _ => None,
        }
    }
}

pub struct LegacyServer {
    config: Arc<Config>,
    mirror: Option<MirrorResolver>,
    live: Option<LiveCapture>,
    cgi: CgiBridge,
}

impl LegacyServer {
    pub fn new(config: Arc<Config>) -> Result<Self, Exception> {
        let mirror = match config.use_mirror() {
            true => Some(MirrorResolver::new(&config)?),
            false => None,
        };
        let live = match config.use_live_capture() {
            true => Some(LiveCapture::new(&config)?),
            false => None,
        };
        let cgi = CgiBridge::new(&config);
        Ok(Self {
            config,
            mirror,
            live,
            cgi,
        })
    }

    pub fn cgi(&self) -> &CgiBridge {
        &self.cgi
    }

    /// 依次尝试各层，返回第一个结果
    pub async fn serve(&self, request: &Request, id: u128) -> LegacyOutcome {
        let candidates = CandidateSet::from_request(&self.config, request);

        match resolver::resolve(&self.config, &candidates, id).await {
            Ok(Some(Resolved::File(file))) => {
                info!("[ID{}]本地命中: {}", id, file.path.display());
                return LegacyOutcome::Served {
                    file,
                    tier: Tier::Local,
                };
            }
            Ok(Some(Resolved::Script(script))) => {
                info!("[ID{}]交给CGI执行: {}", id, script.display());
                return match self.cgi.execute(&script, request, id).await {
                    Ok(response) => LegacyOutcome::Script(response),
                    Err(e) => {
                        error!("[ID{}]执行脚本{}失败: {}", id, script.display(), e);
                        LegacyOutcome::Failed(e)
                    }
                };
            }
            Ok(None) => {}
            Err(e) => return self.failed(e, id),
        }

        if let Some(mirror) = &self.mirror {
            match mirror.resolve(&candidates, id).await {
                Ok(Some(file)) => {
                    return LegacyOutcome::Served {
                        file,
                        tier: Tier::Mirror,
                    }
                }
                Ok(None) => {}
                Err(e) => return self.failed(e, id),
            }
        }

        if let Some(live) = &self.live {
            match live.resolve(request, id).await {
                Ok(Some(file)) => {
                    return LegacyOutcome::Served {
                        file,
                        tier: Tier::LiveCapture,
                    }
                }
                Ok(None) => {}
                Err(e) => return self.failed(e, id),
            }
        }

        warn!(
            "[ID{}]所有回退层均未找到{}: {}",
            id,
            request.origin_url(),
            Exception::Miss
        );
        LegacyOutcome::NotFound
    }

    fn failed(&self, e: Exception, id: u128) -> LegacyOutcome {
        error!("[ID{}]回退处理失败: {}", id, e);
        LegacyOutcome::Failed(e)
    }

    pub async fn handle(&self, request: &Request, id: u128) -> Response {
        self.serve(request, id).await.into_response()
    }
}
