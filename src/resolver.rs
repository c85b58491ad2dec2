//! # 本地解析
//!
//! 依次检查候选路径，第一个存在且不是目录的文件即为命中。

use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, error};
use tokio::fs;

use crate::{
    candidate::CandidateSet, config::Config, exception::Exception, response::Body,
};

/// 一个可以直接写回客户端的文件
#[derive(Debug)]
pub struct ServedFile {
    /// 实际提供内容的本地路径
    pub path: PathBuf,
    pub last_modified: DateTime<Utc>,
    pub body: Body,
}

#[derive(Debug)]
pub enum Resolved {
    File(ServedFile),
    /// 命中的文件是脚本，需要交给 CGI 执行
    Script(PathBuf),
}

/// 在本地存档中查找请求对应的文件。
///
/// 全部候选都不存在时返回 `Ok(None)`；文件已确认存在却无法读取时返回 `LocalIo`。
pub async fn resolve(
    config: &Config,
    candidates: &CandidateSet,
    id: u128,
) -> Result<Option<Resolved>, Exception> {
    for candidate in candidates.local() {
        let path = candidate.path();
        let metadata = match fs::metadata(path).await {
            Ok(m) if !m.is_dir() => m,
            _ => continue,
        };

        let is_script = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| config.is_script_ext(e));
        if is_script {
            debug!("[ID{}]命中脚本文件: {}", id, path.display());
            return Ok(Some(Resolved::Script(path.to_path_buf())));
        }

        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let len = metadata.len();

        let body = if len > config.streaming_threshold() {
            debug!("[ID{}]文件大小{}超过流式阈值，使用流式传输", id, len);
            let file = fs::File::open(path).await.map_err(|e| {
                error!("[ID{}]无法打开文件{}: {}", id, path.display(), e);
                Exception::local_io(path, e)
            })?;
            Body::File { file, len }
        } else {
            let contents = fs::read(path).await.map_err(|e| {
                error!("[ID{}]无法读取文件{}: {}", id, path.display(), e);
                Exception::local_io(path, e)
            })?;
            Body::Full(Bytes::from(contents))
        };

        debug!("[ID{}]本地命中: {}", id, path.display());
        return Ok(Some(Resolved::File(ServedFile {
            path: path.to_path_buf(),
            last_modified,
            body,
        })));
    }
    Ok(None)
}
