//! # 抓取结果落盘
//!
//! 把镜像或源站返回的成功响应完整读入内存，写入本地存档，并在可能时把文件的
//! 修改时间设置为源站给出的 `Last-Modified`。任何一步失败都是本地故障。

use std::fs::FileTimes;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use chrono::Utc;
use log::{debug, error};
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    exception::Exception,
    resolver::ServedFile,
    response::Body,
    util::{format_file_size, parse_http_date},
};

/// 保存响应体到 `dest`，返回可以直接写回客户端的文件
pub async fn persist(
    response: reqwest::Response,
    dest: &Path,
    id: u128,
) -> Result<ServedFile, Exception> {
    let last_modified = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    let contents = response.bytes().await.map_err(|e| {
        error!("[ID{}]读取上游响应体失败: {}", id, e);
        Exception::local_io(dest, io::Error::new(io::ErrorKind::Other, e))
    })?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            error!("[ID{}]无法创建目录{}: {}", id, parent.display(), e);
            Exception::local_io(parent, e)
        })?;
    }

    let mut file = fs::File::create(dest).await.map_err(|e| {
        error!("[ID{}]无法创建文件{}: {}", id, dest.display(), e);
        Exception::local_io(dest, e)
    })?;
    file.write_all(&contents).await.map_err(|e| {
        error!("[ID{}]无法写入文件{}: {}", id, dest.display(), e);
        Exception::local_io(dest, e)
    })?;
    file.flush().await.map_err(|e| Exception::local_io(dest, e))?;

    let last_modified = match last_modified {
        Some(mtime) => {
            let times = FileTimes::new()
                .set_accessed(SystemTime::now())
                .set_modified(SystemTime::from(mtime));
            let std_file = file.into_std().await;
            std_file.set_times(times).map_err(|e| {
                error!("[ID{}]无法设置{}的修改时间: {}", id, dest.display(), e);
                Exception::local_io(dest, e)
            })?;
            mtime
        }
        None => Utc::now(),
    };

    debug!(
        "[ID{}]已保存{}到{}",
        id,
        format_file_size(contents.len() as u64),
        dest.display()
    );
    Ok(ServedFile {
        path: dest.to_path_buf(),
        last_modified,
        body: Body::Full(contents),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::format_http_date;
    use chrono::{DateTime, TimeZone};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn upstream(template: ResponseTemplate) -> (MockServer, reqwest::Response) {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(template)
            .mount(&server)
            .await;
        let response = reqwest::get(format!("{}/asset", server.uri())).await.unwrap();
        (server, response)
    }

    #[tokio::test]
    async fn test_persist_replays_last_modified() {
        let mtime = Utc.with_ymd_and_hms(2008, 6, 1, 12, 30, 0).unwrap();
        let (_server, response) = upstream(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", format_http_date(&mtime).as_str())
                .set_body_bytes(b"legacy bytes".to_vec()),
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("content/example.com/deep/dir/a.swf");
        let served = persist(response, &dest, 0).await.unwrap();

        assert_eq!(served.path, dest);
        assert_eq!(served.last_modified, mtime);
        assert_eq!(std::fs::read(&dest).unwrap(), b"legacy bytes");
        let on_disk: DateTime<Utc> = std::fs::metadata(&dest).unwrap().modified().unwrap().into();
        assert_eq!(on_disk, mtime);
        match served.body {
            Body::Full(bytes) => assert_eq!(bytes.as_ref(), b"legacy bytes"),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_persist_without_last_modified_uses_now() {
        let (_server, response) =
            upstream(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec())).await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");

        let before = Utc::now() - chrono::Duration::seconds(5);
        let served = persist(response, &dest, 0).await.unwrap();
        assert!(served.last_modified >= before);
        let on_disk: DateTime<Utc> = std::fs::metadata(&dest).unwrap().modified().unwrap().into();
        assert!(on_disk >= before);
    }

    #[tokio::test]
    async fn test_persist_unparseable_last_modified() {
        let (_server, response) = upstream(
            ResponseTemplate::new(200)
                .insert_header("Last-Modified", "sometime in 2004")
                .set_body_bytes(b"x".to_vec()),
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");

        let before = Utc::now() - chrono::Duration::seconds(5);
        let served = persist(response, &dest, 0).await.unwrap();
        assert!(served.last_modified >= before);
    }

    #[tokio::test]
    async fn test_persist_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.txt");
        std::fs::write(&dest, b"old contents that are longer").unwrap();

        let (_server, response) =
            upstream(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec())).await;
        persist(response, &dest, 0).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_persist_failure_is_local_failure() {
        let dir = tempfile::tempdir().unwrap();
        // 父路径是一个普通文件，目录无法创建
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let dest = blocker.join("a.txt");

        let (_server, response) =
            upstream(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec())).await;
        let err = persist(response, &dest, 0).await.unwrap_err();
        assert!(err.is_local_failure());
    }
}
