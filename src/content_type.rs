//! # Content-Type 协商
//!
//! 先看客户端请求的 URL 扩展名，再看实际提供内容的文件扩展名。
//! 请求的扩展名代表调用方的意图，即使存储的文件名不同（例如目录索引）也以它为准。

use std::path::Path;

use log::debug;

use crate::{config::Config, param::ZIPSVR_FILENAME, response::Response};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub mime: String,
    /// 文件本身是 gzip 压缩过的，需要附加 `Content-Encoding: gzip`
    pub gzip: bool,
}

/// 以 `/` 结尾的路径是目录，没有扩展名
fn extension_of(path: &str) -> Option<String> {
    if path.ends_with('/') {
        return None;
    }
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

fn lookup(config: &Config, ext: &str) -> Option<Negotiated> {
    config.mime_type(ext).map(|mime| Negotiated {
        mime: mime.to_string(),
        gzip: config.is_gzipped_ext(ext),
    })
}

/// 依次用请求路径与提供文件的扩展名查 MIME 表，都查不到时返回 `None`
pub fn negotiate(
    config: &Config,
    request_path: &str,
    served_filename: Option<&str>,
) -> Option<Negotiated> {
    extension_of(request_path)
        .and_then(|ext| lookup(config, &ext))
        .or_else(|| {
            served_filename
                .and_then(extension_of)
                .and_then(|ext| lookup(config, &ext))
        })
}

/// 按协商结果改写响应的 `Content-Type` 与 `Content-Encoding`
pub fn apply(config: &Config, request_path: &str, response: &mut Response, id: u128) {
    let served = response.header(ZIPSVR_FILENAME).map(str::to_string);
    match negotiate(config, request_path, served.as_deref()) {
        Some(negotiated) => {
            debug!("[ID{}]Content-Type: {}", id, negotiated.mime);
            response.set_header("Content-Type", &negotiated.mime);
            if negotiated.gzip {
                response.set_header("Content-Encoding", "gzip");
            }
        }
        None => debug!("[ID{}]无法确定Content-Type，保持原样", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn config() -> Config {
        Config::from_toml_str(
            r#"
            ext_gzipped_types = ["svgz"]
            [ext_mime_types]
            svg = "image/svg+xml"
            svgz = "image/svg+xml"
            htm = "text/html"
            swf = "application/x-shockwave-flash"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_request_extension_wins() {
        let n = negotiate(&config(), "/images/logo.svg", Some("/htdocs/example.com/images/logo.htm")).unwrap();
        assert_eq!(n.mime, "image/svg+xml");
        assert!(!n.gzip);
    }

    #[test]
    fn test_case_insensitive_extension() {
        let n = negotiate(&config(), "/GAME.SWF", None).unwrap();
        assert_eq!(n.mime, "application/x-shockwave-flash");
    }

    #[test]
    fn test_served_filename_fallback() {
        let n = negotiate(&config(), "/games/", Some("/htdocs/example.com/games/index.htm")).unwrap();
        assert_eq!(n.mime, "text/html");

        let n = negotiate(&config(), "/data.unknown", Some("/htdocs/a.htm")).unwrap();
        assert_eq!(n.mime, "text/html");
    }

    #[test]
    fn test_directory_path_defers_to_served_file() {
        let n = negotiate(&config(), "/games.swf/", Some("/htdocs/example.com/games.swf/index.htm")).unwrap();
        assert_eq!(n.mime, "text/html");
        assert_eq!(negotiate(&config(), "/games.swf/", None), None);
    }

    #[test]
    fn test_gzipped_extension() {
        let n = negotiate(&config(), "/map.svgz", None).unwrap();
        assert_eq!(n.mime, "image/svg+xml");
        assert!(n.gzip);
    }

    #[test]
    fn test_nothing_known() {
        assert_eq!(negotiate(&config(), "/a.xyz", Some("/b.qqq")), None);
        assert_eq!(negotiate(&config(), "/noext", None), None);
    }

    #[test]
    fn test_apply_keeps_upstream_type_when_unknown() {
        let mut response = Response::from_bytes(Some("text/plain"), Bytes::new());
        apply(&config(), "/a.xyz", &mut response, 0);
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert_eq!(response.header("Content-Encoding"), None);
    }

    #[test]
    fn test_apply_uses_served_filename_header() {
        let mut response = Response::from_bytes(Some("application/octet-stream"), Bytes::new());
        response.set_header(ZIPSVR_FILENAME, "/htdocs/example.com/map.svgz");
        apply(&config(), "/map", &mut response, 0);
        assert_eq!(response.header("Content-Type"), Some("image/svg+xml"));
        assert_eq!(response.header("Content-Encoding"), Some("gzip"));
    }
}
