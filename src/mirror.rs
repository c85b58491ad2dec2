//! # 远程镜像
//!
//! 镜像服务与本地存档的基础层目录结构相同。依次以基础层候选的相对路径请求镜像，
//! 第一个成功的响应会被保存到同一相对路径对应的本地位置，然后返回给客户端。

use std::time::Duration;

use log::{debug, info};

use crate::{
    candidate::CandidateSet,
    capture::persist,
    config::Config,
    exception::Exception,
    fetcher::{Fetcher, OutboundRequest},
    param::MIRROR_USER_AGENT,
    resolver::ServedFile,
    util::encode_url_path,
};

#[derive(Debug, Clone)]
pub struct MirrorResolver {
    base_url: String,
    include_index: bool,
    fetcher: Fetcher,
}

impl MirrorResolver {
    pub fn new(config: &Config) -> Result<Self, Exception> {
        Ok(Self {
            base_url: config.mirror_url().trim_end_matches('/').to_string(),
            include_index: config.mirror_index_files(),
            fetcher: Fetcher::new(Duration::from_secs(config.mirror_timeout_secs()), None)?,
        })
    }

    /// 某个相对路径在镜像上的完整地址
    pub fn url_for(&self, relative: &str) -> String {
        format!("{}/{}", self.base_url, encode_url_path(relative))
    }

    /// 全部候选都失败时返回 `Ok(None)`，只有落盘失败才会返回错误
    pub async fn resolve(
        &self,
        candidates: &CandidateSet,
        id: u128,
    ) -> Result<Option<ServedFile>, Exception> {
        for candidate in candidates.mirror(self.include_index) {
            let url = self.url_for(candidate.relative());
            let request = OutboundRequest::get(url.as_str()).header("User-Agent", MIRROR_USER_AGENT);

            match self.fetcher.fetch(&request, id).await {
                Ok(response) => {
                    info!("[ID{}]镜像命中: {}", id, url);
                    return persist(response, candidate.path(), id).await.map(Some);
                }
                Err(e) if e.is_upstream_failure() => {
                    debug!("[ID{}]镜像未命中 {}: {}", id, url, e)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(htdocs: &std::path::Path, mirror: &str, extra: &str) -> Config {
        Config::from_toml_str(&format!(
            "legacy_htdocs_path = \"{}\"\nuse_mirror = true\nmirror_url = \"{}\"\n{}",
            htdocs.display(),
            mirror,
            extra
        ))
        .unwrap()
    }

    #[test]
    fn test_url_for_keeps_escaped_query() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = MirrorResolver::new(&config(dir.path(), "https://mirror.example/htdocs/", "")).unwrap();
        assert_eq!(
            resolver.url_for("example.com/test.txt%3Fquery=true"),
            "https://mirror.example/htdocs/example.com/test.txt%3Fquery=true"
        );
    }

    #[tokio::test]
    async fn test_query_variant_tried_first_and_saved_locally() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/example.com/test.txt%3Fquery=true"))
            .and(header("User-Agent", MIRROR_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string("query variant"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &server.uri(), "");
        let resolver = MirrorResolver::new(&config).unwrap();
        let set = CandidateSet::build(
            config.legacy_htdocs_path(),
            &["patch".to_string()],
            config.ext_index_types(),
            "example.com",
            "/test.txt",
            "query=true",
        );

        let served = resolver.resolve(&set, 0).await.unwrap().unwrap();
        let expected = dir.path().join("example.com/test.txt%3Fquery=true");
        assert_eq!(served.path, expected);
        assert_eq!(std::fs::read(expected).unwrap(), b"query variant");
    }

    #[tokio::test]
    async fn test_falls_through_to_plain_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/example.com/a.swf"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &server.uri(), "");
        let resolver = MirrorResolver::new(&config).unwrap();
        let set = CandidateSet::build(config.legacy_htdocs_path(), &[], &[], "example.com", "/a.swf", "v=1");

        let served = resolver.resolve(&set, 0).await.unwrap().unwrap();
        assert_eq!(served.path, dir.path().join("example.com/a.swf"));
    }

    #[tokio::test]
    async fn test_index_candidates_only_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/example.com/game/index.htm"))
            .respond_with(ResponseTemplate::new(200).set_body_string("index"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let off = config(dir.path(), &server.uri(), "");
        let set = CandidateSet::build(off.legacy_htdocs_path(), &[], off.ext_index_types(), "example.com", "/game/", "");
        assert!(MirrorResolver::new(&off).unwrap().resolve(&set, 0).await.unwrap().is_none());

        let on = config(dir.path(), &server.uri(), "mirror_index_files = true");
        let served = MirrorResolver::new(&on).unwrap().resolve(&set, 0).await.unwrap().unwrap();
        assert_eq!(served.path, dir.path().join("example.com/game/index.htm"));
    }

    #[tokio::test]
    async fn test_all_misses_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &server.uri(), "");
        let set = CandidateSet::build(config.legacy_htdocs_path(), &[], &[], "example.com", "/a", "q=1");
        assert!(MirrorResolver::new(&config).unwrap().resolve(&set, 0).await.unwrap().is_none());
    }
}
