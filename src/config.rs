// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 配置模块
//!
//! 进程启动时从 TOML（或 `.json` 后缀的 JSON）文件读取一次配置，
//! 之后以 `Arc<Config>` 的形式只读地分发给所有组件，不再修改。

use serde_derive::Deserialize;
use serde_derive::Serialize;

use log::{info, warn};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::exception::Exception;
use crate::param::DEFAULT_MIME_TYPES;

/// 回退层的处理模式
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LegacyMode {
    /// 在进程内执行多层回退
    Internal,
    /// 把请求转交给外部的旧版服务器
    External,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default = "default_proxy_port")]
    proxy_port: u16,
    #[serde(default = "default_local")]
    local: bool,
    #[serde(default)]
    worker_threads: usize,
    #[serde(default = "default_content_server_port")]
    content_server_port: u16,

    #[serde(default = "default_root_path")]
    root_path: PathBuf,
    #[serde(default = "default_legacy_htdocs_path")]
    legacy_htdocs_path: PathBuf,
    #[serde(default)]
    override_paths: Vec<String>,
    #[serde(default = "default_cgi_path")]
    cgi_path: PathBuf,

    #[serde(default = "default_ext_index_types")]
    ext_index_types: Vec<String>,
    #[serde(default = "default_ext_script_types")]
    ext_script_types: Vec<String>,
    #[serde(default)]
    ext_gzipped_types: Vec<String>,
    #[serde(default = "default_ext_mime_types")]
    ext_mime_types: HashMap<String, String>,

    #[serde(default)]
    use_mirror: bool,
    #[serde(default)]
    mirror_url: String,
    #[serde(default)]
    mirror_index_files: bool,
    #[serde(default)]
    use_live_capture: bool,
    #[serde(default)]
    live_capture_proxy: Option<String>,

    #[serde(default = "default_legacy_mode")]
    legacy_mode: LegacyMode,
    #[serde(default = "default_legacy_external_port")]
    legacy_external_port: u16,

    #[serde(default = "default_streaming_threshold")]
    streaming_threshold: u64,
    #[serde(default = "default_chunk_size")]
    chunk_size: usize,
    #[serde(default = "default_mirror_timeout_secs")]
    mirror_timeout_secs: u64,
    #[serde(default = "default_live_timeout_secs")]
    live_timeout_secs: u64,
    #[serde(default = "default_cgi_timeout_secs")]
    cgi_timeout_secs: u64,
}

fn default_proxy_port() -> u16 {
    22500
}

fn default_local() -> bool {
    true
}

fn default_content_server_port() -> u16 {
    22501
}

fn default_root_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_legacy_htdocs_path() -> PathBuf {
    PathBuf::from("Legacy/htdocs")
}

fn default_cgi_path() -> PathBuf {
    PathBuf::from("Legacy/php-cgi")
}

fn default_ext_index_types() -> Vec<String> {
    vec!["htm".to_string(), "html".to_string(), "php".to_string()]
}

fn default_ext_script_types() -> Vec<String> {
    vec!["php".to_string()]
}

fn default_ext_mime_types() -> HashMap<String, String> {
    DEFAULT_MIME_TYPES
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn default_legacy_mode() -> LegacyMode {
    LegacyMode::Internal
}

fn default_legacy_external_port() -> u16 {
    22600
}

fn default_streaming_threshold() -> u64 {
    10485760 // 10MB
}

fn default_chunk_size() -> usize {
    262144 // 256KB
}

fn default_mirror_timeout_secs() -> u64 {
    10
}

fn default_live_timeout_secs() -> u64 {
    300
}

fn default_cgi_timeout_secs() -> u64 {
    300
}

impl Config {
    /// 全部取默认值的配置，相对路径以当前工作目录为根
    pub fn new() -> Self {
        Self {
            proxy_port: default_proxy_port(),
            local: default_local(),
            worker_threads: 0,
            content_server_port: default_content_server_port(),
            root_path: default_root_path(),
            legacy_htdocs_path: default_legacy_htdocs_path(),
            override_paths: Vec::new(),
            cgi_path: default_cgi_path(),
            ext_index_types: default_ext_index_types(),
            ext_script_types: default_ext_script_types(),
            ext_gzipped_types: Vec::new(),
            ext_mime_types: default_ext_mime_types(),
            use_mirror: false,
            mirror_url: String::new(),
            mirror_index_files: false,
            use_live_capture: false,
            live_capture_proxy: None,
            legacy_mode: default_legacy_mode(),
            legacy_external_port: default_legacy_external_port(),
            streaming_threshold: default_streaming_threshold(),
            chunk_size: default_chunk_size(),
            mirror_timeout_secs: default_mirror_timeout_secs(),
            live_timeout_secs: default_live_timeout_secs(),
            cgi_timeout_secs: default_cgi_timeout_secs(),
        }
    }

    /// 从文件读取配置。后缀为 `.json` 时按 JSON 解析，否则按 TOML 解析。
    pub fn from_file(filename: &Path) -> Result<Self, Exception> {
        let str_val = fs::read_to_string(filename).map_err(|e| {
            Exception::Config(format!("no such file {}: {}", filename.display(), e))
        })?;

        let is_json = filename
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
        let raw_config: Config = if is_json {
            serde_json::from_str(&str_val)
                .map_err(|e| Exception::Config(format!("{}: {}", filename.display(), e)))?
        } else {
            toml::from_str(&str_val)
                .map_err(|e| Exception::Config(format!("{}: {}", filename.display(), e)))?
        };
        raw_config.finalize()
    }

    /// 从 TOML 字符串构建配置，主要供测试使用
    pub fn from_toml_str(text: &str) -> Result<Self, Exception> {
        let raw_config: Config =
            toml::from_str(text).map_err(|e| Exception::Config(e.to_string()))?;
        raw_config.finalize()
    }

    /// 命令行参数覆盖配置文件中的取值
    pub fn apply_overrides(
        mut self,
        port: Option<u16>,
        force_mirror: bool,
        force_live_capture: bool,
    ) -> Result<Self, Exception> {
        if let Some(port) = port {
            self.proxy_port = port;
        }
        if force_mirror {
            self.use_mirror = true;
        }
        if force_live_capture {
            self.use_live_capture = true;
        }
        self.validate()?;
        Ok(self)
    }

    /// 把所有相对路径解析为绝对路径，规整扩展名列表，并校验取值
    fn finalize(mut self) -> Result<Self, Exception> {
        if self.worker_threads == 0 {
            self.worker_threads = num_cpus::get();
        }

        let cwd = env::current_dir()
            .map_err(|e| Exception::Config(format!("无法获取当前工作目录: {}", e)))?;
        self.root_path = absolutize(&cwd, &self.root_path);
        self.legacy_htdocs_path = absolutize(&self.root_path, &self.legacy_htdocs_path);
        self.cgi_path = absolutize(&self.root_path, &self.cgi_path);

        for list in [
            &mut self.ext_index_types,
            &mut self.ext_script_types,
            &mut self.ext_gzipped_types,
        ] {
            for ext in list.iter_mut() {
                *ext = normalize_ext(ext);
            }
        }
        let mime_types = std::mem::take(&mut self.ext_mime_types);
        self.ext_mime_types = mime_types
            .into_iter()
            .map(|(k, v)| (normalize_ext(&k), v))
            .collect();

        if self.chunk_size == 0 {
            warn!("chunk_size被设置为0，该值将被改为默认的256KB。");
            self.chunk_size = default_chunk_size();
        }

        self.validate()?;
        info!("Legacy HTDOCS Path: {}", self.legacy_htdocs_path.display());
        Ok(self)
    }

    fn validate(&self) -> Result<(), Exception> {
        if self.use_mirror && self.mirror_url.trim().is_empty() {
            return Err(Exception::Config(
                "use_mirror is enabled but mirror_url is empty".to_string(),
            ));
        }
        if self.ext_index_types.iter().any(|e| e.is_empty()) {
            return Err(Exception::Config(
                "ext_index_types contains an empty extension".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn normalize_ext(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

impl Config {
    pub fn proxy_port(&self) -> u16 {
        self.proxy_port
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    pub fn content_server_port(&self) -> u16 {
        self.content_server_port
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn legacy_htdocs_path(&self) -> &Path {
        &self.legacy_htdocs_path
    }

    pub fn override_paths(&self) -> &[String] {
        &self.override_paths
    }

    pub fn cgi_path(&self) -> &Path {
        &self.cgi_path
    }

    pub fn ext_index_types(&self) -> &[String] {
        &self.ext_index_types
    }

    pub fn ext_script_types(&self) -> &[String] {
        &self.ext_script_types
    }

    pub fn ext_gzipped_types(&self) -> &[String] {
        &self.ext_gzipped_types
    }

    /// 查询扩展名（不带点，大小写不敏感）对应的 MIME 类型
    pub fn mime_type(&self, ext: &str) -> Option<&str> {
        self.ext_mime_types
            .get(&ext.to_lowercase())
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn is_gzipped_ext(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.ext_gzipped_types.iter().any(|e| *e == ext)
    }

    pub fn is_script_ext(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.ext_script_types.iter().any(|e| *e == ext)
    }

    pub fn use_mirror(&self) -> bool {
        self.use_mirror
    }

    pub fn mirror_url(&self) -> &str {
        &self.mirror_url
    }

    pub fn mirror_index_files(&self) -> bool {
        self.mirror_index_files
    }

    pub fn use_live_capture(&self) -> bool {
        self.use_live_capture
    }

    pub fn live_capture_proxy(&self) -> Option<&str> {
        self.live_capture_proxy.as_deref()
    }

    pub fn legacy_mode(&self) -> LegacyMode {
        self.legacy_mode
    }

    pub fn legacy_external_port(&self) -> u16 {
        self.legacy_external_port
    }

    pub fn streaming_threshold(&self) -> u64 {
        self.streaming_threshold
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn mirror_timeout_secs(&self) -> u64 {
        self.mirror_timeout_secs
    }

    pub fn live_timeout_secs(&self) -> u64 {
        self.live_timeout_secs
    }

    pub fn cgi_timeout_secs(&self) -> u64 {
        self.cgi_timeout_secs
    }
}
