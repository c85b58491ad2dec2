//! # 候选路径构建
//!
//! 对一个请求，按固定优先级生成本地存档中可能回答该请求的全部文件路径：
//!
//! 1. 带查询串的精确文件（每个覆盖层，然后是基础层）
//! 2. 不带查询串的精确文件（每个覆盖层，然后是基础层）
//! 3. 覆盖层中的目录索引文件（按扩展名，再按覆盖层）
//! 4. 基础层中的目录索引文件（按扩展名）
//!
//! 精确匹配总是优先于索引匹配，同一精确度下覆盖层总是优先于基础层。

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{
    config::Config,
    request::Request,
    util::{escape_query_segment, join_host_path},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// 文件名末尾带有转义后的查询串，例如 `a.swf%3Fv=2`
    ExactWithQuery,
    Exact,
    /// `index.<ext>` 目录索引
    Index,
}

/// 一个完整的候选文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    layer: Option<String>,
    kind: CandidateKind,
    relative: String,
    path: PathBuf,
}

impl Candidate {
    /// 所属的覆盖层名称，基础层为 `None`
    pub fn layer(&self) -> Option<&str> {
        self.layer.as_deref()
    }

    pub fn kind(&self) -> CandidateKind {
        self.kind
    }

    /// 层内的相对路径，形如 `host/a/b.swf`
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// 本地绝对路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_base(&self) -> bool {
        self.layer.is_none()
    }
}

/// 一次请求的有序、去重后的候选列表
#[derive(Debug, Clone)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    pub fn build(
        root: &Path,
        overrides: &[String],
        index_exts: &[String],
        host: &str,
        path: &str,
        raw_query: &str,
    ) -> Self {
        let layers: Vec<Option<&str>> = overrides
            .iter()
            .map(|o| o.trim_matches('/'))
            .filter(|o| !o.is_empty())
            .map(Some)
            .chain(std::iter::once(None))
            .collect();

        let rel = join_host_path(host, path);
        let mut builder = Builder::new(root);

        if !raw_query.is_empty() {
            let rel_with_query =
                join_host_path(host, &format!("{}{}", path, escape_query_segment(raw_query)));
            for layer in &layers {
                builder.push(*layer, CandidateKind::ExactWithQuery, rel_with_query.clone());
            }
        }
        for layer in &layers {
            builder.push(*layer, CandidateKind::Exact, rel.clone());
        }
        for ext in index_exts {
            for layer in layers.iter().filter(|l| l.is_some()) {
                builder.push(*layer, CandidateKind::Index, format!("{}/index.{}", rel, ext));
            }
        }
        for ext in index_exts {
            builder.push(None, CandidateKind::Index, format!("{}/index.{}", rel, ext));
        }

        Self {
            candidates: builder.finish(),
        }
    }

    /// 以配置中的存档根目录、覆盖层与索引扩展名为请求构建候选列表
    pub fn from_request(config: &Config, request: &Request) -> Self {
        Self::build(
            config.legacy_htdocs_path(),
            config.override_paths(),
            config.ext_index_types(),
            request.host(),
            request.path(),
            request.raw_query(),
        )
    }

    /// 本地解析使用全部候选
    pub fn local(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    /// 镜像只保存基础层，因此只使用基础层的精确候选，必要时附带索引候选
    pub fn mirror(&self, include_index: bool) -> impl Iterator<Item = &Candidate> {
        self.candidates
            .iter()
            .filter(move |c| c.is_base() && (include_index || c.kind != CandidateKind::Index))
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

struct Builder<'a> {
    root: &'a Path,
    seen: HashSet<PathBuf>,
    candidates: Vec<Candidate>,
}

impl<'a> Builder<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            seen: HashSet::new(),
            candidates: Vec::new(),
        }
    }

    fn push(&mut self, layer: Option<&str>, kind: CandidateKind, relative: String) {
        let path = match layer {
            Some(l) => self.root.join(l).join(&relative),
            None => self.root.join(&relative),
        };
        if self.seen.insert(path.clone()) {
            self.candidates.push(Candidate {
                layer: layer.map(str::to_string),
                kind,
                relative,
                path,
            });
        }
    }

    fn finish(self) -> Vec<Candidate> {
        self.candidates
    }
}
