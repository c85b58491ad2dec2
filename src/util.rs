use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::param::STATUS_CODES;

/// Go 语言 `url.PathEscape` 的等价字符集：路径段中保留 `$ & + : = @`，
/// 其余非字母数字字符（除 `- _ . ~` 外）全部转义，`/ ? ;` 也会被转义。
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b':')
    .remove(b'=')
    .remove(b'@');

/// 拼接镜像 URL 时使用的字符集：只转义 URL 路径中不合法的字符，
/// 已有的 `%XX` 序列和 `/` 原样保留。
const URL_PATH: &AsciiSet = &PATH_SEGMENT
    .remove(b'/')
    .remove(b'%')
    .remove(b'!')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b',')
    .remove(b';');

pub struct HtmlBuilder {
    title: String,
    css: String,
    body: String,
}

impl HtmlBuilder {
    pub fn from_status_code(code: u16, note: Option<&str>) -> Self {
        let title = format!("{}", code);
        let css = r"
            body {
                width: 35em;
                margin: 0 auto;
                font-family: Tahoma, Verdana, Arial, sans-serif;
            }
            "
        .to_string();
        let description = match note {
            Some(n) => n,
            None => STATUS_CODES.get(&code).copied().unwrap_or("Unknown"),
        };
        let body = format!(
            r"
            <h1>{}</h1>
            <p>{}</p>
            ",
            code, description
        );
        Self { title, css, body }
    }

    pub fn build(&self) -> String {
        format!(
            r##"<!DOCTYPE html>
            <html>
                <head>
                    <meta charset="utf-8">
                    <title>{}</title>
                    <style>{}</style>
                </head>
                <body>
                {}
                </body>
            </html>"##,
            self.title, self.css, self.body
        )
    }
}

pub fn format_file_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.1} {}", size, units[unit_index])
}

/// 按 RFC1123 格式化时间，例如 `Mon, 02 Jan 2006 15:04:05 GMT`
pub fn format_http_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// 解析 `Last-Modified` 一类的 RFC1123 时间，无法解析时返回 `None`
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// 把查询串转义为单个路径段，等价于 `PathEscape("?" + query)`
pub fn escape_query_segment(raw_query: &str) -> String {
    utf8_percent_encode(&format!("?{}", raw_query), PATH_SEGMENT).to_string()
}

/// 为相对路径中 URL 不允许出现的字符做转义，用于拼接镜像地址
pub fn encode_url_path(relative: &str) -> String {
    utf8_percent_encode(relative, URL_PATH).to_string()
}

/// 把主机名与请求路径拼成 `host/a/b` 形式的相对路径。
///
/// 空段与 `.` 被丢弃，`..` 只会回退到主机目录为止，因此结果永远位于主机目录之内。
/// 与 `path.Join` 一样，结尾的 `/` 会被去掉。
pub fn join_host_path(host: &str, path: &str) -> String {
    let mut segments: Vec<&str> = vec![host];
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.len() > 1 {
                    segments.pop();
                }
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}
