//! 页面资源发现与引用改写
//!
//! 扫描 `<img src>` 与 `<link rel=stylesheet href>`，把属性值解析为绝对 URL，
//! 按 URL 去重但保留每一处属性位置；改写时按位置替换为存储路径。

use reqwest::Url;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

/// 资源类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Stylesheet,
}

/// 页面中的一处资源引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    /// 解析后的绝对 URL
    pub url: String,
    pub kind: ResourceKind,
    /// 属性值在原始页面中的字节范围（不含引号）
    pub span: Range<usize>,
}

/// 一个页面的全部资源引用
#[derive(Debug, Clone, Default)]
pub struct ResourceSet {
    refs: Vec<ResourceRef>,
    urls: Vec<String>,
    seen: HashSet<String>,
}

impl ResourceSet {
    fn add(&mut self, reference: ResourceRef) {
        if self.seen.insert(reference.url.clone()) {
            self.urls.push(reference.url.clone());
        }
        self.refs.push(reference);
    }

    /// 去重后的资源 URL，按首次出现顺序
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// 全部引用位置
    pub fn references(&self) -> &[ResourceRef] {
        &self.refs
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// 发现页面引用的图片与样式表
pub fn discover_resources(page_url: &str, markup: &str) -> ResourceSet {
    let mut set = ResourceSet::default();
    let Ok(base) = Url::parse(page_url) else {
        return set;
    };

    let mut scanner = TagScanner::new(markup);
    while let Some(tag) = scanner.next_tag() {
        let reference = match tag.name.as_str() {
            "img" => tag.attr("src").map(|value| (ResourceKind::Image, value)),
            "link" if tag.attr("rel").is_some_and(|rel| is_stylesheet(&rel.text)) => {
                tag.attr("href").map(|value| (ResourceKind::Stylesheet, value))
            }
            _ => None,
        };

        if let Some((kind, value)) = reference
            && let Some(url) = resolve(&base, &value.text)
        {
            set.add(ResourceRef {
                url,
                kind,
                span: value.span.clone(),
            });
        }
    }
    set
}

/// 用存储路径替换已成功抓取的资源引用
///
/// `mapping` 为 资源 URL → content_id；未出现在其中的引用保持原样
pub fn rewrite_references(
    markup: &str,
    resources: &ResourceSet,
    mapping: &HashMap<String, String>,
    prefix: &str,
) -> String {
    let prefix = prefix.trim_end_matches('/');
    let mut out = String::with_capacity(markup.len());
    let mut cursor = 0;

    for reference in &resources.refs {
        let Some(content_id) = mapping.get(&reference.url) else {
            continue;
        };
        if reference.span.start < cursor || reference.span.end > markup.len() {
            continue;
        }
        out.push_str(&markup[cursor..reference.span.start]);
        out.push_str(prefix);
        out.push('/');
        out.push_str(content_id);
        cursor = reference.span.end;
    }
    out.push_str(&markup[cursor..]);
    out
}

fn is_stylesheet(rel: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|token| token.eq_ignore_ascii_case("stylesheet"))
}

/// 解析为绝对 http(s) URL，去掉片段
fn resolve(base: &Url, value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let mut url = base.join(value).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

// ========== 标签扫描 ==========

struct AttrValue {
    text: String,
    span: Range<usize>,
}

struct Tag {
    name: String,
    attrs: Vec<(String, AttrValue)>,
}

impl Tag {
    fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }
}

/// 逐个读取开始标签，跳过注释与 script/style 内容
struct TagScanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> TagScanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn bytes(&self) -> &'a [u8] {
        self.src.as_bytes()
    }

    fn next_tag(&mut self) -> Option<Tag> {
        loop {
            let offset = self.src[self.pos..].find('<')?;
            self.pos += offset + 1;

            let rest = &self.src[self.pos..];
            if rest.starts_with("!--") {
                self.skip_past("-->");
                continue;
            }
            if !rest.starts_with(|c: char| c.is_ascii_alphabetic()) {
                continue;
            }

            let name = self.read_name().to_ascii_lowercase();
            let attrs = self.read_attrs();

            if name == "script" || name == "style" {
                self.skip_raw_text(&name);
            }
            return Some(Tag { name, attrs });
        }
    }

    fn skip_past(&mut self, marker: &str) {
        match self.src[self.pos..].find(marker) {
            Some(i) => self.pos += i + marker.len(),
            None => self.pos = self.src.len(),
        }
    }

    /// 跳过 script/style 的原始文本直到对应的结束标签
    fn skip_raw_text(&mut self, name: &str) {
        let closing = format!("</{}", name);
        match find_ignore_case(&self.bytes()[self.pos..], closing.as_bytes()) {
            Some(i) => self.pos += i,
            None => self.pos = self.src.len(),
        }
    }

    fn read_name(&mut self) -> &'a str {
        let start = self.pos;
        let bytes = self.bytes();
        while self.pos < bytes.len()
            && !bytes[self.pos].is_ascii_whitespace()
            && !matches!(bytes[self.pos], b'>' | b'/' | b'=')
        {
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn read_attrs(&mut self) -> Vec<(String, AttrValue)> {
        let mut attrs = Vec::new();
        let bytes = self.bytes();

        loop {
            self.skip_whitespace();
            if self.pos >= bytes.len() {
                return attrs;
            }
            match bytes[self.pos] {
                b'>' => {
                    self.pos += 1;
                    return attrs;
                }
                b'/' | b'=' => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }

            let key = self.read_name().to_ascii_lowercase();
            self.skip_whitespace();
            if self.pos < bytes.len() && bytes[self.pos] == b'=' {
                self.pos += 1;
                self.skip_whitespace();
                let value = self.read_value();
                attrs.push((key, value));
            } else {
                let empty = AttrValue {
                    text: String::new(),
                    span: self.pos..self.pos,
                };
                attrs.push((key, empty));
            }
        }
    }

    fn read_value(&mut self) -> AttrValue {
        let bytes = self.bytes();
        let (start, end) = match bytes.get(self.pos) {
            Some(&quote @ (b'"' | b'\'')) => {
                let start = self.pos + 1;
                let end = self.src[start..]
                    .find(quote as char)
                    .map(|i| start + i)
                    .unwrap_or(self.src.len());
                self.pos = (end + 1).min(self.src.len());
                (start, end)
            }
            _ => {
                let start = self.pos;
                while self.pos < bytes.len()
                    && !bytes[self.pos].is_ascii_whitespace()
                    && bytes[self.pos] != b'>'
                {
                    self.pos += 1;
                }
                (start, self.pos)
            }
        };

        AttrValue {
            text: decode_entities(&self.src[start..end]),
            span: start..end,
        }
    }
}

/// 忽略 ASCII 大小写查找子串，`needle` 须为小写
fn find_ignore_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let first = *needle.first()?;
    let mut start = 0;
    while start + needle.len() <= haystack.len() {
        let offset = haystack[start..]
            .iter()
            .position(|b| b.to_ascii_lowercase() == first)?;
        let at = start + offset;
        let candidate = haystack.get(at..at + needle.len())?;
        if candidate.eq_ignore_ascii_case(needle) {
            return Some(at);
        }
        start = at + 1;
    }
    None
}

/// 只处理属性值中常见的实体
fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}
