//! Markup rewriter
//!
//! Streams a fetched HTML document through `lol_html`, re-routing every
//! navigation reference through the proxy endpoint and turning every
//! subresource reference into a direct absolute URL. The interceptor script
//! and the status watermark are injected at the start of `<head>` and
//! `<body>`; injected markup is never itself rewritten.

use lol_html::{element, end, html_content::ContentType, text, HtmlRewriter, Settings};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::cell::Cell;
use tracing::{debug, warn};
use url::Url;

use crate::{
    interceptor,
    links::ProxyEndpoint,
    navigation::{self, SearchEngine},
};

static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*['"]?([^'")]*?)['"]?\s*\)"#).expect("static regex")
});

static META_REFRESH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^\s*(\d+)\s*[;,]\s*url\s*=\s*['"]?([^'"]*?)['"]?\s*$"#).expect("static regex")
});

/// Anti-framing patterns neutralized on search engine pages
static FRAMEBUSTERS: Lazy<[(Regex, &'static str); 3]> = Lazy::new(|| {
    [
        (
            Regex::new(r"(?i)if\s*\(\s*top\s*!=\s*self\s*\)[^}]*\}").expect("static regex"),
            "",
        ),
        (
            Regex::new(r"(?i)window\.top\s*!==?\s*window\.self").expect("static regex"),
            "false",
        ),
        (
            Regex::new(r"(?i)parent\s*!==?\s*window").expect("static regex"),
            "false",
        ),
    ]
});

/// Per-document state threaded through the rewriter
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// True URL of the fetched document, after redirects
    pub origin_url: Url,
    /// This proxy's externally visible rewriting endpoint
    pub proxy: ProxyEndpoint,
    pub search: SearchEngine,
}

impl RewriteContext {
    pub fn new(origin_url: Url, proxy: ProxyEndpoint, search: SearchEngine) -> Self {
        Self {
            origin_url,
            proxy,
            search,
        }
    }

    pub fn is_search_origin(&self) -> bool {
        self.search.matches(&self.origin_url)
    }
}

/// Rewrite a whole HTML document. Never fails: if the tokenizer gives up,
/// the original document is returned.
pub fn rewrite(html: &str, ctx: &RewriteContext) -> String {
    let rewritten = match rewrite_markup(html, ctx) {
        Ok(output) => output,
        Err(err) => {
            warn!(origin = %ctx.origin_url, error = %err, "HTML rewrite failed, serving original");
            return html.to_string();
        }
    };

    if ctx.is_search_origin() {
        neutralize_framebusters(&rewritten)
    } else {
        rewritten
    }
}

fn rewrite_markup(html: &str, ctx: &RewriteContext) -> Result<String, lol_html::errors::RewritingError> {
    let script = interceptor::script_tag(ctx);
    let watermark = interceptor::watermark();
    let script_injected = Cell::new(false);
    let watermark_injected = Cell::new(false);
    let mut style_buffer = String::new();

    let mut output = Vec::with_capacity(html.len() + script.len() + watermark.len());
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("head", |el| {
                    if !script_injected.replace(true) {
                        el.prepend(&script, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("body", |el| {
                    if !watermark_injected.replace(true) {
                        el.prepend(&watermark, ContentType::Html);
                    }
                    if !script_injected.replace(true) {
                        el.prepend(&script, ContentType::Html);
                    }
                    Ok(())
                }),
                element!("[href]", |el| {
                    let tag = el.tag_name();
                    if tag.eq_ignore_ascii_case("base") {
                        return Ok(());
                    }
                    if tag.eq_ignore_ascii_case("link") {
                        rewrite_attribute(el, "href", |v| navigation::absolutize(v, ctx));
                    } else {
                        rewrite_attribute(el, "href", |v| navigation::proxify(v, ctx));
                    }
                    Ok(())
                }),
                element!("[src]", |el| {
                    rewrite_attribute(el, "src", |v| navigation::absolutize(v, ctx));
                    Ok(())
                }),
                element!("[srcset]", |el| {
                    rewrite_attribute(el, "srcset", |v| rewrite_srcset(v, ctx));
                    Ok(())
                }),
                element!("form[action]", |el| {
                    rewrite_attribute(el, "action", |v| rewrite_action(v, ctx));
                    Ok(())
                }),
                element!("meta[http-equiv]", |el| {
                    let is_refresh = el
                        .get_attribute("http-equiv")
                        .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"));
                    if is_refresh {
                        rewrite_attribute(el, "content", |v| rewrite_meta_refresh(v, ctx));
                    }
                    Ok(())
                }),
                element!("[style]", |el| {
                    rewrite_attribute(el, "style", |v| {
                        let css = rewrite_css(v, ctx);
                        (css != v).then_some(css)
                    });
                    Ok(())
                }),
                text!("style", move |chunk| {
                    style_buffer.push_str(chunk.as_str());
                    if chunk.last_in_text_node() {
                        let css = rewrite_css(&std::mem::take(&mut style_buffer), ctx);
                        chunk.replace(&css, ContentType::Html);
                    } else {
                        chunk.remove();
                    }
                    Ok(())
                }),
            ],
            document_content_handlers: vec![end!(|end| {
                if !script_injected.replace(true) {
                    end.append(&script, ContentType::Html);
                }
                if !watermark_injected.replace(true) {
                    end.append(&watermark, ContentType::Html);
                }
                Ok(())
            })],
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter.write(html.as_bytes())?;
    rewriter.end()?;

    Ok(String::from_utf8_lossy(&output).into_owned())
}

/// Apply `rewrite` to one attribute; `None` leaves the attribute byte-for-byte as it was
fn rewrite_attribute<F>(el: &mut lol_html::html_content::Element, name: &str, rewrite: F)
where
    F: FnOnce(&str) -> Option<String>,
{
    let Some(raw) = el.get_attribute(name) else {
        return;
    };
    let value = html_escape::decode_html_entities(&raw);
    match rewrite(&value) {
        Some(rewritten) if rewritten != value => {
            if let Err(err) = el.set_attribute(name, &rewritten) {
                debug!(attribute = name, error = %err, "Failed to set rewritten attribute");
            }
        }
        Some(_) => {}
        None => {
            if navigation::classify(&value).is_navigable() {
                debug!(attribute = name, value = %value, "Reference left unchanged");
            }
        }
    }
}

/// Form actions re-enter the proxy, except the search engine's own query
/// form, which the interceptor handles client-side
fn rewrite_action(action: &str, ctx: &RewriteContext) -> Option<String> {
    if let Ok(resolved) = navigation::resolve_reference(action, &ctx.origin_url) {
        if ctx.search.is_search_action(&resolved) {
            return None;
        }
    }
    navigation::proxify(action, ctx)
}

/// `N;url=<target>` with the target proxied and the delay preserved
fn rewrite_meta_refresh(content: &str, ctx: &RewriteContext) -> Option<String> {
    let caps = META_REFRESH.captures(content)?;
    let delay = caps.get(1)?.as_str();
    let target = navigation::proxify(caps.get(2)?.as_str(), ctx)?;
    Some(format!("{};url={}", delay, target))
}

fn rewrite_srcset(srcset: &str, ctx: &RewriteContext) -> Option<String> {
    let candidates: Vec<String> = srcset
        .split(',')
        .map(|candidate| {
            let candidate = candidate.trim();
            let (url, descriptor) = candidate
                .split_once(char::is_whitespace)
                .unwrap_or((candidate, ""));
            match navigation::absolutize(url, ctx) {
                Some(abs) if descriptor.is_empty() => abs,
                Some(abs) => format!("{} {}", abs, descriptor.trim()),
                None => candidate.to_string(),
            }
        })
        .collect();
    Some(candidates.join(", "))
}

/// Absolutize every `url(...)` in a stylesheet fragment against the origin
pub fn rewrite_css(css: &str, ctx: &RewriteContext) -> String {
    CSS_URL
        .replace_all(css, |caps: &Captures| {
            let reference = &caps[1];
            match navigation::absolutize(reference, ctx) {
                Some(abs) => format!("url(\"{}\")", abs),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn neutralize_framebusters(html: &str) -> String {
    FRAMEBUSTERS
        .iter()
        .fold(html.to_string(), |doc, (pattern, replacement)| {
            pattern.replace_all(&doc, *replacement).into_owned()
        })
}
