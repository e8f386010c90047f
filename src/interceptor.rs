//! Injected runtime interceptor and status watermark
//!
//! The interceptor is a static script compiled into the binary and
//! parameterized per document with a JSON config object. It re-applies the
//! rules in [`navigation`](crate::navigation) to clicks, form submissions,
//! history updates, `window.open` and nodes inserted after load.

use serde_json::json;

use crate::rewriter::RewriteContext;

const INTERCEPTOR_JS: &str = include_str!("interceptor.js");
const CONFIG_PLACEHOLDER: &str = "__FRAMEPROXY_CONFIG__";

/// Attribute identifying the injected script element
pub const SCRIPT_MARKER: &str = r#"data-frameproxy="interceptor""#;
/// Element id of the status watermark
pub const WATERMARK_ID: &str = "frameproxy-watermark";
/// Delay before the watermark fades out
pub const WATERMARK_FADE_MS: u32 = 5000;

/// The interceptor `<script>` element for one document
pub fn script_tag(ctx: &RewriteContext) -> String {
    format!("<script {}>{}</script>", SCRIPT_MARKER, script_source(ctx))
}

/// Interceptor source parameterized for one document
pub fn script_source(ctx: &RewriteContext) -> String {
    let config = json!({
        "proxyEndpoint": ctx.proxy.as_str(),
        "originUrl": ctx.origin_url.as_str(),
        "searchUrl": ctx.search.search_base().as_str(),
        "searchHost": ctx.search.host(),
    });
    INTERCEPTOR_JS.replacen(CONFIG_PLACEHOLDER, &script_safe(&config.to_string()), 1)
}

/// Keep JSON embedded in a script element from terminating it early
fn script_safe(json: &str) -> String {
    json.replace("</", "<\\/")
        .replace("<!--", "<\\!--")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Cosmetic "proxied" badge that fades after [`WATERMARK_FADE_MS`]
pub fn watermark() -> String {
    format!(
        concat!(
            r#"<div id="{id}" style="position:fixed;top:0;right:0;z-index:2147483647;"#,
            r#"padding:8px 12px;border-bottom-left-radius:6px;color:#fff;"#,
            r#"background:linear-gradient(135deg,rgba(59,130,246,.9),rgba(147,51,234,.9));"#,
            r#"font:500 12px -apple-system,BlinkMacSystemFont,'Segoe UI',Roboto,sans-serif;"#,
            r#"box-shadow:0 2px 10px rgba(0,0,0,.2);transition:opacity .5s">Proxied navigation active</div>"#,
            r#"<script>setTimeout(function(){{var w=document.getElementById('{id}');"#,
            r#"if(w){{w.style.opacity='0.3';w.style.pointerEvents='none';}}}},{fade});</script>"#,
        ),
        id = WATERMARK_ID,
        fade = WATERMARK_FADE_MS,
    )
}
