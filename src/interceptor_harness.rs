//! Runs the shipped interceptor script in an embedded JavaScript engine
//!
//! `interceptor_dom.js` provides just enough of the browser (elements, events,
//! `URL`, `FormData`, history, `window.open`, `MutationObserver`) for the
//! script to install its hooks. Every navigation it triggers lands in
//! `__log`, which tests read back as JSON and compare against the server-side
//! rules in [`navigation`](crate::navigation).

use boa_engine::{Context, Source};
use serde_json::Value;

use crate::{interceptor, rewriter::RewriteContext};

const DOM_STUB: &str = include_str!("interceptor_dom.js");

/// One document with the interceptor installed
pub struct Page {
    context: Context,
}

impl Page {
    pub fn load(ctx: &RewriteContext) -> Self {
        let mut context = Context::default();
        for (origin, source) in [
            ("dom stub", DOM_STUB.to_string()),
            ("interceptor", interceptor::script_source(ctx)),
        ] {
            if let Err(err) = context.eval(Source::from_bytes(source.as_bytes())) {
                panic!("{} failed to load: {}", origin, err);
            }
        }
        Self { context }
    }

    /// Evaluate `code`, whose completion value must be a JSON string
    pub fn json(&mut self, code: &str) -> Value {
        let value = match self.context.eval(Source::from_bytes(code.as_bytes())) {
            Ok(value) => value,
            Err(err) => panic!("{}\nwhile evaluating:\n{}", err, code),
        };
        let text = value
            .to_string(&mut self.context)
            .unwrap()
            .to_std_string_escaped();
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("{}: {}", e, text))
    }
}

/// JavaScript string literal for `s`
pub fn js(s: &str) -> String {
    serde_json::to_string(s).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        links::ProxyEndpoint,
        navigation::{proxify, SearchEngine},
    };
    use url::Url;

    fn ctx(origin: &str) -> RewriteContext {
        RewriteContext::new(
            Url::parse(origin).unwrap(),
            ProxyEndpoint::new(&Url::parse("https://p.test").unwrap()),
            SearchEngine::new("www.google.com").unwrap(),
        )
    }

    /// Document URL and the href written in it
    const LINKS: &[(&str, &str)] = &[
        ("https://example.com/docs/page.html", "guide.html"),
        ("https://example.com/docs/page.html", "../up/x.html"),
        ("https://example.com/docs/page.html", "?page=2"),
        ("https://example.com/docs/page.html", "  spaced.html  "),
        ("https://example.com/docs/page.html", "//cdn.example/page"),
        ("https://example.com/docs/page.html", "https://Other.Example:443/a?b=1"),
        ("http://a.example:8080/dir/", "/about"),
        ("https://www.google.com/search?q=x", "/url?q=https://www.rust-lang.org/&sa=U"),
        ("https://www.google.com/search?q=x", "/url?q=https://b.example/&url=https://a.example/"),
        ("https://example.com/", "#top"),
        ("https://example.com/", "javascript:void(0)"),
        ("https://example.com/", "mailto:a@b.com"),
        ("https://example.com/", "https://p.test/proxy?u=aHR0cHM6Ly9leGFtcGxlLmNvbS8"),
    ];

    fn click(page: &mut Page, href: &str, init: &str) -> Value {
        page.json(&format!(
            "__log.navigations = []; \
             var ev = __click(__el('a', {{ href: {} }}), {}); \
             JSON.stringify({{ prevented: ev.defaultPrevented, navigations: __log.navigations }})",
            js(href),
            init
        ))
    }

    #[test]
    fn test_click_matches_server_rewrite() {
        for &(origin, href) in LINKS {
            let ctx = ctx(origin);
            let mut page = Page::load(&ctx);
            let result = click(&mut page, href, "{}");

            let expected = if ctx.proxy.is_proxied(href.trim()) {
                Some(href.trim().to_string())
            } else {
                proxify(href, &ctx)
            };
            match expected {
                Some(link) => {
                    assert_eq!(result["prevented"], true, "{} on {}", href, origin);
                    assert_eq!(result["navigations"][0]["url"], link.as_str(), "{} on {}", href, origin);
                    assert_eq!(result["navigations"].as_array().unwrap().len(), 1);
                }
                None => {
                    assert_eq!(result["prevented"], false, "{} on {}", href, origin);
                    assert!(result["navigations"].as_array().unwrap().is_empty());
                }
            }
        }
    }

    #[test]
    fn test_search_redirects_unwrap_in_query_order() {
        let ctx = ctx("https://www.google.com/search?q=x");
        let mut page = Page::load(&ctx);
        let result = click(&mut page, "/url?q=https://b.example/&url=https://a.example/", "{}");
        let link = result["navigations"][0]["url"].as_str().unwrap();
        assert_eq!(ctx.proxy.decode(link), "https://b.example/");
    }

    #[test]
    fn test_click_is_idempotent() {
        let ctx = ctx("https://example.com/docs/");
        let mut page = Page::load(&ctx);
        let navigations = page.json(
            "__log.navigations = []; \
             var a = __el('a', { href: 'guide.html' }); \
             __click(a); __click(a); \
             JSON.stringify(__log.navigations)",
        );
        assert_eq!(navigations[0], navigations[1]);

        let link = navigations[0]["url"].as_str().unwrap().to_string();
        assert_eq!(ctx.proxy.decode(&link), "https://example.com/docs/guide.html");

        // Clicking the already proxied link goes to the same place
        let again = click(&mut page, &link, "{}");
        assert_eq!(again["navigations"][0]["url"], link.as_str());

        let modified = click(&mut page, "guide.html", "{ ctrlKey: true }");
        assert_eq!(modified["navigations"][0]["url"], link.as_str());
        assert_eq!(modified["navigations"][0]["frame"], "_blank");
    }

    #[test]
    fn test_non_primary_click_is_ignored() {
        let mut page = Page::load(&ctx("https://example.com/"));
        let result = click(&mut page, "/next", "{ button: 1 }");
        assert_eq!(result["prevented"], false);
        assert!(result["navigations"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_post_form_submits_hidden_clone() {
        let ctx = ctx("https://shop.example/cart/");
        let mut page = Page::load(&ctx);
        let result = page.json(
            "var form = __el('form', { action: 'checkout', method: 'post' }); \
             __el('input', { name: 'item', value: '42' }, form); \
             __el('input', { name: 'qty', value: '3' }, form); \
             __el('input', { type: 'submit', value: 'Buy' }, form); \
             var ev = __submit(form); \
             JSON.stringify({ prevented: ev.defaultPrevented, navigations: __log.navigations, \
                              submitted: __log.submitted.map(__formSnapshot) })",
        );

        assert_eq!(result["prevented"], true);
        assert!(result["navigations"].as_array().unwrap().is_empty());
        let submitted = result["submitted"].as_array().unwrap();
        assert_eq!(submitted.len(), 1);

        let clone = &submitted[0];
        assert_eq!(clone["clone"], true);
        assert_eq!(clone["method"], "post");
        assert_eq!(
            clone["fields"],
            serde_json::json!([["hidden", "item", "42"], ["hidden", "qty", "3"]])
        );
        let action = clone["action"].as_str().unwrap();
        assert!(ctx.proxy.is_proxied(action));
        assert_eq!(ctx.proxy.decode(action), "https://shop.example/cart/checkout");
    }

    #[test]
    fn test_get_form_merges_fields() {
        let ctx = ctx("https://site.example/");
        let mut page = Page::load(&ctx);
        let navigations = page.json(
            "var form = __el('form', { action: '/find?lang=en&page=4' }); \
             __el('input', { name: 'page', value: '1' }, form); \
             __el('input', { name: 'term', value: 'a b' }, form); \
             __el('input', { type: 'checkbox', name: 'exact', value: 'on' }, form); \
             __submit(form); \
             JSON.stringify(__log.navigations)",
        );
        let link = navigations[0]["url"].as_str().unwrap();
        assert_eq!(
            ctx.proxy.decode(link),
            "https://site.example/find?lang=en&page=1&term=a+b"
        );
    }

    #[test]
    fn test_search_forms_go_to_engine() {
        let google = ctx("https://www.google.com/");
        let mut page = Page::load(&google);
        let result = page.json(
            "var form = __el('form', { action: '/search' }); \
             __el('input', { name: 'q', value: ' cats ' }, form); \
             var ev = __submit(form); \
             var blank = __el('form', { action: '/search' }); \
             __el('input', { name: 'q', value: '   ' }, blank); \
             var ev2 = __submit(blank); \
             JSON.stringify({ navigations: __log.navigations, blankPrevented: ev2.defaultPrevented })",
        );
        let navigations = result["navigations"].as_array().unwrap();
        assert_eq!(navigations.len(), 1);
        assert_eq!(
            google.proxy.decode(navigations[0]["url"].as_str().unwrap()),
            "https://www.google.com/search?q=cats"
        );
        assert_eq!(result["blankPrevented"], true);

        // A search box on any site is sent to the engine
        let site = ctx("https://site.example/");
        let mut page = Page::load(&site);
        let navigations = page.json(
            "var form = __el('form', { action: '/lookup' }); \
             __el('input', { type: 'search', name: 'term', value: 'rust' }, form); \
             __submit(form); \
             JSON.stringify(__log.navigations)",
        );
        assert_eq!(
            site.proxy.decode(navigations[0]["url"].as_str().unwrap()),
            "https://www.google.com/search?q=rust"
        );
    }

    #[test]
    fn test_inserted_nodes_are_rewritten() {
        let ctx = ctx("https://example.com/app/");
        let mut page = Page::load(&ctx);
        let result = page.json(
            "var box = __el('div', {}); \
             var a = __el('a', { href: '/later' }, box); \
             var f = __el('form', { action: 'post' }, box); \
             var s = __el('form', { action: 'https://www.google.com/search' }, box); \
             var frag = __el('a', { href: '#section' }, box); \
             __flushMutations(); \
             JSON.stringify({ link: a.getAttribute('href'), form: f.getAttribute('action'), \
                              search: s.getAttribute('action'), fragment: frag.getAttribute('href') })",
        );
        assert_eq!(result["link"], proxify("/later", &ctx).unwrap().as_str());
        assert_eq!(result["form"], proxify("post", &ctx).unwrap().as_str());
        assert_eq!(result["search"], "https://www.google.com/search");
        assert_eq!(result["fragment"], "#section");
    }

    #[test]
    fn test_history_and_window_open_are_proxied() {
        let ctx = ctx("https://example.com/app/");
        let mut page = Page::load(&ctx);
        let result = page.json(
            "history.pushState({}, '', '/next'); \
             history.replaceState(null, '', '#frag'); \
             window.open('/popup', 'side'); \
             JSON.stringify({ history: __log.history, navigations: __log.navigations })",
        );
        assert_eq!(
            result["history"],
            serde_json::json!([proxify("/next", &ctx).unwrap(), "#frag"])
        );
        assert_eq!(
            result["navigations"][0]["url"],
            proxify("/popup", &ctx).unwrap().as_str()
        );
        assert_eq!(result["navigations"][0]["frame"], "side");
    }
}
