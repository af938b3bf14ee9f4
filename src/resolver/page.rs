//! Markup extraction for listing and episode pages
//!
//! The pages are WordPress output with a stable shape, so a handful of
//! regular expressions is enough: entry titles, the `nav-previous`
//! pagination link and the `video-js` player tag.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

// Patterns are literals exercised by the tests below
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern compiles")
}

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
});
static H2: LazyLock<Regex> = LazyLock::new(|| compile(r"(?is)<h2\b([^>]*)>(.*?)</h2>"));
static ANCHOR: LazyLock<Regex> = LazyLock::new(|| compile(r"(?is)<a\b([^>]*)>"));
static DIV_OPEN: LazyLock<Regex> = LazyLock::new(|| compile(r"(?is)<div\b([^>]*)>"));
static VIDEO: LazyLock<Regex> = LazyLock::new(|| compile(r"(?is)<video\b([^>]*)>"));
static TITLE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?is)<title\b[^>]*>(.*?)</title>"));
static TAG: LazyLock<Regex> = LazyLock::new(|| compile(r"(?s)<[^>]*>"));
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| compile(r"&(#[xX][0-9A-Fa-f]+|#[0-9]+|[A-Za-z]+);"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| compile(r"\s+"));

/// Parse the attributes of an opening tag into a lower-cased name map
fn attributes(raw: &str) -> HashMap<String, String> {
    ATTRIBUTE
        .captures_iter(raw)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| decode_entities(m.as_str()))
                .unwrap_or_default();
            Some((name, value))
        })
        .collect()
}

fn has_class(attrs: &HashMap<String, String>, class: &str) -> bool {
    attrs
        .get("class")
        .is_some_and(|value| value.split_whitespace().any(|c| c == class))
}

fn has_rel(attrs: &HashMap<String, String>, rel: &str) -> bool {
    attrs
        .get("rel")
        .is_some_and(|value| value.split_whitespace().any(|r| r.eq_ignore_ascii_case(rel)))
}

/// Episode links on a season index page, in page order
pub fn entry_links(html: &str, base: &Url) -> Vec<Url> {
    let mut links = Vec::new();
    for caps in H2.captures_iter(html) {
        let attrs = attributes(caps.get(1).map_or("", |m| m.as_str()));
        if !has_class(&attrs, "entry-title") {
            continue;
        }
        let inner = caps.get(2).map_or("", |m| m.as_str());
        let href = ANCHOR
            .captures_iter(inner)
            .map(|a| attributes(a.get(1).map_or("", |m| m.as_str())))
            .find(|a| has_rel(a, "bookmark"))
            .and_then(|a| a.get("href").cloned());
        if let Some(href) = href
            && let Ok(url) = base.join(href.trim())
            && !links.contains(&url)
        {
            links.push(url);
        }
    }
    links
}

/// The "older entries" link of a paginated index, if any
pub fn next_page(html: &str, base: &Url) -> Option<Url> {
    let nav = DIV_OPEN.captures_iter(html).find(|caps| {
        let attrs = attributes(caps.get(1).map_or("", |m| m.as_str()));
        has_class(&attrs, "nav-previous")
    })?;
    let rest = &html[nav.get(0)?.end()..];
    let inner = &rest[..rest.find("</div>").unwrap_or(rest.len())];
    let anchor = ANCHOR.captures(inner)?;
    let href = attributes(anchor.get(1)?.as_str()).remove("href")?;
    base.join(href.trim()).ok()
}

/// `data-apireq` payloads of every `video-js` player on the page
pub fn player_requests(html: &str) -> Vec<String> {
    VIDEO
        .captures_iter(html)
        .map(|caps| attributes(caps.get(1).map_or("", |m| m.as_str())))
        .filter(|attrs| has_class(attrs, "video-js"))
        .filter_map(|mut attrs| attrs.remove("data-apireq"))
        .filter(|req| !req.trim().is_empty())
        .collect()
}

/// Episode title: the first entry title, else the document title minus the site suffix
pub fn page_title(html: &str) -> Option<String> {
    let from_entry = H2
        .captures_iter(html)
        .find(|caps| has_class(&attributes(caps.get(1).map_or("", |m| m.as_str())), "entry-title"))
        .and_then(|caps| caps.get(2))
        .map(|m| text_content(m.as_str()))
        .filter(|t| !t.is_empty());
    if from_entry.is_some() {
        return from_entry;
    }

    let document_title = text_content(TITLE.captures(html)?.get(1)?.as_str());
    let stripped = strip_site_suffix(&document_title);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Drop ` – Anime1.me 動畫線上看` style decoration from a document title
pub fn strip_site_suffix(title: &str) -> &str {
    [" – ", " — ", " | ", " - Anime1"]
        .iter()
        .filter_map(|sep| title.find(sep))
        .min()
        .map_or(title, |idx| &title[..idx])
        .trim()
}

/// Inner text of a fragment: tags removed, entities decoded, whitespace collapsed
pub fn text_content(fragment: &str) -> String {
    let without_tags = TAG.replace_all(fragment, "");
    let decoded = decode_entities(&without_tags);
    WHITESPACE.replace_all(decoded.trim(), " ").into_owned()
}

/// Decode the HTML entities WordPress emits in titles and attributes
pub fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some(' '),
                    "ndash" => Some('–'),
                    "mdash" => Some('—'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_PAGE: &str = r#"
<html><body>
<article>
  <header class="entry-header">
    <h2 class="entry-title"><a href="https://anime1.me/22503" rel="bookmark">某動畫 [03]</a></h2>
  </header>
</article>
<article>
  <h2 class="entry-title"><a href="/22402" rel="bookmark">某動畫 [02]</a></h2>
</article>
<aside><h2 class="widget-title"><a href="/other" rel="bookmark">Widget</a></h2></aside>
<nav class="navigation posts-navigation">
  <div class="nav-links"><div class="nav-previous"><a href="https://anime1.me/category/x/page/2" >較舊文章</a></div></div>
</nav>
</body></html>"#;

    const EPISODE_PAGE: &str = r#"
<html><head><title>某動畫 第二季 [05] &#8211; Anime1.me 動畫線上看</title></head>
<body>
<h2 class="entry-title">某動畫 第二季 [05]</h2>
<div class="vjscontainer">
<video class="video-js vjs-big-play-centered" data-apireq="%7B%22c%22%3A%221%22%7D" data-vid="abc" controls></video>
</div>
</body></html>"#;

    fn base() -> Url {
        Url::parse("https://anime1.me/category/x").unwrap()
    }

    #[test]
    fn entry_links_follow_page_order_and_skip_widgets() {
        let links = entry_links(INDEX_PAGE, &base());
        let links: Vec<&str> = links.iter().map(Url::as_str).collect();
        assert_eq!(
            links,
            vec!["https://anime1.me/22503", "https://anime1.me/22402"]
        );
    }

    #[test]
    fn next_page_found_inside_nav_previous() {
        let next = next_page(INDEX_PAGE, &base()).unwrap();
        assert_eq!(next.as_str(), "https://anime1.me/category/x/page/2");
    }

    #[test]
    fn last_index_page_has_no_next() {
        assert!(next_page("<div class=\"nav-next\"><a href=\"/p/1\">x</a></div>", &base()).is_none());
    }

    #[test]
    fn player_request_extracted() {
        assert_eq!(player_requests(EPISODE_PAGE), vec!["%7B%22c%22%3A%221%22%7D"]);
        assert!(player_requests("<video class=\"other\" data-apireq=\"x\">").is_empty());
    }

    #[test]
    fn title_prefers_entry_title() {
        assert_eq!(page_title(EPISODE_PAGE).unwrap(), "某動畫 第二季 [05]");
    }

    #[test]
    fn title_falls_back_to_document_title() {
        let html = "<title>Show 01 &#8211; Anime1.me 動畫線上看</title>";
        assert_eq!(page_title(html).unwrap(), "Show 01");
    }

    #[test]
    fn entities_decode() {
        assert_eq!(decode_entities("A &amp; B &#8211; C &#x4E00; &bogus;"), "A & B – C 一 &bogus;");
    }

    #[test]
    fn text_content_strips_nested_markup() {
        assert_eq!(
            text_content("<a href=\"/1\">  Show <b>01</b>\n</a>"),
            "Show 01"
        );
    }
}
