//! Link-dispatch parser for bot replies.
//!
//! Bot replies reference documentation with inline markup of the form
//! `[Display Text](kind:productId:contentId)` where `kind` is one of
//! `article`, `resource` or `video`. Parsing is pure: it extracts the
//! references in first-occurrence order and produces a clean string with
//! each reference replaced by its display text. Markup with any other kind
//! is left untouched.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::Error;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[expect(clippy::unwrap_used)]
    Regex::new(r"\[([^\[\]]+)\]\(([A-Za-z]+):([^:\s()]+):([^\s()]+)\)").unwrap()
});

/// Kind of documentation content a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Article,
    Resource,
    Video,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Article => "article",
            ContentKind::Resource => "resource",
            ContentKind::Video => "video",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "article" => Ok(ContentKind::Article),
            "resource" => Ok(ContentKind::Resource),
            "video" => Ok(ContentKind::Video),
            other => Err(Error::Validation(format!("unknown content kind '{other}'"))),
        }
    }
}

/// One structured reference extracted from a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLink {
    pub kind: ContentKind,
    pub product_id: String,
    pub content_id: String,
    pub display_text: String,
}

impl ContentLink {
    /// Router path of the product docs page focused on this item.
    pub fn docs_target(&self) -> String {
        format!(
            "/product/{}/docs?type={}&id={}",
            self.product_id, self.kind, self.content_id
        )
    }

    /// Direct per-article page; only articles have one.
    pub fn article_target(&self) -> Option<String> {
        (self.kind == ContentKind::Article)
            .then(|| format!("/product/{}/article/{}", self.product_id, self.content_id))
    }

    /// Preferred navigation target.
    pub fn target(&self) -> String {
        self.docs_target()
    }
}

/// A reply split into display text and link buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedReply {
    pub clean_text: String,
    pub links: Vec<ContentLink>,
}

fn link_from_captures(caps: &Captures<'_>) -> Option<ContentLink> {
    let kind = caps[2].parse::<ContentKind>().ok()?;
    Some(ContentLink {
        kind,
        product_id: caps[3].to_string(),
        content_id: caps[4].to_string(),
        display_text: caps[1].to_string(),
    })
}

/// Extract references in first-occurrence order. Repeats of the same
/// (kind, product, content) are listed once.
pub fn extract_links(text: &str) -> Vec<ContentLink> {
    let mut seen = HashSet::new();
    LINK_RE
        .captures_iter(text)
        .filter_map(|caps| link_from_captures(&caps))
        .filter(|link| {
            seen.insert((link.kind, link.product_id.clone(), link.content_id.clone()))
        })
        .collect()
}

fn strip_once(text: &str) -> String {
    LINK_RE
        .replace_all(text, |caps: &Captures<'_>| match link_from_captures(caps) {
            Some(link) => link.display_text,
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Replace every well-formed reference with its display text.
///
/// Stripping an inner reference can complete an outer one, as in
/// `[[A](article:p:1)](video:p:2)`, so passes repeat until nothing changes.
/// Every productive pass shortens the text.
pub fn strip_links(text: &str) -> String {
    let mut current = strip_once(text);
    loop {
        let next = strip_once(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

/// Extract and strip in one pass over the reply.
pub fn parse_reply(text: &str) -> ParsedReply {
    ParsedReply {
        clean_text: strip_links(text),
        links: extract_links(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_article_reference() {
        let parsed = parse_reply("See [Setup Guide](article:prod-1:art-42) for details.");

        assert_eq!(parsed.clean_text, "See Setup Guide for details.");
        assert_eq!(
            parsed.links,
            vec![ContentLink {
                kind: ContentKind::Article,
                product_id: "prod-1".to_string(),
                content_id: "art-42".to_string(),
                display_text: "Setup Guide".to_string(),
            }]
        );
    }

    #[test]
    fn builds_navigation_targets() {
        let links = extract_links(
            "[Guide](article:p1:a1) and [Deck](resource:p1:r9) and [Tour](video:p2:v3)",
        );
        assert_eq!(links[0].docs_target(), "/product/p1/docs?type=article&id=a1");
        assert_eq!(links[0].article_target().as_deref(), Some("/product/p1/article/a1"));
        assert_eq!(links[1].target(), "/product/p1/docs?type=resource&id=r9");
        assert_eq!(links[1].article_target(), None);
        assert_eq!(links[2].target(), "/product/p2/docs?type=video&id=v3");
    }

    #[test]
    fn preserves_first_occurrence_order_and_dedups() {
        let text = "[B](video:p:2) then [A](article:p:1) then [B again](video:p:2)";
        let links = extract_links(text);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].content_id, "2");
        assert_eq!(links[0].display_text, "B");
        assert_eq!(links[1].content_id, "1");
        assert_eq!(strip_links(text), "B then A then B again");
    }

    #[test]
    fn malformed_kind_is_ignored_and_left_in_place() {
        let text = "Try [this](podcast:p1:x1) or [that](article:p1:a1).";
        let parsed = parse_reply(text);
        assert_eq!(parsed.links.len(), 1);
        assert_eq!(parsed.links[0].kind, ContentKind::Article);
        assert_eq!(parsed.clean_text, "Try [this](podcast:p1:x1) or that.");
    }

    #[test]
    fn ordinary_markdown_links_are_untouched() {
        let text = "Read [the docs](https://example.com/docs) first.";
        let parsed = parse_reply(text);
        assert!(parsed.links.is_empty());
        assert_eq!(parsed.clean_text, text);
    }

    #[test]
    fn plain_text_has_no_links() {
        let parsed = parse_reply("No references here.");
        assert!(parsed.links.is_empty());
        assert_eq!(parsed.clean_text, "No references here.");
    }

    #[test]
    fn stripped_text_reparses_to_nothing() {
        let inputs = [
            "",
            "plain",
            "See [Setup Guide](article:prod-1:art-42) for details.",
            "[A](article:p:1)[B](resource:p:2)[C](video:q:3)",
            "Mixed [x](bogus:p:1) and [y](video:p:9) and [z](article:p:1)",
            "[[A](article:p:1)](video:p:2)",
            "[[[A](article:p:1)](video:p:2)](resource:p:3)",
        ];
        for input in inputs {
            let first = parse_reply(input);
            assert!(extract_links(&first.clean_text).is_empty(), "input: {input}");
            assert_eq!(extract_links(input), first.links, "input: {input}");
        }
    }

    #[test]
    fn nested_markup_strips_to_innermost_text() {
        let input = "[[A](article:p:1)](video:p:2)";
        assert_eq!(strip_links(input), "A");

        let links = extract_links(input);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].kind, ContentKind::Article);
    }

    #[test]
    fn unknown_kind_is_a_validation_error() {
        assert_eq!("video".parse::<ContentKind>().ok(), Some(ContentKind::Video));
        assert!(matches!(
            "Article".parse::<ContentKind>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn link_buttons_match_clean_text_spans() {
        let input = "Start with [Install](article:p1:a1), then watch [Intro](video:p1:v1).";
        let parsed = parse_reply(input);
        for link in &parsed.links {
            assert!(parsed.clean_text.contains(&link.display_text));
        }
        // Rebuilding the markup from the buttons recovers the original reply.
        let mut rebuilt = parsed.clean_text.clone();
        for link in &parsed.links {
            let markup = format!(
                "[{}]({}:{}:{})",
                link.display_text, link.kind, link.product_id, link.content_id
            );
            rebuilt = rebuilt.replacen(&link.display_text, &markup, 1);
        }
        assert_eq!(rebuilt, input);
    }
}
