//! Content policy checks run before any store is touched.
//!
//! A [`ContentPolicy`] turns a signature body into [`PolicyFinding`]s. Hard
//! findings block the unit of work; soft findings ride along as advisories.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::model::StoreKind;

/// Remote signature size limit, in characters.
pub const REMOTE_SIGNATURE_LIMIT: usize = 10_000;

/// An `<img>` element whose `src` is a `data:` URI.
static DATA_IMG_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*\ssrc\s*=\s*["']?\s*data:[^>]*>"#).expect("valid regex")
});

/// A URL-carrying attribute with a `data:` URI value. `srcset` may list it
/// after other candidates.
static DATA_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)\s(?:(?:src|background|poster)\s*=\s*(?:"\s*data:[^"]*"|'\s*data:[^']*'|data:[^\s>]*)|srcset\s*=\s*(?:"[^"]*\bdata:[^"]*"|'[^']*\bdata:[^']*'|data:[^\s>]*))"#,
    )
    .expect("valid regex")
});

/// A CSS `url(data:...)`, in a style attribute or a style block.
static DATA_CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)url\(\s*["']?\s*data:[^)]*\)"#).expect("valid regex")
});

static STYLE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<style\b").expect("valid regex")
});

/// What to do with `data:` URI images bound for the remote store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddedImagePolicy {
    /// Refuse the write.
    #[default]
    Reject,

    /// Remove the images and write the rest.
    Strip,
}

/// Whether a finding blocks the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Soft,
    Hard,
}

/// One result of a policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFinding {
    pub severity: Severity,

    /// Stable machine-readable code, e.g. `embedded-image`.
    pub code: String,

    pub message: String,
}

impl PolicyFinding {
    pub fn new(severity: Severity, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_hard(&self) -> bool {
        self.severity == Severity::Hard
    }
}

/// Validation oracle consulted by the coordinator.
pub trait ContentPolicy: Send + Sync {
    /// Evaluate `html` for a write to `target`.
    fn evaluate(&self, html: &str, target: StoreKind, images: EmbeddedImagePolicy)
        -> Vec<PolicyFinding>;
}

/// Built-in checks for the two store kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicContentPolicy;

impl ContentPolicy for BasicContentPolicy {
    fn evaluate(
        &self,
        html: &str,
        target: StoreKind,
        images: EmbeddedImagePolicy,
    ) -> Vec<PolicyFinding> {
        let mut findings = Vec::new();

        if html.trim().is_empty() {
            findings.push(PolicyFinding::new(
                Severity::Hard,
                "empty-body",
                "signature body is empty",
            ));
        }

        if target == StoreKind::Remote {
            if contains_embedded_images(html) {
                match images {
                    EmbeddedImagePolicy::Reject => findings.push(PolicyFinding::new(
                        Severity::Hard,
                        "embedded-image",
                        "embedded data: images are discarded by the remote store; host them or strip them",
                    )),
                    EmbeddedImagePolicy::Strip => findings.push(PolicyFinding::new(
                        Severity::Soft,
                        "embedded-image-stripped",
                        "embedded data: images will be removed from the remote copy",
                    )),
                }
            }

            let length = html.chars().count();
            if length > REMOTE_SIGNATURE_LIMIT {
                findings.push(PolicyFinding::new(
                    Severity::Hard,
                    "too-long",
                    format!(
                        "signature is {} characters; the remote store accepts at most {}",
                        length, REMOTE_SIGNATURE_LIMIT
                    ),
                ));
            }

            if STYLE_BLOCK.is_match(html) {
                findings.push(PolicyFinding::new(
                    Severity::Soft,
                    "style-block",
                    "<style> blocks are dropped by most webmail clients; prefer inline styles",
                ));
            }
        }

        findings
    }
}

/// Whether the HTML embeds binary data through a `data:` URI: an element
/// attribute (`src`, `srcset`, `background`, `poster`) or a CSS `url()`.
pub fn contains_embedded_images(html: &str) -> bool {
    DATA_ATTRIBUTE.is_match(html) || DATA_CSS_URL.is_match(html)
}

/// Remove embedded data.
///
/// `<img>` elements sourced from `data:` go entirely. Other `data:`
/// attributes are dropped from their element, and CSS `url(data:...)`
/// becomes `none`.
pub fn strip_embedded_images(html: &str) -> String {
    let html = DATA_IMG_ELEMENT.replace_all(html, "");
    let html = DATA_ATTRIBUTE.replace_all(&html, "");
    DATA_CSS_URL.replace_all(&html, "none").into_owned()
}
