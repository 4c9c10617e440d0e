//! Signature file composition.
//!
//! A `.mailsignature` file is a MIME header block, a blank line, then an
//! HTML fragment. The content region is the inner HTML of the `<body>`
//! element, or everything after the headers when there is none. Writes
//! replace the content region only; every other byte of the template file
//! survives.

use regex::{NoExpand, Regex};
use std::ops::Range;
use std::sync::LazyLock;

static BODY_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body\b[^>]*>").expect("valid regex"));

static BODY_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</body\s*>").expect("valid regex"));

static MESSAGE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^Message-Id:[^\r\n]*").expect("valid regex"));

const BODY_STYLE: &str = "word-wrap: break-word; -webkit-nbsp-mode: space; line-break: after-white-space;";

/// A parsed signature file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDocument {
    raw: String,
    header_end: usize,
    region: Range<usize>,
}

impl SignatureDocument {
    /// Split a file into header block and content region. Never fails; a
    /// file that does not open with header lines is all body.
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let header_end = header_block_end(&raw);

        let body = &raw[header_end..];
        let region = match BODY_OPEN.find(body) {
            Some(open) => {
                let start = header_end + open.end();
                let end = BODY_CLOSE
                    .find_iter(&raw[start..])
                    .last()
                    .map(|close| start + close.start())
                    .unwrap_or(raw.len());
                start..end
            }
            None => header_end..raw.len(),
        };

        Self {
            raw,
            header_end,
            region,
        }
    }

    /// The content region.
    pub fn content(&self) -> &str {
        &self.raw[self.region.clone()]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Value of a header, with folded continuation lines joined.
    pub fn header(&self, name: &str) -> Option<String> {
        let headers = &self.raw[..self.header_end];
        let mut value: Option<String> = None;

        for line in headers.lines() {
            if line.starts_with([' ', '\t']) {
                if let Some(v) = value.as_mut() {
                    v.push(' ');
                    v.push_str(line.trim());
                }
                continue;
            }
            if value.is_some() {
                break;
            }
            if let Some((key, rest)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case(name) {
                    value = Some(rest.trim().to_string());
                }
            }
        }

        value
    }

    /// Whether the body is transfer-encoded, which rules the file out as a
    /// template.
    pub fn is_encoded(&self) -> bool {
        self.header("Content-Transfer-Encoding")
            .map(|enc| {
                let enc = enc.to_ascii_lowercase();
                enc == "quoted-printable" || enc == "base64"
            })
            .unwrap_or(false)
    }

    /// This file with its content region replaced.
    ///
    /// With `message_id`, the `Message-Id` header is rewritten too, for
    /// templates borrowed from another signature.
    pub fn compose(&self, html: &str, message_id: Option<&str>) -> String {
        let mut head = self.raw[..self.region.start].to_string();
        if let Some(id) = message_id {
            let header_end = self.header_end.min(head.len());
            let rewritten = MESSAGE_ID
                .replace(&head[..header_end], NoExpand(&format!("Message-Id: <{}>", id)))
                .into_owned();
            head = format!("{}{}", rewritten, &head[header_end..]);
        }

        let mut out = String::with_capacity(head.len() + html.len() + self.raw.len() - self.region.end);
        out.push_str(&head);
        out.push_str(html);
        out.push_str(&self.raw[self.region.end..]);
        out
    }
}

/// Offset just past the blank line ending the leading header block, or 0
/// when the file does not start with `Name: value` lines.
fn header_block_end(raw: &str) -> usize {
    let mut offset = 0;
    let mut seen_header = false;

    for line in raw.split_inclusive('\n') {
        offset += line.len();
        let text = line.trim_end_matches(['\r', '\n']);

        if text.is_empty() {
            return if seen_header { offset } else { 0 };
        }
        if seen_header && text.starts_with([' ', '\t']) {
            continue;
        }
        if !is_header_line(text) {
            return 0;
        }
        seen_header = true;
    }

    0
}

fn is_header_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, _)) => {
            !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        }
        None => false,
    }
}

/// Minimal wrapper used when no template is available.
pub fn default_document(id: &str, html: &str) -> String {
    let encoding = if html.is_ascii() { "7bit" } else { "8bit" };
    format!(
        "Content-Transfer-Encoding: {encoding}\n\
         Content-Type: text/html;\n\
         \tcharset=utf-8\n\
         Message-Id: <{id}>\n\
         Mime-Version: 1.0\n\
         \n\
         <body style=\"{BODY_STYLE}\">{html}</body>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "Content-Transfer-Encoding: 7bit\n\
        Content-Type: text/html;\n\
        \tcharset=us-ascii\n\
        Message-Id: <S0>\n\
        Mime-Version: 1.0 (Mac OS X Mail 16.0)\n\
        \n\
        <html><head></head><body class=\"sig\" dir=\"auto\"><div>Old</div></body></html>\n";

    #[test]
    fn test_parse_body_region() {
        let doc = SignatureDocument::parse(TEMPLATE);
        assert_eq!(doc.content(), "<div>Old</div>");
        assert_eq!(doc.header("content-type").as_deref(), Some("text/html; charset=us-ascii"));
        assert_eq!(doc.header("Message-Id").as_deref(), Some("<S0>"));
        assert!(!doc.is_encoded());
    }

    #[test]
    fn test_compose_preserves_wrapper_bytes() {
        let doc = SignatureDocument::parse(TEMPLATE);
        let out = doc.compose("<p>A</p>", None);
        assert_eq!(out, TEMPLATE.replace("<div>Old</div>", "<p>A</p>"));
        assert_eq!(SignatureDocument::parse(out).content(), "<p>A</p>");
    }

    #[test]
    fn test_compose_rewrites_borrowed_message_id() {
        let doc = SignatureDocument::parse(TEMPLATE);
        let out = doc.compose("<p>A</p>", Some("S1"));
        assert!(out.contains("Message-Id: <S1>\n"));
        assert!(!out.contains("<S0>"));
        assert!(out.contains("Mac OS X Mail 16.0"));
    }

    #[test]
    fn test_fragment_without_body_element() {
        let raw = "Message-Id: <S2>\n\n<div>Fragment</div>";
        let doc = SignatureDocument::parse(raw);
        assert_eq!(doc.content(), "<div>Fragment</div>");
        assert_eq!(doc.compose("<b>B</b>", None), "Message-Id: <S2>\n\n<b>B</b>");
    }

    #[test]
    fn test_headerless_file_is_all_body() {
        let doc = SignatureDocument::parse("<body>old</body>");
        assert_eq!(doc.header("Message-Id"), None);

        let out = doc.compose("<p>a</p>\n\n<p>b</p>", None);
        assert_eq!(out, "<body><p>a</p>\n\n<p>b</p></body>");
        assert_eq!(SignatureDocument::parse(out).content(), "<p>a</p>\n\n<p>b</p>");
    }

    #[test]
    fn test_blank_line_inside_html_is_not_a_header_end() {
        let raw = "<div style=\"color: red\">\n\n<body><p>x</p></body></div>";
        let doc = SignatureDocument::parse(raw);
        assert_eq!(doc.content(), "<p>x</p>");
        assert_eq!(doc.header("div style=\"color"), None);
    }

    #[test]
    fn test_crlf_headers() {
        let raw = "Message-Id: <S3>\r\nMime-Version: 1.0\r\n\r\n<body>\r\n\r\nx</body>";
        let doc = SignatureDocument::parse(raw);
        assert_eq!(doc.header("Mime-Version").as_deref(), Some("1.0"));
        assert_eq!(doc.content(), "\r\n\r\nx");
    }

    #[test]
    fn test_encoded_templates_detected() {
        let raw = "Content-Transfer-Encoding: quoted-printable\n\n<body>=3D</body>";
        assert!(SignatureDocument::parse(raw).is_encoded());
    }

    #[test]
    fn test_default_document() {
        let out = default_document("S1", "<p>Grüße</p>");
        let doc = SignatureDocument::parse(out);
        assert_eq!(doc.content(), "<p>Grüße</p>");
        assert_eq!(doc.header("Content-Transfer-Encoding").as_deref(), Some("8bit"));
        assert_eq!(doc.header("Message-Id").as_deref(), Some("<S1>"));
    }
}
