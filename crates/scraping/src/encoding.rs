use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

static META_CHARSET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)charset\s*=\s*"?'?([a-zA-Z0-9_\-]+)"?'?"#).expect("valid meta-charset regex")
});

/// Decoded body plus the encoding label actually used and whether any
/// replacement characters were introduced (a decode warning per §4.1).
pub struct Decoded {
    pub text: String,
    pub encoding: &'static str,
    pub had_replacement: bool,
}

/// Picks a decoding encoding in the order §4.1 specifies: HTTP `Content-Type`
/// charset, HTML `<meta charset>`, statistical detection, then the
/// site-configured fallback. Raw bytes are never discarded before this point;
/// decoding is the only lossy step.
pub fn decode(body: &[u8], content_type: Option<&str>, fallback_encoding: &str) -> Decoded {
    let encoding = from_content_type(content_type)
        .or_else(|| from_meta_tag(body))
        .or_else(|| from_statistics(body))
        .unwrap_or_else(|| Encoding::for_label(fallback_encoding.as_bytes()).unwrap_or(encoding_rs::WINDOWS_1251));

    let (text, _, had_replacement) = encoding.decode(body);
    Decoded {
        text: text.into_owned(),
        encoding: encoding.name(),
        had_replacement,
    }
}

fn from_content_type(content_type: Option<&str>) -> Option<&'static Encoding> {
    let label = META_CHARSET_RE.captures(content_type?.as_bytes())?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

fn from_meta_tag(body: &[u8]) -> Option<&'static Encoding> {
    let head = &body[..body.len().min(2048)];
    let label = META_CHARSET_RE.captures(head)?.get(1)?;
    Encoding::for_label(label.as_bytes())
}

/// Statistical detection via `chardetng`. `feed` reports whether any
/// non-ASCII byte was seen; a pure-ASCII sample gives the detector nothing to
/// actually discriminate on; its `guess` would be an arbitrary tie-break
/// rather than evidence, so that case defers to the site-configured fallback
/// instead of accepting a confidence-free guess.
fn from_statistics(body: &[u8]) -> Option<&'static Encoding> {
    let mut detector = chardetng::EncodingDetector::new();
    let saw_non_ascii = detector.feed(body, true);
    if !saw_non_ascii {
        return None;
    }
    Some(detector.guess(None, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_charset_wins_over_fallback() {
        let body = "hello".as_bytes();
        let decoded = decode(body, Some("text/html; charset=utf-8"), "windows-1251");
        assert_eq!(decoded.encoding, "UTF-8");
        assert_eq!(decoded.text, "hello");
    }

    #[test]
    fn meta_tag_used_when_no_content_type_charset() {
        let body = br#"<html><head><meta charset="windows-1251"></head></html>"#;
        let decoded = decode(body, Some("text/html"), "utf-8");
        assert_eq!(decoded.encoding, "windows-1251");
    }

    #[test]
    fn falls_back_to_site_default_for_ascii_with_no_hints() {
        let body = b"plain ascii body";
        let decoded = decode(body, None, "windows-1251");
        assert_eq!(decoded.encoding, "windows-1251");
        assert_eq!(decoded.text, "plain ascii body");
    }

    #[test]
    fn statistical_detection_runs_for_non_ascii_bodies_with_no_hints() {
        let (cyrillic_bytes, _, _) = encoding_rs::WINDOWS_1251.encode("цена в лева");
        let decoded = decode(&cyrillic_bytes, None, "utf-8");
        assert_eq!(decoded.text, "цена в лева");
    }
}
