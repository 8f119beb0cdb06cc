use imotscrape_core::BlockKind;

const CAPTCHA_MARKERS: &[&str] = &["captcha", "are you a human", "recaptcha", "hcaptcha"];
const CLOUDFLARE_MARKERS: &[&str] = &["checking your browser", "cf-browser-verification", "cloudflare"];

/// Soft-block detection (§4.1/§4.10): classifies a response as blocked even
/// when the transport itself succeeded. Checked on every 2xx/3xx response
/// body and on specific status codes.
pub fn classify(status: u16, body_text: &str) -> Option<BlockKind> {
    if status == 429 {
        return Some(BlockKind::RateLimit);
    }
    if status >= 500 {
        return Some(BlockKind::Network);
    }

    let lower = body_text.to_lowercase();
    if CLOUDFLARE_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(BlockKind::Cloudflare);
    }
    if CAPTCHA_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(BlockKind::Captcha);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_status_is_flagged() {
        assert_eq!(classify(429, ""), Some(BlockKind::RateLimit));
    }

    #[test]
    fn captcha_marker_is_detected() {
        assert_eq!(classify(200, "Please complete the CAPTCHA below"), Some(BlockKind::Captcha));
    }

    #[test]
    fn clean_response_is_not_blocked() {
        assert_eq!(classify(200, "<html>listing details</html>"), None);
    }
}
