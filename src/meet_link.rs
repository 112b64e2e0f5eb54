//! Meeting-link resolution.
//!
//! Priority order: structured conferencing fields first (the provider's
//! dedicated video link, then conference entry points), then a free-text scan
//! of description and location against a fixed list of meeting-platform
//! domains. The first URL under the highest-priority domain wins.

use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Known meeting-platform domains, highest priority first.
const DOMAIN_PRIORITY: &[&str] = &[
    "meet.google.com",
    "zoom.us",
    "teams.microsoft.com",
    "teams.live.com",
    "webex.com",
];

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"')\]]+"#).expect("valid url regex"))
}

/// True if `host` is `domain` or a subdomain of it.
fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// True if the URL belongs to a known meeting platform.
pub fn is_meeting_url(candidate: &str) -> bool {
    domain_rank(candidate).is_some()
}

/// Priority rank of a URL's host within `DOMAIN_PRIORITY`, if any.
fn domain_rank(candidate: &str) -> Option<usize> {
    let url = Url::parse(candidate).ok()?;
    let host = url.host_str()?;
    DOMAIN_PRIORITY
        .iter()
        .position(|domain| host_matches(host, domain))
}

/// Scan free text for meeting URLs; returns the first URL under the
/// highest-priority domain, ignoring generic URLs entirely.
pub fn scan_text(text: &str) -> Option<String> {
    let mut best: Option<(usize, String)> = None;
    for m in url_regex().find_iter(text) {
        let candidate = m.as_str().trim_end_matches(['.', ',', ';']);
        if let Some(rank) = domain_rank(candidate) {
            match &best {
                Some((best_rank, _)) if *best_rank <= rank => {}
                _ => best = Some((rank, candidate.to_string())),
            }
            if rank == 0 {
                break; // nothing can outrank the top domain
            }
        }
    }
    best.map(|(_, link)| link)
}

/// Resolve the meeting link for an event.
///
/// `structured` carries the provider's dedicated fields in their own priority
/// order (e.g. hangoutLink, then conference entry-point URIs); `texts` the
/// free-text fields to scan (description, then location).
pub fn resolve<'a>(
    structured: impl IntoIterator<Item = &'a str>,
    texts: impl IntoIterator<Item = &'a str>,
) -> Option<String> {
    // Structured fields are trusted as-is: a conference entry point may point
    // at any provider, known to us or not.
    for field in structured {
        let trimmed = field.trim();
        if !trimmed.is_empty() && Url::parse(trimmed).is_ok() {
            return Some(trimmed.to_string());
        }
    }
    for text in texts {
        if let Some(link) = scan_text(text) {
            return Some(link);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_field_wins() {
        let link = resolve(
            ["https://meet.google.com/abc-defg-hij"],
            ["join at https://zoom.us/j/123"],
        );
        assert_eq!(link.as_deref(), Some("https://meet.google.com/abc-defg-hij"));
    }

    #[test]
    fn test_generic_url_ignored() {
        let text = "agenda: https://docs.example.com/plan and https://meet.google.com/abc-defg-hij";
        assert_eq!(
            scan_text(text).as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
    }

    #[test]
    fn test_domain_priority_order() {
        let text = "https://acme.zoom.us/j/99 then https://meet.google.com/xyz-1234";
        // meet.google.com outranks zoom.us even though zoom appears first
        assert_eq!(
            scan_text(text).as_deref(),
            Some("https://meet.google.com/xyz-1234")
        );
    }

    #[test]
    fn test_subdomain_matches() {
        assert!(is_meeting_url("https://us02web.zoom.us/j/5551234"));
        assert!(!is_meeting_url("https://notzoom.usexample.com/j/5"));
    }

    #[test]
    fn test_trailing_punctuation_stripped() {
        let text = "link: https://meet.google.com/abc-defg-hij.";
        assert_eq!(
            scan_text(text).as_deref(),
            Some("https://meet.google.com/abc-defg-hij")
        );
    }

    #[test]
    fn test_no_link_resolves_none() {
        assert_eq!(resolve([], ["no links here", ""]), None);
        assert_eq!(scan_text("see https://example.com/notes"), None);
    }

    #[test]
    fn test_structured_field_accepts_unknown_provider() {
        // Conference entry points are trusted even for providers we don't scan for
        let link = resolve(["https://conf.example.com/room/42"], []);
        assert_eq!(link.as_deref(), Some("https://conf.example.com/room/42"));
    }

    #[test]
    fn test_empty_structured_falls_through_to_text() {
        let link = resolve(
            ["", "  "],
            ["dial in via https://teams.microsoft.com/l/meetup-join/xyz"],
        );
        assert_eq!(
            link.as_deref(),
            Some("https://teams.microsoft.com/l/meetup-join/xyz")
        );
    }
}
