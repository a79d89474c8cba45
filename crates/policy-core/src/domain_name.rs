//! Canonical host-name form used by the blocklist, caches, and policy engine.

/// Lowercase, trailing-dot-stripped, whitespace-trimmed. IP literals pass
/// through unchanged (their canonical form is just themselves, lowercased —
/// which is a no-op for IPv4 and harmless for IPv6 literal casing).
pub fn canonicalize(host: &str) -> String {
    let trimmed = host.trim();
    let trimmed = trimmed.strip_suffix('.').unwrap_or(trimmed);
    trimmed.to_ascii_lowercase()
}

pub fn is_ip_literal(host: &str) -> bool {
    host.parse::<std::net::IpAddr>().is_ok()
}

/// Label-boundary suffixes of a canonical host, from the full name down to
/// the single last label: `a.b.c` yields `["a.b.c", "b.c", "c"]`.
pub fn suffixes(canonical: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(canonical);
    std::iter::from_fn(move || {
        let cur = rest?;
        rest = cur.split_once('.').map(|(_, tail)| tail);
        Some(cur)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_lowercases_and_strips_trailing_dot() {
        assert_eq!(canonicalize("Example.COM."), "example.com");
        assert_eq!(canonicalize("  example.com  "), "example.com");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize("Ads.Example.COM.");
        let twice = canonicalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn ip_literal_passes_through() {
        assert_eq!(canonicalize("198.51.100.12"), "198.51.100.12");
        assert!(is_ip_literal("198.51.100.12"));
        assert!(is_ip_literal("::1"));
        assert!(!is_ip_literal("example.com"));
    }

    #[test]
    fn suffixes_walk_label_by_label() {
        let got: Vec<&str> = suffixes("video.ads.example.com").collect();
        assert_eq!(got, vec!["video.ads.example.com", "ads.example.com", "example.com", "com"]);
    }
}
