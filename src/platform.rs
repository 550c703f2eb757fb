//! URL to platform tag detection.

use regex::Regex;
use std::sync::OnceLock;

/// Tag returned for any well-formed http(s) URL that matches no known host.
pub const GENERIC_TAG: &str = "video";

/// Known hosts, checked in order. The first match wins.
const PLATFORMS: &[(&[&str], &str)] = &[
    (&["instagram.com", "instagr.am"], "instagram"),
    (&["youtube.com", "youtu.be"], "youtube"),
    (&["tiktok.com"], "tiktok"),
    (&["twitter.com", "x.com"], "twitter"),
    (&["facebook.com", "fb.watch"], "facebook"),
    (&["vimeo.com"], "vimeo"),
    (&["reddit.com"], "reddit"),
    (&["twitch.tv"], "twitch"),
    (&["dailymotion.com"], "dailymotion"),
    (&["soundcloud.com"], "soundcloud"),
];

fn http_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^https?://.*$").expect("static regex"))
}

/// Maps a URL to its platform tag, or `None` when it is blank or not a URL.
pub fn detect(url: &str) -> Option<&'static str> {
    if url.trim().is_empty() {
        return None;
    }
    let lower = url.to_lowercase();

    for (needles, tag) in PLATFORMS {
        if needles.iter().any(|needle| lower.contains(needle)) {
            return Some(tag);
        }
    }

    if http_url_pattern().is_match(&lower) {
        return Some(GENERIC_TAG);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hosts_any_case() {
        assert_eq!(detect("https://youtu.be/abc123"), Some("youtube"));
        assert_eq!(detect("HTTPS://WWW.YOUTUBE.COM/watch?v=x"), Some("youtube"));
        assert_eq!(detect("https://www.Instagram.com/reel/abc/"), Some("instagram"));
        assert_eq!(detect("https://instagr.am/p/abc"), Some("instagram"));
        assert_eq!(detect("https://vm.TikTok.com/xyz"), Some("tiktok"));
        assert_eq!(detect("https://x.com/user/status/1"), Some("twitter"));
        assert_eq!(detect("https://fb.watch/abc"), Some("facebook"));
        assert_eq!(detect("https://vimeo.com/1"), Some("vimeo"));
        assert_eq!(detect("https://www.reddit.com/r/videos"), Some("reddit"));
        assert_eq!(detect("https://www.twitch.tv/videos/1"), Some("twitch"));
        assert_eq!(detect("https://www.dailymotion.com/video/x"), Some("dailymotion"));
        assert_eq!(detect("https://soundcloud.com/a/b"), Some("soundcloud"));
    }

    #[test]
    fn test_priority_order() {
        // Both hosts appear; instagram is checked first.
        assert_eq!(
            detect("https://youtube.com/redirect?q=instagram.com/p/1"),
            Some("instagram")
        );
    }

    #[test]
    fn test_substring_match_does_not_require_scheme() {
        assert_eq!(detect("youtube.com/watch?v=1"), Some("youtube"));
    }

    #[test]
    fn test_generic_url() {
        assert_eq!(detect("https://example.org/clip.mp4"), Some(GENERIC_TAG));
        assert_eq!(detect("HTTP://EXAMPLE.ORG"), Some(GENERIC_TAG));
    }

    #[test]
    fn test_rejects_non_urls() {
        assert_eq!(detect(""), None);
        assert_eq!(detect("   "), None);
        assert_eq!(detect("not a url"), None);
        assert_eq!(detect("ftp://example.org/file"), None);
    }
}
