//! Browser Fingerprint
//!
//! Each browsing session presents a freshly randomized desktop Chrome
//! identity: user agent, client hints and the privacy headers a real browser
//! sends on a top-level cross-site navigation.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{Map, Value};

/// `(major, full)` Chrome stable versions to pick from.
const CHROME_VERSIONS: &[(&str, &str)] = &[
    ("131", "131.0.0.0"),
    ("130", "130.0.0.0"),
    ("129", "129.0.0.0"),
    ("128", "128.0.0.0"),
    ("127", "127.0.0.0"),
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-US,en;q=0.9",
    "en-GB,en;q=0.9",
    "en-US,en;q=0.9,de;q=0.8",
    "en-US,en;q=0.9,fr;q=0.8",
    "en-US,en;q=0.9,es;q=0.8",
];

/// Browser profile applied to one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept_language: String,
    pub platform: Platform,
    pub sec_ch_ua: String,
}

/// Platform configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOS,
    Windows,
    Linux,
}

impl Platform {
    fn random() -> Self {
        let mut rng = rand::thread_rng();
        // Realistic distribution: Windows 65%, macOS 20%, Linux 15%
        let roll: f32 = rng.gen();
        if roll < 0.65 {
            Platform::Windows
        } else if roll < 0.85 {
            Platform::MacOS
        } else {
            Platform::Linux
        }
    }

    fn os_string(self) -> &'static str {
        match self {
            Platform::MacOS => "Macintosh; Intel Mac OS X 10_15_7",
            Platform::Windows => "Windows NT 10.0; Win64; x64",
            Platform::Linux => "X11; Linux x86_64",
        }
    }

    /// Value for `Emulation.setUserAgentOverride`'s `platform` field.
    #[must_use]
    pub fn navigator_platform(self) -> &'static str {
        match self {
            Platform::MacOS => "MacIntel",
            Platform::Windows => "Win32",
            Platform::Linux => "Linux x86_64",
        }
    }

    fn sec_ch_platform(self) -> &'static str {
        match self {
            Platform::MacOS => "\"macOS\"",
            Platform::Windows => "\"Windows\"",
            Platform::Linux => "\"Linux\"",
        }
    }
}

/// Generate a realistic Chrome browser profile
#[must_use]
pub fn chrome_profile() -> BrowserProfile {
    let mut rng = rand::thread_rng();
    let platform = Platform::random();
    let &(major, full) = CHROME_VERSIONS.choose(&mut rng).unwrap_or(&CHROME_VERSIONS[0]);
    let accept_language = ACCEPT_LANGUAGES
        .choose(&mut rng)
        .unwrap_or(&ACCEPT_LANGUAGES[0]);

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{full} Safari/537.36",
            platform.os_string(),
        ),
        accept_language: (*accept_language).to_string(),
        platform,
        sec_ch_ua: format!(
            "\"Google Chrome\";v=\"{major}\", \"Chromium\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
        ),
    }
}

impl BrowserProfile {
    /// Headers for `Network.setExtraHTTPHeaders`.
    ///
    /// Every request of the session opts out of tracking and claims to be a
    /// cross-site top-level navigation, which is how the player pages are
    /// normally reached.
    #[must_use]
    pub fn navigation_headers(&self) -> Map<String, Value> {
        let mut headers = Map::new();
        for (name, value) in [
            ("Accept-Language", self.accept_language.as_str()),
            ("Sec-GPC", "1"),
            ("DNT", "1"),
            ("Sec-CH-UA", self.sec_ch_ua.as_str()),
            ("Sec-CH-UA-Mobile", "?0"),
            ("Sec-CH-UA-Platform", self.platform.sec_ch_platform()),
            ("Sec-Fetch-Dest", "document"),
            ("Sec-Fetch-Mode", "navigate"),
            ("Sec-Fetch-Site", "cross-site"),
        ] {
            headers.insert(name.to_string(), Value::String(value.to_string()));
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chrome_profile() {
        let profile = chrome_profile();
        assert!(profile.user_agent.starts_with("Mozilla/5.0 ("));
        assert!(profile.user_agent.contains("Chrome/"));
        assert!(!profile.user_agent.contains("Headless"));
        assert!(profile.sec_ch_ua.contains("Google Chrome"));
    }

    #[test]
    fn test_user_agent_matches_platform() {
        for _ in 0..20 {
            let profile = chrome_profile();
            assert!(profile.user_agent.contains(profile.platform.os_string()));
        }
    }

    #[test]
    fn test_chrome_versions_format() {
        for (major, full) in CHROME_VERSIONS {
            assert!(full.starts_with(major), "{full} should start with {major}");
        }
    }

    #[test]
    fn test_navigation_headers() {
        let profile = chrome_profile();
        let headers = profile.navigation_headers();
        assert_eq!(headers["Sec-GPC"], "1");
        assert_eq!(headers["DNT"], "1");
        assert_eq!(headers["Sec-Fetch-Dest"], "document");
        assert_eq!(headers["Sec-Fetch-Mode"], "navigate");
        assert_eq!(headers["Sec-Fetch-Site"], "cross-site");
        assert_eq!(
            headers["Accept-Language"],
            Value::String(profile.accept_language.clone())
        );
    }

    #[test]
    fn test_platform_strings_not_empty() {
        for platform in [Platform::MacOS, Platform::Windows, Platform::Linux] {
            assert!(!platform.os_string().is_empty());
            assert!(!platform.navigator_platform().is_empty());
            assert!(platform.sec_ch_platform().starts_with('"'));
        }
    }
}
