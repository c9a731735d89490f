use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Snapshot of user agent, viewport, and locale characteristics for one session.
pub struct DesktopProfile {
    pub user_agent: String,
    pub viewport: (u32, u32),
    pub platform: String,
    pub languages: Vec<String>,
    pub timezone: String,
}

/// Built-in pool of plausible desktop fingerprints.
pub fn desktop_profiles() -> Vec<DesktopProfile> {
    vec![
        DesktopProfile {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            viewport: (1920, 1080),
            platform: "Win32".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            timezone: "America/New_York".to_string(),
        },
        DesktopProfile {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36".to_string(),
            viewport: (1440, 900),
            platform: "MacIntel".to_string(),
            languages: vec!["en-US".to_string(), "en".to_string()],
            timezone: "America/Los_Angeles".to_string(),
        },
        DesktopProfile {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36".to_string(),
            viewport: (1536, 864),
            platform: "Win32".to_string(),
            languages: vec!["en-GB".to_string(), "en".to_string()],
            timezone: "Europe/London".to_string(),
        },
    ]
}

/// Pick one profile; a session keeps it for its whole lifetime.
pub fn pick_desktop_profile<R: Rng + ?Sized>(rng: &mut R) -> DesktopProfile {
    let pool = desktop_profiles();
    pool.choose(rng)
        .cloned()
        .unwrap_or_else(|| pool[0].clone())
}
