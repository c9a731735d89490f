use super::fingerprint::DesktopProfile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Levels of evasion applied to the browser session.
pub enum StealthProfile {
    Lightweight,
    #[default]
    Balanced,
    Maximum,
}

/// Chrome command-line arguments for a profile and fingerprint.
pub fn build_launch_arguments(
    profile: StealthProfile,
    desktop: &DesktopProfile,
    headless: bool,
) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
        "--disable-extensions".to_string(),
        "--disable-plugins-discovery".to_string(),
        format!("--user-agent={}", desktop.user_agent),
        format!("--window-size={},{}", desktop.viewport.0, desktop.viewport.1),
        format!("--lang={}", desktop.languages.join(",")),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    if headless || profile == StealthProfile::Maximum {
        args.push("--disable-gpu".to_string());
    }
    args
}

const CORE_EVASIONS: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1,2,3] });
    if (!window.chrome) window.chrome = { runtime: {} };
"#;

const CANVAS_EVASIONS: &str = r#"
    const getContext = HTMLCanvasElement.prototype.getContext;
    HTMLCanvasElement.prototype.getContext = function(type, ...args) {
        const ctx = getContext.call(this, type, ...args);
        if (type === '2d' && ctx) {
            const origToDataURL = this.toDataURL;
            this.toDataURL = function(...a) {
                const img = ctx.getImageData(0, 0, this.width, this.height);
                for (let i = 0; i < img.data.length; i += 4) {
                    if (Math.random() < 0.001) img.data[i] += Math.random() < 0.5 ? -1 : 1;
                }
                ctx.putImageData(img, 0, 0);
                return origToDataURL.call(this, ...a);
            };
        }
        return ctx;
    };
"#;

const WEBGL_EVASIONS: &str = r#"
    const getParameter = WebGLRenderingContext.prototype.getParameter;
    WebGLRenderingContext.prototype.getParameter = function(parameter) {
        if (parameter === 37445) return 'Intel Inc.';
        if (parameter === 37446) return 'Intel Iris OpenGL Engine';
        return getParameter.call(this, parameter);
    };
"#;

/// Scripts to run against each freshly loaded document, lightest first.
pub fn evasion_scripts(profile: StealthProfile, desktop: &DesktopProfile) -> Vec<String> {
    let languages = serde_json::to_string(&desktop.languages).unwrap_or_else(|_| "[]".into());
    let mut scripts = vec![
        CORE_EVASIONS.to_string(),
        format!("Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});"),
    ];
    if matches!(profile, StealthProfile::Balanced | StealthProfile::Maximum) {
        scripts.push(CANVAS_EVASIONS.to_string());
    }
    if profile == StealthProfile::Maximum {
        scripts.push(WEBGL_EVASIONS.to_string());
        let platform =
            serde_json::to_string(&desktop.platform).unwrap_or_else(|_| "\"\"".into());
        scripts.push(format!(
            "Object.defineProperty(navigator, 'platform', {{ get: () => {platform} }});"
        ));
    }
    scripts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest_browser::fingerprint::desktop_profiles;

    #[test]
    fn launch_arguments_carry_the_fingerprint() {
        let desktop = &desktop_profiles()[1];
        let args = build_launch_arguments(StealthProfile::Balanced, desktop, false);
        assert!(args.contains(&format!("--user-agent={}", desktop.user_agent)));
        assert!(args.contains(&"--window-size=1440,900".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.contains(&"--disable-gpu".to_string()));
    }

    #[test]
    fn headless_and_maximum_disable_gpu() {
        let desktop = &desktop_profiles()[0];
        let headless = build_launch_arguments(StealthProfile::Lightweight, desktop, true);
        assert!(headless.contains(&"--headless=new".to_string()));
        assert!(headless.contains(&"--disable-gpu".to_string()));

        let maximum = build_launch_arguments(StealthProfile::Maximum, desktop, false);
        assert!(maximum.contains(&"--disable-gpu".to_string()));
    }

    #[test]
    fn heavier_profiles_add_scripts() {
        let desktop = &desktop_profiles()[0];
        let light = evasion_scripts(StealthProfile::Lightweight, desktop);
        let balanced = evasion_scripts(StealthProfile::Balanced, desktop);
        let maximum = evasion_scripts(StealthProfile::Maximum, desktop);
        assert!(light.len() < balanced.len() && balanced.len() < maximum.len());
        assert!(maximum.last().unwrap().contains("\"Win32\""));
    }
}
