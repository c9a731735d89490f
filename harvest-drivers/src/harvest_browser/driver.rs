use crate::harvest_browser::{
    fingerprint::{pick_desktop_profile, DesktopProfile},
    page::SessionPage,
    stealth::{build_launch_arguments, evasion_scripts, StealthProfile},
};
use anyhow::{Context, Result};
use fantoccini::{Client, ClientBuilder};
use serde_json::json;
use tracing::{debug, info};
use webdriver::capabilities::Capabilities;

/// Default Chromedriver endpoint.
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

/// A `fantoccini` WebDriver session launched with evasion arguments and a
/// fingerprint fixed for its lifetime.
///
/// The session never navigates or authenticates on its own; the orchestrator
/// drives [`WebDriverSession::client`] and hands [`WebDriverSession::page`]
/// to the readiness protocol.
pub struct WebDriverSession {
    client: Client,
    desktop: DesktopProfile,
    stealth_profile: StealthProfile,
}

impl WebDriverSession {
    /// Connect to a running WebDriver service at `endpoint`.
    pub async fn connect(
        endpoint: &str,
        headless: bool,
        stealth_profile: StealthProfile,
    ) -> Result<Self> {
        let desktop = pick_desktop_profile(&mut rand::thread_rng());
        let args = build_launch_arguments(stealth_profile, &desktop, headless);

        let mut caps = Capabilities::new();
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));

        let client = ClientBuilder::native()
            .capabilities(caps)
            .connect(endpoint)
            .await
            .with_context(|| format!("failed to open WebDriver session at {endpoint}"))?;

        info!(
            target: "browser.session",
            %endpoint,
            headless,
            profile = ?stealth_profile,
            platform = %desktop.platform,
            "session opened"
        );

        Ok(Self {
            client,
            desktop,
            stealth_profile,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn desktop_profile(&self) -> &DesktopProfile {
        &self.desktop
    }

    /// Wait primitives over the session's current document.
    pub fn page(&self) -> SessionPage {
        SessionPage::new(self.client.clone())
    }

    /// Run the profile's evasion scripts against the current document.
    /// Call after every navigation the orchestrator performs.
    pub async fn apply_evasions(&self) -> Result<()> {
        let scripts = evasion_scripts(self.stealth_profile, &self.desktop);
        for script in &scripts {
            self.client
                .execute(script, vec![])
                .await
                .context("failed to apply evasion script")?;
        }
        debug!(target: "browser.session", scripts = scripts.len(), "evasions applied");
        Ok(())
    }

    /// Close the underlying browser session.
    pub async fn close(self) -> Result<()> {
        self.client.close().await?;
        Ok(())
    }
}
