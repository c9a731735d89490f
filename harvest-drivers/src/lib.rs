//! Driver layer for paced browser automation.
//!
//! This crate exposes the timing and readiness primitives used to drive a
//! browser session at a human-like pace, plus a WebDriver-backed session.
//!
//! - [`harvest_browser::pacing::TimingEngine`]: randomized, scaled delays and wait sequences
//! - [`harvest_browser::readiness::ListReadinessWaiter`]: visibility/count/settle protocol for lists
//! - [`harvest_browser::page::PageWaits`]: the four wait primitives a page handle must offer
//! - [`harvest_browser::driver::WebDriverSession`]: `fantoccini` client with stealth launch arguments
pub mod harvest_browser;
