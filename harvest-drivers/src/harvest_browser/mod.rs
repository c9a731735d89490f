pub mod driver;
pub mod fingerprint;
pub mod pacing;
pub mod page;
pub mod readiness;
pub mod stealth;
