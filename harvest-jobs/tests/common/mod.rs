use std::sync::OnceLock;

use harvest_common::observability::{LogConfig, LogFormat};

static INIT_PATH: OnceLock<std::path::PathBuf> = OnceLock::new();

/// Route `tracing` output from integration tests into a temp log directory.
/// Set `HARVEST_TEST_LOG_FORMAT=json` to get JSON lines.
pub fn init_test_tracing() {
    let _ = INIT_PATH.get_or_init(|| {
        let config = LogConfig {
            app_name: "harvest-tests",
            log_dir: Some(std::env::temp_dir().join("harvest-tests")),
            emit_stderr: false,
            format: if std::env::var("HARVEST_TEST_LOG_FORMAT")
                .map(|raw| raw.trim().eq_ignore_ascii_case("json"))
                .unwrap_or(false)
            {
                LogFormat::Json
            } else {
                LogFormat::Text
            },
            default_filter: "debug".to_string(),
        };

        harvest_common::observability::init_logging(config).unwrap_or_default()
    });
}
