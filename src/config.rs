use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "Lexclass";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "LEXCLASS_CONFIG";

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "lexclass=info,warn"
}

/// Get the application data directory.
/// Platform data dir (e.g. ~/.local/share/lexclass), or ./lexclass when unavailable.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lexclass")
}

/// Get the artifact store root (published model bundles)
pub fn models_dir() -> PathBuf {
    app_data_dir().join("models")
}

/// Get the linguistic resources directory (stopwords, lemma table)
pub fn resources_dir() -> PathBuf {
    app_data_dir().join("resources")
}

/// Get the output directory for prediction tables and reports
pub fn outputs_dir() -> PathBuf {
    app_data_dir().join("outputs")
}
