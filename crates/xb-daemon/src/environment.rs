use std::path::PathBuf;

use tracing::{debug, info};

/// Environment variable naming an alternative env file.
pub const ENV_FILE_VAR: &str = "XBRIDGE_ENV_FILE";

/// Where the environment came from, reported once logging is up.
#[derive(Debug)]
pub enum EnvSource {
    File(PathBuf),
    Missing(String),
}

/// Load `$XBRIDGE_ENV_FILE`, or `.env` from the working directory (or a
/// parent), before configuration is read. Variables already set in the
/// process environment are left alone.
///
/// Runs before the subscriber exists, so the outcome is returned for
/// [`log_source`] instead of being logged here.
pub fn load() -> EnvSource {
    let loaded = match std::env::var(ENV_FILE_VAR) {
        Ok(path) => dotenv::from_filename(&path).map(|_| PathBuf::from(path)),
        Err(_) => dotenv::dotenv(),
    };
    match loaded {
        Ok(path) => EnvSource::File(path),
        Err(e) => EnvSource::Missing(e.to_string()),
    }
}

pub fn log_source(source: &EnvSource) {
    match source {
        EnvSource::File(path) => info!(path = %path.display(), "loaded environment file"),
        EnvSource::Missing(reason) => {
            debug!(%reason, "no environment file, using process environment")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_env_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xbridge.env");
        std::fs::write(&path, "XBRIDGE_ENV_TEST_MARKER=from-file\n").unwrap();

        std::env::set_var(ENV_FILE_VAR, &path);
        let source = load();
        std::env::remove_var(ENV_FILE_VAR);

        assert!(matches!(source, EnvSource::File(p) if p == path));
        assert_eq!(
            std::env::var("XBRIDGE_ENV_TEST_MARKER").as_deref(),
            Ok("from-file")
        );
    }
}
