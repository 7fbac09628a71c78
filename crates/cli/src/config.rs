//! Loading `.taskwright/config.toml`.

use std::path::Path;

use pipeline::config::Settings;
use pipeline::TaskwrightError;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = ".taskwright/config.toml";

/// Reads and validates the settings file.
///
/// A missing file at the default location yields defaults; a missing file
/// named explicitly with `--config` is an error.
pub fn load(explicit: Option<&Path>) -> Result<Settings, TaskwrightError> {
    let path = explicit.unwrap_or(Path::new(DEFAULT_CONFIG_PATH));
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && explicit.is_none() => {
            info!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Settings::default());
        }
        Err(e) => {
            return Err(TaskwrightError::ConfigurationError {
                message: format!("could not read {}: {e}", path.display()),
            })
        }
    };
    let settings = parse(&text).map_err(|message| TaskwrightError::ConfigurationError {
        message: format!("{}: {message}", path.display()),
    })?;
    info!(path = %path.display(), "configuration loaded");
    Ok(settings)
}

fn parse(text: &str) -> Result<Settings, String> {
    let settings: Settings = toml::from_str(text).map_err(|e| e.to_string())?;
    settings.validate().map_err(|e| e.to_string())?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline::config::ProviderKind;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(parse("").expect("parse"), Settings::default());
    }

    #[test]
    fn sections_override_defaults() {
        let settings = parse(
            r#"
            [patch]
            max_files = 5

            [llm]
            provider = "anthropic"
            timeout_secs = 30

            [workflow]
            max_fix_iterations = 3

            [project]
            project_id = "PVT_kwDO"
            status_field_id = "PVTSSF_lADO"
            status_options = { "Backlog" = "f75ad846", "Done" = "98236657" }
            "#,
        )
        .expect("parse");
        assert_eq!(settings.patch.max_files, 5);
        assert_eq!(settings.llm.provider, Some(ProviderKind::Anthropic));
        assert_eq!(settings.llm.timeout_secs, 30);
        assert_eq!(settings.llm.max_tokens, 4096);
        assert_eq!(settings.workflow.max_fix_iterations, Some(3));
        let project = settings.project.expect("project section");
        assert_eq!(project.status_options.len(), 2);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = parse("[patch]\nmax_files = 0\n").expect_err("should fail");
        assert!(err.contains("max_files"), "{err}");
    }

    #[test]
    fn unknown_provider_is_a_parse_error() {
        assert!(parse("[llm]\nprovider = \"mistral\"\n").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let err = load(Some(&missing)).expect_err("should fail");
        assert!(matches!(err, TaskwrightError::ConfigurationError { .. }));
    }

    #[test]
    fn explicit_file_is_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[repository]\nbranch_prefix = \"bot\"\n").expect("write");
        let settings = load(Some(&path)).expect("load");
        assert_eq!(settings.repository.branch_prefix, "bot");
    }
}
