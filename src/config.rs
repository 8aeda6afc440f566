pub mod settings;
pub mod user;

use std::path::Path;

pub use settings::{
    ServerConfig, ServerLayer, Settings, SettingsLayer, WorkerConfig, WorkerLayer,
};
pub use user::{load_user_config, user_config_path};

use crate::error::ConfigError;

/// Merge layers in order; later layers override earlier ones.
pub fn merge_all(layers: impl IntoIterator<Item = Option<SettingsLayer>>) -> SettingsLayer {
    layers
        .into_iter()
        .flatten()
        .fold(SettingsLayer::default(), SettingsLayer::merge)
}

/// Load settings: defaults < user config < `config_file` < `overrides`.
pub fn load_settings(
    config_file: Option<&Path>,
    overrides: SettingsLayer,
) -> Result<Settings, ConfigError> {
    let user = load_user_config()?;
    let explicit = match config_file {
        Some(path) => {
            let layer = SettingsLayer::from_file(path)?;
            log::info!(
                target: "stockbridge::config",
                "Loaded config from {}",
                path.display()
            );
            Some(layer)
        }
        None => None,
    };
    merge_all([user, explicit, Some(overrides)]).resolve()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn merge_all_skips_missing_layers() {
        let only = SettingsLayer {
            server: ServerLayer {
                listen: Some("127.0.0.1:9000".to_string()),
            },
            ..Default::default()
        };
        let merged = merge_all([None, Some(only.clone()), None]);
        assert_eq!(merged, only);
    }

    #[test]
    #[serial(xdg_env)]
    fn load_settings_layers_user_file_and_overrides() {
        let original_xdg = env::var_os("XDG_CONFIG_HOME");

        let user_dir = TempDir::new().expect("failed to create user config temp dir");
        let project_dir = TempDir::new().expect("failed to create project temp dir");

        let user_config_dir = user_dir.path().join("stockbridge");
        std::fs::create_dir_all(&user_config_dir).unwrap();
        std::fs::write(
            user_config_dir.join("stockbridge.toml"),
            r#"
                [worker]
                program = "/user/dsa2"
                respawn_delay_ms = 100
                kill_grace_ms = 300

                [server]
                listen = "127.0.0.1:6000"
            "#,
        )
        .unwrap();

        let explicit = project_dir.path().join("stockbridge.toml");
        std::fs::write(
            &explicit,
            r#"
                [worker]
                respawn_delay_ms = 200
            "#,
        )
        .unwrap();

        let overrides = SettingsLayer {
            server: ServerLayer {
                listen: Some("127.0.0.1:7000".to_string()),
            },
            ..Default::default()
        };

        // SAFETY: serialized on the xdg_env key.
        unsafe {
            env::set_var("XDG_CONFIG_HOME", user_dir.path());
        }
        let result = load_settings(Some(&explicit), overrides);
        // SAFETY: Same as above - restoring original env state
        unsafe {
            match original_xdg {
                Some(val) => env::set_var("XDG_CONFIG_HOME", val),
                None => env::remove_var("XDG_CONFIG_HOME"),
            }
        }

        let settings = result.expect("settings should load");
        assert_eq!(settings.worker.program, PathBuf::from("/user/dsa2"));
        assert_eq!(settings.worker.respawn_delay_ms, 200, "explicit file beats user");
        assert_eq!(settings.worker.kill_grace_ms, 300, "user beats defaults");
        assert_eq!(settings.worker.args, vec!["--api"]);
        assert_eq!(settings.server.listen.port(), 7000, "overrides beat everything");
    }

    #[test]
    #[serial(xdg_env)]
    fn missing_explicit_file_is_a_read_error() {
        let original_xdg = env::var_os("XDG_CONFIG_HOME");
        let empty = TempDir::new().expect("failed to create temp dir");
        // SAFETY: serialized on the xdg_env key.
        unsafe {
            env::set_var("XDG_CONFIG_HOME", empty.path());
        }
        let result = load_settings(
            Some(Path::new("/nonexistent/stockbridge.toml")),
            SettingsLayer::default(),
        );
        // SAFETY: Same as above - restoring original env state
        unsafe {
            match original_xdg {
                Some(val) => env::set_var("XDG_CONFIG_HOME", val),
                None => env::remove_var("XDG_CONFIG_HOME"),
            }
        }

        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }
}
