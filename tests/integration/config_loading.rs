//! Configuration loading through the public facade.

use crate::integration::test_utils::with_isolated_config_home;
use gridbake::config::{global_config_path, ConfigLoader, ValidationError};
use gridbake::error::ConfigError;
use std::fs;

#[test]
fn build_file_overrides_global_file() {
    with_isolated_config_home(|home| {
        let global = global_config_path().unwrap();
        assert!(global.starts_with(home));
        fs::create_dir_all(global.parent().unwrap()).unwrap();
        fs::write(&global, "api_key = \"global-user\"\nserver_cores = 1\n").unwrap();

        let build_file = home.join("ubuntu.toml");
        fs::write(
            &build_file,
            r#"
api_token = "tok"
server_cores = 4
server_memory = 8
storage_capacity = 25
isoimage_uuid = "iso-42"
ssh_username = "root"
template_name = "ubuntu-22.04"
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_validated(Some(&build_file)).unwrap();
        assert_eq!(config.api_key, "global-user");
        assert_eq!(config.server_cores, 4);
        assert_eq!(config.template_name, "ubuntu-22.04");
        assert!(config.server_name.starts_with("packer-"));
        assert_eq!(config.hostname, "packer-hostname");
        assert_eq!(config.shutdown_timeout_secs, 120);
    });
}

#[test]
fn invalid_configuration_reports_every_problem() {
    with_isolated_config_home(|home| {
        let build_file = home.join("broken.toml");
        fs::write(
            &build_file,
            "api_token = \"tok\"\napi_key = \"user\"\nserver_cores = 0\napi_request_headers = \"no-colon\"\n",
        )
        .unwrap();

        match ConfigLoader::load_validated(Some(&build_file)) {
            Err(ConfigError::Invalid(errors)) => {
                assert!(errors.contains(&ValidationError::NotPositive("server_cores")));
                assert!(errors.contains(&ValidationError::NoImageSource));
                assert!(errors.contains(&ValidationError::Missing("ssh_username")));
                assert!(errors
                    .iter()
                    .any(|e| matches!(e, ValidationError::Invalid("api_request_headers", _))));
            }
            other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
        }
    });
}

#[test]
fn missing_build_file_is_an_error() {
    with_isolated_config_home(|home| {
        let result = ConfigLoader::load(Some(&home.join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    });
}
