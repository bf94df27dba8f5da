//! Unit tests for configuration.

#[cfg(test)]
mod path_expansion_tests {
    use super::super::Config;
    use std::path::PathBuf;

    #[test]
    fn expand_path_handles_tilde() {
        let result = Config::expand_path("~/test");
        assert!(!result.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn expand_path_handles_absolute_path() {
        let result = Config::expand_path("/absolute/path");
        assert_eq!(result, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn expand_path_handles_env_vars() {
        temp_env::with_var("DOCDESK_TEST_VAR", Some("/test/path"), || {
            let result = Config::expand_path("$DOCDESK_TEST_VAR/subdir");
            assert!(result.to_string_lossy().contains("/test/path"));
        });
    }
}

#[cfg(test)]
mod default_config_tests {
    use super::super::Config;
    use std::time::Duration;

    #[test]
    fn default_has_database_path() {
        let config = Config::default();
        assert!(config.database.to_string_lossy().contains("docdesk"));
        assert!(config.database.to_string_lossy().ends_with(".db"));
    }

    #[test]
    fn default_cache_lives_in_state_dir() {
        let config = Config::default();
        assert!(config.cache_path.to_string_lossy().ends_with("cache.json"));
    }

    #[test]
    fn default_inactivity_is_five_minutes() {
        let config = Config::default();
        assert_eq!(config.chat.inactivity_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn millisecond_override_wins() {
        let mut config = Config::default();
        config.chat.inactivity_timeout_ms = Some(40);
        assert_eq!(config.chat.inactivity_timeout(), Duration::from_millis(40));
    }

    #[test]
    fn default_sync_window_covers_one_turn() {
        let config = Config::default();
        assert_eq!(config.chat.sync_window, 2);
        assert!(config.chat.soft_close_after_turn);
    }

    #[test]
    fn default_reply_endpoint_unset() {
        let config = Config::default();
        assert!(config.reply.endpoint.is_none());
        assert_eq!(config.reply.timeout_secs, 30);
    }
}

#[cfg(test)]
mod load_tests {
    use super::super::Config;

    #[test]
    fn ensure_at_writes_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::ensure_at(&path).expect("ensure");
        assert!(path.exists());
        assert_eq!(config.chat.sync_window, 2);

        let reloaded = Config::load_from_path(&path).expect("reload");
        assert_eq!(reloaded.bus.capacity, config.bus.capacity);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chat]\ninactivity_timeout_secs = 60\n").expect("write");

        let config = Config::load_from_path(&path).expect("load");
        assert_eq!(config.chat.inactivity_timeout_secs, 60);
        assert_eq!(config.chat.sync_window, 2);
        assert_eq!(config.bus.capacity, 256);
    }

    #[test]
    fn zero_sync_window_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[chat]\nsync_window = 0\n").expect("write");

        assert!(Config::load_from_path(&path).is_err());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chat = [").expect("write");

        let err = Config::load_from_path(&path).expect_err("should fail");
        assert!(matches!(err, crate::Error::Config(_)));
    }
}

#[cfg(test)]
mod env_override_tests {
    use super::super::Config;
    use std::path::PathBuf;

    #[test]
    fn database_override_applies() {
        temp_env::with_var("DOCDESK_DATABASE", Some("/srv/docdesk/test.db"), || {
            let mut config = Config::default();
            config.apply_env_overrides();
            assert_eq!(config.database, PathBuf::from("/srv/docdesk/test.db"));
        });
    }

    #[test]
    fn empty_reply_endpoint_clears_it() {
        temp_env::with_var("DOCDESK_REPLY_ENDPOINT", Some(""), || {
            let mut config = Config::default();
            config.reply.endpoint = Some("http://localhost:9000/reply".to_string());
            config.apply_env_overrides();
            assert!(config.reply.endpoint.is_none());
        });
    }
}
