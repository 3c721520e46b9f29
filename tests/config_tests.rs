//! Tests for configuration loading, validation, and the accounts file.

use std::time::Duration;

use camino::Utf8PathBuf;
use cap_std::{ambient_authority, fs_utf8::Dir};
use nocturne::config::{DEFAULT_TAG_KEY, DEFAULT_TAG_VALUE};
use nocturne::test_support::EnvGuard;
use nocturne::{
    Account, AccountRegistry, AccountSelection, AccountsError, ConfigError, LogFormat,
    ResourceKind, ScalewayConfig, SchedulerConfig, TagFilter,
};
use rstest::*;
use tempfile::TempDir;

#[fixture]
fn valid_scaleway() -> ScalewayConfig {
    ScalewayConfig {
        access_key: Some(String::from("SCWACCESSKEYEXAMPLE")),
        secret_key: String::from("SCWSECRETKEYEXAMPLE"),
        default_project_id: Some(String::from("11111111-2222-3333-4444-555555555555")),
        default_zone: String::from("fr-par-1"),
    }
}

#[fixture]
fn scheduler() -> SchedulerConfig {
    SchedulerConfig {
        tag_key: String::from(DEFAULT_TAG_KEY),
        tag_value: String::from(DEFAULT_TAG_VALUE),
        resource_kinds: String::from("instance"),
        notification_topic: None,
        accounts_file: None,
        verify_timeout_secs: 300,
        check_interval_secs: 15,
        max_concurrency: 1,
        run_deadline_secs: None,
        retry_max_attempts: 5,
        retry_min_delay_ms: 500,
        retry_max_delay_ms: 10_000,
        log_level: String::from("info"),
        log_format: String::from("text"),
    }
}

fn assert_actionable(error: &ConfigError, env_var: &str, toml_key: &str) {
    let message = error.to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("nocturne.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
fn scaleway_validation_accepts_complete_config(valid_scaleway: ScalewayConfig) {
    assert!(valid_scaleway.validate().is_ok());
}

#[rstest]
fn scaleway_validation_rejects_missing_secret(valid_scaleway: ScalewayConfig) {
    let cfg = ScalewayConfig {
        secret_key: String::new(),
        ..valid_scaleway
    };
    let error = cfg.validate().expect_err("secret is required");
    assert!(matches!(error, ConfigError::MissingField(_)));
    assert_actionable(&error, "SCW_SECRET_KEY", "secret_key");
}

#[rstest]
fn scaleway_validation_rejects_blank_fields(valid_scaleway: ScalewayConfig) {
    let mut cfg = valid_scaleway.clone();
    cfg.default_zone = String::from(" ");
    let error = cfg.validate().expect_err("zone is required");
    assert_actionable(&error, "SCW_DEFAULT_ZONE", "default_zone");

    let mut cfg = valid_scaleway;
    cfg.default_project_id = Some(String::new());
    let error = cfg.validate().expect_err("blank project is rejected");
    assert_actionable(&error, "SCW_DEFAULT_PROJECT_ID", "default_project_id");
}

#[rstest]
fn scheduler_defaults_resolve(scheduler: SchedulerConfig) {
    let settings = scheduler.resolve().expect("defaults resolve");
    assert_eq!(
        settings.tag,
        TagFilter::new("nocturne-schedule", "office-hours")
    );
    assert_eq!(settings.kinds, [ResourceKind::Instance]);
    assert_eq!(settings.poll_window.timeout, Duration::from_secs(300));
    assert_eq!(settings.poll_window.check_interval, Duration::from_secs(15));
    assert_eq!(settings.max_concurrency, 1);
    assert_eq!(settings.run_deadline, None);
    assert_eq!(settings.retry.max_attempts, 5);
    assert_eq!(settings.retry.min_delay, Duration::from_millis(500));
    assert_eq!(settings.retry.max_delay, Duration::from_secs(10));
    assert_eq!(settings.log_format, LogFormat::Text);
}

#[rstest]
fn scheduler_resolves_kinds_in_order_without_duplicates(mut scheduler: SchedulerConfig) {
    scheduler.resource_kinds = String::from(" node-group, instance ,node-group,");
    scheduler.log_format = String::from("JSON");
    scheduler.run_deadline_secs = Some(900);
    let settings = scheduler.resolve().expect("valid settings");
    assert_eq!(
        settings.kinds,
        [ResourceKind::NodeGroup, ResourceKind::Instance]
    );
    assert_eq!(settings.log_format, LogFormat::Json);
    assert_eq!(settings.run_deadline, Some(Duration::from_secs(900)));
}

#[rstest]
#[case::tag_key(|cfg: &mut SchedulerConfig| cfg.tag_key.clear(), "NOCTURNE_TAG_KEY", "tag_key")]
#[case::tag_value(|cfg: &mut SchedulerConfig| cfg.tag_value = String::from("  "), "NOCTURNE_TAG_VALUE", "tag_value")]
#[case::kinds(|cfg: &mut SchedulerConfig| cfg.resource_kinds = String::from("database"), "NOCTURNE_RESOURCE_KINDS", "resource_kinds")]
#[case::no_kinds(|cfg: &mut SchedulerConfig| cfg.resource_kinds = String::from(" , "), "NOCTURNE_RESOURCE_KINDS", "resource_kinds")]
#[case::interval(|cfg: &mut SchedulerConfig| cfg.check_interval_secs = 0, "NOCTURNE_CHECK_INTERVAL_SECS", "check_interval_secs")]
#[case::concurrency(|cfg: &mut SchedulerConfig| cfg.max_concurrency = 0, "NOCTURNE_MAX_CONCURRENCY", "max_concurrency")]
#[case::deadline(|cfg: &mut SchedulerConfig| cfg.run_deadline_secs = Some(0), "NOCTURNE_RUN_DEADLINE_SECS", "run_deadline_secs")]
#[case::attempts(|cfg: &mut SchedulerConfig| cfg.retry_max_attempts = 0, "NOCTURNE_RETRY_MAX_ATTEMPTS", "retry_max_attempts")]
#[case::delays(|cfg: &mut SchedulerConfig| cfg.retry_min_delay_ms = 20_000, "NOCTURNE_RETRY_MIN_DELAY_MS", "retry_min_delay_ms")]
#[case::log_format(|cfg: &mut SchedulerConfig| cfg.log_format = String::from("yaml"), "NOCTURNE_LOG_FORMAT", "log_format")]
#[case::topic(|cfg: &mut SchedulerConfig| cfg.notification_topic = Some(String::new()), "NOCTURNE_NOTIFICATION_TOPIC", "notification_topic")]
fn scheduler_errors_name_the_setting(
    mut scheduler: SchedulerConfig,
    #[case] mutate: fn(&mut SchedulerConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut scheduler);
    let error = scheduler.resolve().expect_err("setting should be rejected");
    assert_actionable(&error, env_var, toml_key);
}

#[tokio::test]
async fn scheduler_reads_environment_overrides() {
    let _guard = EnvGuard::set_vars(&[
        ("NOCTURNE_TAG_VALUE", "weekends"),
        ("NOCTURNE_MAX_CONCURRENCY", "3"),
    ])
    .await;

    let config =
        SchedulerConfig::load_without_cli_args().expect("config should load from the environment");

    assert_eq!(config.tag_key, DEFAULT_TAG_KEY);
    assert_eq!(config.tag_value, "weekends");
    assert_eq!(config.max_concurrency, 3);
    assert_eq!(config.check_interval_secs, 15);
}

fn write_accounts(tmp: &TempDir, contents: &str) -> Utf8PathBuf {
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    Dir::open_ambient_dir(&root, ambient_authority())
        .unwrap_or_else(|err| panic!("open temp dir: {err}"))
        .write("accounts.toml", contents)
        .unwrap_or_else(|err| panic!("write accounts file: {err}"));
    root.join("accounts.toml")
}

#[test]
fn accounts_file_is_read_and_selected_by_name() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = write_accounts(
        &tmp,
        "[[accounts]]\nname = \"prod\"\naccount_id = \"proj-prod\"\n\n\
         [[accounts]]\nname = \"dev\"\naccount_id = \"proj-dev\"\n",
    );

    let registry = AccountRegistry::resolve(Some(&path), Some("ignored"))
        .unwrap_or_else(|err| panic!("accounts file should load: {err}"));
    let Ok(selection) = "dev".parse::<AccountSelection>();
    let selected = registry
        .select(&selection)
        .unwrap_or_else(|err| panic!("dev is registered: {err}"));

    assert_eq!(registry.accounts().len(), 2);
    assert_eq!(selected, [Account::new("dev", "proj-dev")]);
}

#[test]
fn accounts_file_rejects_duplicate_names() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = write_accounts(
        &tmp,
        "[[accounts]]\nname = \"prod\"\naccount_id = \"a\"\n\n\
         [[accounts]]\nname = \"prod\"\naccount_id = \"b\"\n",
    );

    let err = AccountRegistry::load(&path).expect_err("duplicates are rejected");
    assert!(
        matches!(err, AccountsError::InvalidEntry { ref message, .. } if message.contains("duplicate account name")),
        "unexpected error: {err}"
    );
}

#[test]
fn missing_accounts_file_reports_its_path() {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
        .unwrap_or_else(|path| panic!("temp dir should be utf8: {}", path.display()));
    let path = root.join("missing.toml");

    let err = AccountRegistry::load(&path).expect_err("missing file should error");
    assert!(matches!(err, AccountsError::Io { .. }), "unexpected error: {err}");
    assert!(err.to_string().contains("missing.toml"), "unexpected error: {err}");
}

#[test]
fn default_project_becomes_the_default_account() {
    let registry = AccountRegistry::resolve(None, Some("proj-1"))
        .unwrap_or_else(|err| panic!("project id should be enough: {err}"));
    assert_eq!(registry.accounts(), [Account::new("default", "proj-1")]);

    let err = AccountRegistry::resolve(None, None).expect_err("no source configured");
    assert!(matches!(err, AccountsError::NoAccounts));
}
