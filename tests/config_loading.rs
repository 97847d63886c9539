use std::io::Write;

use weave_core::catalog::AgentCatalog;
use weave_core::config::AppConfig;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
agents_dir = "Agents"

[llm]
provider = "groq"
api_key = "sk-test-key"
max_tokens = 1024

[llm.retry]
max_retries = 5
initial_backoff_ms = 200

[planner]
model = "llama-3.3-70b"
temperature = 0.1
max_retries = 4
retry_backoff_ms = 500

[responder]
model = "llama-3.1-8b"

[engine]
max_concurrency = 2

[history]
max_window = 6

[log]
log_dir = "/tmp/weave-logs"
level = 3

[[agents]]
name = "NetAgent"
description = "Explains network facts"
system_prompt = "You explain IP addresses."
temperature = 0.2
expected_params = ["ip"]
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.llm.provider, "groq");
    assert_eq!(config.llm.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.llm.max_tokens, 1024);
    let retry = config.llm.retry.as_ref().expect("retry present");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 200);
    assert_eq!(retry.max_backoff_ms, 30000);

    assert_eq!(config.planner.model, "llama-3.3-70b");
    assert_eq!(config.planner.max_retries, 4);
    assert_eq!(config.planner.retry_backoff_ms, 500);
    assert_eq!(config.responder().model, "llama-3.1-8b");
    assert_eq!(config.engine.max_concurrency, 2);
    assert_eq!(config.history.max_window, 6);

    let log = config.log.as_ref().expect("log present");
    assert!(log.enabled);
    assert_eq!(log.level, 3);

    assert_eq!(config.agents.len(), 1);
    assert_eq!(config.agents[0].expected_params, vec!["ip"]);
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("WEAVE_TEST_API_KEY", "expanded-key-value");

    let toml_content = r#"
[llm]
api_key = "${WEAVE_TEST_API_KEY}"

[planner]
model = "test-model"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.llm.api_key, Some("expanded-key-value".to_string()));

    std::env::remove_var("WEAVE_TEST_API_KEY");
}

#[test]
fn test_missing_planner_section_is_an_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nmax_concurrency = 1\n")
        .expect("write toml");

    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(err.to_string().contains("planner"));
}

#[test]
fn test_missing_file() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/weave.toml")).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
}

#[test]
fn test_inline_agents_override_agent_files() {
    let dir = tempfile::tempdir().expect("temp dir");
    let agents = dir.path().join("Agents");
    std::fs::create_dir(&agents).unwrap();
    std::fs::write(
        agents.join("orchestrator_agent.json"),
        r#"{"name": "orchestrator_agent", "system_prompt": "You plan.", "temperature": 0.0}"#,
    )
    .unwrap();
    std::fs::write(
        agents.join("NetAgent.json"),
        r#"{"system_prompt": "From file."}"#,
    )
    .unwrap();

    let config_path = dir.path().join("weave.toml");
    std::fs::write(
        &config_path,
        r#"
[planner]
model = "m"

[[agents]]
name = "NetAgent"
system_prompt = "Inline wins."
"#,
    )
    .unwrap();

    let config = AppConfig::load(&config_path).expect("load config");
    let mut catalog = AgentCatalog::load_dir(&config.agents_dir_in(dir.path())).unwrap();
    catalog.merge(AgentCatalog::from_specs(config.agents.clone()));

    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.get("NetAgent").unwrap().system_prompt, "Inline wins.");
    assert_eq!(catalog.orchestrator().unwrap().system_prompt, "You plan.");
    assert_eq!(catalog.callable().count(), 1);
}
