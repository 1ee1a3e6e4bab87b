use flowexec::config::{AlignConfig, InputMode, ModelConfig, ProcessorConfig, MODEL_EVENT_GROUP};
use flowexec::engine::SchedulerConfig;
use flowexec::hal::QueueBinding;
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_minimal_config_defaults() {
    let config = ProcessorConfig::from_json(json!({
        "name": "forward",
        "func_name": "identity"
    }))
    .unwrap();

    assert_eq!(config.device_id, 0);
    assert!(config.inputs.is_empty());
    assert!(config.outputs.is_empty());
    assert!(config.align.is_none());
    assert_eq!(config.input_mode, InputMode::Single);
    assert!(config.usable_outputs().is_empty());
}

#[test]
fn test_full_config() {
    let config = ProcessorConfig::from_str(
        r#"{
            "name": "merge",
            "device_id": 2,
            "func_name": "identity",
            "inputs": [
                {"device_id": 2, "queue_id": 0},
                {"device_id": 2, "queue_id": 1, "is_proxy": true}
            ],
            "outputs": [{"device_id": 2, "queue_id": 5}, {"device_id": 2, "queue_id": 6}],
            "usable_outputs": [1],
            "align": {"timeout_ms": 200, "drop_when_not_align": true},
            "input_mode": "single",
            "params": {"gain": 2}
        }"#,
    )
    .unwrap();

    assert_eq!(config.inputs[1], QueueBinding::proxy(2, 1));
    assert_eq!(config.usable_outputs(), vec![1]);
    let align = config.align.unwrap();
    assert_eq!(align.cache_num, 1024);
    assert_eq!(align.timeout(), Some(std::time::Duration::from_millis(200)));
    assert!(align.drop_when_not_align);
    assert_eq!(config.params["gain"], 2);
}

#[test]
fn test_streaming_mode() {
    let config = ProcessorConfig::from_json(json!({
        "name": "stream",
        "func_name": "identity",
        "input_mode": "streaming"
    }))
    .unwrap();
    assert_eq!(config.input_mode, InputMode::Streaming);
}

#[test]
fn test_validation_errors() {
    let empty_name = ProcessorConfig::from_json(json!({"name": "", "func_name": "identity"}));
    assert!(empty_name.is_err());

    let missing_func = ProcessorConfig::from_json(json!({"name": "p"}));
    assert!(missing_func.is_err());

    let bad_usable = ProcessorConfig::from_json(json!({
        "name": "p",
        "func_name": "identity",
        "outputs": [{"device_id": 0, "queue_id": 0}],
        "usable_outputs": [1]
    }));
    let message = format!("{:#}", bad_usable.unwrap_err());
    assert!(message.contains("out of range"));

    let zero_cache = ProcessorConfig::from_json(json!({
        "name": "p",
        "func_name": "identity",
        "align": {"cache_num": 0}
    }));
    assert!(zero_cache.is_err());

    assert!(ProcessorConfig::from_str("not json").is_err());
}

#[test]
fn test_from_path() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"name": "from_file", "func_name": "sink"}}"#).unwrap();

    let config = ProcessorConfig::from_path(file.path()).unwrap();
    assert_eq!(config.name, "from_file");
    assert_eq!(config.func_name, "sink");

    let missing = ProcessorConfig::from_path("/nonexistent/flowexec.json");
    assert!(format!("{:#}", missing.unwrap_err()).contains("failed to read"));
}

#[test]
fn test_align_defaults() {
    let align: AlignConfig = serde_json::from_value(json!({})).unwrap();
    assert_eq!(align, AlignConfig::default());
    assert_eq!(align.timeout(), None);
    assert!(align.validate().is_ok());
}

#[test]
fn test_scheduler_config_defaults() {
    let config: SchedulerConfig = serde_json::from_value(json!({"tick_ms": 20})).unwrap();
    assert_eq!(config.tick_ms, 20);
    assert_eq!(config.max_concurrent, SchedulerConfig::default().max_concurrent);
}

#[test]
fn test_model_group_stays_off_device_groups() {
    let config = ModelConfig::from_json(json!({
        "name": "nested",
        "inputs": [{"device_id": 0, "queue_id": 10}],
        "outputs": [{"device_id": 0, "queue_id": 11}]
    }))
    .unwrap();
    assert_eq!(config.group_id, MODEL_EVENT_GROUP);
    assert_ne!(config.group_id, config.outputs[0].device_id);

    let colliding = ModelConfig::from_json(json!({
        "name": "nested",
        "inputs": [{"device_id": 3, "queue_id": 10}],
        "outputs": [{"device_id": 3, "queue_id": 11}],
        "group_id": 3
    }));
    assert!(format!("{:#}", colliding.unwrap_err()).contains("group_id 3"));
}
