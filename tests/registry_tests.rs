use flowexec::core::{FlowContext, FlowFunc, FlowMessage};
use flowexec::registry::FuncRegistry;
use flowexec::{FlowError, FlowResult};

#[derive(Default)]
struct Rejecting;

impl FlowFunc for Rejecting {
    fn invoke(&mut self, _ctx: &mut FlowContext, _inputs: Vec<Option<FlowMessage>>) -> FlowResult<()> {
        Err(FlowError::Failed(1))
    }
}

#[test]
fn test_builtins_registered() {
    let registry = FuncRegistry::with_builtins();
    let names = registry.list();

    for expected in ["counter_source", "identity", "sink"] {
        assert!(names.contains(&expected.to_string()), "missing {}", expected);
        assert!(registry.resolve(expected).is_ok());
    }
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn test_unknown_function() {
    let registry = FuncRegistry::with_builtins();
    assert!(!registry.contains("does_not_exist"));

    let err = registry.resolve("does_not_exist").err().unwrap();
    assert!(err.to_string().contains("Unknown flow function"));
}

#[test]
fn test_builtin_metadata() {
    let registry = FuncRegistry::with_builtins();

    let counter = registry.metadata("counter_source").unwrap();
    assert_eq!(counter.name, "counter_source");
    assert!(!counter.description.is_empty());
    let names: Vec<&str> = counter.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["start", "step", "limit"]);
    assert!(counter.parameters.iter().all(|p| p.param_type == "integer"));
    assert_eq!(counter.parameters[1].default.as_deref(), Some("1"));

    let identity = registry.metadata("identity").unwrap();
    assert!(identity.parameters.is_empty());
    let _instance = identity.create_instance();
}

#[test]
fn test_parameter_schema_serialization() {
    let registry = FuncRegistry::with_builtins();
    let sink = registry.metadata("sink").unwrap();

    let json = serde_json::to_value(&sink.parameters).unwrap();
    assert_eq!(json[0]["name"], "log_every");
    assert_eq!(json[0]["type"], "integer");
    assert_eq!(json[0]["default"], "0");
}

#[test]
fn test_register_replaces_builtin() {
    let mut registry = FuncRegistry::with_builtins();
    registry.register("identity", || Box::new(Rejecting));

    assert!(registry.contains("identity"));
    assert!(registry.metadata("identity").is_none());
    assert!(registry.resolve("identity").is_ok());

    registry.register("rejecting", || Box::new(Rejecting));
    assert!(registry.list().contains(&"rejecting".to_string()));
}

#[test]
fn test_empty_registry() {
    let registry = FuncRegistry::default();
    assert!(registry.list().is_empty());
    assert!(registry.resolve("identity").is_err());
}
