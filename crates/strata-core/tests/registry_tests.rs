use std::io::Read;
use std::sync::Arc;

use serde_json::Map;
use strata_core::interpreter::builtin::{register_defaults, NOTEBOOK_ID, TABULAR_ID, TEXT_ID};
use strata_core::interpreter::{
    Extracted, InterpretContext, InterpretOutcome, InterpreterDefinition,
};
use strata_core::{FileDescriptor, Interpreter, InterpreterRegistry, RegistryError, SelectionRule};

struct Named;

impl Interpreter for Named {
    fn interpret(&self, _input: &mut dyn Read, _ctx: &InterpretContext<'_>) -> InterpretOutcome {
        Ok(Extracted::complete(Map::new()))
    }
}

fn registry() -> InterpreterRegistry {
    let registry = InterpreterRegistry::new();
    register_defaults(&registry).unwrap();
    registry
}

fn resolved_id(registry: &InterpreterRegistry, path: &str) -> Option<String> {
    let fd = FileDescriptor::new(path, 10, 0);
    registry
        .resolve(&fd)
        .unwrap()
        .map(|r| r.definition.id.clone())
}

#[test]
fn test_higher_priority_wins_regardless_of_order() {
    for high_first in [true, false] {
        let registry = registry();
        let low = SelectionRule::new("low", 5, TEXT_ID).extension("csv");
        let high = SelectionRule::new("high", 10, NOTEBOOK_ID).extension("csv");
        if high_first {
            registry.add_rule(high).unwrap();
            registry.add_rule(low).unwrap();
        } else {
            registry.add_rule(low).unwrap();
            registry.add_rule(high).unwrap();
        }

        let fd = FileDescriptor::new("/data/x.csv", 10, 0);
        let resolution = registry.resolve(&fd).unwrap().unwrap();
        assert_eq!(resolution.definition.id, NOTEBOOK_ID);
        assert_eq!(resolution.rule_id.as_deref(), Some("high"));
    }
}

#[test]
fn test_equal_priority_keeps_insertion_order() {
    let registry = registry();
    registry
        .add_rule(SelectionRule::new("first", 1, TEXT_ID).extension("csv"))
        .unwrap();
    registry
        .add_rule(SelectionRule::new("second", 1, NOTEBOOK_ID).extension("csv"))
        .unwrap();
    assert_eq!(resolved_id(&registry, "/x.csv").as_deref(), Some(TEXT_ID));
}

#[test]
fn test_extension_fallback_and_none() {
    let registry = registry();
    registry
        .add_rule(
            SelectionRule::new("logs", 3, TEXT_ID)
                .path_regex(r"/logs/")
                .unwrap(),
        )
        .unwrap();

    assert_eq!(resolved_id(&registry, "/srv/logs/a.csv").as_deref(), Some(TEXT_ID));
    assert_eq!(resolved_id(&registry, "/srv/data/a.csv").as_deref(), Some(TABULAR_ID));
    assert_eq!(resolved_id(&registry, "/srv/data/a.unknown"), None);
    assert_eq!(resolved_id(&registry, "/srv/data/Makefile"), None);
}

#[test]
fn test_custom_interpreter_claims_extension() {
    let registry = registry();
    registry
        .register(
            InterpreterDefinition::new("parquet", "0.1.0", Arc::new(Named))
                .with_extensions(&["parquet"]),
            false,
        )
        .unwrap();
    assert_eq!(resolved_id(&registry, "/t.parquet").as_deref(), Some("parquet"));

    let clash = registry.register(
        InterpreterDefinition::new("parquet", "0.2.0", Arc::new(Named)),
        false,
    );
    assert!(matches!(
        clash,
        Err(RegistryError::DuplicateRegistration { .. })
    ));
}

#[test]
fn test_dangling_rule_fails_validation() {
    let registry = registry();
    registry
        .add_rule(SelectionRule::new("ghost", 1, "missing").extension("txt"))
        .unwrap();
    assert!(matches!(
        registry.validate(),
        Err(RegistryError::UnresolvedRuleTarget { .. })
    ));
}
