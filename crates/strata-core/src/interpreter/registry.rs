//! Interpreter registry with prioritized selection rules.
//!
//! Lookups read an immutable snapshot, so concurrent resolution never
//! observes a half-applied registration. Writers build a new snapshot and
//! swap it in.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::definition::InterpreterDefinition;
use super::error::RegistryError;
use crate::models::{normalize_extension, FileDescriptor};

/// Answers "does `dir` contain a file called `name`?" without touching disk.
///
/// The store implements this from the rows of the session being
/// interpreted.
pub trait SiblingIndex {
    fn has_sibling(&self, dir: &str, name: &str) -> bool;
}

/// Sibling index that knows about no files.
pub struct NoSiblings;

impl SiblingIndex for NoSiblings {
    fn has_sibling(&self, _dir: &str, _name: &str) -> bool {
        false
    }
}

/// A set of full paths.
impl SiblingIndex for HashSet<String> {
    fn has_sibling(&self, dir: &str, name: &str) -> bool {
        let path = std::path::Path::new(dir).join(name);
        self.contains(path.to_string_lossy().as_ref())
    }
}

/// Conditions a rule checks. Every set condition must hold; an empty
/// matcher matches every file.
#[derive(Debug, Clone, Default)]
pub struct RuleMatch {
    pub path_regex: Option<Regex>,
    pub sibling: Option<String>,
    pub min_size: Option<u64>,
    pub extension: Option<String>,
}

impl RuleMatch {
    fn matches(&self, fd: &FileDescriptor, siblings: &dyn SiblingIndex) -> bool {
        if let Some(ext) = &self.extension {
            if fd.extension != *ext {
                return false;
            }
        }
        if let Some(min) = self.min_size {
            if fd.size < min {
                return false;
            }
        }
        if let Some(re) = &self.path_regex {
            if !re.is_match(&fd.path) {
                return false;
            }
        }
        if let Some(name) = &self.sibling {
            if !siblings.has_sibling(&fd.parent_dir(), name) {
                return false;
            }
        }
        true
    }
}

/// Routes matching files to a specific interpreter.
#[derive(Debug, Clone)]
pub struct SelectionRule {
    pub id: String,
    /// Higher wins. Equal priorities fall back to insertion order.
    pub priority: i32,
    pub matcher: RuleMatch,
    pub target: String,
    /// Overlaid on the target definition's config.
    pub config: Map<String, Value>,
}

impl SelectionRule {
    pub fn new(id: impl Into<String>, priority: i32, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority,
            matcher: RuleMatch::default(),
            target: target.into(),
            config: Map::new(),
        }
    }

    /// Require the full path to match `pattern`.
    pub fn path_regex(mut self, pattern: &str) -> Result<Self, RegistryError> {
        let re = Regex::new(pattern).map_err(|e| RegistryError::InvalidRule {
            rule_id: self.id.clone(),
            message: e.to_string(),
        })?;
        self.matcher.path_regex = Some(re);
        Ok(self)
    }

    /// Require a file called `name` in the same directory.
    pub fn sibling(mut self, name: impl Into<String>) -> Self {
        self.matcher.sibling = Some(name.into());
        self
    }

    pub fn min_size(mut self, bytes: u64) -> Self {
        self.matcher.min_size = Some(bytes);
        self
    }

    pub fn extension(mut self, ext: &str) -> Self {
        self.matcher.extension = Some(normalize_extension(ext));
        self
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// The interpreter chosen for one file.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub definition: Arc<InterpreterDefinition>,
    /// The matching rule, or `None` for an extension match.
    pub rule_id: Option<String>,
    /// Definition config overlaid with the rule's overrides.
    pub config: Map<String, Value>,
}

impl Resolution {
    /// Size cap from config override, then the definition's limits.
    pub fn max_size_bytes(&self) -> Option<u64> {
        self.config
            .get("max_size_bytes")
            .and_then(Value::as_u64)
            .or(self.definition.limits.max_size_bytes)
    }

    /// Timeout from config override, then the definition's limits.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.config
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .map(std::time::Duration::from_millis)
            .or(self.definition.limits.timeout)
    }
}

#[derive(Debug)]
struct RankedRule {
    seq: u64,
    rule: SelectionRule,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    definitions: HashMap<String, Arc<InterpreterDefinition>>,
    /// Extension to interpreter id.
    extensions: HashMap<String, String>,
    /// Sorted by (priority desc, seq asc).
    rules: Vec<Arc<RankedRule>>,
    next_seq: u64,
}

/// Registry of interpreters and selection rules.
#[derive(Debug, Default)]
pub struct InterpreterRegistry {
    current: RwLock<Arc<Snapshot>>,
}

impl InterpreterRegistry {
    /// Create an empty registry. See [`super::builtin::register_defaults`].
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    fn update<T>(
        &self,
        f: impl FnOnce(&mut Snapshot) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = Snapshot::clone(&**guard);
        let out = f(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    /// Register an interpreter and claim its extensions.
    ///
    /// Re-registering the same id at the same version is a no-op. A different
    /// version is rejected unless `replace` is set. Later registrations take
    /// over shared extensions.
    pub fn register(
        &self,
        definition: InterpreterDefinition,
        replace: bool,
    ) -> Result<(), RegistryError> {
        self.update(|snap| {
            if let Some(existing) = snap.definitions.get(&definition.id) {
                if existing.version == definition.version && !replace {
                    return Ok(());
                }
                if existing.version != definition.version && !replace {
                    return Err(RegistryError::DuplicateRegistration {
                        id: definition.id.clone(),
                        existing: existing.version.clone(),
                        attempted: definition.version.clone(),
                    });
                }
                snap.extensions.retain(|_, id| *id != definition.id);
            }

            for ext in &definition.extensions {
                snap.extensions.insert(ext.clone(), definition.id.clone());
            }
            debug!(
                "Registered interpreter {}@{} for {:?}",
                definition.id, definition.version, definition.extensions
            );
            snap.definitions
                .insert(definition.id.clone(), Arc::new(definition));
            Ok(())
        })
    }

    /// Add a selection rule. The target does not have to be registered yet;
    /// [`Self::validate`] reports dangling targets.
    pub fn add_rule(&self, rule: SelectionRule) -> Result<(), RegistryError> {
        if rule.id.trim().is_empty() || rule.target.trim().is_empty() {
            return Err(RegistryError::InvalidRule {
                rule_id: rule.id.clone(),
                message: "rule id and target must be non-empty".to_string(),
            });
        }

        self.update(|snap| {
            if snap.rules.iter().any(|r| r.rule.id == rule.id) {
                return Err(RegistryError::InvalidRule {
                    rule_id: rule.id.clone(),
                    message: "a rule with this id already exists".to_string(),
                });
            }
            let seq = snap.next_seq;
            snap.next_seq += 1;
            snap.rules.push(Arc::new(RankedRule { seq, rule }));
            snap.rules
                .sort_by(|a, b| b.rule.priority.cmp(&a.rule.priority).then(a.seq.cmp(&b.seq)));
            Ok(())
        })
    }

    /// Remove a rule by id. Returns whether it existed.
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        self.update(|snap| {
            let before = snap.rules.len();
            snap.rules.retain(|r| r.rule.id != rule_id);
            Ok(snap.rules.len() != before)
        })
        .unwrap_or(false)
    }

    /// Every rule must target a registered interpreter.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let snap = self.snapshot();
        for ranked in &snap.rules {
            if !snap.definitions.contains_key(&ranked.rule.target) {
                return Err(RegistryError::UnresolvedRuleTarget {
                    rule_id: ranked.rule.id.clone(),
                    target: ranked.rule.target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Resolve without sibling information.
    pub fn resolve(&self, fd: &FileDescriptor) -> Result<Option<Resolution>, RegistryError> {
        self.resolve_with(fd, &NoSiblings)
    }

    /// Pick at most one interpreter for `fd`.
    ///
    /// The first matching rule in (priority desc, insertion asc) order wins;
    /// otherwise the extension table decides; otherwise `None`. Files without
    /// an extension only ever match through rules.
    pub fn resolve_with(
        &self,
        fd: &FileDescriptor,
        siblings: &dyn SiblingIndex,
    ) -> Result<Option<Resolution>, RegistryError> {
        let snap = self.snapshot();

        for ranked in &snap.rules {
            let rule = &ranked.rule;
            if !rule.matcher.matches(fd, siblings) {
                continue;
            }
            let definition = snap.definitions.get(&rule.target).ok_or_else(|| {
                RegistryError::UnresolvedRuleTarget {
                    rule_id: rule.id.clone(),
                    target: rule.target.clone(),
                }
            })?;
            let mut config = definition.config.clone();
            for (k, v) in &rule.config {
                config.insert(k.clone(), v.clone());
            }
            return Ok(Some(Resolution {
                definition: Arc::clone(definition),
                rule_id: Some(rule.id.clone()),
                config,
            }));
        }

        if fd.extension.is_empty() {
            return Ok(None);
        }

        Ok(snap
            .extensions
            .get(&fd.extension)
            .and_then(|id| snap.definitions.get(id))
            .map(|definition| Resolution {
                definition: Arc::clone(definition),
                rule_id: None,
                config: definition.config.clone(),
            }))
    }

    pub fn get(&self, id: &str) -> Option<Arc<InterpreterDefinition>> {
        self.snapshot().definitions.get(id).cloned()
    }

    /// Registered definitions, sorted by id.
    pub fn definitions(&self) -> Vec<Arc<InterpreterDefinition>> {
        let mut defs: Vec<_> = self.snapshot().definitions.values().cloned().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> Vec<SelectionRule> {
        self.snapshot()
            .rules
            .iter()
            .map(|r| r.rule.clone())
            .collect()
    }

    /// Extension claimed by each interpreter, sorted by extension.
    pub fn extension_table(&self) -> Vec<(String, String)> {
        let mut table: Vec<_> = self
            .snapshot()
            .extensions
            .iter()
            .map(|(e, id)| (e.clone(), id.clone()))
            .collect();
        table.sort();
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::traits::{Extracted, InterpretContext, InterpretOutcome, Interpreter};
    use std::io::Read;

    struct Noop;

    impl Interpreter for Noop {
        fn interpret(&self, _input: &mut dyn Read, _ctx: &InterpretContext<'_>) -> InterpretOutcome {
            Ok(Extracted::default())
        }
    }

    fn def(id: &str, version: &str, exts: &[&str]) -> InterpreterDefinition {
        InterpreterDefinition::new(id, version, Arc::new(Noop)).with_extensions(exts)
    }

    #[test]
    fn test_extension_fallback() {
        let registry = InterpreterRegistry::new();
        registry.register(def("csv", "1", &["csv"]), false).unwrap();

        let fd = FileDescriptor::new("/d/a.CSV", 1, 0);
        let res = registry.resolve(&fd).unwrap().unwrap();
        assert_eq!(res.definition.id, "csv");
        assert!(res.rule_id.is_none());

        let none = FileDescriptor::new("/d/a.bin", 1, 0);
        assert!(registry.resolve(&none).unwrap().is_none());
    }

    #[test]
    fn test_no_extension_requires_rule() {
        let registry = InterpreterRegistry::new();
        registry.register(def("text", "1", &["txt"]), false).unwrap();
        let fd = FileDescriptor::new("/d/Makefile", 1, 0);
        assert!(registry.resolve(&fd).unwrap().is_none());

        registry
            .add_rule(
                SelectionRule::new("makefiles", 0, "text")
                    .path_regex("/Makefile$")
                    .unwrap(),
            )
            .unwrap();
        let res = registry.resolve(&fd).unwrap().unwrap();
        assert_eq!(res.rule_id.as_deref(), Some("makefiles"));
    }

    #[test]
    fn test_priority_then_insertion_order() {
        let registry = InterpreterRegistry::new();
        registry.register(def("a", "1", &[]), false).unwrap();
        registry.register(def("b", "1", &[]), false).unwrap();
        registry.register(def("c", "1", &[]), false).unwrap();

        registry.add_rule(SelectionRule::new("low", 1, "a")).unwrap();
        registry.add_rule(SelectionRule::new("first", 5, "b")).unwrap();
        registry.add_rule(SelectionRule::new("second", 5, "c")).unwrap();

        let fd = FileDescriptor::new("/x.any", 1, 0);
        let res = registry.resolve(&fd).unwrap().unwrap();
        assert_eq!(res.rule_id.as_deref(), Some("first"));

        let order: Vec<_> = registry.rules().into_iter().map(|r| r.id).collect();
        assert_eq!(order, vec!["first", "second", "low"]);
    }

    #[test]
    fn test_rule_config_overlays_definition() {
        let registry = InterpreterRegistry::new();
        registry
            .register(
                def("nb", "1", &["ipynb"])
                    .with_config("max_headings", 5)
                    .with_config("keep", true),
                false,
            )
            .unwrap();
        registry
            .add_rule(
                SelectionRule::new("big", 1, "nb")
                    .extension("ipynb")
                    .config("max_headings", 10),
            )
            .unwrap();

        let res = registry
            .resolve(&FileDescriptor::new("/n.ipynb", 1, 0))
            .unwrap()
            .unwrap();
        assert_eq!(res.config["max_headings"], 10);
        assert_eq!(res.config["keep"], true);
    }

    #[test]
    fn test_sibling_rule() {
        let registry = InterpreterRegistry::new();
        registry.register(def("dbt", "1", &[]), false).unwrap();
        registry.register(def("yaml", "1", &["yml"]), false).unwrap();
        registry
            .add_rule(
                SelectionRule::new("dbt-project", 10, "dbt")
                    .extension("yml")
                    .sibling("dbt_project.yml"),
            )
            .unwrap();

        let fd = FileDescriptor::new("/repo/models.yml", 1, 0);
        assert_eq!(registry.resolve(&fd).unwrap().unwrap().definition.id, "yaml");

        let siblings: HashSet<String> = ["/repo/dbt_project.yml".to_string()].into();
        let res = registry.resolve_with(&fd, &siblings).unwrap().unwrap();
        assert_eq!(res.definition.id, "dbt");
    }

    #[test]
    fn test_min_size_rule() {
        let registry = InterpreterRegistry::new();
        registry.register(def("small", "1", &["log"]), false).unwrap();
        registry.register(def("large", "1", &[]), false).unwrap();
        registry
            .add_rule(SelectionRule::new("big-logs", 1, "large").extension("log").min_size(1000))
            .unwrap();

        let small = FileDescriptor::new("/a.log", 999, 0);
        let large = FileDescriptor::new("/b.log", 1000, 0);
        assert_eq!(registry.resolve(&small).unwrap().unwrap().definition.id, "small");
        assert_eq!(registry.resolve(&large).unwrap().unwrap().definition.id, "large");
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = InterpreterRegistry::new();
        registry.register(def("nb", "1", &["ipynb"]), false).unwrap();
        registry.register(def("nb", "1", &["ipynb"]), false).unwrap();

        let err = registry.register(def("nb", "2", &["ipynb"]), false).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRegistration { .. }));

        registry.register(def("nb", "2", &["ipynb"]), true).unwrap();
        assert_eq!(registry.get("nb").unwrap().version, "2");
    }

    #[test]
    fn test_replace_releases_dropped_extensions() {
        let registry = InterpreterRegistry::new();
        registry.register(def("t", "1", &["txt", "md"]), false).unwrap();
        registry.register(def("t", "2", &["txt"]), true).unwrap();
        assert!(registry
            .resolve(&FileDescriptor::new("/a.md", 1, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unresolved_rule_target() {
        let registry = InterpreterRegistry::new();
        registry.add_rule(SelectionRule::new("r", 1, "ghost")).unwrap();

        assert!(matches!(
            registry.validate(),
            Err(RegistryError::UnresolvedRuleTarget { .. })
        ));
        assert!(registry
            .resolve(&FileDescriptor::new("/a.txt", 1, 0))
            .is_err());
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = SelectionRule::new("bad", 1, "t").path_regex("(").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidRule { .. }));
    }

    #[test]
    fn test_remove_rule() {
        let registry = InterpreterRegistry::new();
        registry.register(def("t", "1", &[]), false).unwrap();
        registry.add_rule(SelectionRule::new("r", 1, "t")).unwrap();
        assert!(registry.remove_rule("r"));
        assert!(!registry.remove_rule("r"));
        assert!(registry.rules().is_empty());
    }

    #[test]
    fn test_resolution_limit_overrides() {
        let registry = InterpreterRegistry::new();
        registry
            .register(def("nb", "1", &["ipynb"]).with_max_size(1024), false)
            .unwrap();
        let fd = FileDescriptor::new("/a.ipynb", 1, 0);
        assert_eq!(registry.resolve(&fd).unwrap().unwrap().max_size_bytes(), Some(1024));

        registry
            .add_rule(
                SelectionRule::new("raise", 1, "nb")
                    .extension("ipynb")
                    .config("max_size_bytes", 4096),
            )
            .unwrap();
        assert_eq!(registry.resolve(&fd).unwrap().unwrap().max_size_bytes(), Some(4096));
    }
}
