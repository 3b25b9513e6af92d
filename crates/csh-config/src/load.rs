// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loader and single-pass validation.
//!
//! Loading is four steps: read the main document, parse it, resolve each
//! capability's actions and pipelines documents, then validate everything
//! at once.  Validation accumulates: a broken spec reports every problem in
//! one [`ConfigError::Validation`] instead of failing on the first.

use crate::spec::{PipelineSpec, Spec};
use crate::{ConfigError, ConfigSource};
use csh_core::ShapeKind;
use indexmap::IndexMap;
use tracing::info;

/// Environment variable naming the main document.
pub const CONFIG_ENV: &str = "CHESHIRE_CONFIG";

/// Default main document name.
pub const DEFAULT_DOCUMENT: &str = "cheshire.yaml";

/// Name of the main document: the `CHESHIRE_CONFIG` override when set and
/// non-empty, otherwise [`DEFAULT_DOCUMENT`].
#[must_use]
pub fn document_name() -> String {
    match std::env::var(CONFIG_ENV) {
        Ok(name) if !name.trim().is_empty() => name,
        _ => DEFAULT_DOCUMENT.to_string(),
    }
}

/// Load, resolve, and validate the spec rooted at `source`.
///
/// # Errors
///
/// Any [`ConfigError`] from reading, parsing, or validation.
pub fn load(source: &ConfigSource) -> Result<Spec, ConfigError> {
    load_document(source, &document_name())
}

/// Load a specific main document instead of the environment-selected one.
///
/// # Errors
///
/// Any [`ConfigError`] from reading, parsing, or validation.
pub fn load_document(source: &ConfigSource, document: &str) -> Result<Spec, ConfigError> {
    let text = source.read(document)?;
    let mut spec: Spec = parse_yaml(document, &text)?;

    // Resolve per-capability documents from the same root.
    for (name, capability) in &mut spec.capabilities {
        if !capability.actions_file.trim().is_empty() {
            let text = source.read(&capability.actions_file)?;
            capability.actions = parse_yaml(&capability.actions_file, &text)?;
        }
        if !capability.pipelines_file.trim().is_empty() {
            let text = source.read(&capability.pipelines_file)?;
            let pipelines: IndexMap<String, PipelineSpec> =
                parse_yaml(&capability.pipelines_file, &text)?;
            capability.pipelines = pipelines;
        }
        info!(
            target: "csh.config",
            capability = %name,
            actions = capability.actions.len(),
            pipelines = capability.pipelines.len(),
            "resolved capability documents"
        );
    }

    validate(&spec)?;
    Ok(spec)
}

fn parse_yaml<T: serde::de::DeserializeOwned>(path: &str, text: &str) -> Result<T, ConfigError> {
    serde_yaml::from_str(text).map_err(|err| ConfigError::Parse {
        path: path.to_string(),
        reason: err.to_string(),
    })
}

/// Validate a resolved spec in one pass, accumulating every problem.
///
/// # Errors
///
/// [`ConfigError::Validation`] listing all failures.
pub fn validate(spec: &Spec) -> Result<(), ConfigError> {
    let mut reasons: Vec<String> = Vec::new();

    for (name, source) in &spec.sources {
        if source.factory.trim().is_empty() {
            reasons.push(format!("source '{name}': factory must not be blank"));
        }
    }

    for (name, engine) in &spec.engines {
        if engine.factory.trim().is_empty() {
            reasons.push(format!("engine '{name}': factory must not be blank"));
        }
        for source in &engine.sources {
            if !spec.sources.contains_key(source) {
                reasons.push(format!(
                    "engine '{name}': referenced source '{source}' does not exist"
                ));
            }
        }
    }

    for (name, capability) in &spec.capabilities {
        // Required scalars.
        if capability.exposure.trim().is_empty() {
            reasons.push(format!("capability '{name}': exposure must not be blank"));
        } else if !spec.exposures.contains_key(&capability.exposure) {
            reasons.push(format!(
                "capability '{name}': exposure '{}' does not exist",
                capability.exposure
            ));
        }
        if capability.transport.trim().is_empty() {
            reasons.push(format!("capability '{name}': transport must not be blank"));
        }
        // A declared transport whose target entry is missing is tolerated
        // here; the capability manager substitutes an empty record and warns.
        if capability.actions_file.trim().is_empty() {
            reasons.push(format!(
                "capability '{name}': actions-specification-file must not be blank"
            ));
        }
        if capability.actions.is_empty() {
            reasons.push(format!("capability '{name}': actions set must not be empty"));
        }

        // Referential integrity.
        for source in &capability.sources {
            if !spec.sources.contains_key(source) {
                reasons.push(format!(
                    "capability '{name}': referenced source '{source}' does not exist"
                ));
            }
        }
        if let Some(engine) = &capability.engine
            && !spec.engines.contains_key(engine)
        {
            reasons.push(format!(
                "capability '{name}': referenced engine '{engine}' does not exist"
            ));
        }

        // Actions and pipelines.
        for (action, def) in &capability.actions {
            if def.pipeline.trim().is_empty() {
                reasons.push(format!(
                    "capability '{name}': action '{action}' names no pipeline"
                ));
            } else if !capability.pipelines.contains_key(&def.pipeline) {
                reasons.push(format!(
                    "capability '{name}': action '{action}' references unknown pipeline '{}'",
                    def.pipeline
                ));
            }
        }
        for (pipeline, def) in &capability.pipelines {
            if def.steps.execute.is_none() {
                reasons.push(format!(
                    "capability '{name}': pipeline '{pipeline}' must declare exactly one executor step"
                ));
            }
            if def.input.parse::<ShapeKind>().is_err() {
                reasons.push(format!(
                    "capability '{name}': pipeline '{pipeline}' declares unknown input shape '{}'",
                    def.input
                ));
            }
            if def.output.parse::<ShapeKind>().is_err() {
                reasons.push(format!(
                    "capability '{name}': pipeline '{pipeline}' declares unknown output shape '{}'",
                    def.output
                ));
            }
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Validation { reasons })
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::demo_source;
    use super::*;

    #[test]
    fn demo_spec_loads_and_resolves() {
        let spec = load_document(&demo_source(), DEFAULT_DOCUMENT).unwrap();
        assert_eq!(spec.metadata.name, "demo");
        let blog = &spec.capabilities["blog"];
        assert_eq!(blog.actions.len(), 1);
        assert_eq!(blog.pipelines.len(), 1);
        assert_eq!(blog.actions["ping"].pipeline, "ping-pipeline");
    }

    #[test]
    fn loading_is_deterministic() {
        let a = load_document(&demo_source(), DEFAULT_DOCUMENT).unwrap();
        let b = load_document(&demo_source(), DEFAULT_DOCUMENT).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_actions_document_fails() {
        let source = ConfigSource::embedded([
            ("cheshire.yaml", tests_support::MAIN),
            ("blog/pipelines.yaml", tests_support::PIPELINES),
        ]);
        let err = load_document(&source, DEFAULT_DOCUMENT).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn validation_accumulates_every_problem() {
        let main = r#"
capabilities:
  broken:
    exposure: nowhere
    transport: ""
    sources: [ghost-source]
    engine: ghost-engine
    actions-specification-file: broken/actions.yaml
    pipelines-definition-file: broken/pipelines.yaml
"#;
        let actions = r#"
go:
  pipeline: missing-pipeline
"#;
        let pipelines = r#"
half-pipeline:
  input: blob
  output: record
  steps:
    pre: []
"#;
        let source = ConfigSource::embedded([
            ("cheshire.yaml", main),
            ("broken/actions.yaml", actions),
            ("broken/pipelines.yaml", pipelines),
        ]);
        let err = load_document(&source, DEFAULT_DOCUMENT).unwrap_err();
        let ConfigError::Validation { reasons } = err else {
            panic!("expected Validation, got {err:?}");
        };
        let text = reasons.join("\n");
        assert!(text.contains("exposure 'nowhere' does not exist"));
        assert!(text.contains("transport must not be blank"));
        assert!(text.contains("referenced source 'ghost-source' does not exist"));
        assert!(text.contains("referenced engine 'ghost-engine' does not exist"));
        assert!(text.contains("unknown pipeline 'missing-pipeline'"));
        assert!(text.contains("exactly one executor step"));
        assert!(text.contains("unknown input shape 'blob'"));
        assert!(reasons.len() >= 7, "expected all problems reported: {text}");
    }

    #[test]
    fn missing_transport_target_is_tolerated_at_load_time() {
        let main = tests_support::MAIN.replace("transport: http-main", "transport: not-there");
        let source = ConfigSource::embedded([
            ("cheshire.yaml", main.as_str()),
            ("blog/actions.yaml", tests_support::ACTIONS),
            ("blog/pipelines.yaml", tests_support::PIPELINES),
        ]);
        let spec = load_document(&source, DEFAULT_DOCUMENT).unwrap();
        assert_eq!(spec.capabilities["blog"].transport, "not-there");
    }

    #[test]
    fn empty_actions_set_is_rejected() {
        let source = ConfigSource::embedded([
            ("cheshire.yaml", tests_support::MAIN),
            ("blog/actions.yaml", "{}"),
            ("blog/pipelines.yaml", tests_support::PIPELINES),
        ]);
        let err = load_document(&source, DEFAULT_DOCUMENT).unwrap_err();
        let ConfigError::Validation { reasons } = err else {
            panic!("expected Validation");
        };
        assert!(reasons.iter().any(|r| r.contains("actions set must not be empty")));
    }

    #[test]
    fn engine_with_unknown_source_is_rejected() {
        let main = tests_support::MAIN.replace("sources: [db-a]\n", "sources: [db-x]\n");
        // Replacement hits both the engine and capability source lists.
        let source = ConfigSource::embedded([
            ("cheshire.yaml", main.as_str()),
            ("blog/actions.yaml", tests_support::ACTIONS),
            ("blog/pipelines.yaml", tests_support::PIPELINES),
        ]);
        let err = load_document(&source, DEFAULT_DOCUMENT).unwrap_err();
        let ConfigError::Validation { reasons } = err else {
            panic!("expected Validation");
        };
        assert!(reasons.iter().any(|r| r.contains("engine 'eng-1'")));
        assert!(reasons.iter().any(|r| r.contains("capability 'blog'")));
    }

    #[test]
    fn document_name_honours_environment_override() {
        // Avoid mutating real process env in parallel tests; exercise the
        // default path only.
        assert_eq!(DEFAULT_DOCUMENT, "cheshire.yaml");
        assert!(!document_name().trim().is_empty());
    }

    #[test]
    fn loads_from_a_filesystem_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blog")).unwrap();
        std::fs::write(dir.path().join("cheshire.yaml"), tests_support::MAIN).unwrap();
        std::fs::write(dir.path().join("blog/actions.yaml"), tests_support::ACTIONS).unwrap();
        std::fs::write(
            dir.path().join("blog/pipelines.yaml"),
            tests_support::PIPELINES,
        )
        .unwrap();

        let spec = load_document(&ConfigSource::dir(dir.path()), DEFAULT_DOCUMENT).unwrap();
        assert!(spec.capabilities.contains_key("blog"));
    }
}
