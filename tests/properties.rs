// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property-based checks of the framework laws.

use csh_core::{CanonicalInput, JsonMap, ShapeKind};
use csh_error::CshError;
use csh_registry::Registry;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

fn names() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set("[a-z]{1,8}", 1..8)
        .prop_map(|set: BTreeSet<String>| set.into_iter().collect())
        .prop_shuffle()
}

fn scalar() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        any::<i64>().prop_map(serde_json::Value::from),
        any::<bool>().prop_map(serde_json::Value::from),
        "[a-z ]{0,12}".prop_map(serde_json::Value::from),
    ]
}

fn record() -> impl Strategy<Value = JsonMap> {
    proptest::collection::btree_map("[a-z]{1,6}", scalar(), 0..6)
        .prop_map(|map| map.into_iter().collect())
}

proptest! {
    // Registry shutdown order is the strict reverse of registration order,
    // and every shutdown action runs exactly once.
    #[test]
    fn registry_shutdown_reverses_registration(names in names()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&order);
            let registry: Registry<String> = Registry::new(
                "prop",
                Box::new(move |name, _| {
                    let seen = Arc::clone(&seen);
                    Box::pin(async move {
                        seen.lock().unwrap().push(name);
                        Ok::<(), CshError>(())
                    })
                }),
            );
            for name in &names {
                registry.register(name.clone(), Arc::new(name.clone())).unwrap();
            }
            registry.shutdown().await;

            let mut expected = names.clone();
            expected.reverse();
            prop_assert_eq!(&*order.lock().unwrap(), &expected);
            Ok(())
        })?;
    }

    // Functional copies: deriving a new input never disturbs the original.
    #[test]
    fn canonical_input_copies_are_functional(data in record(), key in "[a-z]{1,6}") {
        let input = CanonicalInput::from_parts(ShapeKind::Record, data.clone(), JsonMap::new());
        let derived = input
            .with_entry(key.clone(), serde_json::Value::from(42))
            .with_metadata("mark", serde_json::Value::from("x"));
        prop_assert_eq!(input.data(), &data);
        prop_assert!(input.metadata().is_empty());
        prop_assert_eq!(derived.data().get(&key), Some(&serde_json::Value::from(42)));
    }

    // An empty-pre, empty-post echo pipeline is the identity on data.
    #[test]
    fn echo_pipeline_is_identity_on_data(data in record()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        runtime.block_on(async {
            use csh_pipeline::steps::EchoExecutor;
            use csh_pipeline::{PipelineContext, PipelineProcessor, StepConfig};

            let processor = PipelineProcessor::new(
                "identity",
                ShapeKind::Record,
                ShapeKind::Record,
                Vec::new(),
                Arc::new(EchoExecutor::new(&StepConfig::default())),
                Vec::new(),
            );
            let input = CanonicalInput::from_parts(ShapeKind::Record, data.clone(), JsonMap::new());
            let output = processor
                .execute(input, &PipelineContext::new())
                .await
                .expect("echo pipeline");
            prop_assert_eq!(output.data(), &data);
            Ok(())
        })?;
    }

    // Status categories survive the result -> entity conversion unchanged.
    #[test]
    fn entity_conversion_preserves_status(index in 0usize..csh_core::StatusCategory::COUNT) {
        use csh_core::{ResponseEntity, StatusCategory, TaskResult};
        let status = StatusCategory::all()[index];
        if status == StatusCategory::Success {
            let entity = ResponseEntity::from_task_result(
                TaskResult::success(JsonMap::new(), JsonMap::new()),
            );
            prop_assert_eq!(entity.status(), StatusCategory::Success);
        } else {
            let entity = ResponseEntity::from_task_result(TaskResult::failure(status, "msg"));
            prop_assert_eq!(entity.status(), status);
        }
    }
}
