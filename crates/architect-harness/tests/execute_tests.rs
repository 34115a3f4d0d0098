use architect_core::prelude::*;
use architect_core::ProjectRef;
use architect_harness::{BuilderHarness, ExecuteOptions};
use architect_test_utils::{
    counting_builder, echo_builder, expect_log, failing_builder, object,
    rejecting_builder, temp_workspace, throwing_builder,
};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn seen_options(result: &architect_harness::ExecutionResult) -> Value {
    result
        .result
        .as_ref()
        .and_then(|output| output.field("seenOptions"))
        .cloned()
        .unwrap_or(Value::Null)
}

proptest! {
    #[test]
    fn prop_configuration_overrides_base(
        base in proptest::collection::btree_map("[a-e]", 0..100i64, 0..5),
        overlay in proptest::collection::btree_map("[a-e]", 0..100i64, 0..5),
    ) {
        let workspace = temp_workspace();
        let harness = BuilderHarness::new(echo_builder(), workspace.path());
        let to_bag = |map: &BTreeMap<String, i64>| -> JsonObject {
            map.iter().map(|(k, v)| (k.clone(), json!(v))).collect()
        };
        harness.use_target("build", to_bag(&base)).unwrap();
        harness.with_configuration("n", to_bag(&overlay));

        let mut expected = base.clone();
        expected.extend(overlay.clone());

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = runtime
            .block_on(harness.execute_once(ExecuteOptions::new().with_configuration("n")))
            .unwrap();

        prop_assert_eq!(seen_options(&result), Value::Object(to_bag(&expected)));
    }
}

#[tokio::test]
async fn test_configuration_merge_scenario() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(echo_builder(), workspace.path());
    harness
        .use_target("build", object(json!({"a": 1})))
        .unwrap()
        .with_configuration("prod", object(json!({"a": 2, "b": 3})));

    let result = harness
        .execute_once(ExecuteOptions::new().with_configuration("prod"))
        .await
        .unwrap();

    assert!(result.is_success());
    assert_eq!(seen_options(&result), json!({"a": 2, "b": 3}));
}

#[tokio::test]
async fn test_unknown_configuration_uses_base() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(echo_builder(), workspace.path());
    harness.use_target("build", object(json!({"a": 1}))).unwrap();

    let result = harness
        .execute_once(ExecuteOptions::new().with_configuration("missing"))
        .await
        .unwrap();
    assert_eq!(seen_options(&result), json!({"a": 1}));
}

#[tokio::test]
async fn test_target_identity_reaches_context() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(echo_builder(), workspace.path());

    let result = harness.execute_once(ExecuteOptions::new()).await.unwrap();
    assert_eq!(result.result.unwrap().field("target"), Some(&Value::Null));

    harness.use_target("build", JsonObject::new()).unwrap();
    let result = harness
        .execute_once(ExecuteOptions::new().with_configuration("prod"))
        .await
        .unwrap();
    assert_eq!(
        result.result.unwrap().field("target"),
        Some(&json!("test:build:prod"))
    );
}

#[tokio::test]
async fn test_additional_arguments_are_forwarded() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(echo_builder(), workspace.path());

    let result = harness
        .execute_once(
            ExecuteOptions::new()
                .with_argument(json!({"transforms": true}))
                .with_argument("extra"),
        )
        .await
        .unwrap();
    assert_eq!(
        result.result.unwrap().field("extra"),
        Some(&json!([{"transforms": true}, "extra"]))
    );
}

#[tokio::test]
async fn test_builder_exception_is_contained() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(throwing_builder("boom"), workspace.path());

    let result = harness.execute_once(ExecuteOptions::new()).await.unwrap();

    assert!(result.result.is_none());
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.to_string(), "boom");
    assert_eq!(error.kind(), ErrorKind::BuilderException);
    expect_log(&result.logs, "about to throw");

    // guard was released
    assert!(!harness.is_executing());
    assert!(harness.execute_once(ExecuteOptions::new()).await.is_ok());
}

#[tokio::test]
async fn test_rejected_future_is_contained() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(rejecting_builder("later boom"), workspace.path());

    let snapshots: Vec<_> = harness
        .execute(ExecuteOptions::new().with_output_logs_on_exception(false))
        .unwrap()
        .collect()
        .await;

    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].error_message().as_deref(), Some("later boom"));
}

#[tokio::test]
async fn test_failure_result_is_not_an_error() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(failing_builder("compilation failed"), workspace.path());

    let result = harness.execute_once(ExecuteOptions::new()).await.unwrap();

    assert!(result.error.is_none());
    let output = result.result.as_ref().unwrap();
    assert!(!output.success);
    assert_eq!(output.error.as_deref(), Some("compilation failed"));
    expect_log(&result.logs, "compilation failed");
}

#[tokio::test]
async fn test_second_execution_is_rejected_while_active() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(echo_builder(), workspace.path());

    let first = harness.execute(ExecuteOptions::new()).unwrap();
    let err = harness.execute(ExecuteOptions::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrencyViolation);

    let snapshots: Vec<_> = first.collect().await;
    assert_eq!(snapshots.len(), 1);

    assert!(harness.execute_once(ExecuteOptions::new()).await.is_ok());
}

#[tokio::test]
async fn test_dropped_execution_releases_guard() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(echo_builder(), workspace.path());

    let execution = harness.execute(ExecuteOptions::new()).unwrap();
    assert!(harness.is_executing());
    drop(execution);
    assert!(!harness.is_executing());
}

#[tokio::test]
async fn test_execution_is_lazy() {
    let workspace = temp_workspace();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let harness = BuilderHarness::new(
        builder_fn(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(BuilderOutput::success().into())
        }),
        workspace.path(),
    );

    let mut execution = harness.execute(ExecuteOptions::new()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    execution.next().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    execution.close().await.unwrap();
}

#[tokio::test]
async fn test_logs_are_partitioned_per_snapshot() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(counting_builder(3), workspace.path());

    let snapshots: Vec<_> = harness
        .execute(ExecuteOptions::new())
        .unwrap()
        .collect()
        .await;

    assert_eq!(snapshots.len(), 3);
    let all: Vec<String> = snapshots
        .iter()
        .flat_map(|snapshot| snapshot.logs.iter().map(|entry| entry.message.clone()))
        .collect();
    assert_eq!(all, ["build 1", "build 2", "build 3"]);
    for (index, snapshot) in snapshots.iter().enumerate() {
        assert_eq!(snapshot.logs.len(), 1);
        assert_eq!(snapshot.result.as_ref().unwrap().field("build"), Some(&json!(index + 1)));
    }
}

#[tokio::test]
async fn test_invalid_options_abort_execution() {
    let workspace = temp_workspace();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let harness = BuilderHarness::new(
        builder_fn(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(BuilderOutput::success().into())
        }),
        workspace.path(),
    )
    .with_info(BuilderInfo::new("test:strict").with_schema(json!({
        "type": "object",
        "properties": { "level": { "type": "integer" } }
    })));
    harness.use_target("build", object(json!({"level": "high"}))).unwrap();

    let result = harness.execute_once(ExecuteOptions::new()).await.unwrap();

    assert!(result.result.is_none());
    assert_eq!(result.error.unwrap().kind(), ErrorKind::Validation);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_schema_defaults_reach_builder() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(echo_builder(), workspace.path()).with_info(
        BuilderInfo::new("test:defaults").with_schema(json!({
            "type": "object",
            "properties": { "outputPath": { "type": "string", "default": "dist" } }
        })),
    );
    harness.use_target("build", JsonObject::new()).unwrap();

    let result = harness.execute_once(ExecuteOptions::new()).await.unwrap();
    assert_eq!(seen_options(&result), json!({"outputPath": "dist"}));
}

#[tokio::test]
async fn test_signal_is_threaded_through() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(
        builder_fn(|_, context, _| {
            Ok(BuilderOutput::success()
                .with_field("cancelled", context.signal().is_cancelled())
                .into())
        }),
        workspace.path(),
    );

    let signal = CancellationToken::new();
    signal.cancel();
    let result = harness
        .execute_once(ExecuteOptions::new().with_signal(signal))
        .await
        .unwrap();
    assert_eq!(result.result.unwrap().field("cancelled"), Some(&json!(true)));
}

#[tokio::test]
async fn test_project_lookups() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(
        async_builder(|_, context| async move {
            let target = Target::new("app", "build");
            let metadata = context.get_project_metadata(ProjectRef::from(&target)).await?;
            let name = context.get_builder_name_for_target(&target).await?;
            let missing = context.get_project_metadata("test".into()).await;
            Ok(BuilderOutput::success()
                .with_field("metadata", Value::Object(metadata))
                .with_field("builderName", name)
                .with_field("missingKind", format!("{:?}", missing.unwrap_err().kind())))
        }),
        workspace.path(),
    );
    harness
        .use_project("app", object(json!({"root": "projects/app"})))
        .unwrap()
        .use_target("build", JsonObject::new())
        .unwrap();

    let result = harness.execute_once(ExecuteOptions::new()).await.unwrap();
    let output = result.result.unwrap();
    assert_eq!(output.field("metadata"), Some(&json!({"root": "projects/app"})));
    assert_eq!(output.field("builderName"), Some(&json!("harness:builder-under-test")));
    assert_eq!(output.field("missingKind"), Some(&json!("NotFound")));
}

#[tokio::test]
async fn test_default_project_metadata() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(
        async_builder(|_, context| async move {
            let metadata = context.get_project_metadata("test".into()).await?;
            Ok(BuilderOutput::success().with_field("metadata", Value::Object(metadata)))
        }),
        workspace.path(),
    );

    let result = harness.execute_once(ExecuteOptions::new()).await.unwrap();
    assert_eq!(
        result.result.unwrap().field("metadata"),
        Some(&json!({"root": "", "sourceRoot": "src", "cli": {"cache": {"enabled": false}}}))
    );
}

#[tokio::test]
async fn test_unknown_target_options_are_not_found() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(
        async_builder(|_, context| async move {
            let missing = context.get_target_options(&Target::new("test", "nope")).await;
            let known = context.get_target_options(&Target::new("test", "build")).await?;
            Ok(BuilderOutput::success()
                .with_field("missingKind", format!("{:?}", missing.unwrap_err().kind()))
                .with_field("known", Value::Object(known)))
        }),
        workspace.path(),
    );
    harness.use_target("build", object(json!({"a": 1}))).unwrap();

    let output = harness
        .execute_once(ExecuteOptions::new())
        .await
        .unwrap()
        .result
        .unwrap();
    assert_eq!(output.field("missingKind"), Some(&json!("NotFound")));
    assert_eq!(output.field("known"), Some(&json!({"a": 1})));
}

#[tokio::test]
async fn test_error_snapshot_frees_harness_for_next_execution() {
    let workspace = temp_workspace();
    let harness = BuilderHarness::new(throwing_builder("boom"), workspace.path());

    let mut errored = harness
        .execute(ExecuteOptions::new().with_output_logs_on_exception(false))
        .unwrap();
    let snapshot = errored.next().await.unwrap();
    assert_eq!(snapshot.error_message().as_deref(), Some("boom"));
    assert!(!harness.is_executing());

    let second = harness.execute(ExecuteOptions::new()).unwrap();
    drop(second);

    assert!(errored.next().await.is_none());
    errored.close().await.unwrap();
}
