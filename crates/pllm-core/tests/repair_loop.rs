//! Repair loop behaviour against scripted oracle and backend fakes.

mod common;

use serde_json::json;

use pllm_core::fakes::{BackendCall, ScriptedBackend, ScriptedOracle, StaticRegistry, ANY_VERSION};
use pllm_core::{
    AbortReason, EnvironmentSpec, ErrorKind, FailureHistory, LoopConfig, LoopState, OracleError,
    OracleTask, RepairLoop, RunOutcome,
};

use common::harness;

const SYNTAX_FAILURE: &str = "Traceback (most recent call last):
  File \"/app/snippet.py\", line 1, in <module>
    import memcache
  File \"/usr/local/lib/python2.7/site-packages/memcache.py\", line 12
    print \"x\"
SyntaxError: invalid syntax
";

fn config(max_iterations: u32) -> LoopConfig {
    LoopConfig {
        max_iterations,
        oracle_attempts: 2,
    }
}

fn spec(version: &str, modules: &[(&str, &str)]) -> EnvironmentSpec {
    EnvironmentSpec::new(version, modules.iter().copied())
}

#[tokio::test]
async fn syntax_error_is_repaired_with_a_new_pin() {
    let oracle = ScriptedOracle::new()
        .reply(OracleTask::IdentifyModule, json!({ "module": "memcache" }))
        .reply(
            OracleTask::ProposeVersion,
            json!({ "module": "memcache", "version": "1.53" }),
        );
    let backend = ScriptedBackend::new().run_output("2.7", SYNTAX_FAILURE);
    let registry = StaticRegistry::new().with_module(
        "memcache",
        &[
            ("1.53", "2013-06-01T00:00:00", "source"),
            ("1.62", "2019-01-01T00:00:00", "py2.py3"),
        ],
    );
    let h = harness("import memcache\n", oracle, backend, registry);

    let report = RepairLoop::new(
        &h.source,
        spec("2.7", &[("memcache", "1.62")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert_eq!(report.outcome, RunOutcome::succeeded());
    assert_eq!(report.iterations, 1);
    assert_eq!(
        h.backend.builds_for("2.7"),
        vec![vec!["memcache==1.62".to_string()], vec!["memcache==1.53".to_string()]]
    );
    assert_eq!(report.history.count(ErrorKind::SyntaxError), 1);
    assert_eq!(report.history.tried("memcache"), ["1.62", "1.53"]);
    assert_eq!(
        report.spec.previous_modules().map(|m| m[0].version.clone()),
        Some("1.62".to_string())
    );

    let asked = h.oracle.requests_for(OracleTask::ProposeVersion);
    assert_eq!(asked.len(), 1);
    assert_eq!(asked[0].context.excluded, vec!["1.62".to_string()]);
    assert_eq!(asked[0].context.candidates, vec!["1.53".to_string(), "1.62".to_string()]);

    assert_eq!(
        report.transitions,
        vec![
            LoopState::Building,
            LoopState::BuiltOk,
            LoopState::Running,
            LoopState::Classifying,
            LoopState::Repairing,
            LoopState::Building,
            LoopState::BuiltOk,
            LoopState::Running,
            LoopState::RunOk,
            LoopState::Succeeded,
        ]
    );
}

#[tokio::test]
async fn missing_configuration_is_accepted_without_repair() {
    let output = "Traceback (most recent call last):
  File \"/app/snippet.py\", line 3, in <module>
ImportError: Settings cannot be imported, because environment variable DJANGO_SETTINGS_MODULE is undefined.
";
    let backend = ScriptedBackend::new().run_output("3.6", output);
    let h = harness(
        "from django.conf import settings\n",
        ScriptedOracle::new(),
        backend,
        StaticRegistry::new(),
    );

    let report = RepairLoop::new(
        &h.source,
        spec("3.6", &[("django", "1.11")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(matches!(report.outcome, RunOutcome::Succeeded { caveat: Some(_) }));
    assert_eq!(report.iterations, 0);
    assert!(h.oracle.requests().is_empty());
    assert_eq!(
        report.transitions[report.transitions.len() - 2..].to_vec(),
        vec![LoopState::Classifying, LoopState::Succeeded]
    );
}

#[tokio::test]
async fn repeated_version_is_rejected() {
    let oracle = ScriptedOracle::new()
        .default_reply(OracleTask::IdentifyModule, json!({ "module": "foo" }))
        .default_reply(
            OracleTask::ProposeVersion,
            json!({ "module": "foo", "version": "1.0" }),
        );
    let backend = ScriptedBackend::new()
        .default_run_output(ANY_VERSION, "ModuleNotFoundError: No module named 'foo.bar'");
    let h = harness("import foo.bar\n", oracle, backend, StaticRegistry::new());

    let mut history = FailureHistory::new();
    history.record_tried("foo", "1.0");

    let report = RepairLoop::new(
        &h.source,
        spec("3.8", &[("foo", "2.0")]),
        h.services.clone(),
        config(1),
    )
    .with_history(history)
    .run()
    .await;

    assert_eq!(report.outcome, RunOutcome::aborted(AbortReason::BudgetExhausted));
    assert_eq!(report.spec.version_of("foo"), Some("2.0"));
    assert!(report.spec.previous_modules().is_none());

    let asked = h.oracle.requests_for(OracleTask::ProposeVersion);
    assert_eq!(asked.len(), 2);
    assert!(asked[1].context.excluded.contains(&"1.0".to_string()));
    assert!(asked[1].context.excluded.contains(&"2.0".to_string()));
}

#[tokio::test]
async fn budget_bounds_the_number_of_repairs() {
    let backend = ScriptedBackend::new().default_run_output(ANY_VERSION, SYNTAX_FAILURE);
    let h = harness("x = 1\n", ScriptedOracle::new(), backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("3.8", &[("six", "1.16.0")]),
        h.services.clone(),
        config(3),
    )
    .run()
    .await;

    assert_eq!(report.outcome, RunOutcome::aborted(AbortReason::BudgetExhausted));
    assert_eq!(report.iterations, 3);
    assert_eq!(h.backend.builds_for("3.8").len(), 3);
    let repairs = report
        .transitions
        .iter()
        .filter(|s| **s == LoopState::Repairing)
        .count();
    assert_eq!(repairs, 3);
    assert_eq!(report.transitions.last(), Some(&LoopState::Aborted));
}

#[tokio::test]
async fn import_module_is_moved_before_the_failed_install() {
    let build_log = "Step 4/7 : RUN pip install pandas==0.24.0
ImportError: numpy.core.multiarray failed to import
The command '/bin/sh -c pip install pandas==0.24.0' returned a non-zero code: 1
";
    let oracle = ScriptedOracle::new()
        .reply(OracleTask::IdentifyModule, json!({ "module": "numpy" }))
        .reply(
            OracleTask::ProposeVersion,
            json!({ "module": "numpy", "version": "1.15.4" }),
        )
        .reply(OracleTask::IdentifyInstallFailure, json!({ "module": "pandas" }));
    let backend = ScriptedBackend::new().build_result("3.7", false, build_log);
    let h = harness("import pandas\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("3.7", &[("pandas", "0.24.0"), ("numpy", "1.16.0")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(report.outcome.is_success());
    assert_eq!(report.history.count(ErrorKind::ImportError), 1);
    assert_eq!(
        h.backend.builds_for("3.7")[1],
        vec!["numpy==1.16.0".to_string(), "pandas==0.24.0".to_string()]
    );
}

#[tokio::test]
async fn missing_build_dependency_is_installed_first() {
    let build_log = "Step 4/6 : RUN pip install word2vec==0.9.1
    from Cython.Build import cythonize
ImportError: No module named Cython.Build
The command '/bin/sh -c pip install word2vec==0.9.1' returned a non-zero code: 1
";
    let oracle = ScriptedOracle::new()
        .reply(OracleTask::IdentifyModule, json!({ "module": "cython" }))
        .reply(
            OracleTask::ProposeVersion,
            json!({ "module": "cython", "version": "0.29.0" }),
        )
        .reply(OracleTask::IdentifyInstallFailure, json!({ "module": "word2vec" }));
    let backend = ScriptedBackend::new().build_result("2.7", false, build_log);
    let h = harness("import word2vec\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("2.7", &[("word2vec", "0.9.1")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(report.outcome.is_success());
    assert_eq!(
        h.backend.builds_for("2.7")[1],
        vec!["cython==0.29.0".to_string(), "word2vec==0.9.1".to_string()]
    );
}

#[tokio::test]
async fn schema_invalid_reply_is_retried() {
    let oracle = ScriptedOracle::new()
        .reply(OracleTask::IdentifyModule, json!({ "module": "memcache" }))
        .reply(OracleTask::ProposeVersion, json!({ "module": "memcache" }))
        .reply(
            OracleTask::ProposeVersion,
            json!({ "module": "memcache", "version": "1.53" }),
        );
    let backend = ScriptedBackend::new().run_output("2.7", SYNTAX_FAILURE);
    let h = harness("import memcache\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("2.7", &[("memcache", "1.62")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(report.outcome.is_success());
    assert_eq!(report.spec.version_of("memcache"), Some("1.53"));
    assert_eq!(h.oracle.requests_for(OracleTask::ProposeVersion).len(), 2);
}

#[tokio::test]
async fn exhausted_attempts_leave_the_spec_unchanged() {
    let oracle = ScriptedOracle::new()
        .default_reply(OracleTask::IdentifyModule, json!({ "module": "memcache" }))
        .default_reply(OracleTask::ProposeVersion, json!({ "version": "1.53" }));
    let backend = ScriptedBackend::new().run_output("2.7", SYNTAX_FAILURE);
    let h = harness("import memcache\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("2.7", &[("memcache", "1.62")]),
        h.services.clone(),
        config(1),
    )
    .run()
    .await;

    assert_eq!(report.outcome, RunOutcome::aborted(AbortReason::BudgetExhausted));
    assert_eq!(report.spec.version_of("memcache"), Some("1.62"));
    assert!(report.spec.previous_modules().is_none());
    // The loop's session makes two attempts per call.
    assert_eq!(h.oracle.requests_for(OracleTask::ProposeVersion).len(), 2);
}

#[tokio::test]
async fn oracle_timeout_does_not_abort_the_loop() {
    let oracle = ScriptedOracle::new()
        .fail(
            OracleTask::IdentifyModule,
            OracleError::Timeout("generation took too long".into()),
        )
        .reply(OracleTask::IdentifyModule, json!({ "module": "memcache" }))
        .reply(
            OracleTask::ProposeVersion,
            json!({ "module": "memcache", "version": "1.53" }),
        );
    let backend = ScriptedBackend::new().run_output("2.7", SYNTAX_FAILURE);
    let h = harness("import memcache\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("2.7", &[("memcache", "1.62")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(report.outcome.is_success());
    assert_eq!(report.spec.version_of("memcache"), Some("1.53"));
    assert_eq!(h.oracle.requests_for(OracleTask::IdentifyModule).len(), 2);
}

#[tokio::test]
async fn module_failing_on_path_is_removed() {
    let build_log = "Step 5/7 : RUN pip install pyinstaller==3.6
error: tool not found in PATH environment
The command '/bin/sh -c pip install pyinstaller==3.6' returned a non-zero code: 1
";
    let oracle = ScriptedOracle::new()
        .reply(OracleTask::IdentifyInstallFailure, json!({ "module": "pyinstaller" }));
    let backend = ScriptedBackend::new().build_result("3.8", false, build_log);
    let h = harness("import requests\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("3.8", &[("requests", "2.22.0"), ("pyinstaller", "3.6")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(report.outcome.is_success());
    assert_eq!(report.history.count(ErrorKind::NonZeroExit), 1);
    assert!(!report.spec.contains("pyinstaller"));
    assert_eq!(h.backend.builds_for("3.8")[1], vec!["requests==2.22.0".to_string()]);
}

#[tokio::test]
async fn dependency_conflict_pins_the_proposed_module() {
    let build_log = "ERROR: pip's dependency resolver does not currently take into account all the packages that are installed. This behaviour is the source of the following dependency conflicts.
botocore 1.12.0 requires urllib3<1.24, but you have urllib3 1.25.0 which is incompatible.
";
    let oracle = ScriptedOracle::new().reply(
        OracleTask::ProposeFix,
        json!({ "module": "urllib3", "version": "1.23" }),
    );
    let backend = ScriptedBackend::new().build_result("3.7", false, build_log);
    let h = harness("import boto3\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("3.7", &[("boto3", "1.9.0")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(report.outcome.is_success());
    assert_eq!(
        h.backend.builds_for("3.7")[1],
        vec!["boto3==1.9.0".to_string(), "urllib3==1.23".to_string()]
    );
    assert!(h.oracle.requests_for(OracleTask::IdentifyModule).is_empty());
}

#[tokio::test]
async fn none_version_removes_the_module() {
    let build_log = "ERROR: Could not find a version that satisfies the requirement tensorflow==0.1 (from versions: 2.0.0)\n";
    let oracle = ScriptedOracle::new()
        .reply(OracleTask::IdentifyModule, json!({ "module": "tensorflow" }))
        .reply(
            OracleTask::ProposeVersion,
            json!({ "module": "tensorflow", "version": "none" }),
        );
    let backend = ScriptedBackend::new().build_result("3.8", false, build_log);
    let h = harness("import tensorflow\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("3.8", &[("tensorflow", "0.1"), ("numpy", "1.18.0")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(report.outcome.is_success());
    assert_eq!(h.backend.builds_for("3.8")[1], vec!["numpy==1.18.0".to_string()]);
}

#[tokio::test]
async fn rate_limited_oracle_is_retried() {
    let oracle = ScriptedOracle::new()
        .fail(
            OracleTask::IdentifyModule,
            OracleError::RateLimited("slow down".into()),
        )
        .reply(OracleTask::IdentifyModule, json!({ "module": "memcache" }))
        .reply(
            OracleTask::ProposeVersion,
            json!({ "module": "memcache", "version": "1.53" }),
        );
    let backend = ScriptedBackend::new().run_output("2.7", SYNTAX_FAILURE);
    let h = harness("import memcache\n", oracle, backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("2.7", &[("memcache", "1.62")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert!(report.outcome.is_success());
    assert_eq!(report.spec.version_of("memcache"), Some("1.53"));
    assert_eq!(h.oracle.requests_for(OracleTask::IdentifyModule).len(), 2);
}

#[tokio::test]
async fn unreachable_oracle_aborts() {
    let backend = ScriptedBackend::new().run_output("3.8", SYNTAX_FAILURE);
    let h = harness("x = 1\n", ScriptedOracle::unreachable(), backend, StaticRegistry::new());

    let report = RepairLoop::new(
        &h.source,
        spec("3.8", &[("six", "1.16.0")]),
        h.services.clone(),
        config(5),
    )
    .run()
    .await;

    assert_eq!(report.outcome, RunOutcome::aborted(AbortReason::OracleExhausted));
    assert_eq!(report.iterations, 0);
    assert_eq!(report.transitions.last(), Some(&LoopState::Aborted));
}

#[tokio::test]
async fn unavailable_backend_is_an_undefined_environment() {
    let h = harness(
        "x = 1\n",
        ScriptedOracle::new(),
        ScriptedBackend::unavailable(),
        StaticRegistry::new(),
    );

    let report = RepairLoop::new(&h.source, spec("3.8", &[]), h.services.clone(), config(5))
        .run()
        .await;

    assert_eq!(report.outcome, RunOutcome::aborted(AbortReason::UndefinedEnvironment));
    assert_eq!(report.transitions, vec![LoopState::Building, LoopState::Aborted]);
}

#[tokio::test]
async fn empty_interpreter_never_builds() {
    let h = harness(
        "x = 1\n",
        ScriptedOracle::new(),
        ScriptedBackend::new(),
        StaticRegistry::new(),
    );

    let report = RepairLoop::new(&h.source, spec("", &[]), h.services.clone(), config(5))
        .run()
        .await;

    assert_eq!(report.outcome, RunOutcome::aborted(AbortReason::UndefinedEnvironment));
    assert_eq!(report.transitions, vec![LoopState::Aborted]);
    assert!(h.backend.builds_for("").is_empty());
}

#[tokio::test]
async fn terminal_state_tears_down_and_finishes_the_log() {
    let backend = ScriptedBackend::new().run_output("3.9", SYNTAX_FAILURE).failing_cleanup();
    let h = harness("x = 1\n", ScriptedOracle::new(), backend, StaticRegistry::new());

    let looped = RepairLoop::new(&h.source, spec("3.9", &[]), h.services.clone(), config(1));
    let namespace = looped.namespace().clone();
    let report = looped.run().await;

    let calls = h.backend.calls();
    assert!(calls.contains(&BackendCall::DeleteContainer {
        container: namespace.container.clone()
    }));
    assert_eq!(h.backend.deleted_images(), vec![namespace.image.clone()]);

    let path = report.log_path.expect("log path");
    assert_eq!(path, h.dir.path().join("output_data_3.9.yml"));
    let log = std::fs::read_to_string(path).unwrap();
    assert!(log.starts_with("---\npython_version: 3.9\n"));
    assert!(log.contains("  iteration_1:\n"));
    assert!(log.contains("    - error_type: SyntaxError\n"));
    assert!(log.contains("SyntaxError: invalid syntax"));
    assert!(log.contains("outcome: aborted_budget_exhausted\n"));
}
