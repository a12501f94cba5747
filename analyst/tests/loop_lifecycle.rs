//! Loop-level tests for full analysis lifecycles.
//!
//! These drive `run_analysis` with scripted generators and backends to check
//! iteration bounds, retry feedback, artifact accumulation, and finalization.

use std::fs;
use std::time::Duration;

use analyst::core::types::ExecutionResult;
use analyst::looping::{AnalysisTask, LoopConfig, LoopStop, run_analysis};
use analyst::test_support::{
    AnalysisFixture, ScriptedBackend, ScriptedGenerator, ScriptedReply, failed_result, fake_png,
    ok_result,
};

fn task(fixture: &AnalysisFixture) -> AnalysisTask {
    AnalysisTask {
        description: "Plot total sales per region".to_string(),
        input_path: fixture.input_path().to_path_buf(),
    }
}

fn config(fixture: &AnalysisFixture, max_iterations: u32) -> LoopConfig {
    LoopConfig {
        max_iterations,
        execution_timeout: Duration::from_secs(30),
        output_dir: fixture.output_dir(),
    }
}

/// Every execution fails: the loop must stop after exactly `max_iterations`
/// cycles, finalize once, and report the budget as exhausted.
#[test]
fn always_failing_runs_stop_after_five_iterations() {
    let fixture = AnalysisFixture::new("sales.csv", "region,sales\nnorth,1\n").expect("fixture");
    let generator = ScriptedGenerator::repeating("print(undefined_name)");
    let backend = ScriptedBackend::repeating(failed_result("NameError: name 'undefined_name' is not defined"));

    let mut seen = Vec::new();
    let outcome = run_analysis(
        &task(&fixture),
        &generator,
        &backend,
        &config(&fixture, 5),
        |report| seen.push(report.iteration),
    )
    .expect("loop");

    assert_eq!(
        outcome.stop,
        LoopStop::BudgetExhausted {
            iterations: 5,
            max_iterations: 5
        }
    );
    assert_eq!(outcome.iterations, 5);
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert_eq!(backend.requests().len(), 5);
    assert_eq!(generator.requests().len(), 5);
    assert!(outcome.last_stderr.contains("NameError"));

    // The last attempted code is still persisted on failure.
    let code = fs::read_to_string(fixture.output_dir().join("analysis_code.py")).expect("code");
    assert!(code.contains("print(undefined_name)"));
}

#[test]
fn success_on_first_attempt_runs_one_cycle() {
    let fixture = AnalysisFixture::new("sales.csv", "region,sales\n").expect("fixture");
    let generator = ScriptedGenerator::repeating("print(df.shape)");
    let backend = ScriptedBackend::new(vec![ExecutionResult {
        images: vec![fake_png(1)],
        tabular_text: Some("region,total\nnorth,1\n".to_string()),
        ..ok_result("(1, 2)\n")
    }]);

    let outcome = run_analysis(
        &task(&fixture),
        &generator,
        &backend,
        &config(&fixture, 5),
        |_| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Succeeded);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.last_stdout, "(1, 2)\n");
    assert_eq!(backend.requests().len(), 1);

    let names: Vec<_> = outcome
        .manifest
        .iter()
        .map(|p| p.file_name().expect("name").to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["analysis_code.py", "result.csv", "plot_1.png"]);
}

#[test]
fn retry_passes_previous_error_and_code_to_generator() {
    let fixture = AnalysisFixture::new("sales.xlsx", "binary").expect("fixture");
    let generator = ScriptedGenerator::new(vec![
        ScriptedReply::Code("df.groupby('Region')".to_string()),
        ScriptedReply::Code("df.groupby('region')".to_string()),
    ]);
    let backend = ScriptedBackend::new(vec![
        failed_result("KeyError: 'Region'"),
        ok_result("done\n"),
    ]);

    let outcome = run_analysis(
        &task(&fixture),
        &generator,
        &backend,
        &config(&fixture, 5),
        |_| {},
    )
    .expect("loop");
    assert_eq!(outcome.stop, LoopStop::Succeeded);
    assert_eq!(outcome.iterations, 2);

    let requests = generator.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].feedback, None);
    assert_eq!(requests[0].input_filename, "sales.xlsx");
    assert_eq!(requests[0].data_path, "/workspace/sales.xlsx");
    let feedback = requests[1].feedback.as_ref().expect("feedback on retry");
    assert_eq!(feedback.error, "KeyError: 'Region'");
    assert_eq!(feedback.code, "df.groupby('Region')");
}

/// Images accumulate across iterations; the table is the latest non-empty one.
#[test]
fn artifacts_accumulate_across_iterations() {
    let fixture = AnalysisFixture::new("sales.csv", "region,sales\n").expect("fixture");
    let generator = ScriptedGenerator::repeating("plot()");
    let backend = ScriptedBackend::new(vec![
        ExecutionResult {
            images: vec![fake_png(1)],
            tabular_text: Some("first\n".to_string()),
            ..failed_result("UserWarning: tight_layout")
        },
        ExecutionResult {
            images: vec![fake_png(2)],
            ..ok_result("")
        },
    ]);

    let outcome = run_analysis(
        &task(&fixture),
        &generator,
        &backend,
        &config(&fixture, 5),
        |_| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::Succeeded);
    let out = fixture.output_dir();
    assert_eq!(fs::read(out.join("plot_1.png")).expect("plot 1"), fake_png(1));
    assert_eq!(fs::read(out.join("plot_2.png")).expect("plot 2"), fake_png(2));
    assert_eq!(fs::read_to_string(out.join("result.csv")).expect("table"), "first\n");
}

#[test]
fn generator_failure_is_fatal_and_skips_finalize() {
    let fixture = AnalysisFixture::new("sales.csv", "region,sales\n").expect("fixture");
    let generator = ScriptedGenerator::new(vec![ScriptedReply::Code("bad()".to_string())])
        .with_fallback(ScriptedReply::Fail("model unavailable".to_string()));
    let backend = ScriptedBackend::repeating(failed_result("NameError: bad"));

    let err = run_analysis(
        &task(&fixture),
        &generator,
        &backend,
        &config(&fixture, 5),
        |_| {},
    )
    .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("iteration 2"), "{message}");
    assert!(message.contains("model unavailable"), "{message}");
    assert_eq!(backend.requests().len(), 1);
    assert!(!fixture.output_dir().exists());
}

#[test]
fn infrastructure_failure_is_retried_like_a_script_error() {
    let fixture = AnalysisFixture::new("sales.csv", "region,sales\n").expect("fixture");
    let generator = ScriptedGenerator::repeating("print(1)");
    let backend = ScriptedBackend::new(vec![
        ExecutionResult::infrastructure_failure("print(1)", "ContainerError: spawn docker"),
        ok_result("1\n"),
    ]);

    let outcome = run_analysis(
        &task(&fixture),
        &generator,
        &backend,
        &config(&fixture, 5),
        |_| {},
    )
    .expect("loop");
    assert_eq!(outcome.stop, LoopStop::Succeeded);
    assert_eq!(outcome.iterations, 2);
    let feedback = generator.requests()[1].feedback.clone().expect("feedback");
    assert!(feedback.error.contains("ContainerError"));
}
