mod common;

use common::fixtures::{self, MISSING, RICH, SIMPLE};
use common::{Harness, ScriptedRenderer, TestResult, test_config, within};
use quire::{
    CancelOutcome, GenerationError, GenerationOptions, JobId, Margins, MethodPreference, Quality,
    RenderMethod, Status,
};
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn first_request_queues_then_repeat_is_served_from_cache() -> TestResult {
    let h = Harness::new();
    h.orchestrator.start();
    let options = GenerationOptions::new();

    let first = h.orchestrator.generate(SIMPLE, &options).await?;
    assert_eq!(first.status, Status::Queued);
    assert!(!first.cached);
    assert!(first.estimated_time_ms > 0);
    let job_id = first.job_id.expect("queued job has an id");

    let result = within(h.orchestrator.wait(&job_id)).await?;
    assert!(result.file_path.exists());
    assert!(std::fs::read(&result.file_path)?.starts_with(b"%PDF-"));

    let second = h.orchestrator.generate(SIMPLE, &options).await?;
    assert!(second.cached);
    assert_eq!(second.status, Status::Completed);
    assert_eq!(second.job_id, None);
    assert_eq!(second.estimated_time_ms, 0);
    assert_eq!(second.result.map(|r| r.file_path), Some(result.file_path));
    assert_eq!(h.total_renders(), 1);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn equivalent_options_share_a_cache_entry() -> TestResult {
    let h = Harness::new();
    h.orchestrator.start();

    let implicit = h.orchestrator.generate(SIMPLE, &GenerationOptions::new()).await?;
    within(h.orchestrator.wait(&implicit.job_id.expect("job"))).await?;

    let explicit = GenerationOptions::new()
        .with_method(MethodPreference::Auto)
        .with_quality(Quality::Standard)
        .with_margins(Margins::uniform(Margins::DEFAULT_MM))
        .with_toc(true);
    let again = h.orchestrator.generate(SIMPLE, &explicit).await?;
    assert!(again.cached);

    let different = GenerationOptions::new().with_quality(Quality::High);
    let other = h.orchestrator.generate(SIMPLE, &different).await?;
    assert!(!other.cached);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn identical_requests_attach_to_one_job() -> TestResult {
    let h = Harness::new();
    let options = GenerationOptions::new();

    let first = h.orchestrator.generate(RICH, &options).await?;
    let second = h.orchestrator.generate(RICH, &options).await?;
    let third = h.orchestrator.generate(RICH, &options).await?;
    assert!(!first.attached);
    assert!(second.attached && third.attached);
    assert_eq!(first.job_id, second.job_id);
    assert_eq!(first.job_id, third.job_id);
    assert_eq!(h.orchestrator.queue_depth().queued, 1);

    h.orchestrator.start();
    within(h.orchestrator.wait(&first.job_id.expect("job"))).await?;
    assert_eq!(h.browser.calls(), 1);
    assert_eq!(h.pdf_files().len(), 1);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn auto_picks_office_for_simple_and_browser_for_rich() -> TestResult {
    let h = Harness::new();
    h.orchestrator.start();
    let options = GenerationOptions::new();

    let simple = h.orchestrator.generate(SIMPLE, &options).await?;
    let rich = h.orchestrator.generate(RICH, &options).await?;
    assert_eq!(simple.method, RenderMethod::Office);
    assert_eq!(rich.method, RenderMethod::Browser);

    let simple = within(h.orchestrator.wait(&simple.job_id.expect("job"))).await?;
    let rich = within(h.orchestrator.wait(&rich.job_id.expect("job"))).await?;
    assert_eq!(simple.method, RenderMethod::Office);
    assert_eq!(rich.method, RenderMethod::Browser);
    assert_eq!(h.office.calls(), 1);
    assert_eq!(h.browser.calls(), 1);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn explicit_method_overrides_selection() -> TestResult {
    let h = Harness::new();
    h.orchestrator.start();

    let options = GenerationOptions::new().with_method(MethodPreference::Browser);
    let response = h.orchestrator.generate(SIMPLE, &options).await?;
    assert_eq!(response.method, RenderMethod::Browser);
    let result = within(h.orchestrator.wait(&response.job_id.expect("job"))).await?;
    assert_eq!(result.method, RenderMethod::Browser);
    assert_eq!(h.office.calls(), 0);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() -> TestResult {
    let h = Harness::new();
    h.office.fail_next(2);
    h.orchestrator.start();

    let response = h.orchestrator.generate(SIMPLE, &GenerationOptions::new()).await?;
    let job_id = response.job_id.expect("job");
    within(h.orchestrator.wait(&job_id)).await?;

    let status = h.orchestrator.get_status(&job_id)?;
    assert_eq!(status.state, Status::Completed);
    assert_eq!(status.attempts, 3);
    assert_eq!(status.progress, 100);
    assert!(status.file_path.is_some());
    assert_eq!(h.office.calls(), 3);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn job_fails_after_max_attempts_with_reason() -> TestResult {
    let h = Harness::new();
    h.office.fail_next(10);
    h.orchestrator.start();

    let response = h.orchestrator.generate(SIMPLE, &GenerationOptions::new()).await?;
    let job_id = response.job_id.expect("job");
    let outcome = within(h.orchestrator.wait(&job_id)).await;
    match outcome {
        Err(GenerationError::QueueExhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("scripted failure"), "{}", last_error);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }

    let status = h.orchestrator.get_status(&job_id)?;
    assert_eq!(status.state, Status::Failed);
    assert_eq!(status.attempts, 3);
    let reason = status.error.expect("failure reason");
    assert!(reason.contains("after 3 attempts"), "{}", reason);
    assert_eq!(h.office.calls(), 3);
    assert!(h.pdf_files().is_empty());

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn explicit_unavailable_method_fails_without_retry() -> TestResult {
    let h = Harness::new();
    h.office.set_unavailable(true);
    h.orchestrator.start();

    let options = GenerationOptions::new().with_method(MethodPreference::Office);
    let response = h.orchestrator.generate(SIMPLE, &options).await?;
    let job_id = response.job_id.expect("job");
    match within(h.orchestrator.wait(&job_id)).await {
        Err(GenerationError::RendererUnavailable { method, suggested, .. }) => {
            assert_eq!(method, RenderMethod::Office);
            assert_eq!(suggested, RenderMethod::Browser);
        }
        other => panic!("expected unavailable, got {:?}", other),
    }
    assert_eq!(h.office.calls(), 1);
    assert_eq!(h.browser.calls(), 0);
    assert_eq!(h.orchestrator.get_status(&job_id)?.attempts, 1);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn auto_falls_back_when_selected_tool_is_missing() -> TestResult {
    let h = Harness::new();
    h.office.set_unavailable(true);
    h.orchestrator.start();

    let response = h.orchestrator.generate(SIMPLE, &GenerationOptions::new()).await?;
    let job_id = response.job_id.expect("job");
    let result = within(h.orchestrator.wait(&job_id)).await?;
    assert_eq!(result.method, RenderMethod::Browser);
    assert_eq!(h.office.calls(), 1);
    assert_eq!(h.browser.calls(), 1);

    let status = h.orchestrator.get_status(&job_id)?;
    assert_eq!(status.attempts, 1);
    assert_eq!(status.method, Some(RenderMethod::Browser));

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_ids_are_not_found() -> TestResult {
    let h = Harness::new();

    let err = h
        .orchestrator
        .generate(MISSING, &GenerationOptions::new())
        .await
        .expect_err("unknown proposal");
    assert!(err.is_not_found());

    let err = h.orchestrator.get_status(&JobId::new()).expect_err("unknown job");
    assert!(err.is_not_found());
    assert!(h.orchestrator.cancel(&JobId::new()).expect_err("unknown job").is_not_found());
    Ok(())
}

#[tokio::test]
async fn invalid_margins_are_rejected() {
    let h = Harness::new();
    let options = GenerationOptions::new().with_margins(Margins::uniform(-1.0));
    let err = h
        .orchestrator
        .generate(SIMPLE, &options)
        .await
        .expect_err("negative margins");
    assert!(matches!(err, GenerationError::InvalidOptions(_)));
    assert_eq!(h.orchestrator.queue_depth().queued, 0);
}

#[tokio::test]
async fn clear_cache_removes_files_and_forces_a_rerender() -> TestResult {
    let h = Harness::new();
    h.orchestrator.start();
    let options = GenerationOptions::new();

    let response = h.orchestrator.generate(SIMPLE, &options).await?;
    let result = within(h.orchestrator.wait(&response.job_id.expect("job"))).await?;
    let landscape = options.clone().with_orientation(quire::Orientation::Landscape);
    let response = h.orchestrator.generate(SIMPLE, &landscape).await?;
    within(h.orchestrator.wait(&response.job_id.expect("job"))).await?;
    assert_eq!(h.orchestrator.cache_stats().entries, 2);

    let removed = h.orchestrator.clear_cache(&SIMPLE.into());
    assert_eq!(removed, 2);
    assert!(!result.file_path.exists());
    assert!(h.pdf_files().is_empty());

    let again = h.orchestrator.generate(SIMPLE, &options).await?;
    assert!(!again.cached);
    within(h.orchestrator.wait(&again.job_id.expect("job"))).await?;
    assert_eq!(h.office.calls(), 3);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cache_evicts_least_recently_used_at_capacity() -> TestResult {
    let h = Harness::with(|mut config| {
        config.cache.max_capacity = 2;
        config
    });
    h.insert(fixtures::proposal("p-third", 2));
    h.orchestrator.start();
    let options = GenerationOptions::new();

    let mut paths = Vec::new();
    for id in [SIMPLE, RICH, "p-third"] {
        let response = h.orchestrator.generate(id, &options).await?;
        let result = within(h.orchestrator.wait(&response.job_id.expect("job"))).await?;
        paths.push(result.file_path);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stats = h.orchestrator.cache_stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.evictions, 1);
    assert!(!paths[0].exists());
    assert!(paths[1].exists() && paths[2].exists());

    assert!(!h.orchestrator.generate(SIMPLE, &options).await?.cached);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn cancelling_a_queued_job_removes_it() -> TestResult {
    let h = Harness::new();

    let response = h.orchestrator.generate(SIMPLE, &GenerationOptions::new()).await?;
    let job_id = response.job_id.expect("job");
    assert_eq!(h.orchestrator.cancel(&job_id)?, CancelOutcome::Removed);
    assert!(h.orchestrator.get_status(&job_id).is_err());

    h.orchestrator.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.total_renders(), 0);

    // The key is free again.
    let again = h.orchestrator.generate(SIMPLE, &GenerationOptions::new()).await?;
    assert!(!again.attached);
    assert_ne!(again.job_id, Some(job_id));

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn slow_renders_still_populate_progress() -> TestResult {
    let dir = TempDir::new()?;
    let config = test_config(dir.path());
    let browser = ScriptedRenderer::with_delay(RenderMethod::Browser, Duration::from_millis(150));
    let office = ScriptedRenderer::new(RenderMethod::Office);
    let h = Harness::assemble(dir, config, browser, office, None);
    h.orchestrator.start();

    let response = h.orchestrator.generate(RICH, &GenerationOptions::new()).await?;
    let job_id = response.job_id.expect("job");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = h.orchestrator.get_status(&job_id)?;
    assert_eq!(status.state, Status::Processing);
    assert!(status.progress >= 30 && status.progress < 100, "{}", status.progress);
    assert_eq!(status.method, Some(RenderMethod::Browser));

    within(h.orchestrator.wait(&job_id)).await?;
    assert_eq!(h.orchestrator.get_status(&job_id)?.progress, 100);

    h.orchestrator.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn capabilities_are_static_per_method() {
    let h = Harness::new();
    let table = h.orchestrator.get_capabilities();
    assert_eq!(table.len(), 2);
    let browser = &table[&RenderMethod::Browser];
    let office = &table[&RenderMethod::Office];
    assert!(browser.supports_charts && browser.supports_diagrams);
    assert!(!office.supports_charts && !office.supports_diagrams);
    assert!(
        office.estimated_time_range.max_ms <= browser.estimated_time_range.max_ms,
        "office is the fast path"
    );

    h.office.set_unavailable(true);
    let probes = h.orchestrator.check_renderers().await;
    assert!(probes[&RenderMethod::Browser].is_ok());
    assert!(probes[&RenderMethod::Office].is_err());
}
