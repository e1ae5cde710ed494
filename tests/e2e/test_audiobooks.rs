use crate::e2e::helpers;

use audiobook_backend::infrastructure::repositories::{BlobStore, JobRepository};
use helpers::stub_tts::FRAMES_PER_CHUNK;
use helpers::{status_of, TestContext};
use hyper::StatusCode;
use serde_json::json;
use std::time::Duration;
use test_context::test_context;

/// Seconds of audio the stub engine returns per chunk
const CHUNK_SECONDS: f64 = FRAMES_PER_CHUNK as f64 * 0.024;

fn f64_field(body: &serde_json::Value, key: &str) -> Option<f64> {
    body.get(key).and_then(|v| v.as_f64())
}

/// JSON round-trips may move the last bit of a float
fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-6,
        "expected {} but got {}",
        expected,
        actual
    );
}

fn str_field<'a>(body: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(|v| v.as_str())
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_convert_a_pdf_into_an_audiobook(ctx: &TestContext) {
    let document = ctx.fixtures.book_pdf("book.pdf").unwrap();

    let job_id = ctx.submit(&document).await.unwrap();
    let body = ctx.wait_for_terminal(&job_id).await.unwrap();

    assert_eq!(status_of(&body), Some("completed"), "body: {}", body);
    assert_eq!(body.get("progress").and_then(|v| v.as_i64()), Some(100));
    assert!(body.get("error_detail").is_none());

    let audio_ref = str_field(&body, "audio_ref").expect("completed job has audio");
    assert_eq!(audio_ref, format!("audiobooks/{}.mp3", job_id));

    // One synthesis call per chunk; the 12 KB text splits into several chunks
    let calls = ctx.tts.calls();
    assert!(calls >= 3, "expected at least 3 chunks, got {}", calls);

    let duration = f64_field(&body, "duration_seconds").expect("duration is measured");
    let expected = calls as f64 * CHUNK_SECONDS;
    assert!(
        (duration - expected).abs() < 0.05,
        "duration {} should be close to {}",
        duration,
        expected
    );
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_default_the_title_to_the_file_name(ctx: &TestContext) {
    let document = ctx.fixtures.book_pdf("moby-dick.pdf").unwrap();

    let job_id = ctx.submit(&document).await.unwrap();
    ctx.wait_for_terminal(&job_id).await.unwrap();

    let job = ctx
        .jobs
        .find_by_id(job_id.parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.title.as_deref(), Some("moby-dick"));
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_reject_an_empty_document_ref(ctx: &TestContext) {
    let response = ctx
        .client
        .post("/api/audiobooks", &json!({ "document_ref": "   " }))
        .await
        .unwrap();

    response
        .assert_status(StatusCode::BAD_REQUEST)
        .assert_error_message("document_ref is required");
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_return_not_found_for_unknown_job(ctx: &TestContext) {
    let unknown = uuid::Uuid::new_v4();

    let response = ctx
        .client
        .get(&format!("/api/audiobooks/{}", unknown))
        .await
        .unwrap();
    response
        .assert_status(StatusCode::NOT_FOUND)
        .assert_error_message("not found");

    let response = ctx
        .client
        .post_empty(&format!("/api/audiobooks/{}/cancel", unknown))
        .await
        .unwrap();
    response.assert_status(StatusCode::NOT_FOUND);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_fail_when_the_document_is_missing(ctx: &TestContext) {
    let job_id = ctx.submit("missing.pdf").await.unwrap();
    let body = ctx.wait_for_terminal(&job_id).await.unwrap();

    assert_eq!(status_of(&body), Some("failed"));
    let detail = str_field(&body, "error_detail").unwrap();
    assert!(detail.contains("Document unavailable"), "detail: {}", detail);
    assert!(body.get("audio_ref").is_none());
    assert_eq!(ctx.tts.calls(), 0);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_fail_when_the_file_is_not_a_pdf(ctx: &TestContext) {
    let document = ctx
        .fixtures
        .raw_document("notes.pdf", b"this is plain text, not a pdf")
        .unwrap();

    let job_id = ctx.submit(&document).await.unwrap();
    let body = ctx.wait_for_terminal(&job_id).await.unwrap();

    assert_eq!(status_of(&body), Some("failed"));
    assert!(str_field(&body, "error_detail").is_some());
    assert_eq!(ctx.tts.calls(), 0);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_cancel_a_running_job(ctx: &TestContext) {
    ctx.tts.set_delay(Duration::from_secs(2));
    let document = ctx.fixtures.book_pdf("slow.pdf").unwrap();

    let job_id = ctx.submit(&document).await.unwrap();
    ctx.wait_for(&job_id, |body| status_of(body) == Some("processing"))
        .await
        .unwrap();

    let response = ctx
        .client
        .post_empty(&format!("/api/audiobooks/{}/cancel", job_id))
        .await
        .unwrap();
    response.assert_status(StatusCode::NO_CONTENT);

    // In-flight synthesis finishes in the background without reviving the job
    tokio::time::sleep(Duration::from_secs(3)).await;

    let body = ctx
        .client
        .get(&format!("/api/audiobooks/{}", job_id))
        .await
        .unwrap()
        .body
        .unwrap();
    assert_eq!(status_of(&body), Some("failed"));
    assert_eq!(
        str_field(&body, "error_detail"),
        Some("Processing was cancelled by the user")
    );
    assert_eq!(body.get("progress").and_then(|v| v.as_i64()), Some(0));
    assert!(body.get("audio_ref").is_none());

    let artifact = format!("audiobooks/{}.mp3", job_id);
    assert!(ctx.blobs.get(&artifact).await.is_err());
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_refuse_to_cancel_a_completed_job(ctx: &TestContext) {
    let document = ctx.fixtures.book_pdf("done.pdf").unwrap();
    let job_id = ctx.submit(&document).await.unwrap();
    let body = ctx.wait_for_terminal(&job_id).await.unwrap();
    assert_eq!(status_of(&body), Some("completed"));

    let response = ctx
        .client
        .post_empty(&format!("/api/audiobooks/{}/cancel", job_id))
        .await
        .unwrap();
    response.assert_status(StatusCode::CONFLICT);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_retry_a_failed_job_under_the_same_id(ctx: &TestContext) {
    ctx.tts.fail_next(1000);
    let document = ctx.fixtures.book_pdf("flaky.pdf").unwrap();

    let job_id = ctx.submit(&document).await.unwrap();
    let body = ctx.wait_for_terminal(&job_id).await.unwrap();
    assert_eq!(status_of(&body), Some("failed"));
    assert!(str_field(&body, "error_detail").is_some());

    ctx.tts.fail_next(0);
    let response = ctx
        .client
        .post(
            "/api/audiobooks",
            &json!({ "document_ref": document, "job_id": job_id }),
        )
        .await
        .unwrap();
    response.assert_status(StatusCode::ACCEPTED);
    assert_eq!(
        response.body.as_ref().and_then(|b| str_field(b, "id")),
        Some(job_id.as_str())
    );

    let body = ctx.wait_for_terminal(&job_id).await.unwrap();
    assert_eq!(status_of(&body), Some("completed"), "body: {}", body);
    assert!(body.get("error_detail").is_none());
    assert_eq!(body.get("progress").and_then(|v| v.as_i64()), Some(100));
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_refuse_to_restart_an_active_job(ctx: &TestContext) {
    ctx.tts.set_delay(Duration::from_millis(500));
    let document = ctx.fixtures.book_pdf("busy.pdf").unwrap();

    let job_id = ctx.submit(&document).await.unwrap();
    let response = ctx
        .client
        .post(
            "/api/audiobooks",
            &json!({ "document_ref": document, "job_id": job_id }),
        )
        .await
        .unwrap();
    response.assert_status(StatusCode::CONFLICT);

    let body = ctx.wait_for_terminal(&job_id).await.unwrap();
    assert_eq!(status_of(&body), Some("completed"));
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_reconcile_the_reported_duration(ctx: &TestContext) {
    let document = ctx.fixtures.book_pdf("timed.pdf").unwrap();
    let job_id = ctx.submit(&document).await.unwrap();
    let body = ctx.wait_for_terminal(&job_id).await.unwrap();
    let measured = f64_field(&body, "duration_seconds").unwrap();
    let path = format!("/api/audiobooks/{}/duration", job_id);

    // Within a second of the measurement: kept as is
    let response = ctx
        .client
        .post(&path, &json!({ "duration_seconds": measured + 0.5 }))
        .await
        .unwrap();
    response.assert_status(StatusCode::OK);
    let stored = response.body.as_ref().and_then(|b| f64_field(b, "duration_seconds")).unwrap();
    assert_close(stored, measured);

    // Further away: the player's value wins
    let response = ctx
        .client
        .post(&path, &json!({ "duration_seconds": measured + 10.0 }))
        .await
        .unwrap();
    response.assert_status(StatusCode::OK);
    let stored = response.body.as_ref().and_then(|b| f64_field(b, "duration_seconds")).unwrap();
    assert_close(stored, measured + 10.0);

    let response = ctx
        .client
        .post(&path, &json!({ "duration_seconds": -1.0 }))
        .await
        .unwrap();
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_list_audiobooks_newest_first(ctx: &TestContext) {
    ctx.tts.set_delay(Duration::from_millis(200));
    let mut ids = Vec::new();
    for name in ["first.pdf", "second.pdf", "third.pdf"] {
        let document = ctx.fixtures.book_pdf(name).unwrap();
        ids.push(ctx.submit(&document).await.unwrap());
    }

    let response = ctx.client.get("/api/audiobooks?page=1&limit=2").await.unwrap();
    response.assert_status(StatusCode::OK);
    let body = response.body.unwrap();
    let listed: Vec<&str> = body["audiobooks"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|j| str_field(j, "id"))
        .collect();
    assert_eq!(listed, vec![ids[2].as_str(), ids[1].as_str()]);
    assert_eq!(body["pagination"]["total_count"], 3);
    assert_eq!(body["pagination"]["total_pages"], 2);
    assert_eq!(body["pagination"]["has_next_page"], true);
    assert_eq!(body["pagination"]["has_prev_page"], false);

    let response = ctx.client.get("/api/audiobooks?page=2&limit=2").await.unwrap();
    let body = response.body.unwrap();
    assert_eq!(body["audiobooks"][0]["id"], ids[0].as_str());
    assert_eq!(body["audiobooks"][0]["title"], "first");
    assert_eq!(body["pagination"]["has_next_page"], false);

    for id in &ids {
        ctx.wait_for_terminal(id).await.unwrap();
    }
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_delete_a_finished_audiobook(ctx: &TestContext) {
    let document = ctx.fixtures.book_pdf("deleted.pdf").unwrap();
    let job_id = ctx.submit(&document).await.unwrap();
    let body = ctx.wait_for_terminal(&job_id).await.unwrap();
    let audio_ref = str_field(&body, "audio_ref").unwrap().to_string();
    assert!(ctx.blobs.get(&audio_ref).await.is_ok());

    let path = format!("/api/audiobooks/{}", job_id);
    ctx.client
        .delete(&path)
        .await
        .unwrap()
        .assert_status(StatusCode::NO_CONTENT);

    ctx.client
        .get(&path)
        .await
        .unwrap()
        .assert_status(StatusCode::NOT_FOUND);
    assert!(ctx.blobs.get(&audio_ref).await.is_err());

    ctx.client
        .delete(&path)
        .await
        .unwrap()
        .assert_status(StatusCode::NOT_FOUND);
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_refuse_to_delete_an_active_audiobook(ctx: &TestContext) {
    ctx.tts.set_delay(Duration::from_millis(500));
    let document = ctx.fixtures.book_pdf("in-progress.pdf").unwrap();
    let job_id = ctx.submit(&document).await.unwrap();

    let path = format!("/api/audiobooks/{}", job_id);
    ctx.client
        .delete(&path)
        .await
        .unwrap()
        .assert_status(StatusCode::CONFLICT);

    let body = ctx.wait_for_terminal(&job_id).await.unwrap();
    assert_eq!(status_of(&body), Some("completed"));
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_stream_progress_events_until_done(ctx: &TestContext) {
    let document = ctx.fixtures.book_pdf("streamed.pdf").unwrap();
    let job_id = ctx.submit(&document).await.unwrap();

    // The stream closes on its own once the job is terminal
    let response = tokio::time::timeout(
        Duration::from_secs(20),
        ctx.client.get(&format!("/api/audiobooks/{}/events", job_id)),
    )
    .await
    .expect("event stream should end")
    .unwrap();

    response.assert_status(StatusCode::OK);
    let content_type = response.header("content-type").cloned().unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));

    let events = response.events();
    let (done, progress) = events.split_last().expect("stream carries events");
    assert_eq!(done.event, "done");
    let done: serde_json::Value = serde_json::from_str(&done.data).unwrap();
    assert_eq!(str_field(&done, "id"), Some(job_id.as_str()));
    assert_eq!(status_of(&done), Some("completed"));

    assert!(!progress.is_empty());
    assert!(progress.iter().all(|e| e.event == "progress"));
    let percents: Vec<i64> = progress
        .iter()
        .map(|e| {
            let snapshot: serde_json::Value = serde_json::from_str(&e.data).unwrap();
            snapshot.get("progress").and_then(|v| v.as_i64()).unwrap()
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", percents);
    assert_eq!(percents.last(), Some(&100));
}

#[test_context(TestContext)]
#[tokio::test]
async fn it_should_echo_the_request_id(ctx: &TestContext) {
    let response = ctx.client.get("/api/audiobooks/not-a-uuid").await.unwrap();

    response
        .assert_status(StatusCode::BAD_REQUEST)
        .assert_header_exists("x-request-id");
}
