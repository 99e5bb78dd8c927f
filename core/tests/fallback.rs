mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{cloud_settings, ops, Behavior, BrokenSettings, FakeCloud, FakeRegistry};
use quill_core::agents::{GeminiClient, NullRegistry};
use quill_core::db::init_memory_db;
use quill_core::logging::recent_events;
use quill_core::{
    Deadlines, Feature, MemorySettingsStore, ReadinessPolicy, Settings, SettingsPatch,
    SettingsStore, Source, TextOps,
};

#[tokio::test]
async fn unbound_device_without_cloud_uses_stub() {
    let cloud = Arc::new(FakeCloud::answering("never"));
    let ops = ops(Arc::new(NullRegistry), cloud.clone(), Settings::default());

    let envelope = ops.summarize("A. B. C. D.", Some(2)).await;
    assert!(envelope.is_ok());
    assert_eq!(envelope.source(), Source::Stub);
    assert_eq!(envelope.text(), Some("A. B."));

    assert_eq!(ops.proofread("teh cat").await.text(), Some("teh cat"));
    assert_eq!(ops.write("hello").await.text(), Some("Draft: hello"));
    assert_eq!(
        ops.prompt_structured("hello").await.data(),
        Some(&json!({"text": "hello"}))
    );
    assert_eq!(cloud.calls(), 0);
}

#[tokio::test]
async fn summary_stub_uses_configured_sentence_count() {
    let settings = Settings {
        max_summary_sentences: 1,
        ..Settings::default()
    };
    let ops = ops(Arc::new(NullRegistry), Arc::new(FakeCloud::failing()), settings);
    assert_eq!(ops.summarize("One. Two. Three.", None).await.text(), Some("One."));
    assert_eq!(ops.summarize("One. Two. Three.", Some(0)).await.text(), Some("One."));
}

#[tokio::test]
async fn on_device_answer_is_builtin_and_session_released() {
    let registry = FakeRegistry::new(Behavior::Answer("The cat sat.".into())).all_available();
    let counters = registry.counters.clone();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());

    let envelope = ops.proofread("teh cat sat").await;
    assert!(envelope.is_ok());
    assert_eq!(envelope.source(), Source::Builtin);
    assert_eq!(envelope.text(), Some("The cat sat."));
    assert_eq!(counters.created(), 1);
    assert_eq!(counters.destroyed(), 1);
}

#[tokio::test]
async fn on_device_failure_without_cloud_is_surfaced() {
    let registry = FakeRegistry::new(Behavior::Fail("model crashed".into()))
        .with_status(Feature::Rewriter, "available");
    let counters = registry.counters.clone();
    let cloud = Arc::new(FakeCloud::answering("unused"));
    let ops = ops(Arc::new(registry), cloud.clone(), Settings::default());

    let envelope = ops.rewrite("hello", Some("formal")).await;
    assert!(!envelope.is_ok());
    assert_eq!(envelope.source(), Source::Error);
    assert!(envelope.data().is_none());
    let message = envelope.error().unwrap();
    assert!(message.contains("rewriter"));
    assert!(message.contains("model crashed"));
    assert!(message.contains("Enable cloud fallback"));
    assert_eq!(cloud.calls(), 0);
    assert_eq!(counters.destroyed(), 1);
}

#[tokio::test]
async fn empty_on_device_output_falls_through_silently() {
    let registry = FakeRegistry::new(Behavior::Answer(String::new())).all_available();
    let counters = registry.counters.clone();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());

    let envelope = ops.summarize("A. B. C. D.", Some(2)).await;
    assert!(envelope.is_ok());
    assert_eq!(envelope.source(), Source::Stub);
    assert_eq!(envelope.text(), Some("A. B."));
    assert_eq!(counters.destroyed(), 1);

    let registry = FakeRegistry::new(Behavior::Answer("  \n ".into())).all_available();
    let ops = common::ops(
        Arc::new(registry),
        Arc::new(FakeCloud::answering("cloud draft")),
        cloud_settings(),
    );
    let envelope = ops.write("hello").await;
    assert_eq!(envelope.source(), Source::Cloud);
    assert_eq!(envelope.text(), Some("cloud draft"));
}

#[tokio::test]
async fn on_device_failure_with_cloud_uses_cloud() {
    let registry = FakeRegistry::new(Behavior::Fail("boom".into())).all_available();
    let cloud = Arc::new(FakeCloud::answering("Hola"));
    let ops = ops(Arc::new(registry), cloud.clone(), cloud_settings());

    let envelope = ops.translate("Hello", Some("es"), None).await;
    assert!(envelope.is_ok());
    assert_eq!(envelope.source(), Source::Cloud);
    assert_eq!(envelope.text(), Some("Hola"));
    assert_eq!(
        cloud.systems.lock().unwrap()[0],
        "Translate the text into es. Respond with only the translation."
    );
}

#[tokio::test]
async fn cloud_failure_is_swallowed_into_stub() {
    let registry = FakeRegistry::new(Behavior::Fail("boom".into())).all_available();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), cloud_settings());

    let envelope = ops.simplify("Complex words here.", None).await;
    assert!(envelope.is_ok());
    assert_eq!(envelope.source(), Source::Stub);
    assert_eq!(envelope.text(), Some("Complex words here."));
}

#[tokio::test]
async fn missing_key_with_cloud_enabled_falls_to_stub() {
    let settings = Settings {
        use_cloud_fallback: true,
        ..Settings::default()
    };
    let ops = ops(Arc::new(NullRegistry), Arc::new(FakeCloud::answering("x")), settings);
    let envelope = ops.write("hello").await;
    assert_eq!(envelope.source(), Source::Stub);
    assert_eq!(envelope.text(), Some("Draft: hello"));
}

#[tokio::test]
async fn cloud_http_error_with_absent_device_is_stub_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let cloud = GeminiClient::new()
        .unwrap()
        .with_base_url(format!("{}/models", server.uri()));
    let ops = ops(Arc::new(NullRegistry), Arc::new(cloud), cloud_settings());

    let envelope = ops.summarize("A. B. C. D.", Some(2)).await;
    assert!(envelope.is_ok());
    assert_eq!(envelope.source(), Source::Stub);
    assert_eq!(envelope.text(), Some("A. B."));
}

#[tokio::test]
async fn cloud_answer_through_http_client() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-pro:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"items\": [\"milk\"]}"}]}}]
        })))
        .mount(&server)
        .await;

    let cloud = GeminiClient::new()
        .unwrap()
        .with_base_url(format!("{}/models", server.uri()));
    let ops = ops(Arc::new(NullRegistry), Arc::new(cloud), cloud_settings());

    let envelope = ops.prompt_structured("shopping list").await;
    assert_eq!(envelope.source(), Source::Cloud);
    assert_eq!(envelope.data(), Some(&json!({"items": ["milk"]})));
}

#[tokio::test(start_paused = true)]
async fn hung_execution_is_bounded_and_released() {
    let registry = FakeRegistry::new(Behavior::Hang).all_available();
    let counters = registry.counters.clone();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());
    let deadlines = ops.deadlines();

    let started = tokio::time::Instant::now();
    let envelope = ops.summarize("A. B.", None).await;
    let elapsed = started.elapsed();

    assert_eq!(envelope.source(), Source::Error);
    assert!(envelope.error().unwrap().contains("did not answer"));
    assert!(elapsed <= deadlines.acquisition + deadlines.execution + Duration::from_secs(1));
    assert_eq!(counters.runs(), 1);
    assert_eq!(counters.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_acquisition_is_bounded() {
    let registry = FakeRegistry::new(Behavior::Answer("x".into()))
        .all_available()
        .hanging_on_create();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default())
        .with_deadlines(Deadlines {
            acquisition: Duration::from_secs(2),
            ..Deadlines::default()
        });

    let started = tokio::time::Instant::now();
    let envelope = ops.write("hello").await;
    assert_eq!(envelope.source(), Source::Error);
    assert!(envelope.error().unwrap().contains("Timed out creating the writer session"));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn stuck_release_does_not_delay_the_error() {
    let registry = FakeRegistry::new(Behavior::Hang)
        .all_available()
        .with_stuck_destroy();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());
    let deadlines = ops.deadlines();

    let bound = deadlines.acquisition + deadlines.execution + Duration::from_secs(5);
    let envelope = tokio::time::timeout(bound, ops.write("hi"))
        .await
        .expect("error envelope within the deadline budget");
    assert_eq!(envelope.source(), Source::Error);
}

#[tokio::test(start_paused = true)]
async fn cancelled_caller_still_releases_late_session() {
    let registry = FakeRegistry::new(Behavior::Answer("late".into()))
        .all_available()
        .with_create_delay(Duration::from_secs(5));
    let counters = registry.counters.clone();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());

    let cancelled = tokio::time::timeout(Duration::from_secs(1), ops.write("hi")).await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(counters.created(), 1);
    assert_eq!(counters.destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn hung_availability_check_reads_as_unavailable_in_time() {
    let registry = FakeRegistry::new(Behavior::Answer("never".into())).hanging_availability();
    let counters = registry.counters.clone();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());
    let deadlines = ops.deadlines();

    let started = tokio::time::Instant::now();
    let envelope = ops.write("hi").await;
    assert_eq!(envelope.source(), Source::Stub);
    assert!(started.elapsed() <= deadlines.probe + Duration::from_millis(100));
    assert_eq!(counters.created(), 0);
}

#[tokio::test(start_paused = true)]
async fn hung_execution_with_cloud_falls_through() {
    let registry = FakeRegistry::new(Behavior::Hang).all_available();
    let cloud = Arc::new(FakeCloud::answering("cloud text"));
    let ops = ops(Arc::new(registry), cloud, cloud_settings());

    let envelope = ops.rewrite("hello", None).await;
    assert_eq!(envelope.source(), Source::Cloud);
    assert_eq!(envelope.text(), Some("cloud text"));
}

#[tokio::test]
async fn structured_on_device_answer_parse_or_raw() {
    let registry = FakeRegistry::new(Behavior::Answer(r#"{"a": 1}"#.into())).all_available();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());
    let envelope = ops.prompt_structured("give me json").await;
    assert_eq!(envelope.source(), Source::Builtin);
    assert_eq!(envelope.data(), Some(&json!({"a": 1})));

    let registry = FakeRegistry::new(Behavior::Answer("just words".into())).all_available();
    let ops = common::ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());
    let envelope = ops.prompt_structured("give me json").await;
    assert!(envelope.is_ok());
    assert!(envelope.error().is_none());
    assert_eq!(envelope.text(), Some("just words"));
}

#[tokio::test]
async fn unusable_language_pair_is_a_silent_skip() {
    let registry = FakeRegistry::new(Behavior::Fail("must not run".into()))
        .with_status(Feature::Translator, "available")
        .with_pair_status("unavailable");
    let counters = registry.counters.clone();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());

    let envelope = ops.translate("Bonjour", Some("en"), Some("fr")).await;
    assert!(envelope.is_ok());
    assert_eq!(envelope.source(), Source::Stub);
    assert_eq!(envelope.text(), Some("Bonjour"));
    assert_eq!(counters.created(), 0);
}

#[tokio::test]
async fn readiness_policy_gates_pending_downloads() {
    let strict = FakeRegistry::new(Behavior::Answer("on device".into()))
        .with_status(Feature::Writer, "downloadable");
    let ops = ops(Arc::new(strict), Arc::new(FakeCloud::failing()), Settings::default());
    assert_eq!(ops.write("hi").await.source(), Source::Stub);

    let lenient = FakeRegistry::new(Behavior::Answer("on device".into()))
        .with_status(Feature::Writer, "after-download");
    let ops = common::ops(Arc::new(lenient), Arc::new(FakeCloud::failing()), Settings::default())
        .with_policy(ReadinessPolicy::Lenient);
    let envelope = ops.write("hi").await;
    assert_eq!(envelope.source(), Source::Builtin);
    assert_eq!(envelope.text(), Some("on device"));
}

#[tokio::test]
async fn settings_are_read_fresh_each_call() {
    let store = Arc::new(MemorySettingsStore::default());
    let cloud = Arc::new(FakeCloud::answering("from cloud"));
    let ops = TextOps::new(Arc::new(NullRegistry), cloud.clone(), store.clone());

    assert_eq!(ops.write("hi").await.source(), Source::Stub);
    store
        .set(SettingsPatch {
            use_cloud_fallback: Some(true),
            cloud_api_key: Some("k".into()),
            ..SettingsPatch::default()
        })
        .await
        .unwrap();
    assert_eq!(ops.write("hi").await.source(), Source::Cloud);
    assert_eq!(cloud.calls(), 1);
}

#[tokio::test]
async fn failed_settings_read_uses_defaults() {
    let cloud = Arc::new(FakeCloud::answering("unused"));
    let ops = TextOps::new(Arc::new(NullRegistry), cloud.clone(), Arc::new(BrokenSettings));
    let envelope = ops.write("hi").await;
    assert_eq!(envelope.source(), Source::Stub);
    assert_eq!(cloud.calls(), 0);
}

#[tokio::test]
async fn capability_report_covers_every_feature() {
    let registry = FakeRegistry::new(Behavior::Answer("x".into()))
        .with_status(Feature::Summarizer, "readily")
        .with_status(Feature::Writer, "downloading");
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());
    let report = ops.detect_capabilities().await;
    assert_eq!(report.usable_features(), vec![Feature::Summarizer]);
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["policy"], "strict");
    assert_eq!(value["writer"]["status"], "downloading");
    assert_eq!(value["promptModel"]["usable"], false);
}

#[tokio::test]
async fn dispatch_routes_host_messages() {
    let ops = ops(Arc::new(NullRegistry), Arc::new(FakeCloud::failing()), Settings::default());

    let envelope = ops
        .dispatch_json(json!({"action": "write", "prompt": "hello"}))
        .await;
    assert_eq!(envelope.text(), Some("Draft: hello"));

    let envelope = ops
        .dispatch_json(json!({"action": "promptStructured", "promptText": "x"}))
        .await;
    assert_eq!(envelope.data(), Some(&json!({"text": "x"})));

    let envelope = ops.dispatch_json(json!({"action": "dance"})).await;
    assert_eq!(envelope.source(), Source::Error);
    assert_eq!(envelope.error(), Some("Unknown action: dance"));
}

#[tokio::test]
async fn journal_records_tiers_without_raw_text() {
    let pool = init_memory_db().unwrap();
    let registry = FakeRegistry::new(Behavior::Fail("boom".into())).all_available();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), cloud_settings())
        .with_journal(pool.clone());

    let secret_text = "my private note";
    let envelope = ops.proofread(secret_text).await;
    assert_eq!(envelope.source(), Source::Stub);

    let conn = pool.get().unwrap();
    let events = recent_events(&conn, 10).unwrap();
    let codes: Vec<_> = events.iter().filter_map(|e| e.code.clone()).collect();
    assert!(codes.contains(&"RUN-0200".to_string()));
    assert!(codes.contains(&"CAP-1002".to_string()));
    assert!(codes.contains(&"CLD-1002".to_string()));
    for event in &events {
        let data = event.data.as_ref().unwrap().to_string();
        assert!(!data.contains(secret_text));
    }
    let answered = events
        .iter()
        .find(|e| e.code.as_deref() == Some("RUN-0200"))
        .unwrap();
    assert_eq!(answered.data.as_ref().unwrap()["tier"], "stub");
}

#[tokio::test]
async fn concurrent_calls_do_not_interfere() {
    let registry = FakeRegistry::new(Behavior::Answer("ok".into())).all_available();
    let counters = registry.counters.clone();
    let ops = ops(Arc::new(registry), Arc::new(FakeCloud::failing()), Settings::default());

    let (a, b, c) = tokio::join!(ops.write("a"), ops.proofread("b"), ops.summarize("c.", None));
    for envelope in [a, b, c] {
        assert_eq!(envelope.source(), Source::Builtin);
    }
    assert_eq!(counters.created(), 3);
    assert_eq!(counters.destroyed(), 3);
}

#[test]
fn settings_defaults_are_stable() {
    let settings = Settings::default();
    assert!(!settings.use_cloud_fallback);
    assert_eq!(settings.cloud_model, "gemini-2.5-pro");
    assert_eq!(settings.default_target_lang, "en");
    assert_eq!(settings.max_summary_sentences, 3);
    let _: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::default());
}
