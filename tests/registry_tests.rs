//! Tests for api registry composition (merge, builder_from) and its use by a runtime.

use durotopic::api::{ApiError, ApiRegistry};
use durotopic::store::in_memory::InMemoryStore;
use durotopic::topic::TopicSchedule;
use durotopic::{Client, Runtime, RuntimeOptions};
use std::sync::Arc;
use std::time::Duration;

async fn facebook(query: String) -> Result<i64, ApiError> {
    Ok(query.len() as i64)
}

async fn twitter(_query: String) -> Result<i64, ApiError> {
    Ok(10)
}

async fn flaky(_query: String) -> Result<i64, ApiError> {
    Err(ApiError::unavailable("maintenance"))
}

#[test]
fn test_api_registry_merge() {
    let social = ApiRegistry::builder()
        .register("facebook", facebook)
        .register("twitter", twitter)
        .build();
    let other = ApiRegistry::builder().register("flaky", flaky).build();

    let combined = ApiRegistry::builder().merge(social).merge(other).build();

    assert_eq!(combined.count(), 3);
    assert_eq!(combined.list_names(), vec!["facebook", "flaky", "twitter"]);
}

#[test]
fn test_builder_from_extends_existing_registry() {
    let base = ApiRegistry::builder().register("facebook", facebook).build();
    let extended = ApiRegistry::builder_from(&base).register("twitter", twitter).build();

    assert!(extended.has("facebook"));
    assert!(extended.has("twitter"));
    assert!(!base.has("twitter"));
}

#[test]
fn test_duplicate_registration_fails_build_result() {
    let result = ApiRegistry::builder()
        .register("facebook", facebook)
        .register("facebook", twitter)
        .build_result();
    let err = result.err().unwrap();
    assert!(err.contains("duplicate api registration: facebook"));

    let merged = ApiRegistry::builder()
        .register("facebook", facebook)
        .merge(ApiRegistry::builder().register("facebook", facebook).build())
        .build_result();
    assert!(merged.is_err());
}

#[tokio::test]
async fn test_runtime_uses_merged_registry() {
    let apis = ApiRegistry::builder()
        .merge(ApiRegistry::builder().register("facebook", facebook).build())
        .merge(ApiRegistry::builder().register("twitter", twitter).build())
        .build();
    let options = RuntimeOptions {
        reminder_poll_interval_ms: 5,
        ..Default::default()
    };
    let rt = Runtime::start_with_options(Arc::new(InMemoryStore::new()), apis, options)
        .await
        .unwrap();
    let client = Client::new(rt.clone());

    client
        .create_topic(
            "rust",
            "#rustlang",
            TopicSchedule::new()
                .every("facebook", Duration::from_secs(30))
                .every("twitter", Duration::from_secs(30)),
        )
        .await
        .unwrap();

    // 9 chars from facebook plus 10 from twitter
    let total = client.wait_for_total("rust", 19, Duration::from_secs(5)).await.unwrap();
    assert_eq!(total, 19);
    rt.shutdown(None).await;
}
