//! Registry adapter integration tests against an in-process mock registry.

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use berth_registry::{InstanceRecord, NacosClient};
use common::MockRegistry;

fn demo_record() -> InstanceRecord {
    let mut metadata = HashMap::new();
    metadata.insert("description".to_string(), "demo service".to_string());
    InstanceRecord {
        service_name: "SERVICE@@demo".to_string(),
        ip: "10.0.0.9".to_string(),
        port: 9090,
        namespace: "public".to_string(),
        metadata,
        ephemeral: true,
    }
}

#[tokio::test]
async fn login_happens_once_across_calls() {
    let mock = MockRegistry::start(Arc::new(|_| (200, "content".to_string()))).await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    let a = client.get_config("app", "default", "public").await.unwrap();
    let b = client.get_config("app", "default", "public").await.unwrap();

    assert_eq!(a, "content");
    assert_eq!(b, "content");
    assert_eq!(mock.count_path("/nacos/v1/auth/login"), 1);
    assert_eq!(mock.count_path("/nacos/v1/cs/configs"), 2);
}

#[tokio::test]
async fn rejected_token_is_refreshed_once() {
    let flaky = AtomicUsize::new(0);
    let mock = MockRegistry::start(Arc::new(move |req| {
        if req.path == "/nacos/v1/cs/configs" && flaky.fetch_add(1, Ordering::SeqCst) == 0 {
            (403, "token expired".to_string())
        } else {
            (200, "fresh".to_string())
        }
    }))
    .await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    let content = client.get_config("app", "default", "public").await.unwrap();

    assert_eq!(content, "fresh");
    // One login for the first call, another after the 403.
    assert_eq!(mock.count_path("/nacos/v1/auth/login"), 2);
}

#[tokio::test]
async fn persistent_rejection_surfaces_auth_error() {
    let mock = MockRegistry::start(Arc::new(|_| (403, "no".to_string()))).await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    let err = client
        .get_config("app", "default", "public")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("auth"));
}

#[tokio::test]
async fn create_instance_posts_qualified_name_and_metadata() {
    let mock = MockRegistry::start(Arc::new(|_| (200, "ok".to_string()))).await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    client
        .create_instance(&demo_record(), 100.0, true)
        .await
        .unwrap();

    let request = mock
        .requests()
        .into_iter()
        .find(|r| r.path == "/nacos/v1/ns/instance")
        .unwrap();
    assert_eq!(request.method, "POST");
    let body = urlencoding::decode(&request.body).unwrap().into_owned();
    // Safe names already carry "@@" and must not be re-prefixed.
    assert!(body.contains("serviceName=SERVICE@@demo"));
    assert!(body.contains("ephemeral=true"));
    assert!(body.contains("weight=100"));
    assert!(body.contains("demo service"));
}

#[tokio::test]
async fn send_beat_carries_weight_and_period() {
    let mock = MockRegistry::start(Arc::new(|_| (200, "ok".to_string()))).await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    client
        .send_beat(&demo_record(), 42.5, Duration::from_secs(5))
        .await
        .unwrap();

    let request = mock
        .requests()
        .into_iter()
        .find(|r| r.path == "/nacos/v1/ns/instance/beat")
        .unwrap();
    assert_eq!(request.method, "PUT");
    let body = urlencoding::decode(&request.body).unwrap().into_owned();
    assert!(body.contains("\"weight\":42.5"));
    assert!(body.contains("\"period\":5000"));
    assert!(body.contains("\"scheduled\":true"));
}

#[tokio::test]
async fn update_weight_puts_new_weight() {
    let mock = MockRegistry::start(Arc::new(|_| (200, "ok".to_string()))).await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    client.update_weight(&demo_record(), 50.0).await.unwrap();

    let request = mock
        .requests()
        .into_iter()
        .find(|r| r.path == "/nacos/v1/ns/instance" && r.method == "PUT")
        .unwrap();
    let body = urlencoding::decode(&request.body).unwrap().into_owned();
    assert!(body.contains("weight=50"));
}

#[tokio::test]
async fn remove_instance_deletes_with_query() {
    let mock = MockRegistry::start(Arc::new(|_| (200, "ok".to_string()))).await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    client.remove_instance(&demo_record()).await.unwrap();

    let request = mock
        .requests()
        .into_iter()
        .find(|r| r.path == "/nacos/v1/ns/instance" && r.method == "DELETE")
        .unwrap();
    let query = urlencoding::decode(&request.query).unwrap().into_owned();
    assert!(query.contains("serviceName=SERVICE@@demo"));
    assert!(query.contains("ip=10.0.0.9"));
}

#[tokio::test]
async fn publish_config_posts_content() {
    let mock = MockRegistry::start(Arc::new(|_| (200, "true".to_string()))).await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    client
        .publish_config("app", "default", "key=value", "public")
        .await
        .unwrap();

    let request = mock
        .requests()
        .into_iter()
        .find(|r| r.path == "/nacos/v1/cs/configs" && r.method == "POST")
        .unwrap();
    let body = urlencoding::decode(&request.body).unwrap().into_owned();
    assert!(body.contains("dataId=app"));
    assert!(body.contains("content=key=value"));
}

#[tokio::test]
async fn registry_error_is_returned_not_thrown() {
    let mock = MockRegistry::start(Arc::new(|_| (500, "boom".to_string()))).await;
    let client = NacosClient::new(&mock.base_url(), "nacos", "nacos").unwrap();

    let err = client.get_config("app", "default", "public").await;
    assert!(err.is_err());
}
