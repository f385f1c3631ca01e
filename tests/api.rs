mod utils;

use std::time::Duration;

use httpmock::prelude::*;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

async fn create_webhook(client: &Client, addr: &str, url: &str) -> Value {
    let response = client
        .post(format!("{addr}/webhooks"))
        .json(&json!({
            "name": "Zapier",
            "url": url,
            "events": ["lead.created", "lead.updated"],
            "headers": {"X-Tenant": "acme"}
        }))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    body["data"].clone()
}

#[tokio::test]
async fn test_create_shows_secret_once() {
    let addr = utils::spawn_server().await;
    let client = Client::new();

    let created = create_webhook(&client, &addr, "https://hooks.example.com/crm").await;
    assert!(created["secret"].as_str().unwrap().starts_with("whsec_"));
    assert_eq!(created["status"], "active");
    assert_eq!(created["headers"]["X-Tenant"], "acme");

    let id = created["id"].as_str().unwrap();
    let response = client
        .get(format!("{addr}/webhooks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched: Value = response.json().await.unwrap();
    assert!(fetched["data"].get("secret").is_none());

    let listed: Value = client
        .get(format!("{addr}/webhooks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["data"].as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_invalid_configuration_is_rejected() {
    let addr = utils::spawn_server().await;
    let client = Client::new();

    let cases = [
        json!({"name": "x", "url": "not a url", "events": ["lead.created"]}),
        json!({"name": "x", "url": "ftp://example.com", "events": ["lead.created"]}),
        json!({"name": "x", "url": "https://example.com", "events": ["webhook.test"]}),
        json!({"name": "x", "url": "https://example.com", "events": ["lead.created"], "headers": "{oops"}),
        json!({"name": "x", "url": "https://example.com", "events": ["lead.created"], "timeout_secs": 0}),
    ];

    for case in cases {
        let response = client
            .post(format!("{addr}/webhooks"))
            .json(&case)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY, "{case}");
        let body: Value = response.json().await.unwrap();
        assert!(body["error"].is_string());
    }

    let listed: Value = client
        .get(format!("{addr}/webhooks"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["data"], json!([]));
}

#[tokio::test]
async fn test_update_and_lifecycle() {
    let addr = utils::spawn_server().await;
    let client = Client::new();
    let created = create_webhook(&client, &addr, "https://hooks.example.com/crm").await;
    let id = created["id"].as_str().unwrap();

    let response = client
        .patch(format!("{addr}/webhooks/{id}"))
        .json(&json!({"name": "Renamed", "max_retries": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["data"]["name"], "Renamed");
    assert_eq!(updated["data"]["retry"]["max_retries"], 5);

    let response = client
        .patch(format!("{addr}/webhooks/{id}"))
        .json(&json!({"url": "gopher://example.com"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let disabled: Value = client
        .post(format!("{addr}/webhooks/{id}/disable"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(disabled["data"]["status"], "inactive");

    let enabled: Value = client
        .post(format!("{addr}/webhooks/{id}/enable"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(enabled["data"]["status"], "active");

    let rotated: Value = client
        .post(format!("{addr}/webhooks/{id}/rotate-secret"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_ne!(rotated["data"]["secret"], created["secret"]);

    let response = client
        .delete(format!("{addr}/webhooks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .get(format!("{addr}/webhooks/{id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let addr = utils::spawn_server().await;
    let client = Client::new();
    let id = uuid::Uuid::new_v4();

    for url in [
        format!("{addr}/webhooks/{id}"),
        format!("{addr}/webhooks/{id}/deliveries"),
        format!("{addr}/deliveries/{id}"),
    ] {
        let response = client.get(url).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = client
        .post(format!("{addr}/deliveries/{id}/retry"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_test_trigger_and_retry_conflict() {
    let receiver = MockServer::start_async().await;
    let mock = receiver
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .header("x-webhook-event", "webhook.test")
                .header("x-tenant", "acme");
            then.status(200).body("ok");
        })
        .await;

    let addr = utils::spawn_server().await;
    let client = Client::new();
    let created = create_webhook(&client, &addr, &receiver.url("/hook")).await;
    let id = created["id"].as_str().unwrap();

    let response = client
        .post(format!("{addr}/webhooks/{id}/test"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let delivery: Value = response.json().await.unwrap();
    assert_eq!(delivery["data"]["status"], "success");
    assert_eq!(delivery["data"]["response_status"], 200);
    mock.assert_async().await;

    let delivery_id = delivery["data"]["id"].as_str().unwrap();
    let response = client
        .get(format!("{addr}/deliveries/{delivery_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = client
        .post(format!("{addr}/deliveries/{delivery_id}/retry"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_published_event_is_delivered_in_background() {
    let receiver = MockServer::start_async().await;
    let mock = receiver
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .header("x-webhook-event", "lead.created")
                .json_body_partial(r#"{"event": "lead.created", "data": {"id": 42}}"#);
            then.status(200);
        })
        .await;

    let addr = utils::spawn_server().await;
    let client = Client::new();
    let created = create_webhook(&client, &addr, &receiver.url("/hook")).await;
    let id = created["id"].as_str().unwrap();

    let response = client
        .post(format!("{addr}/events"))
        .json(&json!({"event_type": "lead.created", "payload": {"id": 42}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut history = Value::Null;
    for _ in 0..50 {
        history = client
            .get(format!("{addr}/webhooks/{id}/deliveries"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if history["data"][0]["status"] == "success" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(history["data"][0]["status"], "success");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_reserved_and_unknown_events_are_rejected() {
    let addr = utils::spawn_server().await;
    let client = Client::new();

    let response = client
        .post(format!("{addr}/events"))
        .json(&json!({"event_type": "webhook.test", "payload": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = client
        .post(format!("{addr}/events"))
        .json(&json!({"event_type": "invoice.paid", "payload": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
