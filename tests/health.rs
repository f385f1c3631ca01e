mod utils;

use reqwest::Client;

#[tokio::test]
async fn test_health_check_works() {
    let addr = utils::spawn_server().await;
    let client = Client::new();

    let response = client
        .get(format!("{addr}/health"))
        .send()
        .await
        .expect("Failed to execute request.");

    // Verify the response
    assert!(response.status().is_success());
    assert_eq!(Some(0), response.content_length());
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let addr = utils::spawn_server().await;

    let response = Client::new()
        .get(format!("{addr}/does-not-exist"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
