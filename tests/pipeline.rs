//! End-to-end pipeline tests: rule in, alert (or quiet no-op) out.
//!
//! These drive `App::run_rule` against a mock feed source and an in-memory
//! database, covering the diff-and-emit contract from the caller's view.

use chrono::Utc;
use huntwatch::app::App;
use huntwatch::config::Config;
use huntwatch::rule::Rule;
use huntwatch::storage::Database;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn feed_rule(url: &str) -> Rule {
    Rule {
        title: "watch the blocklist feed".to_string(),
        description: "new entries on the team blocklist".to_string(),
        analyzer: "feed".to_string(),
        query: url.to_string(),
        options: serde_json::Value::Null,
        tags: vec!["blocklist".to_string()],
        api_key: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn test_app() -> App {
    let db = Arc::new(Database::open_in_memory().unwrap());
    App::with_database(Config::default(), db)
}

async fn mount_feed(server: &MockServer, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn first_run_alerts_second_run_is_quiet() {
    // Arrange
    let server = MockServer::start().await;
    mount_feed(&server, json!(["1.2.3.4", "5.6.7.8"])).await;
    let app = test_app();
    let rule = feed_rule(&format!("{}/feed.json", server.uri()));

    // Act
    let first = app.run_rule(&rule).await.unwrap();
    let second = app.run_rule(&rule).await.unwrap();

    // Assert
    let alert = first.expect("first run must create an alert");
    assert_eq!(alert.artifacts.len(), 2);
    assert_eq!(alert.tags, vec!["blocklist".to_string()]);
    assert_eq!(alert.description, rule.description);
    assert!(second.is_none(), "an unchanged source must not re-alert");
    assert_eq!(app.database().alert_count(&rule.id()).unwrap(), 1);
}

#[tokio::test]
async fn a_changed_source_alerts_with_exactly_the_delta() {
    // Arrange: history {1.2.3.4, 5.6.7.8}, then the source drifts to
    // {1.2.3.4, 9.9.9.9}.
    let server = MockServer::start().await;
    mount_feed(&server, json!(["1.2.3.4", "5.6.7.8"])).await;
    let app = test_app();
    let rule = feed_rule(&format!("{}/feed.json", server.uri()));
    app.run_rule(&rule).await.unwrap();

    server.reset().await;
    mount_feed(&server, json!(["1.2.3.4", "9.9.9.9"])).await;

    // Act
    let alert = app.run_rule(&rule).await.unwrap();

    // Assert
    let alert = alert.expect("the new entry must raise an alert");
    let data: Vec<_> = alert.artifacts.iter().map(|a| a.data.as_str()).collect();
    assert_eq!(data, vec!["9.9.9.9"]);

    // And applying the same state once more is a no-op.
    let again = app.run_rule(&rule).await.unwrap();
    assert!(again.is_none());
}

#[tokio::test]
async fn an_empty_source_is_a_successful_quiet_run() {
    let server = MockServer::start().await;
    mount_feed(&server, json!([])).await;
    let app = test_app();
    let rule = feed_rule(&format!("{}/feed.json", server.uri()));

    let outcome = app.run_rule(&rule).await.unwrap();

    assert!(outcome.is_none());
    assert_eq!(app.database().alert_count(&rule.id()).unwrap(), 0);
}

#[tokio::test]
async fn a_failed_fetch_leaves_the_database_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let app = test_app();
    let rule = feed_rule(&format!("{}/feed.json", server.uri()));

    let outcome = app.run_rule(&rule).await;

    assert!(outcome.is_err(), "a failed run is distinct from a quiet run");
    assert_eq!(app.database().alert_count(&rule.id()).unwrap(), 0);
    assert_eq!(app.database().artifact_count(&rule.id()).unwrap(), 0);
}

#[tokio::test]
async fn an_invalid_rule_is_rejected_before_any_side_effect() {
    let app = test_app();
    let mut rule = feed_rule("http://unused.example/feed.json");
    rule.analyzer = "not-a-source".to_string();

    let outcome = app.run_rule(&rule).await;

    assert!(outcome.is_err());
    assert!(!app.database().rule_exists(&rule.id()).unwrap());
}

#[tokio::test]
async fn history_survives_reopening_the_database() {
    // Arrange: a real on-disk database, reopened between runs as an
    // external scheduler would do.
    let dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    mount_feed(&server, json!(["1.2.3.4"])).await;
    let mut config = Config::default();
    config.database.path = dir.path().join("huntwatch.db");
    let rule = feed_rule(&format!("{}/feed.json", server.uri()));

    // Act
    let first = {
        let app = App::new(config.clone()).unwrap();
        app.run_rule(&rule).await.unwrap()
    };
    let app = App::new(config).unwrap();
    let second = app.run_rule(&rule).await.unwrap();

    // Assert
    assert!(first.is_some());
    assert!(second.is_none(), "history must persist across reopens");
    assert_eq!(app.database().list_alerts(&rule.id()).unwrap().len(), 1);
}

#[tokio::test]
async fn duplicate_feed_entries_collapse_into_one_artifact() {
    let server = MockServer::start().await;
    mount_feed(&server, json!(["1.2.3.4", "1.2.3.4", "1.2.3.4"])).await;
    let app = test_app();
    let rule = feed_rule(&format!("{}/feed.json", server.uri()));

    let alert = app.run_rule(&rule).await.unwrap().unwrap();

    assert_eq!(alert.artifacts.len(), 1);
    assert_eq!(alert.artifacts[0].data, "1.2.3.4");
}
