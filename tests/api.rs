use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use serial_test::serial;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tokio::time::{Duration, sleep};

const API_KEY: &str = "test-key";

fn data_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("searchbox-it-{name}"))
}

fn spawn_server(port: u16, dir: &PathBuf) -> Child {
    let exe = env!("CARGO_BIN_EXE_searchbox");
    Command::new(exe)
        .env("PORT", port.to_string())
        .env("DATA_DIR", dir)
        .env("API_KEY", API_KEY)
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server")
}

fn cleanup(dir: &PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}

fn client() -> Client {
    let mut headers = HeaderMap::new();
    headers.insert("api-key", HeaderValue::from_static(API_KEY));
    Client::builder().default_headers(headers).build().unwrap()
}

async fn wait_for(port: u16) {
    let client = Client::new();
    for _ in 0..50u8 {
        if let Ok(resp) = client.get(format!("http://localhost:{port}")).send().await {
            if resp.status().is_success() {
                break;
            }
        }
        sleep(Duration::from_millis(100)).await;
    }
}

fn stop(mut srv: Child) {
    srv.kill().unwrap();
    let _ = srv.wait();
}

fn books_schema() -> Value {
    json!({
        "name": "books",
        "fields": [
            {"name": "id", "type": "Edm.String", "key": true},
            {"name": "title", "type": "Edm.String", "key": false}
        ]
    })
}

async fn create_books(client: &Client, base: &str) {
    let resp = client
        .post(format!("{base}/indexes"))
        .json(&books_schema())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn test_merge_scenario() {
    let dir = data_dir("merge");
    cleanup(&dir);
    let port = 4711u16;
    let srv = spawn_server(port, &dir);
    wait_for(port).await;
    let client = client();
    let base = format!("http://localhost:{port}");
    create_books(&client, &base).await;

    let resp = client
        .post(format!("{base}/indexes/books/docs"))
        .json(&json!({"id": "1", "title": "Go"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let echoed: Value = resp.json().await.unwrap();
    assert_eq!(echoed, json!({"id": "1", "title": "Go"}));

    let resp = client
        .post(format!("{base}/indexes/books/docs/index"))
        .json(&json!({"value": [{"@search.action": "merge", "id": "1", "title": "Golang"}]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["value"], json!([{"key": "1", "status": true}]));

    let doc: Value = client
        .get(format!("{base}/indexes/books/docs/1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc, json!({"id": "1", "title": "Golang"}));

    stop(srv);
    cleanup(&dir);
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn test_batch_partial_failure() {
    let dir = data_dir("batch");
    cleanup(&dir);
    let port = 4712u16;
    let srv = spawn_server(port, &dir);
    wait_for(port).await;
    let client = client();
    let base = format!("http://localhost:{port}");
    create_books(&client, &base).await;

    let batch = json!({"value": [
        {"@search.action": "upload", "id": "1", "title": "Rust"},
        {"@search.action": "merge", "id": "404", "title": "ghost"},
        {"id": "2", "title": "no action"},
        {"@search.action": "mergeOrUpload", "id": "3", "title": "Zig"},
        {"@search.action": "delete", "id": "never"}
    ]});
    let resp = client
        .post(format!("{base}/indexes/books/docs/index"))
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    let results = body["value"].as_array().unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0]["status"], true);
    assert_eq!(results[1]["key"], "404");
    assert_eq!(results[1]["error"], "Not found for merge");
    assert_eq!(results[2]["error"], "Missing @search.action");
    assert!(results[2].get("key").is_none());
    assert_eq!(results[3]["key"], "3");
    assert_eq!(results[4]["status"], true);

    let count = client
        .get(format!("{base}/indexes/books/docs/$count"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(count, "2");

    let resp = client
        .post(format!("{base}/indexes/missing/docs/index"))
        .json(&batch)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    stop(srv);
    cleanup(&dir);
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn test_search() {
    let dir = data_dir("search");
    cleanup(&dir);
    let port = 4713u16;
    let srv = spawn_server(port, &dir);
    wait_for(port).await;
    let client = client();
    let base = format!("http://localhost:{port}");
    create_books(&client, &base).await;

    let batch = json!({"value": [
        {"@search.action": "upload", "id": "1", "title": "Rust documentation"},
        {"@search.action": "upload", "id": "2", "title": "Cooking"}
    ]});
    client
        .post(format!("{base}/indexes/books/docs/index"))
        .json(&batch)
        .send()
        .await
        .unwrap();

    let res: Value = client
        .get(format!("{base}/indexes/books/docs?search=DOC"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let hits = res["value"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], "1");

    let res: Value = client
        .post(format!("{base}/indexes/books/docs/search"))
        .json(&json!({"search": "*"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res["value"].as_array().unwrap().len(), 2);

    let res: Value = client
        .get(format!("{base}/indexes/books/docs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(res["value"].as_array().unwrap().len(), 2);

    stop(srv);
    cleanup(&dir);
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn test_index_lifecycle() {
    let dir = data_dir("lifecycle");
    cleanup(&dir);
    let port = 4714u16;
    let srv = spawn_server(port, &dir);
    wait_for(port).await;
    let client = client();
    let base = format!("http://localhost:{port}");
    create_books(&client, &base).await;

    let resp = client
        .post(format!("{base}/indexes"))
        .json(&books_schema())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = client
        .post(format!("{base}/indexes"))
        .json(&json!({"name": "empty", "fields": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let schema: Value = client
        .get(format!("{base}/indexes/books"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(schema, books_schema());

    let list: Value = client
        .get(format!("{base}/indexes?$select=name"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["value"], json!([{"name": "books"}]));

    let updated = json!({"name": "books", "fields": [{"name": "isbn", "key": true}]});
    let resp = client
        .put(format!("{base}/indexes/books"))
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client
        .post(format!("{base}/indexes/books/docs"))
        .json(&json!({"isbn": "978", "title": "SICP"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let stats: Value = client
        .get(format!("{base}/indexes/books/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats, json!({"documentCount": 1, "storageSize": 0}));

    let resp = client
        .delete(format!("{base}/indexes/books"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    for path in ["books", "books/stats", "books/docs/$count", "books/docs/978"] {
        let resp = client
            .get(format!("{base}/indexes/{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{path}");
    }

    stop(srv);
    cleanup(&dir);
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn test_requires_api_key() {
    let dir = data_dir("auth");
    cleanup(&dir);
    let port = 4715u16;
    let srv = spawn_server(port, &dir);
    wait_for(port).await;

    let resp = Client::new()
        .get(format!("http://localhost:{port}/indexes"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = Client::new()
        .get(format!("http://localhost:{port}/indexes"))
        .header("Api-Key", API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    stop(srv);
    cleanup(&dir);
}

#[serial]
#[tokio::test(flavor = "multi_thread")]
async fn test_persistence() {
    let dir = data_dir("persist");
    cleanup(&dir);
    let port1 = 4716u16;
    let port2 = 4717u16;
    let srv = spawn_server(port1, &dir);
    wait_for(port1).await;
    let client = client();
    create_books(&client, &format!("http://localhost:{port1}")).await;
    client
        .post(format!("http://localhost:{port1}/indexes/books/docs"))
        .json(&json!({"id": "7", "title": "persist"}))
        .send()
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    stop(srv);

    let srv = spawn_server(port2, &dir);
    wait_for(port2).await;
    let doc: Value = client
        .get(format!("http://localhost:{port2}/indexes/books/docs/7"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(doc, json!({"id": "7", "title": "persist"}));

    stop(srv);
    cleanup(&dir);
}
