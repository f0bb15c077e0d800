// tests/notion_store.rs
use security_news_aggregator::blocks::to_blocks;
use security_news_aggregator::date::CanonicalDate;
use security_news_aggregator::store::{
    KnowledgeStore, NotionStore, PageDraft, StoreError, StoreHandle, StoreKind,
};
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn issues() -> StoreHandle {
    StoreHandle::new(StoreKind::Issues, "db-issues")
}

#[tokio::test]
async fn create_page_sends_properties_and_children() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pages"))
        .and(header("authorization", "Bearer secret_t"))
        .and(header("notion-version", "2022-06-28"))
        .and(body_partial_json(json!({
            "parent": { "database_id": "db-issues" },
            "properties": {
                "title": { "title": [{ "text": { "content": "제목" } }] },
                "url": { "url": "https://n/1" },
                "date": { "date": { "start": "2024-06-03" } },
                "category": { "select": { "name": "보안뉴스" } }
            },
            "children": [
                { "object": "block", "type": "heading_2" },
                { "object": "block", "type": "paragraph" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "page-abc" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = NotionStore::with_base_url("secret_t", server.uri());
    let id = store
        .create_page(&PageDraft {
            store: issues(),
            title: "제목".into(),
            summary: "요약".into(),
            url: "https://n/1".into(),
            date: CanonicalDate::from_ymd(2024, 6, 3).unwrap(),
            category: "보안뉴스".into(),
            blocks: to_blocks("## 개요\n본문"),
        })
        .await
        .unwrap();
    assert_eq!(id, "page-abc");
}

#[tokio::test]
async fn error_status_keeps_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/databases/db-issues/query"))
        .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"code":"validation_error"}"#))
        .mount(&server)
        .await;

    let store = NotionStore::with_base_url("t", server.uri());
    match store.query_by_url(&issues(), "https://n/1").await {
        Err(StoreError::Status { status, body }) => {
            assert_eq!(status, 400);
            assert!(body.contains("validation_error"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn url_query_uses_exact_match_filter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/databases/db-issues/query"))
        .and(body_json(json!({
            "filter": { "property": "url", "url": { "equals": "https://n/1" } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "id": "p1", "properties": { "url": { "url": "https://n/1" } } }],
            "has_more": false,
            "next_cursor": null
        })))
        .mount(&server)
        .await;

    let store = NotionStore::with_base_url("t", server.uri());
    let hits = store.query_by_url(&issues(), "  https://n/1 ").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "p1");
}

#[tokio::test]
async fn dated_query_forwards_cursor_and_reports_next() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/databases/db-issues/query"))
        .and(body_partial_json(json!({
            "filter": { "property": "date", "date": { "before": "2024-04-01" } },
            "start_cursor": "c-2"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "id": "p3" }],
            "has_more": true,
            "next_cursor": "c-3"
        })))
        .mount(&server)
        .await;

    let store = NotionStore::with_base_url("t", server.uri());
    let page = store
        .query_dated_before(
            &issues(),
            CanonicalDate::from_ymd(2024, 4, 1).unwrap(),
            Some("c-2"),
        )
        .await
        .unwrap();
    assert_eq!(page.results[0].id, "p3");
    assert_eq!(page.next_cursor.as_deref(), Some("c-3"));
}

#[tokio::test]
async fn archive_patches_the_page() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/pages/p9"))
        .and(body_json(json!({ "archived": true })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "p9" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = NotionStore::with_base_url("t", server.uri());
    store.archive_page("p9").await.unwrap();
}
