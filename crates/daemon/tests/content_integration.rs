//! End-to-end tests for the content endpoints, driven through the full router
//! over a temporary repository root.

use axum::body::Body;
use axum::http::header::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG, IF_MATCH,
    IF_NONE_MATCH, IF_UNMODIFIED_SINCE, LOCATION,
};
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::ServiceExt;

use quarry_daemon::http_server::router;
use quarry_daemon::{ServiceConfig, ServiceState};

const MARBLES: &[u8] = b"marbles for everyone";
const MARBLES_ETAG: &str = "\"urn:sha1:ba6cb22191300aebcfcfb83de9635d6b224677df\"";

struct Harness {
    root: TempDir,
    state: ServiceState,
    app: Router,
}

impl Harness {
    async fn new() -> Self {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("marbles.txt"), MARBLES).unwrap();
        std::fs::write(root.path().join("large.txt"), b"large marbles for everyone").unwrap();
        std::fs::create_dir(root.path().join("docs")).unwrap();

        let config = ServiceConfig::new(root.path());
        let state = ServiceState::from_config(&config).await.unwrap();
        let app = router(state.clone());
        Self {
            root,
            state,
            app,
        }
    }

    fn path(&self, relative: &str) -> std::path::PathBuf {
        self.root.path().join(relative)
    }

    async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        let mut builder = Request::builder().method("GET").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn write(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: &'static [u8],
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

fn header<'a>(response: &'a Response<Body>, name: axum::http::HeaderName) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_full_content() {
    let h = Harness::new().await;
    let response = h.get("/marbles.txt/fcr:content", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, ETAG), Some(MARBLES_ETAG));
    assert_eq!(header(&response, CONTENT_LENGTH), Some("20"));
    assert_eq!(header(&response, CONTENT_TYPE), Some("text/plain"));
    assert_eq!(
        header(&response, CONTENT_DISPOSITION),
        Some("attachment; filename=\"marbles.txt\"")
    );
    assert_eq!(body_bytes(response).await, MARBLES);
}

#[tokio::test]
async fn test_closed_range() {
    let h = Harness::new().await;
    let response = h.get("/marbles.txt/fcr:content", &[("range", "bytes=1-3")]).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, CONTENT_RANGE), Some("bytes 1-3/20"));
    assert_eq!(header(&response, CONTENT_LENGTH), Some("3"));
    assert_eq!(body_bytes(response).await, b"arb");
}

#[tokio::test]
async fn test_open_ended_range() {
    let h = Harness::new().await;
    let response = h.get("/marbles.txt/fcr:content", &[("range", "bytes=2-")]).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, CONTENT_RANGE), Some("bytes 2-19/20"));
    assert_eq!(body_bytes(response).await, b"rbles for everyone");
}

#[tokio::test]
async fn test_leading_range() {
    let h = Harness::new().await;
    let response = h.get("/marbles.txt/fcr:content", &[("range", "bytes=-2")]).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, CONTENT_RANGE), Some("bytes 0-2/20"));
    assert_eq!(body_bytes(response).await, b"mar");
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let h = Harness::new().await;
    let response = h
        .get("/marbles.txt/fcr:content", &[("range", "bytes=50-100")])
        .await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header(&response, CONTENT_RANGE), Some("bytes 50-100/20"));
}

#[tokio::test]
async fn test_malformed_range_serves_everything() {
    let h = Harness::new().await;
    let response = h
        .get("/marbles.txt/fcr:content", &[("range", "bytes=abc")])
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, MARBLES);
}

#[tokio::test]
async fn test_range_with_small_buffer_skips_ahead() {
    let h = Harness::new().await;
    h.state.ranges().set_max_buffer_size(10).unwrap();

    let response = h.get("/large.txt/fcr:content", &[("range", "bytes=1-21")]).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&response, CONTENT_RANGE), Some("bytes 1-21/26"));
    assert_eq!(body_bytes(response).await, b"arge marbles for ever");
}

#[tokio::test]
async fn test_head_has_headers_only() {
    let h = Harness::new().await;
    let request = Request::builder()
        .method("HEAD")
        .uri("/marbles.txt/fcr:content")
        .body(Body::empty())
        .unwrap();
    let response = h.send(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, CONTENT_LENGTH), Some("20"));
    assert_eq!(header(&response, ETAG), Some(MARBLES_ETAG));
}

#[tokio::test]
async fn test_if_none_match_not_modified() {
    let h = Harness::new().await;
    let response = h
        .get("/marbles.txt/fcr:content", &[("if-none-match", MARBLES_ETAG)])
        .await;

    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(header(&response, ETAG), Some(MARBLES_ETAG));
    assert!(body_bytes(response).await.is_empty());

    let other = h
        .get("/marbles.txt/fcr:content", &[("if-none-match", "\"urn:sha1:00\"")])
        .await;
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_file_description_uses_content_digest() {
    let h = Harness::new().await;
    let response = h.get("/marbles.txt", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, ETAG), Some(MARBLES_ETAG));
    let view: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(view["kind"], "file");
    assert_eq!(view["content"], "/marbles.txt/fcr:content");
}

#[tokio::test]
async fn test_put_failed_precondition_leaves_content() {
    let h = Harness::new().await;

    let response = h
        .write(
            "PUT",
            "/marbles.txt/fcr:content",
            &[(IF_MATCH.as_str(), "\"urn:sha1:0000\"")],
            b"replaced",
        )
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let response = h
        .write(
            "PUT",
            "/marbles.txt/fcr:content",
            &[
                (IF_MATCH.as_str(), MARBLES_ETAG),
                (IF_UNMODIFIED_SINCE.as_str(), "Sat, 01 Jan 2000 00:00:00 GMT"),
            ],
            b"replaced",
        )
        .await;
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    assert_eq!(std::fs::read(h.path("marbles.txt")).unwrap(), MARBLES);
}

#[tokio::test]
async fn test_concurrent_if_match_puts_have_one_winner() {
    let h = Harness::new().await;
    let if_match = [(IF_MATCH.as_str(), MARBLES_ETAG)];

    let (first, second) = tokio::join!(
        h.write("PUT", "/marbles.txt/fcr:content", &if_match, b"first writer"),
        h.write("PUT", "/marbles.txt/fcr:content", &if_match, b"second writer"),
    );

    let mut statuses = [first.status(), second.status()];
    statuses.sort();
    assert_eq!(
        statuses,
        [StatusCode::NO_CONTENT, StatusCode::PRECONDITION_FAILED]
    );

    let expected: &[u8] = if first.status() == StatusCode::NO_CONTENT {
        b"first writer"
    } else {
        b"second writer"
    };
    assert_eq!(std::fs::read(h.path("marbles.txt")).unwrap(), expected);
}

#[tokio::test]
async fn test_put_creates_then_replaces() {
    let h = Harness::new().await;

    let created = h
        .write("PUT", "/new.txt/fcr:content", &[], b"hello")
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(header(&created, LOCATION), Some("/new.txt/fcr:content"));
    assert_eq!(
        header(&created, ETAG),
        Some("\"urn:sha1:aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d\"")
    );

    let replaced = h
        .write(
            "PUT",
            "/new.txt/fcr:content",
            &[(IF_MATCH.as_str(), "\"urn:sha1:aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d\"")],
            b"goodbye",
        )
        .await;
    assert_eq!(replaced.status(), StatusCode::NO_CONTENT);

    let response = h.get("/new.txt/fcr:content", &[]).await;
    assert_eq!(body_bytes(response).await, b"goodbye");
}

#[tokio::test]
async fn test_put_content_into_container_rejected() {
    let h = Harness::new().await;
    let response = h.write("PUT", "/docs/fcr:content", &[], b"nope").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.path("docs").is_dir());
}

#[tokio::test]
async fn test_put_container() {
    let h = Harness::new().await;

    let created = h.write("PUT", "/albums/2024", &[], b"").await;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(header(&created, LOCATION), Some("/albums/2024"));
    assert!(h.path("albums/2024").is_dir());

    let existing = h.write("PUT", "/albums/2024", &[], b"").await;
    assert_eq!(existing.status(), StatusCode::NO_CONTENT);

    let over_file = h.write("PUT", "/marbles.txt", &[], b"").await;
    assert_eq!(over_file.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_post_with_slug() {
    let h = Harness::new().await;

    let response = h
        .write(
            "POST",
            "/docs",
            &[
                ("slug", "report.pdf"),
                (CONTENT_TYPE.as_str(), "application/pdf"),
                (
                    CONTENT_DISPOSITION.as_str(),
                    "attachment; filename=\"Quarterly Report.pdf\"",
                ),
            ],
            b"%PDF-1.4",
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header(&response, LOCATION),
        Some("/docs/report.pdf/fcr:content")
    );

    let content = h.get("/docs/report.pdf/fcr:content", &[]).await;
    assert_eq!(header(&content, CONTENT_TYPE), Some("application/pdf"));
    assert_eq!(
        header(&content, CONTENT_DISPOSITION),
        Some("attachment; filename=\"Quarterly Report.pdf\"")
    );
    assert_eq!(body_bytes(content).await, b"%PDF-1.4");

    let again = h
        .write("POST", "/docs", &[("slug", "report.pdf")], b"again")
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_post_with_staging_slug_rejected() {
    let h = Harness::new().await;
    let response = h
        .write("POST", "/docs", &[("slug", ".quarry-tmp-report")], b"hidden")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(std::fs::read_dir(h.path("docs")).unwrap().count(), 0);
}

#[tokio::test]
async fn test_post_without_slug_or_body_creates_container() {
    let h = Harness::new().await;
    let response = h.write("POST", "/docs", &[], b"").await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let location = header(&response, LOCATION).unwrap().to_string();
    let name = location.strip_prefix("/docs/").unwrap();
    assert!(uuid::Uuid::parse_str(name).is_ok());
    assert!(h.path("docs").join(name).is_dir());
}

#[tokio::test]
async fn test_post_creates_missing_ancestors() {
    let h = Harness::new().await;
    let response = h
        .write("POST", "/a/b/c", &[("slug", "leaf.txt")], b"deep")
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(std::fs::read(h.path("a/b/c/leaf.txt")).unwrap(), b"deep");

    let parent = h.get("/a/b", &[]).await;
    let view: serde_json::Value = serde_json::from_slice(&body_bytes(parent).await).unwrap();
    assert_eq!(view["kind"], "directory");
    assert_eq!(view["children"], serde_json::json!(["/a/b/c"]));
}

#[tokio::test]
async fn test_post_under_file_conflicts() {
    let h = Harness::new().await;
    let response = h
        .write("POST", "/marbles.txt", &[("slug", "child")], b"x")
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_delete() {
    let h = Harness::new().await;

    let stale = h
        .write("DELETE", "/marbles.txt", &[(IF_MATCH.as_str(), "\"urn:sha1:00\"")], b"")
        .await;
    assert_eq!(stale.status(), StatusCode::PRECONDITION_FAILED);
    assert!(h.path("marbles.txt").exists());

    let deleted = h.write("DELETE", "/marbles.txt", &[], b"").await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert!(!h.path("marbles.txt").exists());

    let gone = h.get("/marbles.txt/fcr:content", &[]).await;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    let again = h.write("DELETE", "/marbles.txt", &[], b"").await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);

    let root = h.write("DELETE", "/", &[], b"").await;
    assert_eq!(root.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_transaction_hides_validators_until_commit() {
    let h = Harness::new().await;

    let begun = h.write("POST", "/fcr:tx", &[], b"").await;
    assert_eq!(begun.status(), StatusCode::CREATED);
    let tx = header(&begun, LOCATION).unwrap().to_string();
    assert!(tx.starts_with("/tx:"));

    // Inside the transaction nothing carries validators, so nothing is a 304
    let scoped = h
        .get(
            &format!("{}/marbles.txt/fcr:content", tx),
            &[(IF_NONE_MATCH.as_str(), MARBLES_ETAG)],
        )
        .await;
    assert_eq!(scoped.status(), StatusCode::OK);
    assert!(header(&scoped, ETAG).is_none());

    let draft = h
        .write("PUT", &format!("{}/draft.txt/fcr:content", tx), &[], b"draft")
        .await;
    assert_eq!(draft.status(), StatusCode::CREATED);
    assert!(header(&draft, ETAG).is_none());
    assert_eq!(
        header(&draft, LOCATION),
        Some(format!("{}/draft.txt/fcr:content", tx).as_str())
    );

    let outside = h.get("/draft.txt/fcr:content", &[]).await;
    assert_eq!(outside.status(), StatusCode::OK);
    assert!(header(&outside, ETAG).is_none());

    let committed = h
        .write("POST", &format!("{}/fcr:tx/fcr:commit", tx), &[], b"")
        .await;
    assert_eq!(committed.status(), StatusCode::NO_CONTENT);

    let visible = h.get("/draft.txt/fcr:content", &[]).await;
    assert!(header(&visible, ETAG).is_some());

    let recommit = h
        .write("POST", &format!("{}/fcr:tx/fcr:commit", tx), &[], b"")
        .await;
    assert_eq!(recommit.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_transaction_not_found() {
    let h = Harness::new().await;
    let response = h
        .get(&format!("/tx:{}/marbles.txt", uuid::Uuid::new_v4()), &[])
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unsupported_method() {
    let h = Harness::new().await;
    let response = h.write("PATCH", "/marbles.txt", &[], b"").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_percent_encoded_names() {
    let h = Harness::new().await;
    let response = h
        .write("PUT", "/docs/my%20notes.txt/fcr:content", &[], b"notes")
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        header(&response, LOCATION),
        Some("/docs/my%20notes.txt/fcr:content")
    );
    assert!(h.path("docs/my notes.txt").is_file());
}

#[tokio::test]
async fn test_status_and_stats() {
    let h = Harness::new().await;

    let livez = h.get("/_status/livez", &[]).await;
    assert_eq!(livez.status(), StatusCode::OK);

    let readyz = h.get("/_status/readyz", &[]).await;
    assert_eq!(readyz.status(), StatusCode::OK);

    let stats = h.get("/api/v0/repository/stats", &[]).await;
    assert_eq!(stats.status(), StatusCode::OK);
    let stats: serde_json::Value = serde_json::from_slice(&body_bytes(stats).await).unwrap();
    assert_eq!(stats["size"], 46);
    assert_eq!(stats["object_count"], 3);
}
