use std::collections::HashSet;
use std::time::Duration;

use localbooks::fetcher::{FetchError, FetchSettings, Fetcher, HttpFetcher, RetryPolicy};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(max_retries: u32, timeout: Duration) -> HttpFetcher {
    let settings = FetchSettings {
        timeout,
        retry: RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(10),
        },
        ..FetchSettings::default()
    };
    HttpFetcher::new(&settings).expect("client builds")
}

#[tokio::test]
async fn fetches_page_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/book/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><h1>Title</h1></html>", "text/html; charset=utf-8"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/book/1", server.uri());
    let document = fetcher(3, Duration::from_secs(5))
        .fetch(&url)
        .await
        .expect("fetch ok");

    assert_eq!(document.url, url);
    assert!(document.body.contains("<h1>Title</h1>"));
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/missing", server.uri());
    let err = fetcher(3, Duration::from_secs(5))
        .fetch(&url)
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::Status { url, status: 404 });
    assert!(!err.is_transient());
}

#[tokio::test]
async fn server_errors_are_retried_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let url = format!("{}/flaky", server.uri());
    let err = fetcher(2, Duration::from_secs(5))
        .fetch(&url)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Status { status: 503, .. }));
}

#[tokio::test]
async fn recovers_after_transient_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(200).set_body_string("chapter text"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/recovering", server.uri());
    let document = fetcher(3, Duration::from_secs(5))
        .fetch(&url)
        .await
        .expect("third attempt succeeds");

    assert_eq!(document.body, "chapter text");
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(2)),
        )
        .expect(2)
        .mount(&server)
        .await;

    let url = format!("{}/slow", server.uri());
    let err = fetcher(1, Duration::from_millis(200))
        .fetch(&url)
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::Timeout { url });
    assert!(err.is_transient());
}

fn rotating_fetcher(agents: &[&str]) -> HttpFetcher {
    let settings = FetchSettings {
        user_agents: agents.iter().map(|a| a.to_string()).collect(),
        ..FetchSettings::default()
    };
    HttpFetcher::new(&settings).expect("client builds")
}

#[tokio::test]
async fn meta_declared_gbk_is_decoded() {
    let server = MockServer::start().await;
    let page = r#"<html><head><meta charset="gbk"><title>书</title></head><body><h1>第一章 风起</h1></body></html>"#;
    let (bytes, _, unmappable) = encoding_rs::GBK.encode(page);
    assert!(!unmappable);
    Mock::given(method("GET"))
        .and(path("/gbk"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bytes.into_owned(), "text/html"))
        .mount(&server)
        .await;

    let document = fetcher(0, Duration::from_secs(5))
        .fetch(&format!("{}/gbk", server.uri()))
        .await
        .expect("fetch ok");

    assert!(document.body.contains("第一章 风起"));
    assert!(!document.body.contains('\u{FFFD}'));
}

#[tokio::test]
async fn configured_user_agent_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ua"))
        .and(header("user-agent", "only-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let document = rotating_fetcher(&["only-agent"])
        .fetch(&format!("{}/ua", server.uri()))
        .await
        .expect("agent matched");
    assert_eq!(document.body, "ok");
}

#[tokio::test]
async fn user_agents_rotate_across_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rotate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let fetcher = rotating_fetcher(&["agent-a", "agent-b"]);
    let url = format!("{}/rotate", server.uri());
    for _ in 0..32 {
        fetcher.fetch(&url).await.expect("fetch ok");
    }

    let requests = server.received_requests().await.expect("recording enabled");
    let seen: HashSet<String> = requests
        .iter()
        .filter_map(|r| r.headers.get("user-agent"))
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect();
    let expected: HashSet<String> = ["agent-a", "agent-b"].iter().map(|a| a.to_string()).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn retries_pick_an_agent_each_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/retry-ua"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let settings = FetchSettings {
        retry: RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(5),
        },
        user_agents: vec!["agent-a".into()],
        ..FetchSettings::default()
    };
    let fetcher = HttpFetcher::new(&settings).expect("client builds");
    let _ = fetcher.fetch(&format!("{}/retry-ua", server.uri())).await;

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 3);
    assert!(requests
        .iter()
        .all(|r| r.headers.get("user-agent").and_then(|v| v.to_str().ok()) == Some("agent-a")));
}
