//! End-to-end HTTP dispatch over real sockets.

use reqwest::redirect::Policy;
use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(Policy::none())
        .build()
        .unwrap()
}

#[tokio::test]
async fn serves_static_files_and_index() {
    let server = common::start(|_| {}, |b| b).await;
    let client = client();

    let index = client.get(server.http_url("/")).send().await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(index.headers()["content-type"], "text/html");
    assert_eq!(index.text().await.unwrap(), "<h1>index</h1>");

    let css = client.get(server.http_url("/style.css")).send().await.unwrap();
    assert_eq!(css.headers()["content-type"], "text/css");
    assert_eq!(css.headers()["connection"], "close");
    assert_eq!(css.text().await.unwrap(), "body { margin: 0; }");
}

#[tokio::test]
async fn percent_encoded_file_names_are_served() {
    let server = common::start(|_| {}, |b| b).await;
    std::fs::write(server.web_root().join("my page.html"), "<p>spaced</p>").unwrap();

    let response = client().get(server.http_url("/my%20page.html")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "<p>spaced</p>");
}

#[tokio::test]
async fn missing_static_resource_gets_not_found_page() {
    let server = common::start(|_| {}, |b| b).await;

    let response = client()
        .get(server.http_url("/images/logo.png"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "<h1>not here</h1>");
}

#[tokio::test]
async fn unmatched_controller_path_is_not_found() {
    let server = common::start(|_| {}, |b| b).await;

    let response = client().get(server.http_url("/api/nothing")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "404 Not Found");
}

#[tokio::test]
async fn custom_route_receives_trailing_segments() {
    let server = common::start(
        |_| {},
        |b| {
            b.http("/users", |event, args, _| {
                let lang = event.request().default_language().unwrap_or_default();
                event.send_text(&format!("{} [{}]", args.join(","), lang));
            })
        },
    )
    .await;

    let response = client()
        .get(server.http_url("/Users/42/posts?sort=asc"))
        .header("Accept-Language", "fr;q=0.5, de")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "42,posts [de]");
}

#[tokio::test]
async fn cookie_controllers_round_trip() {
    let server = common::start(|_| {}, |b| b).await;
    let client = client();

    let set = client
        .post(server.http_url("/@set/cookie"))
        .body(r#"{"name":"theme","value":"dark","path":"/"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(set.status(), StatusCode::OK);
    let cookie = set.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.starts_with("theme=dark; path=/"), "{cookie}");

    let present = client
        .get(server.http_url("/@isset/cookie/theme"))
        .header("Cookie", "theme=dark")
        .send()
        .await
        .unwrap();
    assert_eq!(present.status(), StatusCode::FOUND);

    let absent = client
        .get(server.http_url("/@isset/cookie/theme"))
        .send()
        .await
        .unwrap();
    assert_eq!(absent.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn isset_file_checks_web_root() {
    let server = common::start(|_| {}, |b| b).await;
    let client = client();

    let found = client
        .get(server.http_url("/@isset/file/style.css"))
        .send()
        .await
        .unwrap();
    assert_eq!(found.status(), StatusCode::FOUND);

    let missing = client
        .get(server.http_url("/@isset/file/nope.css"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_head_is_rejected() {
    let server = common::start(|c| c.http.max_header_bytes = 512, |b| b).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let request = format!(
        "GET / HTTP/1.1\r\nHost: x\r\nX-Padding: {}\r\n\r\n",
        "a".repeat(2048)
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("HTTP/1.1 431 "), "{text}");
}

#[tokio::test]
async fn malformed_request_line_is_bad_request() {
    let server = common::start(|_| {}, |b| b).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"\r\n\r\n").await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400 "));
}
