mod support;

use anyhow::Result;

use support::*;

#[tokio::test]
async fn clearnet_hosts_are_fetched_directly() -> Result<()> {
    let bridge = MockBridge::html("bridge").await?;
    let upstream = TestUpstream::http_ok("text/plain", "direct").await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let response = proxy
        .get(&format!("http://127.0.0.1:{}/file.txt", upstream.port()))
        .await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "direct");
    assert_eq!(bridge.fetch_count(), 0);

    let requests = upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target, "/file.txt");
    assert_eq!(
        requests[0].header("Host"),
        Some(format!("127.0.0.1:{}", upstream.port()).as_str())
    );

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn only_negotiation_headers_are_forwarded() -> Result<()> {
    let upstream = TestUpstream::http_ok("text/plain", "ok").await?;
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;

    let request = format!(
        "GET http://127.0.0.1:{port}/ HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nAccept: text/html\r\nAccept-Language: en\r\nCookie: session=secret\r\nUser-Agent: test\r\nConnection: close\r\n\r\n",
        port = upstream.port()
    );
    proxy.send(&request).await?;

    let forwarded = &upstream.requests()[0];
    assert_eq!(forwarded.header("Accept"), Some("text/html"));
    assert_eq!(forwarded.header("Accept-Language"), Some("en"));
    assert_eq!(forwarded.header("Cookie"), None);
    assert_eq!(forwarded.header("User-Agent"), None);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn response_headers_are_filtered() -> Result<()> {
    let upstream = TestUpstream::http_response(build_response(
        "200 OK",
        &[
            ("Content-Type", "text/plain"),
            ("ETag", "\"v1\""),
            ("Set-Cookie", "tracking=1"),
            ("Server", "upstream/1.0"),
        ],
        b"body",
    ))
    .await?;
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;

    let response = proxy
        .get(&format!("http://127.0.0.1:{}/", upstream.port()))
        .await?;
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
    assert_eq!(response.header("ETag"), Some("\"v1\""));
    assert_eq!(response.header("Set-Cookie"), None);
    assert_eq!(response.header("Server"), None);
    assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn http_redirects_are_followed() -> Result<()> {
    let upstream = TestUpstream::respond_with(|request| {
        if request.target == "/start" {
            build_response("301 Moved Permanently", &[("Location", "/end")], b"")
        } else {
            build_response("200 OK", &[("Content-Type", "text/plain")], b"arrived")
        }
    })
    .await?;
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;

    let response = proxy
        .get(&format!("http://127.0.0.1:{}/start", upstream.port()))
        .await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "arrived");
    assert_eq!(upstream.request_count(), 2);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn https_redirect_is_returned_to_client() -> Result<()> {
    let upstream = TestUpstream::http_response(build_response(
        "302 Found",
        &[("Location", "https://secure.example.com/")],
        b"",
    ))
    .await?;
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;

    let response = proxy
        .get(&format!("http://127.0.0.1:{}/", upstream.port()))
        .await?;
    assert_eq!(response.status, 302);
    assert_eq!(response.header("Location"), Some("https://secure.example.com/"));
    assert_eq!(upstream.request_count(), 1);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn clearnet_html_is_not_rewritten() -> Result<()> {
    let page = format!(r#"<a href="https://{ONION_HOST}/">x</a>"#);
    let upstream = TestUpstream::http_ok("text/html", &page).await?;
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;

    let response = proxy
        .get(&format!("http://127.0.0.1:{}/", upstream.port()))
        .await?;
    assert_eq!(response.text(), page);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn clearnet_responses_are_cached() -> Result<()> {
    let upstream = TestUpstream::http_response(build_response(
        "200 OK",
        &[("Content-Type", "text/css"), ("Cache-Control", "max-age=60")],
        b"body{}",
    ))
    .await?;
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;
    let target = format!("http://127.0.0.1:{}/site.css", upstream.port());

    proxy.get(&target).await?;
    let second = proxy.get(&target).await?;
    assert_eq!(second.text(), "body{}");
    assert_eq!(upstream.request_count(), 1);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_clearnet_host_is_bad_gateway() -> Result<()> {
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;

    let response = proxy
        .get(&format!("http://127.0.0.1:{}/", find_free_port()?))
        .await?;
    assert_eq!(response.status, 502);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn https_targets_must_use_connect() -> Result<()> {
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;

    let response = proxy.get("https://example.com/").await?;
    assert_eq!(response.status, 400);

    proxy.shutdown().await;
    Ok(())
}
