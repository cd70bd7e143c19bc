mod support;

use anyhow::Result;
use tokio::io::{AsyncWriteExt, BufReader};

use support::*;

#[tokio::test]
async fn forward_request_reaches_bridge_with_url_header() -> Result<()> {
    let bridge = MockBridge::html("<p>hello</p>").await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let response = proxy
        .get(&format!("http://{ONION_HOST}/index.html?q=1"))
        .await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), "<p>hello</p>");
    assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));

    let requests = bridge.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].target, "/__op_proxy.php");
    assert_eq!(
        requests[0].header(URL_HEADER),
        Some(format!("http://{ONION_HOST}/index.html?q=1").as_str())
    );

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn path_based_request_reaches_bridge_with_url_header() -> Result<()> {
    let bridge = MockBridge::html("<p>hello</p>").await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let response = proxy.get(&format!("/proxy/{ONION_HOST}/docs/a.html")).await?;
    assert_eq!(response.status, 200);
    assert_eq!(
        bridge.url_headers(),
        vec![format!("http://{ONION_HOST}/docs/a.html")]
    );

    let response = proxy.get(&format!("/proxy/{ONION_HOST}")).await?;
    assert_eq!(response.status, 200);
    assert_eq!(bridge.url_headers()[1], format!("http://{ONION_HOST}/"));

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn forward_mode_downgrades_https_onion_links() -> Result<()> {
    let page = format!(
        r#"<a href="https://{ONION_HOST}/next">n</a> <a href="https://example.com/">c</a>"#
    );
    let bridge = MockBridge::html(&page).await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let response = proxy.get(&format!("http://{ONION_HOST}/")).await?;
    let body = response.text();
    assert!(body.contains(&format!(r#"href="http://{ONION_HOST}/next""#)), "{body}");
    assert!(body.contains(r#"href="https://example.com/""#), "{body}");
    assert_eq!(
        response.header("Content-Length"),
        Some(body.len().to_string().as_str())
    );

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn path_mode_rewrites_links_into_proxy_namespace() -> Result<()> {
    let page = format!(
        r#"<a href="/about">a</a><img src="http://{ONION_HOST}/logo.png"><a href="//cdn.example/x">x</a>"#
    );
    let bridge = MockBridge::html(&page).await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let response = proxy.get(&format!("/proxy/{ONION_HOST}/")).await?;
    let body = response.text();
    assert!(body.contains(&format!(r#"href="/proxy/{ONION_HOST}/about""#)), "{body}");
    assert!(body.contains(&format!(r#"src="/proxy/{ONION_HOST}/logo.png""#)), "{body}");
    assert!(body.contains(r#"href="//cdn.example/x""#), "{body}");

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn path_mode_leaves_non_html_bodies_alone() -> Result<()> {
    let script = r#"const logo = "/static/x.png"; fetch("/api/items");"#;
    let bridge = MockBridge::respond_with(move |_| {
        build_response(
            "200 OK",
            &[("Content-Type", "application/javascript")],
            script.as_bytes(),
        )
    })
    .await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let response = proxy.get(&format!("/proxy/{ONION_HOST}/app.js")).await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.text(), script);
    assert_eq!(response.header("Content-Type"), Some("application/javascript"));

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn malformed_onion_hosts_never_reach_the_bridge() -> Result<()> {
    let bridge = MockBridge::html("unused").await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    for target in ["http://bad_host.onion/", "http://.onion/"] {
        let response = proxy.get(target).await?;
        assert_eq!(response.status, 400, "{target}");
        assert!(
            response.text().contains("Only .onion addresses are allowed"),
            "{}",
            response.text()
        );
    }
    assert_eq!(bridge.fetch_count(), 0);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn path_mode_rewrites_onion_redirects() -> Result<()> {
    let location = format!("http://{ONION_HOST}/moved");
    let bridge = MockBridge::respond_with(move |_| {
        build_response("302 Found", &[("Location", location.as_str())], b"")
    })
    .await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let response = proxy.get(&format!("/proxy/{ONION_HOST}/old")).await?;
    assert_eq!(response.status, 302);
    assert_eq!(
        response.header("Location"),
        Some(format!("/proxy/{ONION_HOST}/moved").as_str())
    );

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn repeated_get_is_served_from_cache() -> Result<()> {
    let logs = LogCapture::new().await;
    let bridge = MockBridge::html("<p>cached</p>").await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;
    let target = format!("http://{ONION_HOST}/page");

    let first = proxy.get(&target).await?;
    let second = proxy.get(&target).await?;
    assert_eq!(first.body, second.body);
    assert_eq!(bridge.fetch_count(), 1);

    let stats = proxy.cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    let access = logs.access_lines();
    assert!(access.iter().any(|line| line.contains(r#"cache_lookup="miss""#)
        && line.contains(r#"cache_store="stored""#)));
    assert!(access.iter().any(|line| line.contains(r#"cache_lookup="hit""#)));

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn no_store_responses_are_refetched() -> Result<()> {
    let bridge = MockBridge::respond_with(|_| {
        build_response(
            "200 OK",
            &[("Content-Type", "text/plain"), ("Cache-Control", "no-store")],
            b"fresh",
        )
    })
    .await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;
    let target = format!("http://{ONION_HOST}/live");

    proxy.get(&target).await?;
    proxy.get(&target).await?;
    assert_eq!(bridge.fetch_count(), 2);
    assert_eq!(proxy.cache.stats().entries, 0);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn post_is_forwarded_with_default_content_type_and_not_cached() -> Result<()> {
    let bridge = MockBridge::html("<p>thanks</p>").await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let request = format!(
        "POST http://{ONION_HOST}/form HTTP/1.1\r\nHost: {ONION_HOST}\r\nContent-Length: 7\r\nConnection: close\r\n\r\nname=op"
    );
    let response = proxy.send(&request).await?;
    assert_eq!(response.status, 200);
    let requests = bridge.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, b"name=op");
    assert_eq!(
        requests[0].header("Content-Type"),
        Some("application/x-www-form-urlencoded")
    );

    proxy.send(&request).await?;
    assert_eq!(bridge.fetch_count(), 2);
    assert_eq!(proxy.cache.stats().entries, 0);

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn head_keeps_length_without_body() -> Result<()> {
    let bridge = MockBridge::respond_with(|_| {
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 1234\r\nConnection: close\r\n\r\n"
            .to_vec()
    })
    .await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let response = proxy
        .send(&format!(
            "HEAD http://{ONION_HOST}/big HTTP/1.1\r\nConnection: close\r\n\r\n"
        ))
        .await?;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Length"), Some("1234"));
    assert!(response.body.is_empty());
    assert_eq!(bridge.requests()[0].method, "HEAD");

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unreachable_bridge_is_bad_gateway() -> Result<()> {
    let proxy = ProxyHarnessBuilder::new(closed_addr()?).spawn().await?;

    let response = proxy.get(&format!("http://{ONION_HOST}/")).await?;
    assert_eq!(response.status, 502);
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(response.text().contains("Unable to reach"), "{}", response.text());

    proxy.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn keep_alive_serves_sequential_requests() -> Result<()> {
    let bridge = MockBridge::pages(vec![
        (
            format!("http://{ONION_HOST}/a"),
            build_response("200 OK", &[("Content-Type", "text/plain")], b"first"),
        ),
        (
            format!("http://{ONION_HOST}/b"),
            build_response("200 OK", &[("Content-Type", "text/plain")], b"second"),
        ),
    ])
    .await?;
    let proxy = ProxyHarnessBuilder::new(bridge.addr()).spawn().await?;

    let mut stream = proxy.connect().await?;
    for path in ["a", "b"] {
        let request = format!("GET http://{ONION_HOST}/{path} HTTP/1.1\r\nHost: {ONION_HOST}\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;
    }
    let mut reader = BufReader::new(stream);
    let first = read_framed_response(&mut reader).await?;
    let second = read_framed_response(&mut reader).await?;
    assert_eq!(first.text(), "first");
    assert_eq!(second.text(), "second");
    assert_eq!(first.header("Connection"), Some("keep-alive"));

    proxy.shutdown().await;
    Ok(())
}
