#![no_main]

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::OnceLock;
use std::time::Duration;

use http::Method;
use libfuzzer_sys::fuzz_target;
use tokio::io::BufReader;

use onion_proxy::fuzzing::{classify_request, parse_http1_request_head};

const METHODS: [Method; 4] = [Method::GET, Method::HEAD, Method::POST, Method::CONNECT];

fn runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("build tokio runtime")
    })
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let method = &METHODS[data[0] as usize % METHODS.len()];
    let payload = &data[1..];
    let split = payload.iter().position(|b| *b == b'\n').unwrap_or(payload.len());
    let (target_bytes, host_bytes) = payload.split_at(split);
    let target = String::from_utf8_lossy(target_bytes);
    let host = String::from_utf8_lossy(host_bytes);
    let host = host.trim_start_matches('\n');
    let host = if host.is_empty() { None } else { Some(host) };
    let _ = classify_request(method, target.as_ref(), host);

    let peer = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 12345));
    runtime().block_on(async {
        let mut reader = BufReader::new(payload);
        let _ =
            parse_http1_request_head(&mut reader, peer, Duration::from_millis(10), 16 * 1024).await;
    });
});
