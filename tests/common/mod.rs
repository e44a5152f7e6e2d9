//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use qproxy::{Config, QProxy};

pub const WAITING_BODY: &str = "WAITING ROOM";
pub const FULL_BODY: &str = "QUEUE FULL";

/// Start a mock origin that answers every request with a fixed body.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut request = [0u8; 4096];
                        let _ = socket.read(&mut request).await;
                        let raw = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(raw.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// A running proxy instance backed by a scratch configuration directory.
pub struct ProxyFixture {
    pub proxy: Arc<QProxy>,
    pub proxy_url: String,
    pub api_url: String,
    _dir: tempfile::TempDir,
}

/// Write a config, start the proxy, and wait for both listeners.
///
/// `top_extra` is spliced in at the document root (e.g. whitelists),
/// `api_extra` under the `api:` block at two-space indentation, and
/// `backends` is the full `backends:` block.
pub async fn launch_proxy(
    queue_max: i64,
    top_extra: &str,
    api_extra: &str,
    backends: &str,
) -> ProxyFixture {
    let dir = tempfile::tempdir().unwrap();
    let queue_template = dir.path().join("queue.html");
    let full_template = dir.path().join("full.html");
    fs::write(&queue_template, WAITING_BODY).unwrap();
    fs::write(&full_template, FULL_BODY).unwrap();

    let (proxy_addr, api_addr) = free_addrs().await;

    let yaml = format!(
        "addr: {proxy_addr}\n\
         cookie_name: qpid\n\
         timeout: 5\n\
         session_refresh_interval: 1\n\
         api:\n  addr: {api_addr}\n{api_extra}\
         queue:\n  session_ttl: 60\n  max_sessions: {queue_max}\n  template: {}\n  full_template: {}\n\
         {top_extra}\
         {backends}",
        queue_template.display(),
        full_template.display(),
    );
    let config_path = dir.path().join("qproxy.yaml");
    fs::write(&config_path, yaml).unwrap();

    let config = Config::load(&config_path).unwrap();
    let proxy = Arc::new(QProxy::new(config).unwrap());
    tokio::spawn({
        let proxy = proxy.clone();
        async move {
            let _ = proxy.run().await;
        }
    });

    wait_until_serving(proxy_addr).await;
    wait_until_serving(api_addr).await;

    ProxyFixture {
        proxy,
        proxy_url: format!("http://{proxy_addr}"),
        api_url: format!("http://{api_addr}"),
        _dir: dir,
    }
}

/// Standard single-backend block pointing at a mock origin.
pub fn one_backend(addr: SocketAddr, max_sessions: usize) -> String {
    format!(
        "backends:\n  app:\n    url: http://{addr}\n    session_ttl: 60\n    max_sessions: {max_sessions}\n"
    )
}

// Both listeners are held at once so the two ports always differ.
async fn free_addrs() -> (SocketAddr, SocketAddr) {
    let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let second = TcpListener::bind("127.0.0.1:0").await.unwrap();

    (
        first.local_addr().unwrap(),
        second.local_addr().unwrap(),
    )
}

async fn wait_until_serving(addr: SocketAddr) {
    for _ in 0..200 {
        if TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("listener never came up on {addr}");
}

/// Pull a cookie value out of the Set-Cookie response headers.
pub fn response_cookie(response: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    for value in response.headers().get_all(reqwest::header::SET_COOKIE) {
        if let Ok(value) = value.to_str() {
            if let Some(rest) = value.strip_prefix(&prefix) {
                return Some(rest.split(';').next().unwrap_or_default().to_string());
            }
        }
    }

    None
}
