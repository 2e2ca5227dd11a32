//! Common test utilities and helpers
#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;

/// Upper bound for any single network wait in these tests.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait before concluding a datagram was dropped.
pub const DROP_WINDOW: Duration = Duration::from_millis(300);

/// Find an available TCP port for testing
pub fn find_available_port() -> u16 {
    let listener =
        std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
    listener.local_addr().unwrap().port()
}

/// Find an available UDP port for testing
pub fn find_available_udp_port() -> u16 {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("Failed to bind to random port");
    socket.local_addr().unwrap().port()
}

/// Write a port map to a per-test file under the temp dir.
pub fn write_port_map(name: &str, content: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "rtc-tunnel-test-{}-{}.toml",
        std::process::id(),
        name
    ));
    std::fs::write(&path, content).expect("Failed to write port map");
    path
}

/// TCP server standing in for the remote host. Aborted on drop.
pub struct TcpServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TcpServer {
    /// Echo everything back until the client closes.
    pub async fn echo() -> Self {
        Self::spawn(|mut socket| async move {
            let (mut reader, mut writer) = socket.split();
            let _ = tokio::io::copy(&mut reader, &mut writer).await;
        })
        .await
    }

    /// Answer each chunk with `HTTP/1.1 200 OK\r\n` followed by the chunk.
    pub async fn http_echo() -> Self {
        Self::spawn(|mut socket| async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let n = match socket.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let mut reply = b"HTTP/1.1 200 OK\r\n".to_vec();
                reply.extend_from_slice(&buf[..n]);
                if socket.write_all(&reply).await.is_err() {
                    break;
                }
            }
        })
        .await
    }

    /// Accept, then close immediately.
    pub async fn closing() -> Self {
        Self::spawn(|socket| async move {
            drop(socket);
        })
        .await
    }

    /// Accept and hold the connection open without reading or writing.
    pub async fn silent() -> Self {
        Self::spawn(|socket| async move {
            let _socket = socket;
            std::future::pending::<()>().await;
        })
        .await
    }

    async fn spawn<F, Fut>(handler: F) -> Self
    where
        F: Fn(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().unwrap();

        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(handler(socket));
            }
        });

        Self { addr, task }
    }
}

/// UDP server standing in for the remote host: echoes every datagram back
/// to its sender. Aborted on drop.
pub struct UdpEchoServer {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Drop for UdpEchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl UdpEchoServer {
    pub async fn start() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind UDP echo server");
        let addr = socket.local_addr().unwrap();

        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            while let Ok((n, src)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..n], src).await;
            }
        });

        Self { addr, task }
    }
}

/// Read until EOF; a reset counts as closed.
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let _ = tokio::time::timeout(IO_TIMEOUT, stream.read_to_end(&mut received))
        .await
        .expect("connection was not closed in time");
    received
}

/// Receive one datagram, or `None` if nothing arrives within `window`.
pub async fn recv_within(socket: &UdpSocket, window: Duration) -> Option<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; 65535];
    match tokio::time::timeout(window, socket.recv_from(&mut buf)).await {
        Ok(Ok((n, src))) => Some((buf[..n].to_vec(), src)),
        _ => None,
    }
}
