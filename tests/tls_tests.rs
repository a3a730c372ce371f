//! HTTPS tests against a local target with a self-signed certificate.
//!
//! These validate that SKIP_TLS_VERIFY reaches every pool the manager builds,
//! including pools created by rotation, and that certificate failures are
//! reported as TLS errors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{crypto, ServerConfig};
use tokio_rustls::TlsAcceptor;
use url::Url;

use traffic_replay::client::{build_client, ClientConfig};
use traffic_replay::connection_pool::PoolManager;
use traffic_replay::errors::ErrorKind;
use traffic_replay::executor::execute;

const CERT_PEM: &[u8] = include_bytes!("fixtures/self_signed.crt");
const KEY_PEM: &[u8] = include_bytes!("fixtures/self_signed.key");
const TIMEOUT: Duration = Duration::from_secs(5);

fn load_certs() -> Vec<CertificateDer<'static>> {
    rustls_pemfile::certs(&mut &CERT_PEM[..])
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

fn load_private_key() -> PrivateKeyDer<'static> {
    rustls_pemfile::private_key(&mut &KEY_PEM[..])
        .unwrap()
        .expect("fixture holds a private key")
}

/// Serves `200 ok` over TLS on an ephemeral port until the test ends.
async fn https_server() -> SocketAddr {
    let config = ServerConfig::builder_with_provider(Arc::new(crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(load_certs(), load_private_key())
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                // Handshakes rejected by a verifying client end here.
                let Ok(mut stream) = acceptor.accept(socket).await else {
                    return;
                };
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });

    addr
}

fn target(addr: SocketAddr) -> Url {
    Url::parse(&format!("https://{}/secure", addr)).unwrap()
}

fn insecure_config() -> ClientConfig {
    ClientConfig {
        skip_tls_verify: true,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn skip_verify_accepts_self_signed_certificate() {
    let addr = https_server().await;
    let client = build_client(&insecure_config()).unwrap();

    let outcome = execute(&client, target(addr), TIMEOUT).await;

    assert!(outcome.success, "request failed: {:?}", outcome.error_detail);
    assert_eq!(outcome.status_code, Some(200));

    println!("✅ Self-signed certificate accepted with verification disabled");
}

#[tokio::test]
async fn verifying_client_reports_tls_error() {
    let addr = https_server().await;
    let client = build_client(&ClientConfig::default()).unwrap();

    let outcome = execute(&client, target(addr), TIMEOUT).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, None);
    assert_eq!(outcome.error_kind, Some(ErrorKind::Tls));
    assert_eq!(outcome.error_kind.unwrap().code(), "TLS_ERROR");
}

#[tokio::test]
async fn rotated_pools_keep_skip_verify() {
    let addr = https_server().await;
    let manager = PoolManager::new(insecure_config(), Some(1)).unwrap();

    for expected_generation in 0..3 {
        let lease = manager.lease().unwrap();
        assert_eq!(lease.generation(), expected_generation);
        manager.rotate_if_due();

        let outcome = execute(lease.client(), target(addr), TIMEOUT).await;
        assert!(
            outcome.success,
            "generation {} failed: {:?}",
            expected_generation, outcome.error_detail
        );
    }

    assert_eq!(manager.rotations(), 3);
    manager.close_final().await;
}
