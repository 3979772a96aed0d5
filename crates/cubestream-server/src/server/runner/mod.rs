//! The network endpoint and its serve loop.
//!
//! [`ServerRunner`] owns the listener and the tonic server. It serves the
//! downloader, health and reflection services until the supervisor cancels
//! its token, then:
//!
//! 1. reports NOT_SERVING through the health service,
//! 2. refuses new `GetCube` streams,
//! 3. lets tonic stop accepting and drain in-flight streams.
//!
//! The drain itself is not timed here; the supervisor's grace timer bounds it.
//!
//! Each connection is closed once it is older than `max_connection_age` plus
//! `max_connection_age_grace`, whatever streams it still carries.

use crate::server::{
    config::ServerConfig,
    error::{Error, Result},
    lifecycle::supervisor::Runner,
    service::{handler::DownloaderService, store::ImageStore},
};
use cubestream_core::proto::{FILE_DESCRIPTOR_SET, downloader_server::DownloaderServer};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{
    codec::CompressionEncoding,
    transport::{Identity, Server, ServerTlsConfig},
};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

pub struct ServerRunner {
    config: ServerConfig,
    service: DownloaderService,
    listener: Option<TcpListener>,
}

impl ServerRunner {
    pub fn new(config: ServerConfig, store: Arc<dyn ImageStore>) -> Self {
        let service = DownloaderService::new(&config, store);
        Self {
            config,
            service,
            listener: None,
        }
    }

    /// Serves on an already bound listener instead of binding the configured
    /// port.
    #[cfg(test)]
    pub fn with_listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    async fn tls_config(&self) -> Result<Option<ServerTlsConfig>> {
        let Some(files) = &self.config.tls else {
            return Ok(None);
        };

        let cert = tokio::fs::read(&files.cert).await.map_err(|e| {
            Error::startup(
                format!("failed to read TLS certificate {}", files.cert.display()),
                e,
            )
        })?;
        let key = tokio::fs::read(&files.key).await.map_err(|e| {
            Error::startup(
                format!("failed to read TLS key {}", files.key.display()),
                e,
            )
        })?;

        Ok(Some(
            ServerTlsConfig::new().identity(Identity::from_pem(cert, key)),
        ))
    }

    async fn bind(&mut self) -> Result<TcpListener> {
        if let Some(listener) = self.listener.take() {
            return Ok(listener);
        }
        let addrs = self.config.listen_addrs();
        TcpListener::bind(&addrs[..])
            .await
            .map_err(|source| Error::Bind {
                addr: format!("{} or {}", addrs[0], addrs[1]),
                source,
            })
    }
}

impl Runner for ServerRunner {
    async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let tls = self.tls_config().await?;
        let listener = self.bind().await?;
        log_startup_info(&listener, &self.config);

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<DownloaderServer<DownloaderService>>()
            .await;

        let reflection = Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let mut builder = Server::builder()
            .accept_http1(true)
            .http2_adaptive_window(Some(true))
            .max_connection_age(self.config.max_connection_age)
            .max_connection_age_grace(self.config.max_connection_age_grace);
        if let Some(tls) = tls {
            builder = builder.tls_config(tls).map_err(Error::Tls)?;
        }

        builder
            .layer(
                ServiceBuilder::new()
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    )
                    .layer(GrpcWebLayer::new()),
            )
            .add_service(health_service)
            .add_service(reflection)
            .add_service(build_downloader_service(self.service.clone()))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                drain_on_cancel(shutdown, self.service, health_reporter),
            )
            .await
            .map_err(Error::Serve)?;

        tracing::info!("Server drained and stopped");
        Ok(())
    }
}

fn log_startup_info(listener: &TcpListener, config: &ServerConfig) {
    let addr = listener
        .local_addr()
        .unwrap_or_else(|_| config.listen_addrs()[0]);
    let scheme = if config.tls.is_some() { "TLS" } else { "h2c" };

    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting cubestream v{} on {} ({}) with full config: {:#?}",
            cubestream_core::types::SERVER_VERSION,
            addr,
            scheme,
            config
        );
    } else {
        tracing::info!(
            "Starting cubestream v{} on {} ({}) with {} workers",
            cubestream_core::types::SERVER_VERSION,
            addr,
            scheme,
            config.workers
        );
    }
}

fn build_downloader_service(service: DownloaderService) -> DownloaderServer<DownloaderService> {
    DownloaderServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

/// Resolves once `shutdown` is cancelled, after which tonic stops accepting
/// and drains.
async fn drain_on_cancel(
    shutdown: CancellationToken,
    service: DownloaderService,
    health_reporter: HealthReporter,
) {
    shutdown.cancelled().await;

    // 1. Publish the status
    health_reporter
        .set_not_serving::<DownloaderServer<DownloaderService>>()
        .await;

    // 2. Refuse new streams, let the transport drain the rest
    service.begin_shutdown();
    tracing::info!(
        "Draining in-flight streams ({} active)",
        service.streams_inflight()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        config::{CliArgs, TlsFiles, tests::args},
        service::store::DirectoryStore,
    };
    use core::time::Duration;
    use cubestream_core::proto::{
        GetCubeRequest, GetCubeResponse, VersionRequest, downloader_client::DownloaderClient,
        get_cube_response::Response as Msg,
    };
    use std::{
        net::SocketAddr,
        path::{Path, PathBuf},
    };
    use tokio::{
        task::JoinHandle,
        time::{Instant, sleep, timeout},
    };
    use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

    /// Chunk size and part count of the image read by the slow client.
    const SLOW_CHUNK: usize = 64 * 1024;
    const SLOW_PARTS: usize = 40;

    fn runner(dir: &Path, args: CliArgs) -> ServerRunner {
        let config = ServerConfig::try_from(CliArgs {
            data_dir: dir.to_path_buf(),
            ..args
        })
        .unwrap();
        let store = Arc::new(DirectoryStore::new(&config.data_dir));
        ServerRunner::new(config, store)
    }

    fn testdata(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(name)
    }

    /// Serves `runner` on an ephemeral loopback port.
    async fn spawn(
        runner: ServerRunner,
        shutdown: &CancellationToken,
    ) -> (SocketAddr, JoinHandle<Result<()>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(runner.with_listener(listener).run(shutdown.clone()));
        (addr, server)
    }

    async fn stop(shutdown: CancellationToken, server: JoinHandle<Result<()>>) {
        shutdown.cancel();
        let result = timeout(Duration::from_secs(10), server)
            .await
            .expect("server did not stop after cancellation")
            .unwrap();
        assert!(result.is_ok(), "{result:?}");
    }

    /// Reads `cube.tif` at 100 ms per chunk through a small receive window,
    /// so the server can't get far ahead of the reader. Returns the number of
    /// chunks received before the stream ended.
    async fn read_slowly(addr: SocketAddr) -> usize {
        let channel = Endpoint::from_shared(format!("http://{addr}"))
            .unwrap()
            .initial_stream_window_size(65_535)
            .initial_connection_window_size(65_535)
            .connect()
            .await
            .unwrap();
        let mut stream = DownloaderClient::new(channel)
            .get_cube(GetCubeRequest {
                images: vec!["cube.tif".to_string()],
            })
            .await
            .unwrap()
            .into_inner();

        let mut chunks = 0;
        loop {
            match stream.message().await {
                Ok(Some(GetCubeResponse {
                    response: Some(Msg::Chunk(_)),
                })) => {
                    chunks += 1;
                    sleep(Duration::from_millis(100)).await;
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return chunks,
            }
        }
    }

    fn slow_cube(dir: &Path) {
        std::fs::write(dir.join("cube.tif"), vec![7_u8; SLOW_CHUNK * SLOW_PARTS]).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serves_until_cancelled_then_stops_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tile.tif"), b"0123456789").unwrap();

        let shutdown = CancellationToken::new();
        let (addr, server) = spawn(
            runner(
                dir.path(),
                CliArgs {
                    chunk_size: 4,
                    ..args()
                },
            ),
            &shutdown,
        )
        .await;

        {
            let mut client = DownloaderClient::connect(format!("http://{addr}"))
                .await
                .unwrap();

            let version = client
                .version(VersionRequest {})
                .await
                .unwrap()
                .into_inner()
                .version;
            assert_eq!(version, cubestream_core::types::SERVER_VERSION);

            let mut stream = client
                .get_cube(GetCubeRequest {
                    images: vec!["tile.tif".to_string()],
                })
                .await
                .unwrap()
                .into_inner();

            let mut payload = Vec::new();
            let mut parts = 0;
            while let Some(msg) = stream.message().await.unwrap() {
                match msg.response.unwrap() {
                    Msg::Header(h) => assert_eq!((h.size, h.nb_parts), (10, 3)),
                    Msg::Chunk(c) => {
                        assert_eq!(c.part, parts);
                        parts += 1;
                        payload.extend_from_slice(&c.data);
                    }
                }
            }
            assert_eq!(parts, 3);
            assert_eq!(payload, b"0123456789");
        }

        stop(shutdown, server).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn streams_outlive_connection_age_within_grace() {
        let dir = tempfile::tempdir().unwrap();
        slow_cube(dir.path());

        let shutdown = CancellationToken::new();
        let (addr, server) = spawn(
            runner(
                dir.path(),
                CliArgs {
                    chunk_size: SLOW_CHUNK,
                    max_connection_age: 1,
                    max_connection_age_grace: 10,
                    ..args()
                },
            ),
            &shutdown,
        )
        .await;

        let start = Instant::now();
        assert_eq!(read_slowly(addr).await, SLOW_PARTS);
        assert!(start.elapsed() > Duration::from_secs(1));

        stop(shutdown, server).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connections_are_closed_after_age_and_grace() {
        let dir = tempfile::tempdir().unwrap();
        slow_cube(dir.path());

        let shutdown = CancellationToken::new();
        let (addr, server) = spawn(
            runner(
                dir.path(),
                CliArgs {
                    chunk_size: SLOW_CHUNK,
                    max_connection_age: 1,
                    max_connection_age_grace: 1,
                    ..args()
                },
            ),
            &shutdown,
        )
        .await;

        let chunks = read_slowly(addr).await;
        assert!(chunks < SLOW_PARTS, "stream survived the hard cap");

        stop(shutdown, server).await;
    }

    #[tokio::test]
    async fn port_in_use_is_a_bind_error() {
        let dir = tempfile::tempdir().unwrap();
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let result = runner(
            dir.path(),
            CliArgs {
                port: port.to_string(),
                ..args()
            },
        )
        .run(CancellationToken::new())
        .await;

        assert!(matches!(result, Err(Error::Bind { .. })), "{result:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn configured_port_accepts_ipv4_clients() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let dir = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(
            runner(
                dir.path(),
                CliArgs {
                    port: port.to_string(),
                    ..args()
                },
            )
            .run(shutdown.clone()),
        );

        let endpoint = Endpoint::from_shared(format!("http://127.0.0.1:{port}")).unwrap();
        let mut channel: Option<Channel> = None;
        for _ in 0..100 {
            if let Ok(connected) = endpoint.connect().await {
                channel = Some(connected);
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        let mut client = DownloaderClient::new(channel.expect("server never accepted"));
        assert!(client.version(VersionRequest {}).await.is_ok());
        drop(client);

        stop(shutdown, server).await;
    }

    #[tokio::test]
    async fn missing_tls_files_fail_before_binding() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(
            dir.path(),
            CliArgs {
                tls: true,
                tls_cert: dir.path().join("missing.crt"),
                tls_key: dir.path().join("missing.key"),
                ..args()
            },
        );
        assert_eq!(
            runner.config.tls,
            Some(TlsFiles {
                cert: dir.path().join("missing.crt"),
                key: dir.path().join("missing.key"),
            })
        );

        let result = runner.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Startup { .. })), "{result:?}");
    }

    #[tokio::test]
    async fn malformed_tls_identity_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tls.crt"), "not a certificate").unwrap();
        std::fs::write(dir.path().join("tls.key"), "not a key").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = runner(
            dir.path(),
            CliArgs {
                tls: true,
                tls_cert: dir.path().join("tls.crt"),
                tls_key: dir.path().join("tls.key"),
                ..args()
            },
        )
        .with_listener(listener)
        .run(CancellationToken::new())
        .await;

        assert!(matches!(result, Err(Error::Tls(_))), "{result:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serves_over_tls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tile.tif"), b"raster").unwrap();

        let shutdown = CancellationToken::new();
        let (addr, server) = spawn(
            runner(
                dir.path(),
                CliArgs {
                    tls: true,
                    tls_cert: testdata("server.crt"),
                    tls_key: testdata("server.key"),
                    ..args()
                },
            ),
            &shutdown,
        )
        .await;

        {
            let ca = std::fs::read(testdata("ca.crt")).unwrap();
            let channel = Endpoint::from_shared(format!("https://{addr}"))
                .unwrap()
                .tls_config(
                    ClientTlsConfig::new()
                        .ca_certificate(Certificate::from_pem(ca))
                        .domain_name("localhost"),
                )
                .unwrap()
                .connect()
                .await
                .unwrap();
            let mut client = DownloaderClient::new(channel);

            let mut stream = client
                .get_cube(GetCubeRequest {
                    images: vec!["tile.tif".to_string()],
                })
                .await
                .unwrap()
                .into_inner();
            let mut payload = Vec::new();
            while let Some(msg) = stream.message().await.unwrap() {
                if let Some(Msg::Chunk(c)) = msg.response {
                    payload.extend_from_slice(&c.data);
                }
            }
            assert_eq!(payload, b"raster");
        }

        stop(shutdown, server).await;
    }
}
