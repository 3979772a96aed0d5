use crate::server::error::{Error, Result};
use clap::Parser;
use core::{num::NonZeroUsize, time::Duration};
use cubestream_core::{
    ChunkPolicy,
    types::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE},
};
use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    path::PathBuf,
};

/// Runtime configuration for the `cubestream-server` binary.
///
/// All values are parsed once from CLI arguments or environment variables
/// (a `.env` file is honored) and are immutable afterwards.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "cubestream-server",
    version,
    about = "A gRPC service streaming geospatial image cubes"
)]
pub struct CliArgs {
    /// Serve over TLS instead of cleartext HTTP/2.
    ///
    /// Environment variable: `TLS`
    #[arg(long, env = "TLS", default_value_t = false)]
    pub tls: bool,

    /// Port to listen on, on all interfaces.
    ///
    /// Environment variable: `PORT`
    #[arg(long, env = "PORT", default_value_t = String::from("8080"))]
    pub port: String,

    /// Maximum age of a client connection, in seconds.
    ///
    /// Keeps long-lived clients from pinning themselves to one instance.
    ///
    /// Environment variable: `MAX_CONNECTION_AGE`
    #[arg(long, env = "MAX_CONNECTION_AGE", default_value_t = 15 * 60)]
    pub max_connection_age: u64,

    /// Additional time, in seconds, granted to a connection past its maximum
    /// age before it is forcibly closed. Streams still running at that point
    /// are cut off.
    ///
    /// Environment variable: `MAX_CONNECTION_AGE_GRACE`
    #[arg(long, env = "MAX_CONNECTION_AGE_GRACE", default_value_t = 60)]
    pub max_connection_age_grace: u64,

    /// Number of images loaded concurrently for a single `GetCube` request.
    ///
    /// Images are still streamed in request order.
    ///
    /// Environment variable: `WORKERS`
    #[arg(long, env = "WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Chunk size for streaming images, in bytes.
    ///
    /// Images larger than this are split into several `ImageChunk` messages.
    /// 64 KiB is the usual recommendation; on fast local links a bigger
    /// value such as 1 MiB performs better. Values above the gRPC message
    /// ceiling (4 MiB) are clamped.
    ///
    /// Environment variable: `CHUNK_SIZE`
    #[arg(long, env = "CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// PEM certificate chain, used when `--tls` is set.
    ///
    /// Environment variable: `TLS_CERT`
    #[arg(long, env = "TLS_CERT", default_value = "/tls/tls.crt")]
    pub tls_cert: PathBuf,

    /// PEM private key, used when `--tls` is set.
    ///
    /// Environment variable: `TLS_KEY`
    #[arg(long, env = "TLS_KEY", default_value = "/tls/tls.key")]
    pub tls_key: PathBuf,

    /// Seconds allowed for in-flight streams to drain after a stop request
    /// before the process exits with an error.
    ///
    /// Environment variable: `GRACE_PERIOD`
    #[arg(long, env = "GRACE_PERIOD", default_value_t = 30)]
    pub grace_period: u64,

    /// Capacity of the response buffer between the image loader and the gRPC
    /// stream, in messages.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Directory the images are served from.
    ///
    /// Environment variable: `DATA_DIR`
    #[arg(long, env = "DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,
}

/// PEM files making up the server identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub tls: Option<TlsFiles>,
    pub max_connection_age: Duration,
    pub max_connection_age_grace: Duration,
    pub workers: NonZeroUsize,
    pub chunk_policy: ChunkPolicy,
    pub grace_period: Duration,
    pub stream_buffer_size: usize,
    pub data_dir: PathBuf,
}

impl ServerConfig {
    /// Addresses the runner binds to, tried in order.
    ///
    /// The IPv6 wildcard also accepts IPv4 clients on dual-stack hosts. The
    /// IPv4 wildcard is the fallback where IPv6 is unavailable.
    pub fn listen_addrs(&self) -> [SocketAddr; 2] {
        [
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, self.port)),
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port)),
        ]
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = Error;

    fn try_from(args: CliArgs) -> Result<Self> {
        let port = args.port.trim();
        if port.is_empty() {
            return Err(Error::config("PORT must not be empty"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| Error::config(format!("PORT ({port}) is not a valid port: {e}")))?;

        if args.max_connection_age == 0 {
            return Err(Error::config("MAX_CONNECTION_AGE must be greater than 0"));
        }

        if args.grace_period == 0 {
            return Err(Error::config("GRACE_PERIOD must be greater than 0"));
        }

        if args.stream_buffer_size == 0 {
            return Err(Error::config("STREAM_BUFFER_SIZE must be greater than 0"));
        }

        let workers = NonZeroUsize::new(args.workers)
            .ok_or_else(|| Error::config("WORKERS must be greater than 0"))?;

        let chunk_size = NonZeroUsize::new(args.chunk_size)
            .ok_or_else(|| Error::config("CHUNK_SIZE must be greater than 0"))?;
        if ChunkPolicy::exceeds_ceiling(chunk_size) {
            tracing::warn!(
                "CHUNK_SIZE ({}) exceeds the gRPC message ceiling, clamping to {}",
                chunk_size,
                MAX_CHUNK_SIZE
            );
        }

        let tls = args.tls.then(|| TlsFiles {
            cert: args.tls_cert,
            key: args.tls_key,
        });

        Ok(Self {
            port,
            tls,
            max_connection_age: Duration::from_secs(args.max_connection_age),
            max_connection_age_grace: Duration::from_secs(args.max_connection_age_grace),
            workers,
            chunk_policy: ChunkPolicy::new(chunk_size),
            grace_period: Duration::from_secs(args.grace_period),
            stream_buffer_size: args.stream_buffer_size,
            data_dir: args.data_dir,
        })
    }
}
