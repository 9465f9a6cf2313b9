//! Socket-level transport used by the HTTP/1.1 client.

use df_core::FetchError;
use df_core::FetchResult;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::time::Duration;

/// Object-safe byte stream; plain TCP and TLS sessions both implement it.
pub trait IoStream: Read + Write + Send {}
impl<T> IoStream for T where T: Read + Write + Send {}

pub type BoxedIoStream = Box<dyn IoStream>;

/// Timeouts applied to every socket the transport opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    pub connect_timeout: Duration,
    /// Read and write timeout once the connection is up. `None` blocks forever.
    pub io_timeout: Option<Duration>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            io_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Opens TCP connections.
pub trait Transport {
    fn connect(&self, address: SocketAddr, options: &SocketOptions) -> FetchResult<TcpStream>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

impl Transport for TcpTransport {
    fn connect(&self, address: SocketAddr, options: &SocketOptions) -> FetchResult<TcpStream> {
        let stream =
            TcpStream::connect_timeout(&address, options.connect_timeout).map_err(|error| {
                FetchError::network(
                    "net.transport.connect_failed",
                    format!("failed to connect to `{address}`: {error}"),
                )
            })?;

        configure(&stream, options).map_err(|error| {
            FetchError::network(
                "net.transport.socket_options_failed",
                format!("failed to configure socket for `{address}`: {error}"),
            )
        })?;

        log::trace!("connected to {address}");
        Ok(stream)
    }
}

fn configure(stream: &TcpStream, options: &SocketOptions) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(options.io_timeout)?;
    stream.set_write_timeout(options.io_timeout)
}

/// Tries each resolved address in order and returns the first connection.
pub fn connect_first_available<T: Transport>(
    transport: &T,
    addresses: &[SocketAddr],
    options: &SocketOptions,
) -> FetchResult<TcpStream> {
    let mut last_error = None;

    for address in addresses {
        match transport.connect(*address, options) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                log::debug!("{error}");
                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        FetchError::network(
            "net.transport.no_addresses",
            "no addresses available to open a connection",
        )
    }))
}
