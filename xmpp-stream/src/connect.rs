//! Step 2 of the connector: TCP connect with fallback across the addresses
//! `resolve::resolve` returned.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;

/// Tries each address in order, returning the first successful connection.
/// When every attempt fails, surfaces the last error (matching the "when
/// all exhausted, surface the last TCP error" rule).
pub async fn connect_first(addrs: &[SocketAddr]) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses to try")))
}
