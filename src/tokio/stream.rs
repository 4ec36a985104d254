//! Socket types driven by the tokio reactor.

use std::io;

use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::connection::Transport;
use crate::error::{Error, Result};
use crate::opts::Opts;

pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    /// Connect to the socket path, or `host:port`, from `opts`.
    pub async fn connect(opts: &Opts) -> Result<Self> {
        if let Some(socket_path) = &opts.socket {
            #[cfg(unix)]
            return Ok(Self::Unix(UnixStream::connect(socket_path).await?));
            #[cfg(not(unix))]
            return Err(Error::Unsupported(format!(
                "Unix socket {} on this platform",
                socket_path
            )));
        }
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }
        let addr = format!("{}:{}", opts.host, opts.port);
        let tcp = TcpStream::connect(&addr).await?;
        tcp.set_nodelay(true)?;
        Ok(Self::Tcp(tcp))
    }

    /// Wait until the socket is ready for `interest`.
    pub async fn ready(&self, interest: Interest) -> io::Result<Ready> {
        match self {
            Stream::Tcp(s) => s.ready(interest).await,
            #[cfg(unix)]
            Stream::Unix(s) => s.ready(interest).await,
        }
    }
}

impl Transport for Stream {
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.try_read(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.try_read(buf),
        }
    }

    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.try_write(buf),
            #[cfg(unix)]
            Stream::Unix(s) => s.try_write(buf),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stream::Tcp(s) => f.debug_tuple("Tcp").field(&s.peer_addr().ok()).finish(),
            #[cfg(unix)]
            Stream::Unix(_) => f.write_str("Unix"),
        }
    }
}
