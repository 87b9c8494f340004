use crate::error::{Result, RtspError};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Byte stream of a connection, TCP or TLS
pub(crate) trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Io for T {}

pub(crate) type BoxedIo = Box<dyn Io>;

/// Write side of an RTSP connection.
///
/// All writes go through one async mutex so no message or interleaved frame
/// is ever emitted partially interleaved with another.
pub(crate) struct Conn {
    writer: tokio::sync::Mutex<WriteHalf<BoxedIo>>,
    write_timeout: Duration,
    pub(crate) cancel: CancellationToken,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) local_addr: SocketAddr,
}

impl Conn {
    pub(crate) fn new(
        io: BoxedIo,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
        write_timeout: Duration,
        cancel: CancellationToken,
    ) -> (Conn, ReadHalf<BoxedIo>) {
        let (read_half, write_half) = tokio::io::split(io);

        (
            Conn {
                writer: tokio::sync::Mutex::new(write_half),
                write_timeout,
                cancel,
                peer_addr,
                local_addr,
            },
            read_half,
        )
    }

    pub(crate) async fn write(&self, bytes: impl AsRef<[u8]>) -> Result<()> {
        let result = timeout(self.write_timeout, async {
            let mut writer = self.writer.lock().await;

            writer.write_all(bytes.as_ref()).await?;
            writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RtspError::Io(e)),
            Err(_) => Err(RtspError::WriteTimeout),
        }
    }
}
