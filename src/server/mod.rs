//! Tokio TCP front end for a [`Kernel`].
//!
//! Each accepted connection runs on its own task and answers its requests in
//! order, until the peer hangs up or either side asks for `Connection: close`.

use std::{net::SocketAddr, sync::Arc};

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, info, warn};

use crate::{
    http::{Request, RequestError, Response, StatusCode},
    kernel::Kernel,
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request, head and body together, buffered for one exchange.
const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

const READ_CAPACITY: usize = 4096;

/// A bound listener waiting to [`serve`](Self::serve) a kernel.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use querylog::{Response, Router, StatusCode};
/// use querylog::context::Context;
/// use querylog::database::QueryLog;
/// use querylog::events::Dispatcher;
/// use querylog::kernel::Kernel;
/// use querylog::server::Server;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.get("/", |_ctx: Context| async { Response::new(StatusCode::Ok).body("Hello!") });
///     let kernel = Kernel::new(router, Arc::new(QueryLog::new()), Arc::new(Dispatcher::new()));
///
///     Server::bind("127.0.0.1:8080").await?.serve(Arc::new(kernel)).await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// # Errors
    ///
    /// [`ServerError::Bind`] when the address is taken or not allowed.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections forever, handing every request to `kernel`.
    ///
    /// Failed accepts are logged and skipped. A connection whose handler panics
    /// is dropped; the kernel still reports the request as handled.
    pub async fn serve(self, kernel: Arc<Kernel>) -> Result<(), ServerError> {
        info!(address = %self.local_addr, "serving");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(%error, "accept failed");
                    continue;
                }
            };

            let kernel = Arc::clone(&kernel);
            tokio::spawn(async move {
                if let Err(error) = exchange(stream, &kernel).await {
                    debug!(%peer, %error, "connection dropped");
                }
            });
        }
    }
}

/// What the buffered bytes hold so far.
#[derive(Debug)]
enum Frame {
    NeedMore,
    Request { request: Request, len: usize },
    Reject(Response),
}

fn next_frame(buf: &[u8]) -> Frame {
    if buf.len() > MAX_REQUEST_BYTES {
        return Frame::Reject(Response::new(StatusCode::PayloadTooLarge).body("request too large"));
    }
    match Request::parse(buf) {
        Ok((request, head_len)) => {
            let len = head_len + request.content_length();
            if buf.len() < len {
                Frame::NeedMore
            } else {
                Frame::Request { request, len }
            }
        }
        Err(RequestError::Incomplete) => Frame::NeedMore,
        Err(error) => Frame::Reject(Response::new(StatusCode::BadRequest).body(error.to_string())),
    }
}

async fn exchange(mut stream: TcpStream, kernel: &Kernel) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(READ_CAPACITY);

    loop {
        match next_frame(&buf) {
            Frame::NeedMore => {
                if stream.read_buf(&mut buf).await? == 0 {
                    return Ok(());
                }
            }
            Frame::Reject(response) => {
                warn!(status = %response.status(), "rejecting request");
                stream.write_all(&response.encode(false)).await?;
                return Ok(());
            }
            Frame::Request { request, len } => {
                let keep_alive = request.keep_alive();
                let response = kernel.handle(request).await;
                stream.write_all(&response.encode(keep_alive)).await?;
                buf.advance(len);
                if !keep_alive {
                    return Ok(());
                }
            }
        }
    }
}
