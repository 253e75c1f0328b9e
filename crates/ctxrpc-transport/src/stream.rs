use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, trace, warn};

use crate::codec::{encode_packet, FrameConfig, PacketCodec};
use crate::error::{Result, TransportError};
use crate::traits::{Handlers, MessageHandler, Packet, Subscription, Transport};

type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Packets over any async byte stream (Unix socket, pipe, TCP, duplex).
///
/// Outbound packets are encoded synchronously in [`Transport::send`], so size
/// and JSON errors surface at the call site; a background task writes the
/// encoded frames in order. The read side starts on the first subscription.
pub struct StreamTransport {
    config: FrameConfig,
    runtime: Handle,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    reader: Mutex<Option<BoxedReader>>,
    handlers: Arc<Handlers>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    closed_signal: Arc<watch::Sender<bool>>,
}

impl StreamTransport {
    /// Wrap a stream with the default frame configuration.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<S>(stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_config(stream, FrameConfig::default())
    }

    /// Wrap a stream with explicit frame configuration.
    pub fn with_config<S>(stream: S, config: FrameConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|err| TransportError::NoRuntime(err.to_string()))?;
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let (closed_signal, _) = watch::channel(false);
        let closed_signal = Arc::new(closed_signal);

        let writer_signal = Arc::clone(&closed_signal);
        runtime.spawn(async move {
            while let Some(frame) = rx.recv().await {
                let written = async {
                    write_half.write_all(&frame).await?;
                    write_half.flush().await
                }
                .await;
                if let Err(err) = written {
                    warn!(error = %err, "stream transport write failed");
                    writer_signal.send_replace(true);
                    return;
                }
            }
            let _ = write_half.shutdown().await;
            debug!("stream transport writer finished");
        });

        let reader: BoxedReader = Box::pin(read_half);
        Ok(Self {
            config,
            runtime,
            outbound: Mutex::new(Some(tx)),
            reader: Mutex::new(Some(reader)),
            handlers: Handlers::new(),
            reader_task: Mutex::new(None),
            closed: AtomicBool::new(false),
            closed_signal,
        })
    }

    /// Connect to a Unix domain socket and wrap the connection.
    #[cfg(unix)]
    pub async fn connect_unix(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let stream = tokio::net::UnixStream::connect(path.as_ref()).await?;
        Self::new(stream)
    }

    /// Resolves once the stream has ended, failed, or been closed locally.
    pub async fn wait_closed(&self) {
        let mut signal = self.closed_signal.subscribe();
        let _ = signal.wait_for(|closed| *closed).await;
    }

    /// True once the stream has ended, failed, or been closed locally.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || *self.closed_signal.borrow()
    }

    fn start_reader(&self) {
        let mut task = self.reader_task.lock();
        if task.is_some() {
            return;
        }
        let Some(reader) = self.reader.lock().take() else {
            return;
        };

        let max_depth = self.config.max_depth;
        let mut frames = FramedRead::new(reader, PacketCodec::with_config(self.config.clone()));
        let handlers = Arc::clone(&self.handlers);
        let signal = Arc::clone(&self.closed_signal);
        *task = Some(self.runtime.spawn(async move {
            while let Some(next) = frames.next().await {
                match next.map(|raw| raw.parse(max_depth)) {
                    Ok(Ok(packet)) => handlers.dispatch(packet),
                    Ok(Err(err)) => debug!(error = %err, "dropping unparseable packet"),
                    Err(err) => {
                        warn!(error = %err, "stream transport read failed");
                        break;
                    }
                }
            }
            debug!("stream transport reader finished");
            signal.send_replace(true);
        }));
    }
}

impl Transport for StreamTransport {
    fn send(&self, packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut frame = BytesMut::new();
        encode_packet(&packet, &mut frame, &self.config)?;
        trace!(size = frame.len(), "queueing frame");

        let outbound = self.outbound.lock();
        let sender = outbound.as_ref().ok_or(TransportError::Closed)?;
        sender
            .send(frame.freeze())
            .map_err(|_| TransportError::Closed)
    }

    fn on_message(&self, handler: MessageHandler) -> Subscription {
        let subscription = self.handlers.subscribe(handler);
        self.start_reader();
        subscription
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // Dropping the sender lets the writer flush what is queued, then shut down.
        self.outbound.lock().take();
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        self.reader.lock().take();
        self.handlers.clear();
        self.closed_signal.send_replace(true);
        Ok(())
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("max_frame_size", &self.config.max_frame_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}
