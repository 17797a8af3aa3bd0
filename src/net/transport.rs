//! The multiplexed TCP client.
//!
//! See the [net module] documentation since this is a private module anyways.
//!
//! [net module]: crate::net

use std::{
    collections::HashMap,
    io,
    net::{SocketAddr, TcpListener as StdTcpListener},
    thread,
};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    runtime,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use crate::{
    net::{
        address::{AddressTable, PeerAddress},
        frame::{encode_frame, FrameBuffer},
        TransportError,
    },
    PeerId,
};

/// The receiver of the payloads of a [`TcpClient`].
///
/// The handler is a type parameter of the client, so the receive path is statically dispatched.
/// It is called from the transport thread for every complete payload and must not block, since
/// that stalls the reception from all the peers.
pub trait MessageHandler: Send + 'static {
    fn receive_message(&mut self, message: Bytes);
}

impl<F> MessageHandler for F
where
    F: FnMut(Bytes) + Send + 'static,
{
    fn receive_message(&mut self, message: Bytes) {
        self(message)
    }
}

type ConnectionId = u64;

/// An accepted peer connection.
struct Connection {
    address: SocketAddr,
    reader: JoinHandle<()>,
}

enum Event {
    Frame(ConnectionId, Bytes),
    Closed(ConnectionId),
}

/// A listening endpoint that receives length-delimited payloads from the peers.
///
/// The listener and every accepted connection are multiplexed on a single dedicated thread,
/// which alone owns the connection table. The payloads are handed over to the handler in the
/// order they arrive on each connection, without being interpreted.
pub struct TcpClient<H> {
    id: PeerId,
    listener: StdTcpListener,
    max_message_size: usize,
    handler: H,
}

impl<H> TcpClient<H>
where
    H: MessageHandler,
{
    /// Binds the listener of the node `id` to `address`.
    ///
    /// # Errors
    /// Fails if the address cannot be bound. A node cannot run without its listener.
    pub fn bind(
        id: PeerId,
        address: &PeerAddress,
        max_message_size: usize,
        handler: H,
    ) -> Result<Self, TransportError> {
        let listener = StdTcpListener::bind((address.host.as_str(), address.port))
            .map_err(TransportError::Bind)?;
        listener
            .set_nonblocking(true)
            .map_err(TransportError::Bind)?;
        Ok(Self {
            id,
            listener,
            max_message_size,
            handler,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    /// Starts the receive loop on a dedicated thread.
    ///
    /// # Errors
    /// Fails if the thread or its runtime cannot be created.
    pub fn spawn(self) -> Result<ClientHandle, TransportError> {
        let local_addr = self.local_addr()?;
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let id = self.id;
        let thread = thread::Builder::new()
            .name(format!("transport-{}", id))
            .spawn(move || runtime.block_on(self.run(shutdown_rx)))
            .map_err(TransportError::Runtime)?;
        info!("node {} listening on {}", id, local_addr);
        Ok(ClientHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    async fn run(self, mut shutdown: oneshot::Receiver<()>) -> Result<(), TransportError> {
        let Self {
            listener,
            max_message_size,
            mut handler,
            ..
        } = self;
        let listener = TcpListener::from_std(listener).map_err(TransportError::Bind)?;
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut connections: HashMap<ConnectionId, Connection> = HashMap::new();
        let mut next_id: ConnectionId = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, address)) => {
                        let id = next_id;
                        next_id += 1;
                        debug!("accepted connection {} from {}", id, address);
                        let reader = tokio::spawn(read_frames(
                            id,
                            stream,
                            max_message_size,
                            events_tx.clone(),
                        ));
                        connections.insert(id, Connection { address, reader });
                    }
                    Err(err) => warn!("failed to accept a connection: {}", err),
                },
                Some(event) = events.recv() => match event {
                    Event::Frame(id, payload) => {
                        trace!("received {} bytes on connection {}", payload.len(), id);
                        handler.receive_message(payload);
                    }
                    Event::Closed(id) => {
                        if let Some(connection) = connections.remove(&id) {
                            debug!("connection {} from {} closed", id, connection.address);
                        }
                    }
                },
            }
        }

        debug!("shutting down {} connections", connections.len());
        for (_, connection) in connections.drain() {
            connection.reader.abort();
        }
        Ok(())
    }
}

/// Reads the frames of a connection until it is closed, or until it sends an invalid frame.
async fn read_frames(
    id: ConnectionId,
    mut stream: TcpStream,
    max_message_size: usize,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut frames = FrameBuffer::new(max_message_size);
    loop {
        match stream.read_buf(frames.buffer_mut()).await {
            Ok(0) => {
                if frames.has_partial_frame() {
                    debug!("connection {} closed in the middle of a frame", id);
                }
                break;
            }
            Ok(_) => {
                if !forward_frames(id, &mut frames, &events) {
                    break;
                }
            }
            Err(err) => {
                debug!("failed to read from connection {}: {}", id, err);
                break;
            }
        }
    }
    let _ = events.send(Event::Closed(id));
}

/// Forwards the complete frames buffered so far. Returns `false` if the connection must be
/// dropped.
fn forward_frames(
    id: ConnectionId,
    frames: &mut FrameBuffer,
    events: &mpsc::UnboundedSender<Event>,
) -> bool {
    loop {
        match frames.next_frame() {
            Ok(Some(payload)) => {
                if events.send(Event::Frame(id, payload)).is_err() {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(err) => {
                warn!("dropping connection {}: {}", id, err);
                return false;
            }
        }
    }
}

/// A handle to a running [`TcpClient`].
///
/// Dropping the handle stops the client and waits for its thread.
pub struct ClientHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<Result<(), TransportError>>>,
}

impl ClientHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops the receive loop, closes all the connections and waits for the transport thread.
    pub fn shutdown(mut self) -> Result<(), TransportError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), TransportError> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| TransportError::Panicked)?,
            None => Ok(()),
        }
    }
}

impl Drop for ClientHandle {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("transport stopped with an error: {}", err);
        }
    }
}

/// Sends length-delimited payloads to the peers of the address table.
///
/// Connections are opened on first use and kept open. A connection the peer is known to have
/// closed is replaced before sending, and a failed write reconnects once before giving up.
///
/// Delivery is at most once: a payload written to a connection whose peer went away without the
/// close being observed yet is lost without an error.
pub struct PeerSender {
    peers: AddressTable,
    connections: HashMap<PeerId, TcpStream>,
    max_message_size: usize,
}

impl PeerSender {
    pub fn new(peers: AddressTable, max_message_size: usize) -> Self {
        Self {
            peers,
            connections: HashMap::new(),
            max_message_size,
        }
    }

    /// Sends a payload to a peer.
    ///
    /// # Errors
    /// Fails if the payload is too large, if the peer is unknown, or if it cannot be reached.
    pub async fn send(&mut self, peer: PeerId, payload: &[u8]) -> Result<(), TransportError> {
        let frame = encode_frame(payload, self.max_message_size)?;
        if self.connections.get(&peer).map_or(false, is_closed) {
            debug!("connection to peer {} was closed by the peer, reconnecting", peer);
            self.connections.remove(&peer);
        }
        if let Some(stream) = self.connections.get_mut(&peer) {
            match stream.write_all(&frame).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!("connection to peer {} lost, reconnecting: {}", peer, err);
                    self.connections.remove(&peer);
                }
            }
        }
        let mut stream = self.connect(peer).await?;
        stream.write_all(&frame).await?;
        self.connections.insert(peer, stream);
        Ok(())
    }

    /// Closes the connection to a peer, if any.
    pub fn disconnect(&mut self, peer: PeerId) -> bool {
        self.connections.remove(&peer).is_some()
    }

    async fn connect(&self, peer: PeerId) -> Result<TcpStream, TransportError> {
        let address = self
            .peers
            .get(peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let stream = TcpStream::connect((address.host.as_str(), address.port)).await?;
        stream.set_nodelay(true)?;
        debug!("connected to peer {} at {}", peer, address);
        Ok(stream)
    }
}

/// Whether the peer of an outgoing connection has closed it, as far as the runtime has observed.
fn is_closed(stream: &TcpStream) -> bool {
    let mut buf = [0; 1];
    match stream.try_read(&mut buf) {
        Ok(0) => true,
        // peers never write on connections they accepted
        Ok(_) => false,
        Err(err) => err.kind() != io::ErrorKind::WouldBlock,
    }
}
