//! One framed TCP connection carrying requests in both directions.
//!
//! Outgoing requests get a fresh request id and a [`Ticket`]; the reader
//! thread routes responses to tickets by id and hands incoming requests to a
//! [`LinkHandler`], writing back whatever it returns.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::codec::{decode_envelope, encode_envelope};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Envelope, Message};
use crate::ClusterError;

pub trait LinkHandler: Send + 'static {
    /// Answer a request from the peer. `None` sends nothing back.
    fn on_request(&mut self, link: &Arc<RpcLink>, msg: Message) -> Option<Message>;

    /// Called once from the reader thread when the connection ends.
    fn on_close(&mut self, link: &Arc<RpcLink>);
}

#[derive(Debug)]
pub struct Ticket {
    pub request_id: u64,
    rx: mpsc::Receiver<Message>,
}

impl Ticket {
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, ClusterError> {
        match self.rx.recv_timeout(timeout) {
            Ok(m) => Ok(m),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ClusterError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ClusterError::Disconnected),
        }
    }
}

pub struct RpcLink {
    peer: SocketAddr,
    writer: Mutex<TcpStream>,
    pending: Mutex<HashMap<u64, mpsc::Sender<Message>>>,
    next_request_id: AtomicU64,
    closed: AtomicBool,
}

impl RpcLink {
    /// Take over `stream` and spawn its reader thread.
    pub fn start<H: LinkHandler>(
        stream: TcpStream,
        handler: H,
    ) -> Result<(Arc<Self>, JoinHandle<()>), ClusterError> {
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr()?;
        let reader = stream.try_clone()?;
        let link = Arc::new(Self {
            peer,
            writer: Mutex::new(stream),
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        let link_r = Arc::clone(&link);
        let handle = thread::Builder::new()
            .name(format!("tk-link-{peer}"))
            .spawn(move || reader_loop(link_r, reader, handler))?;
        Ok((link, handle))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send a request; the response arrives on the ticket.
    pub fn submit(&self, msg: Message) -> Result<Ticket, ClusterError> {
        if self.is_closed() {
            return Err(ClusterError::Disconnected);
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.pending.lock().unwrap().insert(request_id, tx);
        if let Err(e) = self.write(&Envelope { request_id, msg }) {
            self.pending.lock().unwrap().remove(&request_id);
            return Err(e);
        }
        Ok(Ticket { request_id, rx })
    }

    /// Send a request and wait for its response.
    pub fn call(&self, msg: Message, timeout: Duration) -> Result<Message, ClusterError> {
        let ticket = self.submit(msg)?;
        let r = ticket.recv_timeout(timeout);
        if r.is_err() {
            self.pending.lock().unwrap().remove(&ticket.request_id);
        }
        r
    }

    /// Shut the socket down; the reader thread sees EOF and exits.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.writer.lock().unwrap().shutdown(Shutdown::Both);
        }
    }

    fn write(&self, env: &Envelope) -> Result<(), ClusterError> {
        let payload = encode_envelope(env);
        let mut w = self.writer.lock().unwrap();
        if let Err(e) = write_frame(&mut *w, &payload) {
            drop(w);
            self.close();
            return Err(e.into());
        }
        Ok(())
    }

    fn fail_all_pending(&self) {
        // Dropping the senders wakes every ticket with `Disconnected`.
        self.pending.lock().unwrap().clear();
    }
}

impl Drop for RpcLink {
    fn drop(&mut self) {
        self.close();
    }
}

fn reader_loop<H: LinkHandler>(link: Arc<RpcLink>, mut stream: TcpStream, mut handler: H) {
    loop {
        let payload = match read_frame(&mut stream) {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!(peer = %link.peer, "peer closed connection");
                break;
            }
            Err(e) => {
                if !link.is_closed() {
                    warn!(peer = %link.peer, error = %e, "connection failed");
                }
                break;
            }
        };
        let env = match decode_envelope(&payload) {
            Ok(env) => env,
            Err(e) => {
                warn!(peer = %link.peer, error = %e, "undecodable frame; dropping connection");
                break;
            }
        };
        if env.msg.is_response() {
            let tx = link.pending.lock().unwrap().remove(&env.request_id);
            match tx {
                Some(tx) => {
                    let _ = tx.send(env.msg);
                }
                None => debug!(request_id = env.request_id, "response to unknown request"),
            }
            continue;
        }
        if let Some(reply) = handler.on_request(&link, env.msg) {
            let out = Envelope {
                request_id: env.request_id,
                msg: reply,
            };
            if link.write(&out).is_err() {
                break;
            }
        }
    }
    link.close();
    link.fail_all_pending();
    handler.on_close(&link);
}
