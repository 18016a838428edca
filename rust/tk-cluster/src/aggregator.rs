//! Aggregator: accepts worker connections, keeps one record per live worker
//! and merges their reports.
//!
//! Threads: one acceptor, one reader per connection (answers `AddWorker`,
//! `AcceptResults`, `RemoveWorker`, `Heartbeat`), one reaper evicting silent
//! workers. Commands to workers are issued from the caller's thread.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tk_core::{Config, Move};
use tk_logging::{
    hash_config_bytes, now_ms, NdjsonWriter, SearchRoundEventV1, VersionInfoV1, WorkerEventV1,
};
use tk_runtime::SearchBudget;
use tracing::{debug, info, warn};

use crate::link::{LinkHandler, RpcLink, Ticket};
use crate::protocol::{Message, WorkerCommand, WorkerId, PROTOCOL_VERSION};
use crate::registry::{best_move, Accepted, WorkerRecord, WorkerRegistry};
use crate::{expect_ok, ClusterError};

const ACCEPT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub bind: String,
    /// Reaper period.
    pub heartbeat: Duration,
    /// Workers silent for longer than this are dropped.
    pub eviction: Duration,
    pub rpc_timeout: Duration,
    pub event_log: Option<PathBuf>,
    pub config_hash: Option<String>,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl AggregatorOptions {
    pub fn from_config(cfg: &Config) -> Self {
        let c = &cfg.cluster;
        Self {
            bind: c.bind.clone(),
            heartbeat: Duration::from_millis(c.heartbeat_ms),
            eviction: Duration::from_millis(c.eviction_ms),
            rpc_timeout: Duration::from_millis(c.connect_timeout_ms),
            event_log: c.event_log.clone(),
            config_hash: cfg.to_yaml().ok().map(|y| hash_config_bytes(y.as_bytes())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    WorkerJoined {
        worker_id: WorkerId,
        name: String,
        player: String,
    },
    /// Explicit `RemoveWorker`.
    WorkerLeft { worker_id: WorkerId },
    /// Connection ended without `RemoveWorker`.
    WorkerCrashed { worker_id: WorkerId },
    /// Silent for longer than the eviction timeout.
    WorkerEvicted { worker_id: WorkerId },
    ResultsAccepted {
        worker_id: WorkerId,
        search_id: u64,
        complete: bool,
    },
}

#[derive(Debug, Clone)]
pub struct SearchRound {
    pub search_id: u64,
    /// Workers that accepted `BeginSearch`.
    pub workers: usize,
    /// Of those, how many delivered their final report in time.
    pub reported: usize,
    pub runs: Vec<u32>,
    pub wins: Vec<u32>,
    pub best: Option<Move>,
    pub elapsed: Duration,
}

struct Shared {
    opts: AggregatorOptions,
    registry: Mutex<WorkerRegistry>,
    /// Signalled on every registry change.
    changed: Condvar,
    links: Mutex<HashMap<WorkerId, Arc<RpcLink>>>,
    /// Every accepted connection, registered or not, with its reader.
    connections: Mutex<Vec<(Arc<RpcLink>, JoinHandle<()>)>>,
    next_worker_id: AtomicU64,
    next_search_id: AtomicU64,
    events: Mutex<mpsc::Sender<ClusterEvent>>,
    log: Option<Mutex<NdjsonWriter>>,
    shutdown: AtomicBool,
}

impl Shared {
    fn emit(&self, ev: ClusterEvent) {
        let _ = self.events.lock().unwrap().send(ev);
    }

    fn log_worker(&self, event: &str, rec: &WorkerRecord, live_workers: usize) {
        let Some(log) = &self.log else {
            return;
        };
        let ev = WorkerEventV1 {
            event: event.to_string(),
            ts_ms: now_ms(),
            v: VersionInfoV1::new(PROTOCOL_VERSION),
            worker_id: rec.worker_id,
            name: rec.name.clone(),
            player: rec.player.clone(),
            live_workers: live_workers as u64,
        };
        if let Err(e) = log.lock().unwrap().write_event(&ev) {
            warn!(error = %e, "event log write failed");
        }
    }

    /// Drop a worker's record and forget its link, closing it unless the
    /// worker still waits for a reply on it. Returns the record if it was live.
    fn drop_worker(&self, worker_id: WorkerId, event: &str, close: bool) -> Option<WorkerRecord> {
        let (rec, live) = {
            let mut reg = self.registry.lock().unwrap();
            let rec = reg.remove(worker_id);
            (rec, reg.len())
        };
        self.changed.notify_all();
        let link = self.links.lock().unwrap().remove(&worker_id);
        if let (Some(link), true) = (link, close) {
            link.close();
        }
        if let Some(rec) = &rec {
            self.log_worker(event, rec, live);
        }
        rec
    }
}

pub struct Aggregator {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    events: Mutex<mpsc::Receiver<ClusterEvent>>,
    acceptor: Option<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
}

impl Aggregator {
    /// Bind `opts.bind` (port 0 picks a free port) and start serving.
    pub fn bind(opts: AggregatorOptions) -> Result<Self, ClusterError> {
        let listener = TcpListener::bind(opts.bind.as_str())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let log = match &opts.event_log {
            Some(path) => Some(Mutex::new(NdjsonWriter::open_append_with_flush(path, 1)?)),
            None => None,
        };
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            opts,
            registry: Mutex::new(WorkerRegistry::new()),
            changed: Condvar::new(),
            links: Mutex::new(HashMap::new()),
            connections: Mutex::new(Vec::new()),
            next_worker_id: AtomicU64::new(1),
            next_search_id: AtomicU64::new(1),
            events: Mutex::new(tx),
            log,
            shutdown: AtomicBool::new(false),
        });

        let acceptor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("tk-aggregator-accept".to_string())
                .spawn(move || accept_loop(listener, shared))?
        };
        let reaper = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("tk-aggregator-reaper".to_string())
                .spawn(move || reap_loop(shared))?
        };
        info!(addr = %local_addr, "aggregator listening");
        Ok(Self {
            local_addr,
            shared,
            events: Mutex::new(rx),
            acceptor: Some(acceptor),
            reaper: Some(reaper),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn worker_count(&self) -> usize {
        self.shared.registry.lock().unwrap().len()
    }

    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.shared.registry.lock().unwrap().ids()
    }

    pub fn record(&self, worker_id: WorkerId) -> Option<WorkerRecord> {
        self.shared.registry.lock().unwrap().get(worker_id).cloned()
    }

    /// Block until at least `n` workers are registered.
    pub fn wait_for_workers(&self, n: usize, timeout: Duration) -> bool {
        let reg = self.shared.registry.lock().unwrap();
        let (reg, _) = self
            .shared
            .changed
            .wait_timeout_while(reg, timeout, |r| r.len() < n)
            .unwrap();
        reg.len() >= n
    }

    /// Sum of the latest report of every live worker (optionally only those
    /// for `search_id`).
    pub fn merged_totals(&self, search_id: Option<u64>) -> Option<(Vec<u32>, Vec<u32>)> {
        self.shared.registry.lock().unwrap().merged_totals(search_id)
    }

    pub fn best_move(&self, search_id: Option<u64>) -> Option<Move> {
        let (runs, wins) = self.merged_totals(search_id)?;
        best_move(&runs, &wins)
    }

    /// Next event, waiting up to `timeout`.
    pub fn next_event(&self, timeout: Duration) -> Option<ClusterEvent> {
        self.events.lock().unwrap().recv_timeout(timeout).ok()
    }

    /// Send one command to one worker and wait for its reply detail.
    pub fn call(&self, worker_id: WorkerId, cmd: WorkerCommand) -> Result<String, ClusterError> {
        let link = self
            .shared
            .links
            .lock()
            .unwrap()
            .get(&worker_id)
            .cloned()
            .ok_or(ClusterError::UnknownWorker(worker_id))?;
        expect_ok(
            link.call(Message::Command(cmd), self.shared.opts.rpc_timeout)?,
            "worker command",
        )
    }

    /// Send `cmd` to every live worker, then collect the replies.
    pub fn broadcast(&self, cmd: &WorkerCommand) -> Vec<(WorkerId, Result<String, ClusterError>)> {
        let links: Vec<(WorkerId, Arc<RpcLink>)> = self
            .shared
            .links
            .lock()
            .unwrap()
            .iter()
            .map(|(&id, link)| (id, Arc::clone(link)))
            .collect();
        let tickets: Vec<(WorkerId, Result<Ticket, ClusterError>)> = links
            .iter()
            .map(|(id, link)| (*id, link.submit(Message::Command(cmd.clone()))))
            .collect();
        let deadline = Instant::now() + self.shared.opts.rpc_timeout;
        tickets
            .into_iter()
            .map(|(id, ticket)| {
                let r = ticket.and_then(|t| {
                    let left = deadline.saturating_duration_since(Instant::now());
                    expect_ok(t.recv_timeout(left)?, "worker command")
                });
                (id, r)
            })
            .collect()
    }

    /// Start a search on every worker, wait up to `wait` for their final
    /// reports, merge them and, if `apply`, push the merged totals back.
    pub fn run_search_round(
        &self,
        budget: SearchBudget,
        wait: Duration,
        apply: bool,
    ) -> Result<SearchRound, ClusterError> {
        let started_at = Instant::now();
        let search_id = self.shared.next_search_id.fetch_add(1, Ordering::Relaxed);
        let mut started = Vec::new();
        for (id, r) in self.broadcast(&WorkerCommand::BeginSearch { search_id, budget }) {
            match r {
                Ok(_) => started.push(id),
                Err(e) => warn!(worker_id = id, error = %e, "worker did not start search"),
            }
        }
        if started.is_empty() {
            return Err(ClusterError::NoWorkers);
        }
        debug!(search_id, workers = started.len(), "search round started");

        let deadline = started_at + wait;
        let (merged, reported) = {
            let mut reg = self.shared.registry.lock().unwrap();
            loop {
                let done = round_done(&reg, search_id, &started);
                let left = deadline.saturating_duration_since(Instant::now());
                if done || left.is_zero() {
                    break;
                }
                reg = self.shared.changed.wait_timeout(reg, left).unwrap().0;
            }
            let reported = reg.reported(search_id).filter(|&(_, c)| c).count();
            (reg.merged_totals(Some(search_id)), reported)
        };
        let (runs, wins) = merged.unwrap_or_default();
        let best = best_move(&runs, &wins);

        if apply && !runs.is_empty() {
            let cmd = WorkerCommand::ApplyTotals {
                runs: runs.clone(),
                wins: wins.clone(),
            };
            for (id, r) in self.broadcast(&cmd) {
                if let Err(e) = r {
                    warn!(worker_id = id, error = %e, "worker rejected merged totals");
                }
            }
        }

        let round = SearchRound {
            search_id,
            workers: started.len(),
            reported,
            runs,
            wins,
            best,
            elapsed: started_at.elapsed(),
        };
        self.log_round(&round);
        info!(
            search_id,
            workers = round.workers,
            reported = round.reported,
            best = ?round.best,
            elapsed_ms = round.elapsed.as_millis() as u64,
            "search round finished"
        );
        Ok(round)
    }

    fn log_round(&self, round: &SearchRound) {
        let Some(log) = &self.shared.log else {
            return;
        };
        let area = round.runs.len().saturating_sub(1);
        let size = (area as f64).sqrt().round() as usize;
        let ev = SearchRoundEventV1 {
            event: "search_round".to_string(),
            ts_ms: now_ms(),
            v: VersionInfoV1::new(PROTOCOL_VERSION),
            config_hash: self.shared.opts.config_hash.clone(),
            search_id: round.search_id,
            workers: round.workers as u64,
            reported: round.reported as u64,
            total_runs: round.runs.iter().map(|&r| r as u64).sum(),
            best_move: round.best.map(|mv| mv.to_gtp(size)),
            elapsed_ms: round.elapsed.as_millis() as u64,
        };
        if let Err(e) = log.lock().unwrap().write_event(&ev) {
            warn!(error = %e, "event log write failed");
        }
    }

    /// Close every connection and stop the background threads.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(h) = self.acceptor.take() {
            let _ = h.join();
        }
        if let Some(h) = self.reaper.take() {
            let _ = h.join();
        }
        let connections: Vec<(Arc<RpcLink>, JoinHandle<()>)> =
            self.shared.connections.lock().unwrap().drain(..).collect();
        for (link, _) in &connections {
            link.close();
        }
        for (_, reader) in connections {
            let _ = reader.join();
        }
        self.shared.links.lock().unwrap().clear();
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn round_done(reg: &WorkerRegistry, search_id: u64, started: &[WorkerId]) -> bool {
    started.iter().all(|&id| match reg.get(id) {
        Some(rec) => rec.search_id == search_id && rec.complete,
        // Gone workers no longer count.
        None => true,
    })
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    warn!(%peer, error = %e, "could not configure connection");
                    continue;
                }
                let handler = ConnectionHandler {
                    shared: Arc::clone(&shared),
                    worker: None,
                };
                match RpcLink::start(stream, handler) {
                    Ok((link, reader)) => {
                        debug!(%peer, "worker connected");
                        let mut conns = shared.connections.lock().unwrap();
                        conns.retain(|(_, h)| !h.is_finished());
                        conns.push((link, reader));
                    }
                    Err(e) => warn!(%peer, error = %e, "could not start connection"),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

fn reap_loop(shared: Arc<Shared>) {
    let tick = (shared.opts.heartbeat / 2).clamp(Duration::from_millis(1), ACCEPT_POLL * 5);
    let mut last = Instant::now();
    while !shared.shutdown.load(Ordering::Acquire) {
        thread::sleep(tick);
        if last.elapsed() < shared.opts.heartbeat {
            continue;
        }
        last = Instant::now();
        let evicted = shared
            .registry
            .lock()
            .unwrap()
            .evict_stale(Instant::now(), shared.opts.eviction);
        for rec in evicted {
            warn!(worker_id = rec.worker_id, name = %rec.name, "worker evicted after silence");
            if let Some(link) = shared.links.lock().unwrap().remove(&rec.worker_id) {
                link.close();
            }
            let live = shared.registry.lock().unwrap().len();
            shared.log_worker("worker_evicted", &rec, live);
            shared.emit(ClusterEvent::WorkerEvicted {
                worker_id: rec.worker_id,
            });
            shared.changed.notify_all();
        }
    }
}

/// Per-connection request handler; knows which worker registered on it.
struct ConnectionHandler {
    shared: Arc<Shared>,
    worker: Option<WorkerId>,
}

impl ConnectionHandler {
    fn owns(&self, worker_id: WorkerId) -> bool {
        self.worker == Some(worker_id)
    }
}

impl LinkHandler for ConnectionHandler {
    fn on_request(&mut self, link: &Arc<RpcLink>, msg: Message) -> Option<Message> {
        let shared = &self.shared;
        let reply = match msg {
            Message::AddWorker { name, player } => {
                if let Some(id) = self.worker {
                    return Some(Message::error(format!("already registered as worker {id}")));
                }
                let worker_id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
                shared
                    .links
                    .lock()
                    .unwrap()
                    .insert(worker_id, Arc::clone(link));
                let (rec, live) = {
                    let mut reg = shared.registry.lock().unwrap();
                    reg.add(worker_id, &name, &player, Instant::now());
                    (reg.get(worker_id).cloned(), reg.len())
                };
                shared.changed.notify_all();
                self.worker = Some(worker_id);
                if let Some(rec) = &rec {
                    shared.log_worker("worker_joined", rec, live);
                }
                info!(worker_id, %name, %player, peer = %link.peer(), "worker registered");
                shared.emit(ClusterEvent::WorkerJoined {
                    worker_id,
                    name,
                    player,
                });
                Message::Registered { worker_id }
            }
            Message::AcceptResults {
                worker_id,
                search_id,
                complete,
                runs,
                wins,
            } => {
                if !self.owns(worker_id) {
                    return Some(Message::error(format!(
                        "worker {worker_id} is not registered on this connection"
                    )));
                }
                let accepted = shared.registry.lock().unwrap().accept(
                    worker_id,
                    search_id,
                    complete,
                    runs,
                    wins,
                    Instant::now(),
                );
                shared.changed.notify_all();
                match accepted {
                    Accepted::Stored => {
                        shared.emit(ClusterEvent::ResultsAccepted {
                            worker_id,
                            search_id,
                            complete,
                        });
                        Message::ok("stored")
                    }
                    Accepted::Stale => Message::ok("stale"),
                    Accepted::UnknownWorker => {
                        Message::error(format!("unknown worker {worker_id}"))
                    }
                }
            }
            Message::RemoveWorker { worker_id } => {
                if !self.owns(worker_id) {
                    return Some(Message::error(format!(
                        "worker {worker_id} is not registered on this connection"
                    )));
                }
                self.worker = None;
                shared.drop_worker(worker_id, "worker_left", false);
                info!(worker_id, "worker left");
                shared.emit(ClusterEvent::WorkerLeft { worker_id });
                Message::ok("")
            }
            Message::Heartbeat { worker_id } => {
                let known = self.owns(worker_id)
                    && shared
                        .registry
                        .lock()
                        .unwrap()
                        .touch(worker_id, Instant::now());
                if known {
                    Message::ok("")
                } else {
                    Message::error(format!("unknown worker {worker_id}"))
                }
            }
            other => Message::error(format!("unexpected {:?} request", other.kind())),
        };
        Some(reply)
    }

    fn on_close(&mut self, _link: &Arc<RpcLink>) {
        let Some(worker_id) = self.worker.take() else {
            return;
        };
        if self.shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        if self
            .shared
            .drop_worker(worker_id, "worker_crashed", true)
            .is_some()
        {
            warn!(worker_id, "worker connection lost");
            self.shared
                .emit(ClusterEvent::WorkerCrashed { worker_id });
        }
    }
}
