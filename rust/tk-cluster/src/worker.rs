//! Cluster worker: keeps one player registered with the aggregator, runs
//! searches on command and reports its root totals.
//!
//! The session thread connects, registers and then acts as the reporter:
//! every `report_interval` it sends `AcceptResults` while a search is active,
//! and a heartbeat otherwise. Commands from the aggregator are executed on
//! the connection's reader thread. Searches themselves never touch the
//! network.

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tk_core::Config;
use tk_runtime::Player;
use tracing::{debug, info, warn};

use crate::directory::ServiceDirectory;
use crate::link::{LinkHandler, RpcLink};
use crate::protocol::{Message, WorkerCommand, WorkerId};
use crate::{expect_ok, ClusterError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Registered,
    Searching,
    /// Shut down, or the aggregator could not be reached in time.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Sent with `AddWorker`.
    pub name: String,
    /// Directory name of the aggregator.
    pub controller: String,
    pub connect_timeout: Duration,
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,
    pub heartbeat: Duration,
    pub report_interval: Duration,
    pub rpc_timeout: Duration,
}

impl WorkerOptions {
    pub fn from_config(cfg: &Config, name: &str) -> Self {
        let c = &cfg.cluster;
        Self {
            name: name.to_string(),
            controller: cfg.controller_name(),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            retry_interval: Duration::from_millis(c.retry_interval_ms),
            max_retry_interval: Duration::from_millis(c.max_retry_interval_ms),
            heartbeat: Duration::from_millis(c.heartbeat_ms),
            report_interval: Duration::from_millis(c.report_interval_ms),
            rpc_timeout: Duration::from_millis(c.connect_timeout_ms),
        }
    }
}

/// Resolve `name` and connect, retrying with exponential backoff from
/// `retry_interval` up to `max_retry_interval`. `None` once `timeout` has
/// passed without a connection.
pub fn try_to_connect(
    directory: &dyn ServiceDirectory,
    name: &str,
    timeout: Duration,
    retry_interval: Duration,
    max_retry_interval: Duration,
) -> Option<TcpStream> {
    connect_until(
        directory,
        name,
        timeout,
        retry_interval,
        max_retry_interval,
        &AtomicBool::new(false),
    )
}

fn connect_until(
    directory: &dyn ServiceDirectory,
    name: &str,
    timeout: Duration,
    retry_interval: Duration,
    max_retry_interval: Duration,
    stop: &AtomicBool,
) -> Option<TcpStream> {
    let deadline = Instant::now() + timeout;
    let mut delay = retry_interval.max(Duration::from_millis(1));
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let left = deadline.saturating_duration_since(Instant::now());
        match directory.lookup(name) {
            Ok(addr) => {
                match TcpStream::connect_timeout(&addr, left.max(Duration::from_millis(1))) {
                    Ok(stream) => {
                        debug!(name, %addr, attempts, "connected");
                        return Some(stream);
                    }
                    Err(e) => debug!(name, %addr, error = %e, "connect failed"),
                }
            }
            Err(e) => debug!(name, error = %e, "lookup failed"),
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() || stop.load(Ordering::Acquire) {
            debug!(name, attempts, "giving up");
            return None;
        }
        thread::sleep(delay.min(left));
        delay = (delay * 2).min(max_retry_interval.max(delay));
    }
}

fn visible_state(connection: WorkerState, search_active: bool) -> WorkerState {
    match connection {
        WorkerState::Registered if search_active => WorkerState::Searching,
        s => s,
    }
}

struct WorkerShared {
    opts: WorkerOptions,
    directory: Arc<dyn ServiceDirectory>,
    player: Mutex<Box<dyn Player>>,
    /// Connection state; `Searching` is derived from `search_active`.
    state: Mutex<WorkerState>,
    changed: Condvar,
    /// 0 while unregistered.
    worker_id: AtomicU64,
    search_id: AtomicU64,
    /// A search was started and its final report is not delivered yet.
    search_active: AtomicBool,
    shutdown: AtomicBool,
}

impl WorkerShared {
    fn connection_state(&self) -> WorkerState {
        *self.state.lock().unwrap()
    }

    fn state(&self) -> WorkerState {
        visible_state(
            self.connection_state(),
            self.search_active.load(Ordering::Acquire),
        )
    }

    fn set_state(&self, s: WorkerState) {
        *self.state.lock().unwrap() = s;
        self.changed.notify_all();
    }

    fn set_search_active(&self, active: bool) {
        // Under the state lock so waiters cannot miss the change.
        let _g = self.state.lock().unwrap();
        self.search_active.store(active, Ordering::Release);
        self.changed.notify_all();
    }

    /// Sleep up to `d`, waking early on shutdown.
    fn pause(&self, d: Duration) {
        let g = self.state.lock().unwrap();
        let _ = self
            .changed
            .wait_timeout_while(g, d, |_| !self.shutdown.load(Ordering::Acquire))
            .unwrap();
    }

    fn execute(&self, cmd: WorkerCommand) -> Result<String, ClusterError> {
        let mut player = self.player.lock().unwrap();
        match cmd {
            WorkerCommand::Reset => {
                player.reset()?;
                self.set_search_active(false);
                Ok(String::new())
            }
            WorkerCommand::BeginSearch { search_id, budget } => {
                player.begin_search(budget)?;
                self.search_id.store(search_id, Ordering::Release);
                self.set_search_active(true);
                debug!(search_id, ?budget, "search started");
                Ok(String::new())
            }
            WorkerCommand::AcceptMove { turn, mv } => {
                let actual = player.board().turn();
                if actual != turn as usize {
                    return Err(ClusterError::OutOfSync {
                        expected: turn,
                        actual,
                    });
                }
                player.accept_move(mv)?;
                self.set_search_active(false);
                Ok(String::new())
            }
            WorkerCommand::SetKomi(komi) => {
                player.set_komi(komi)?;
                Ok(String::new())
            }
            WorkerCommand::SetProperty { key, value } => {
                player.set_property(&key, &value)?;
                Ok(String::new())
            }
            WorkerCommand::GetPlayer => Ok(player.name().to_string()),
            // The reporter sends the final report on its next tick.
            WorkerCommand::StopSearch => {
                player.stop_search();
                Ok(String::new())
            }
            WorkerCommand::ApplyTotals { runs, wins } => {
                Ok(player.apply_totals(&runs, &wins)?.to_string())
            }
        }
    }
}

struct CommandHandler {
    shared: Arc<WorkerShared>,
}

impl LinkHandler for CommandHandler {
    fn on_request(&mut self, _link: &Arc<RpcLink>, msg: Message) -> Option<Message> {
        let cmd = match msg {
            Message::Command(cmd) => cmd,
            other => {
                return Some(Message::error(format!(
                    "unexpected {:?} request",
                    other.kind()
                )))
            }
        };
        Some(match self.shared.execute(cmd) {
            Ok(detail) => Message::ok(detail),
            Err(e) => {
                debug!(error = %e, "command failed");
                Message::error(e.to_string())
            }
        })
    }

    fn on_close(&mut self, _link: &Arc<RpcLink>) {
        self.shared.changed.notify_all();
    }
}

pub struct ClusterWorker {
    shared: Arc<WorkerShared>,
    session: Option<JoinHandle<()>>,
}

impl ClusterWorker {
    /// Spawn the session thread; it connects in the background.
    pub fn start(
        player: Box<dyn Player>,
        directory: Arc<dyn ServiceDirectory>,
        opts: WorkerOptions,
    ) -> Result<Self, ClusterError> {
        let shared = Arc::new(WorkerShared {
            opts,
            directory,
            player: Mutex::new(player),
            state: Mutex::new(WorkerState::Disconnected),
            changed: Condvar::new(),
            worker_id: AtomicU64::new(0),
            search_id: AtomicU64::new(0),
            search_active: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        let session = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("tk-worker-{}", shared.opts.name))
                .spawn(move || session_main(shared))?
        };
        Ok(Self {
            shared,
            session: Some(session),
        })
    }

    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    /// Block until the worker reaches `want`.
    pub fn wait_for_state(&self, want: WorkerState, timeout: Duration) -> bool {
        let active = &self.shared.search_active;
        let g = self.shared.state.lock().unwrap();
        let (g, _) = self
            .shared
            .changed
            .wait_timeout_while(g, timeout, |s| {
                visible_state(*s, active.load(Ordering::Acquire)) != want
            })
            .unwrap();
        visible_state(*g, active.load(Ordering::Acquire)) == want
    }

    pub fn worker_id(&self) -> Option<WorkerId> {
        match self.shared.worker_id.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Run `f` with the player locked.
    pub fn with_player<R>(&self, f: impl FnOnce(&mut dyn Player) -> R) -> R {
        let mut p = self.shared.player.lock().unwrap();
        f(p.as_mut())
    }

    /// Leave the cluster (`RemoveWorker`) and stop the session thread.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _g = self.shared.state.lock().unwrap();
            self.shared.changed.notify_all();
        }
        if let Some(h) = self.session.take() {
            let _ = h.join();
        }
        self.shared.player.lock().unwrap().stop_search();
    }
}

impl Drop for ClusterWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn session_main(shared: Arc<WorkerShared>) {
    let opts = shared.opts.clone();
    while !shared.shutdown.load(Ordering::Acquire) {
        shared.set_state(WorkerState::Connecting);
        let Some(stream) = connect_until(
            shared.directory.as_ref(),
            &opts.controller,
            opts.connect_timeout,
            opts.retry_interval,
            opts.max_retry_interval,
            &shared.shutdown,
        ) else {
            if !shared.shutdown.load(Ordering::Acquire) {
                warn!(
                    controller = %opts.controller,
                    timeout_ms = opts.connect_timeout.as_millis() as u64,
                    "aggregator unreachable; worker stopped"
                );
            }
            break;
        };
        match run_session(&shared, stream) {
            Ok(()) => break,
            Err(e) => {
                warn!(error = %e, "lost aggregator; reconnecting");
                shared.set_state(WorkerState::Disconnected);
            }
        }
    }
    shared.set_state(WorkerState::Stopped);
}

/// Register and report until shutdown (`Ok`) or a link failure (`Err`).
fn run_session(shared: &Arc<WorkerShared>, stream: TcpStream) -> Result<(), ClusterError> {
    let handler = CommandHandler {
        shared: Arc::clone(shared),
    };
    let (link, reader) = RpcLink::start(stream, handler)?;
    let result = report_loop(shared, &link);
    link.close();
    let _ = reader.join();
    shared.worker_id.store(0, Ordering::Release);
    result
}

fn report_loop(shared: &WorkerShared, link: &RpcLink) -> Result<(), ClusterError> {
    let opts = &shared.opts;
    let player = shared.player.lock().unwrap().name().to_string();
    let worker_id = match link.call(
        Message::AddWorker {
            name: opts.name.clone(),
            player,
        },
        opts.rpc_timeout,
    )? {
        Message::Registered { worker_id } => worker_id,
        Message::Reply { detail, .. } => return Err(ClusterError::Remote(detail)),
        _ => return Err(ClusterError::UnexpectedReply("AddWorker")),
    };
    shared.worker_id.store(worker_id, Ordering::Release);
    shared.set_state(WorkerState::Registered);
    info!(worker_id, peer = %link.peer(), "registered with aggregator");

    let mut last_sent = Instant::now();
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            if let Err(e) = link.call(Message::RemoveWorker { worker_id }, opts.rpc_timeout) {
                debug!(error = %e, "RemoveWorker not acknowledged");
            }
            info!(worker_id, "left aggregator");
            return Ok(());
        }
        if link.is_closed() {
            return Err(ClusterError::Disconnected);
        }

        if shared.search_active.load(Ordering::Acquire) {
            let (search_id, complete, runs, wins) = {
                let mut p = shared.player.lock().unwrap();
                p.poll_search();
                let (runs, wins) = p.root_totals();
                (
                    shared.search_id.load(Ordering::Acquire),
                    !p.is_searching(),
                    runs,
                    wins,
                )
            };
            let reply = link.call(
                Message::AcceptResults {
                    worker_id,
                    search_id,
                    complete,
                    runs,
                    wins,
                },
                opts.rpc_timeout,
            )?;
            expect_ok(reply, "AcceptResults")?;
            last_sent = Instant::now();
            if complete && shared.search_id.load(Ordering::Acquire) == search_id {
                shared.set_search_active(false);
                debug!(search_id, "final report delivered");
            }
        } else if last_sent.elapsed() >= opts.heartbeat {
            expect_ok(
                link.call(Message::Heartbeat { worker_id }, opts.rpc_timeout)?,
                "Heartbeat",
            )?;
            last_sent = Instant::now();
        }
        shared.pause(opts.report_interval);
    }
}
