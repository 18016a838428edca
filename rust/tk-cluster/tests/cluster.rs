//! Aggregator and workers talking over loopback TCP.

use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tk_cluster::codec::{decode_envelope, encode_envelope};
use tk_cluster::frame::{read_frame, write_frame};
use tk_cluster::protocol::Envelope;
use tk_cluster::{
    best_move, Aggregator, AggregatorOptions, ClusterError, ClusterEvent, ClusterWorker, Message,
    StaticDirectory, WorkerCommand, WorkerOptions, WorkerState, SEARCH_CONTROLLER_NAME,
};
use tk_core::{Config, Move};
use tk_runtime::{PlayerRegistry, SearchBudget};

const WAIT: Duration = Duration::from_secs(10);

fn aggregator(eviction_ms: u64) -> Aggregator {
    Aggregator::bind(AggregatorOptions {
        bind: "127.0.0.1:0".to_string(),
        heartbeat: Duration::from_millis(20),
        eviction: Duration::from_millis(eviction_ms),
        rpc_timeout: Duration::from_secs(5),
        event_log: None,
        config_hash: None,
    })
    .unwrap()
}

fn directory(agg: &Aggregator) -> Arc<StaticDirectory> {
    Arc::new(StaticDirectory::new().with(SEARCH_CONTROLLER_NAME, agg.local_addr()))
}

fn worker_options(name: &str) -> WorkerOptions {
    WorkerOptions {
        name: name.to_string(),
        controller: SEARCH_CONTROLLER_NAME.to_string(),
        connect_timeout: Duration::from_secs(2),
        retry_interval: Duration::from_millis(20),
        max_retry_interval: Duration::from_millis(200),
        heartbeat: Duration::from_millis(50),
        report_interval: Duration::from_millis(10),
        rpc_timeout: Duration::from_secs(5),
    }
}

fn mcts_worker(agg: &Aggregator, name: &str, seed: u64) -> ClusterWorker {
    let mut cfg = Config::default();
    cfg.board.size = 5;
    cfg.board.komi = 0.5;
    cfg.search.threads = 2;
    cfg.search.seed = seed;
    cfg.search.arena_capacity = 4096;
    cfg.patterns.bits_per_table = 12;
    let player = PlayerRegistry::default().create("mcts", &cfg).unwrap();
    let w = ClusterWorker::start(player, directory(agg), worker_options(name)).unwrap();
    assert!(w.wait_for_state(WorkerState::Registered, WAIT));
    w
}

fn next_matching(agg: &Aggregator, f: impl Fn(&ClusterEvent) -> bool) -> ClusterEvent {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if let Some(ev) = agg.next_event(Duration::from_millis(100)) {
            if f(&ev) {
                return ev;
            }
        }
    }
    panic!("event not seen");
}

/// Register by hand over a raw socket, the way a worker process would.
fn raw_register(agg: &Aggregator, name: &str) -> (TcpStream, u64) {
    let mut sock = TcpStream::connect(agg.local_addr()).unwrap();
    let add = Envelope {
        request_id: 1,
        msg: Message::AddWorker {
            name: name.to_string(),
            player: "raw".to_string(),
        },
    };
    write_frame(&mut sock, &encode_envelope(&add)).unwrap();
    let reply = decode_envelope(&read_frame(&mut sock).unwrap().unwrap()).unwrap();
    assert_eq!(reply.request_id, 1);
    match reply.msg {
        Message::Registered { worker_id } => (sock, worker_id),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn search_round_merges_every_worker() {
    let agg = aggregator(5_000);
    let a = mcts_worker(&agg, "a", 1);
    let b = mcts_worker(&agg, "b", 2);
    assert!(agg.wait_for_workers(2, WAIT));

    let round = agg
        .run_search_round(SearchBudget::Playouts(200), WAIT, false)
        .unwrap();
    assert_eq!(round.workers, 2);
    assert_eq!(round.reported, 2);
    assert_eq!(round.runs.len(), 26);
    assert_eq!(round.runs.iter().sum::<u32>(), 400);
    assert!(round.wins.iter().zip(&round.runs).all(|(w, r)| w <= r));
    assert_eq!(round.best, best_move(&round.runs, &round.wins));
    assert!(round.best.is_some());

    assert!(a.wait_for_state(WorkerState::Registered, WAIT));
    assert!(b.wait_for_state(WorkerState::Registered, WAIT));
    assert_eq!(agg.merged_totals(Some(round.search_id)).unwrap().0, round.runs);
}

#[test]
fn merged_totals_are_pushed_back() {
    let agg = aggregator(5_000);
    let a = mcts_worker(&agg, "a", 3);
    let b = mcts_worker(&agg, "b", 4);
    assert!(agg.wait_for_workers(2, WAIT));

    agg.run_search_round(SearchBudget::Playouts(150), WAIT, false)
        .unwrap();
    let round = agg
        .run_search_round(SearchBudget::Playouts(50), WAIT, true)
        .unwrap();
    // Reports are cumulative at the root: 200 playouts per worker.
    assert_eq!(round.runs.iter().sum::<u32>(), 400);
    let most = round.runs.iter().copied().max().unwrap();

    for w in [&a, &b] {
        // The tree now follows the whole cluster...
        let best = w.with_player(|p| p.best_move()).unwrap();
        assert_eq!(round.runs[best.index(25)], most);
        // ...while the worker still reports only what it ran itself.
        let (runs, wins) = w.with_player(|p| p.root_totals());
        assert_eq!(runs.iter().sum::<u32>(), 200);
        for i in 0..runs.len() {
            assert!(runs[i] <= round.runs[i], "slot {i}");
            assert!(wins[i] <= runs[i]);
        }
    }
}

#[test]
fn rounds_after_a_push_count_each_playout_once() {
    let agg = aggregator(5_000);
    let _a = mcts_worker(&agg, "a", 11);
    let _b = mcts_worker(&agg, "b", 12);
    assert!(agg.wait_for_workers(2, WAIT));

    let mut executed = 0;
    for (playouts, apply) in [(150, true), (50, false), (50, true), (50, false)] {
        let round = agg
            .run_search_round(SearchBudget::Playouts(playouts), WAIT, apply)
            .unwrap();
        assert_eq!(round.reported, 2);
        executed += 2 * playouts as u32;
        assert_eq!(
            round.runs.iter().sum::<u32>(),
            executed,
            "round {} (apply {apply})",
            round.search_id
        );
        assert!(round.wins.iter().zip(&round.runs).all(|(w, r)| w <= r));
    }
    assert_eq!(executed, 600);
}

#[test]
fn worker_commands_reach_the_player() {
    let agg = aggregator(5_000);
    let w = mcts_worker(&agg, "cmd", 5);
    let id = w.worker_id().unwrap();
    assert!(agg.wait_for_workers(1, WAIT));

    assert_eq!(agg.call(id, WorkerCommand::GetPlayer).unwrap(), "mcts");
    agg.call(id, WorkerCommand::SetKomi(2.5)).unwrap();
    agg.call(
        id,
        WorkerCommand::SetProperty {
            key: "exploration".to_string(),
            value: "0.4".to_string(),
        },
    )
    .unwrap();
    agg.call(
        id,
        WorkerCommand::AcceptMove {
            turn: 0,
            mv: Move::Play(12),
        },
    )
    .unwrap();
    w.with_player(|p| {
        assert_eq!(p.board().turn(), 1);
        assert_eq!(p.board().komi(), 2.5);
    });

    let err = agg
        .call(
            id,
            WorkerCommand::SetProperty {
                key: "nonsense".to_string(),
                value: "1".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ClusterError::Remote(ref m) if m.contains("unknown property")));

    let err = agg
        .call(
            id,
            WorkerCommand::AcceptMove {
                turn: 0,
                mv: Move::Play(3),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ClusterError::Remote(ref m) if m.contains("turn")));

    let err = agg
        .call(
            id,
            WorkerCommand::AcceptMove {
                turn: 1,
                mv: Move::Play(12),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ClusterError::Remote(ref m) if m.contains("illegal")));

    agg.call(id, WorkerCommand::Reset).unwrap();
    w.with_player(|p| {
        assert_eq!(p.board().turn(), 0);
        assert_eq!(p.board().komi(), 2.5);
    });

    assert!(matches!(
        agg.call(id + 100, WorkerCommand::GetPlayer),
        Err(ClusterError::UnknownWorker(_))
    ));
}

#[test]
fn stopped_search_still_delivers_its_final_report() {
    let agg = aggregator(5_000);
    let w = mcts_worker(&agg, "stop", 6);
    let id = w.worker_id().unwrap();

    agg.call(
        id,
        WorkerCommand::BeginSearch {
            search_id: 77,
            budget: SearchBudget::Millis(60_000),
        },
    )
    .unwrap();
    assert_eq!(w.state(), WorkerState::Searching);
    std::thread::sleep(Duration::from_millis(100));
    agg.call(id, WorkerCommand::StopSearch).unwrap();

    next_matching(&agg, |ev| {
        matches!(ev, ClusterEvent::ResultsAccepted { search_id: 77, complete: true, .. })
    });
    assert!(w.wait_for_state(WorkerState::Registered, WAIT));
    let rec = agg.record(id).unwrap();
    assert!(rec.complete);
    assert!(rec.runs.iter().sum::<u32>() > 0);
}

#[test]
fn dropped_connection_is_a_crash() {
    let agg = aggregator(5_000);
    let (sock, id) = raw_register(&agg, "doomed");
    assert_eq!(agg.worker_count(), 1);
    next_matching(&agg, |ev| matches!(ev, ClusterEvent::WorkerJoined { .. }));

    drop(sock);
    let ev = next_matching(&agg, |ev| matches!(ev, ClusterEvent::WorkerCrashed { .. }));
    assert_eq!(ev, ClusterEvent::WorkerCrashed { worker_id: id });
    assert_eq!(agg.worker_count(), 0);
}

#[test]
fn shutdown_leaves_cleanly() {
    let agg = aggregator(5_000);
    let mut w = mcts_worker(&agg, "polite", 7);
    let id = w.worker_id().unwrap();
    w.shutdown();
    assert_eq!(w.state(), WorkerState::Stopped);
    let ev = next_matching(&agg, |ev| {
        matches!(
            ev,
            ClusterEvent::WorkerLeft { .. } | ClusterEvent::WorkerCrashed { .. }
        )
    });
    assert_eq!(ev, ClusterEvent::WorkerLeft { worker_id: id });
    assert_eq!(agg.worker_count(), 0);
}

#[test]
fn silent_workers_are_evicted() {
    let agg = aggregator(200);
    let (mut sock, id) = raw_register(&agg, "quiet");
    let ev = next_matching(&agg, |ev| matches!(ev, ClusterEvent::WorkerEvicted { .. }));
    assert_eq!(ev, ClusterEvent::WorkerEvicted { worker_id: id });
    assert_eq!(agg.worker_count(), 0);
    // The aggregator hung up on us.
    assert!(!matches!(read_frame(&mut sock), Ok(Some(_))));
}

#[test]
fn heartbeats_keep_a_worker_alive() {
    let agg = aggregator(300);
    let w = mcts_worker(&agg, "alive", 8);
    std::thread::sleep(Duration::from_millis(900));
    assert_eq!(agg.worker_count(), 1);
    assert_eq!(w.state(), WorkerState::Registered);
}

#[test]
fn unreachable_aggregator_stops_the_worker() {
    let dir = Arc::new(StaticDirectory::new());
    let mut opts = worker_options("lost");
    opts.connect_timeout = Duration::from_millis(300);
    let player = PlayerRegistry::default()
        .create("random", &Config::default())
        .unwrap();
    let w = ClusterWorker::start(player, dir, opts).unwrap();
    assert!(w.wait_for_state(WorkerState::Stopped, WAIT));
    assert_eq!(w.worker_id(), None);
}

#[test]
fn round_without_workers_fails() {
    let agg = aggregator(5_000);
    assert!(matches!(
        agg.run_search_round(SearchBudget::Playouts(10), Duration::from_millis(100), false),
        Err(ClusterError::NoWorkers)
    ));
}

#[test]
fn events_are_logged_as_ndjson() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cluster.ndjson");
    let mut agg = Aggregator::bind(AggregatorOptions {
        bind: "127.0.0.1:0".to_string(),
        event_log: Some(path.clone()),
        config_hash: Some("abc".to_string()),
        ..AggregatorOptions::default()
    })
    .unwrap();
    let (mut sock, id) = raw_register(&agg, "logged");
    let bye = Envelope {
        request_id: 2,
        msg: Message::RemoveWorker { worker_id: id },
    };
    write_frame(&mut sock, &encode_envelope(&bye)).unwrap();
    let reply = decode_envelope(&read_frame(&mut sock).unwrap().unwrap()).unwrap();
    assert_eq!(reply.msg, Message::ok(""));
    agg.shutdown();

    let text = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["event"], "worker_joined");
    assert_eq!(events[0]["name"], "logged");
    assert_eq!(events[1]["event"], "worker_left");
    assert_eq!(events[1]["live_workers"], 0);
}
