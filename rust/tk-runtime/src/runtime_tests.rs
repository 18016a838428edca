use std::thread;
use std::time::Duration;

use tk_core::{Config, Move};

use crate::{MctsPlayer, Player, PlayerError, PlayerRegistry, RandomPlayer, SearchBudget};

fn small_config(threads: usize, seed: u64) -> Config {
    let mut cfg = Config::default();
    cfg.board.size = 5;
    cfg.board.komi = 0.5;
    cfg.search.threads = threads;
    cfg.search.seed = seed;
    cfg.search.arena_capacity = 4096;
    cfg.patterns.bits_per_table = 12;
    cfg
}

#[test]
fn registry_builds_builtin_players() {
    let reg = PlayerRegistry::default();
    let names: Vec<&str> = reg.names().collect();
    assert_eq!(names, vec!["mcts", "random"]);

    let cfg = small_config(1, 1);
    assert_eq!(reg.create("mcts", &cfg).unwrap().name(), "mcts");
    assert_eq!(reg.create("random", &cfg).unwrap().name(), "random");
    assert!(matches!(
        reg.create("gnugo", &cfg),
        Err(PlayerError::UnknownPlayer(name)) if name == "gnugo"
    ));
}

#[test]
fn registry_accepts_custom_factories() {
    fn always_random(cfg: &Config) -> Result<Box<dyn Player>, PlayerError> {
        Ok(Box::new(RandomPlayer::new(cfg)))
    }
    let mut reg = PlayerRegistry::empty();
    assert!(!reg.contains("mcts"));
    reg.register("mcts", always_random);
    let p = reg.create("mcts", &small_config(1, 1)).unwrap();
    assert_eq!(p.name(), "random");
}

#[test]
fn playout_budget_is_spent_exactly() {
    let mut p = MctsPlayer::new(&small_config(3, 7)).unwrap();
    let report = p.search(SearchBudget::Playouts(300)).unwrap();
    assert_eq!(report.playouts + report.illegal, 300);
    assert_eq!(report.illegal, 0);
    assert_eq!(report.root_playouts, 300);
    assert!(report.best.is_some());
    p.tree().assert_consistent();

    let (runs, wins) = p.root_totals();
    assert_eq!(runs.len(), 26);
    assert_eq!(runs.iter().sum::<u32>(), 300);
    assert!(wins.iter().zip(&runs).all(|(w, r)| w <= r));
}

#[test]
fn single_thread_search_is_reproducible() {
    let run = || {
        let mut p = MctsPlayer::new(&small_config(1, 42)).unwrap();
        let report = p.search(SearchBudget::Playouts(1000)).unwrap();
        (report.best, p.root_totals())
    };
    let (best_a, totals_a) = run();
    let (best_b, totals_b) = run();
    assert_eq!(best_a, best_b);
    assert_eq!(totals_a, totals_b);
}

#[test]
fn searches_accumulate_on_the_same_root() {
    let mut p = MctsPlayer::new(&small_config(2, 3)).unwrap();
    p.search(SearchBudget::Playouts(100)).unwrap();
    let report = p.search(SearchBudget::Playouts(100)).unwrap();
    assert_eq!(report.root_playouts, 200);
}

#[test]
fn background_search_can_be_read_and_stopped() {
    let mut p = MctsPlayer::new(&small_config(2, 5)).unwrap();
    p.begin_search(SearchBudget::Millis(60_000)).unwrap();
    assert!(p.is_searching());
    assert!(matches!(
        p.begin_search(SearchBudget::Playouts(1)),
        Err(PlayerError::Busy)
    ));
    assert!(matches!(p.set_property("threads", "1"), Err(PlayerError::Busy)));

    thread::sleep(Duration::from_millis(100));
    let (runs, _) = p.root_totals();
    assert!(runs.iter().sum::<u32>() > 0);

    let report = p.stop_search().expect("report");
    assert!(!p.is_searching());
    assert!(report.playouts > 0);
    assert!(report.elapsed_ms < 60_000);
    p.tree().assert_consistent();
}

#[test]
fn background_search_finishes_on_its_own() {
    let mut p = MctsPlayer::new(&small_config(2, 9)).unwrap();
    p.begin_search(SearchBudget::Playouts(50)).unwrap();
    let mut report = None;
    for _ in 0..500 {
        if let Some(r) = p.poll_search() {
            report = Some(r);
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let report = report.expect("search did not finish");
    assert_eq!(report.playouts, 50);
    assert!(!p.is_searching());
}

#[test]
fn reset_clears_the_tree_and_keeps_komi() {
    let mut p = MctsPlayer::new(&small_config(2, 11)).unwrap();
    p.set_komi(3.5).unwrap();
    p.accept_move(Move::Play(12)).unwrap();
    p.search(SearchBudget::Playouts(50)).unwrap();
    assert!(!p.tree().is_empty());

    p.reset().unwrap();
    assert!(p.tree().is_empty());
    assert_eq!(p.board().turn(), 0);
    assert_eq!(p.board().komi(), 3.5);
}

#[test]
fn accept_move_rejects_illegal_moves() {
    let mut p = MctsPlayer::new(&small_config(1, 1)).unwrap();
    p.accept_move(Move::Play(6)).unwrap();
    let err = p.accept_move(Move::Play(6)).unwrap_err();
    assert!(matches!(err, PlayerError::IllegalMove { ref mv, .. } if mv == "B2"));
    assert_eq!(p.board().turn(), 1);
}

#[test]
fn accept_move_stops_a_running_search() {
    let mut p = MctsPlayer::new(&small_config(2, 13)).unwrap();
    p.begin_search(SearchBudget::Millis(60_000)).unwrap();
    p.accept_move(Move::Pass).unwrap();
    assert!(!p.is_searching());
    assert_eq!(p.board().turn(), 1);
}

#[test]
fn properties_are_validated() {
    let mut p = MctsPlayer::new(&small_config(1, 1)).unwrap();
    assert!(matches!(
        p.set_property("nonsense", "1"),
        Err(PlayerError::UnknownProperty(k)) if k == "nonsense"
    ));
    assert!(matches!(
        p.set_property("exploration", "lots"),
        Err(PlayerError::InvalidValue { .. })
    ));
    assert!(matches!(
        p.set_property("threads", "0"),
        Err(PlayerError::InvalidValue { .. })
    ));
    assert!(matches!(
        p.set_property("value_mode", "median"),
        Err(PlayerError::InvalidValue { .. })
    ));

    p.set_property("threads", "2").unwrap();
    p.set_property("exploration", "0.3").unwrap();
    p.set_property("value_mode", "wls").unwrap();
    assert_eq!(p.config().search.threads, 2);
    assert_eq!(p.tree().params().exploration, 0.3);

    let report = p.search(SearchBudget::Playouts(100)).unwrap();
    assert_eq!(report.root_playouts, 100);
}

#[test]
fn board_size_property_starts_a_new_board() {
    let mut p = MctsPlayer::new(&small_config(1, 1)).unwrap();
    p.accept_move(Move::Play(0)).unwrap();
    p.set_property("board_size", "7").unwrap();
    assert_eq!(p.board().size(), 7);
    assert_eq!(p.board().turn(), 0);
    assert_eq!(p.root_totals().0.len(), 50);
    assert!(matches!(
        p.set_property("board_size", "40"),
        Err(PlayerError::InvalidValue { .. })
    ));
}

#[test]
fn applied_totals_steer_the_tree_but_stay_out_of_reports() {
    let mut p = MctsPlayer::new(&small_config(1, 1)).unwrap();
    let mut runs = vec![0u32; 26];
    let mut wins = vec![0u32; 26];
    runs[12] = 40;
    wins[12] = 30;
    runs[0] = 5;
    assert_eq!(p.apply_totals(&runs, &wins).unwrap(), 2);
    assert_eq!(p.best_move(), Some(Move::Play(12)));
    let (tree_runs, tree_wins) = p.tree().root_totals(p.board());
    assert_eq!((tree_runs[12], tree_wins[12]), (40, 30));
    assert_eq!(p.root_totals(), (vec![0; 26], vec![0; 26]));

    p.search(SearchBudget::Playouts(100)).unwrap();
    let (mine, my_wins) = p.root_totals();
    assert_eq!(mine.iter().sum::<u32>(), 100);
    assert!(my_wins.iter().zip(&mine).all(|(w, r)| w <= r));

    // The next merge holds this report plus everyone else's: nothing new.
    let merged: Vec<u32> = mine.iter().zip(&runs).map(|(a, b)| a + b).collect();
    let merged_wins: Vec<u32> = my_wins.iter().zip(&wins).map(|(a, b)| a + b).collect();
    assert_eq!(p.apply_totals(&merged, &merged_wins).unwrap(), 0);
    assert_eq!(p.root_totals(), (mine.clone(), my_wins));

    // Another worker's playouts show up in the tree, never in the report.
    let mut more = merged.clone();
    more[3] += 7;
    assert_eq!(p.apply_totals(&more, &merged_wins).unwrap(), 1);
    assert_eq!(p.tree().root_totals(p.board()).0[3], more[3]);
    assert_eq!(p.root_totals().0, mine);
    p.tree().assert_consistent();

    p.reset().unwrap();
    assert_eq!(p.root_totals(), (vec![0; 26], vec![0; 26]));

    assert!(matches!(
        p.apply_totals(&runs[..10], &wins),
        Err(PlayerError::Tree(_))
    ));
}

#[test]
fn random_player_picks_a_legal_move() {
    let mut p = RandomPlayer::new(&small_config(1, 17));
    let report = p.search(SearchBudget::Playouts(1)).unwrap();
    let mv = report.best.expect("move");
    assert!(p.board().is_legal(mv));
    assert_ne!(mv, Move::Pass);

    let (runs, wins) = p.root_totals();
    assert_eq!(runs.iter().sum::<u32>(), 1);
    assert_eq!(runs[mv.index(25)], 1);
    assert!(wins.iter().all(|&w| w == 0));

    p.accept_move(mv).unwrap();
    assert_eq!(p.best_move(), None);
    assert!(matches!(
        p.set_property("threads", "2"),
        Err(PlayerError::UnknownProperty(_))
    ));
}

#[test]
fn random_player_reports_through_poll() {
    let mut p = RandomPlayer::new(&small_config(1, 2));
    p.begin_search(SearchBudget::Millis(10)).unwrap();
    assert!(p.poll_search().is_some());
    assert!(p.poll_search().is_none());
}
