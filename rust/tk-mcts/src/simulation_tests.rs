use std::sync::Arc;

use tk_core::{Board, Move};
use tk_patterns::{PatternHasher, PatternValueTable};
use tk_wls::WinLossStates;

use crate::prior::PatternPriors;
use crate::simulation::SimulationWorker;
use crate::tree::{SearchTree, TreeParams};

fn patterns() -> Arc<PatternPriors> {
    let table = PatternValueTable::new(4, 16, 0.99).unwrap();
    Arc::new(PatternPriors::new(PatternHasher::new(11), Arc::new(table)))
}

fn setup(board: &Board, seed: u64) -> (Arc<SearchTree>, Arc<PatternPriors>, SimulationWorker) {
    let wls = Arc::new(WinLossStates::build(21, 0, 0).unwrap());
    let tree = Arc::new(SearchTree::new(TreeParams::default(), wls));
    let pats = patterns();
    let worker = SimulationWorker::new(Arc::clone(&tree), Arc::clone(&pats), board, seed, 0);
    (tree, pats, worker)
}

#[test]
fn one_playout_reaches_the_tree_and_the_patterns() {
    let board = Board::new(5, 7.5);
    let (tree, pats, mut w) = setup(&board, 1);
    let winner = w.run_one(&board).unwrap();
    assert_eq!(tree.root_playouts(&board), 1);
    assert_eq!(w.playouts(), 1);

    // The first move of the playout is the tree's choice at the root.
    let (runs, wins) = tree.root_totals(&board);
    let slot = runs.iter().position(|&r| r == 1).unwrap();
    let first = Move::from_index(slot, board.area()).unwrap();
    assert_eq!(wins[slot] == 1, winner == board.color_to_play());
    if let Move::Play(p) = first {
        let fp = pats.fingerprint(&board, p as usize, board.color_to_play());
        assert_ne!(pats.table().lookup(fp), 0.5);
    }
    tree.assert_consistent();
}

#[test]
fn finished_game_is_scored_without_touching_the_tree() {
    let mut board = Board::new(5, 7.5);
    board.play(Move::Play(12)).unwrap();
    board.play(Move::Pass).unwrap();
    board.play(Move::Pass).unwrap();
    let (tree, _pats, mut w) = setup(&board, 1);
    assert_eq!(w.run_one(&board).unwrap(), board.score());
    assert!(tree.is_empty());
}

#[test]
fn seeded_search_is_reproducible() {
    let board = Board::new(5, 7.5);
    let run = || {
        let (tree, _pats, mut w) = setup(&board, 42);
        for _ in 0..1000 {
            w.run_one(&board).unwrap();
        }
        tree.assert_consistent();
        (tree.best_move(&board), tree.root_totals(&board))
    };
    let (best_a, totals_a) = run();
    let (best_b, totals_b) = run();
    assert!(best_a.is_some());
    assert_eq!(best_a, best_b);
    assert_eq!(totals_a, totals_b);
    assert_eq!(totals_a.0.iter().sum::<u32>(), 1000);
}

#[test]
fn different_worker_indices_take_different_streams() {
    let board = Board::new(5, 0.5);
    let wls = Arc::new(WinLossStates::build(21, 0, 0).unwrap());
    let mut tables = Vec::new();
    for index in 0..2 {
        let tree = Arc::new(SearchTree::new(TreeParams::default(), Arc::clone(&wls)));
        let pats = patterns();
        let mut w = SimulationWorker::new(tree, Arc::clone(&pats), &board, 7, index);
        for _ in 0..40 {
            w.run_one(&board).unwrap();
        }
        let cells: Vec<f32> = (0..65536).map(|i| pats.table().cell(0, i)).collect();
        tables.push(cells);
    }
    assert_ne!(tables[0], tables[1]);
}

#[test]
fn playout_from_mid_game_keeps_the_caller_board() {
    let mut board = Board::new(5, 7.5);
    for p in [12u16, 6, 18] {
        board.play(Move::Play(p)).unwrap();
    }
    let before = board.clone();
    let (tree, _pats, mut w) = setup(&board, 3);
    for _ in 0..20 {
        w.run_one(&board).unwrap();
    }
    assert_eq!(board.hash(), before.hash());
    assert_eq!(board.move_sequence(), before.move_sequence());
    assert_eq!(tree.root_playouts(&board), 20);
}
