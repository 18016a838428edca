use crate::board::{Board, Color};
use crate::coords::Move;
use crate::scoring::{area_counts, margin};

fn column(size: usize, c: usize) -> Vec<u16> {
    (0..size).map(|r| (r * size + c) as u16).collect()
}

/// Black wall on column B, white wall on column D, column C shared.
fn split_board(komi: f32) -> Board {
    let mut b = Board::new(5, komi);
    for (bp, wp) in column(5, 1).into_iter().zip(column(5, 3)) {
        b.play(Move::Play(bp)).unwrap();
        b.play(Move::Play(wp)).unwrap();
    }
    b
}

#[test]
fn empty_board_goes_to_white_on_komi() {
    let b = Board::new(5, 7.5);
    assert_eq!(area_counts(&b), (0, 0));
    assert_eq!(b.score(), Color::White);
}

#[test]
fn lone_stone_owns_the_board() {
    let mut b = Board::new(5, 7.5);
    b.play(Move::Play(12)).unwrap();
    assert_eq!(area_counts(&b), (25, 0));
    assert_eq!(b.score(), Color::Black);
}

#[test]
fn shared_region_counts_for_nobody() {
    let b = split_board(0.0);
    assert_eq!(area_counts(&b), (10, 10));
    assert_eq!(margin(&b), 0.0);
    // Ties go to White.
    assert_eq!(b.score(), Color::White);
    assert_eq!(split_board(-1.0).score(), Color::Black);
}
