use crate::states::{WinLossStates, WlsError, MAX_END_SCALE};

fn run(t: &WinLossStates, start: u8, outcomes: impl IntoIterator<Item = bool>) -> u8 {
    outcomes.into_iter().fold(start, |s, won| t.update(s, won))
}

#[test]
fn tables_are_total_for_every_end_scale() {
    for e in 1..=MAX_END_SCALE {
        let t = WinLossStates::build(e, 0, 0).unwrap();
        let n = ((e + 1) * (e + 2) / 2) as usize;
        assert_eq!(t.num_states(), n, "end_scale {e}");
        assert_eq!(t.best_state() as usize, n - 1);
        assert_eq!(t.win_table().len(), n);
        assert_eq!(t.loss_table().len(), n);
        for s in 0..n {
            let s = s as u8;
            assert!(t.update(s, true) <= t.best_state(), "WIN[{s}] out of range at {e}");
            assert!(t.update(s, false) <= t.best_state(), "LOSS[{s}] out of range at {e}");
            let (w, r) = t.wins_runs(s);
            assert!(w <= r && r <= e);
        }
    }
}

#[test]
fn construction_is_deterministic() {
    let a = WinLossStates::build(21, 1, 1).unwrap();
    let b = WinLossStates::build(21, 1, 1).unwrap();
    assert_eq!(a, b);
}

#[test]
fn landmark_states() {
    let t = WinLossStates::build(21, 0, 0).unwrap();
    assert_eq!(t.wins_runs(0), (0, 0));
    assert_eq!(t.wins_runs(t.best_state()), (21, 21));
    assert_eq!(t.wins_runs(t.threshold_half()), (1, 2));
    assert_eq!(t.wins_runs(1), (0, 21));

    let tiny = WinLossStates::build(1, 0, 0).unwrap();
    assert_eq!(tiny.wins_runs(tiny.threshold_half()), (0, 1));
}

#[test]
fn first_result_honours_the_prior() {
    let plain = WinLossStates::build(21, 0, 0).unwrap();
    assert_eq!(plain.wins_runs(plain.update(0, true)), (1, 1));
    assert_eq!(plain.wins_runs(plain.update(0, false)), (0, 1));

    let primed = WinLossStates::build(21, 1, 1).unwrap();
    assert_eq!(primed.wins_runs(primed.update(0, true)), (2, 2));
    assert_eq!(primed.wins_runs(primed.update(0, false)), (1, 2));
}

#[test]
fn below_end_of_scale_transitions_count_exactly() {
    let t = WinLossStates::build(21, 0, 0).unwrap();
    for s in 1..t.num_states() {
        let s = s as u8;
        let (w, r) = t.wins_runs(s);
        if r < 21 {
            assert_eq!(t.wins_runs(t.update(s, true)), (w + 1, r + 1));
            assert_eq!(t.wins_runs(t.update(s, false)), (w, r + 1));
        }
    }
}

#[test]
fn saturated_extremes_stay_put() {
    let t = WinLossStates::build(21, 0, 0).unwrap();
    let best = run(&t, 0, std::iter::repeat(true).take(100));
    assert_eq!(best, t.best_state());
    assert_eq!(t.update(best, true), best);

    let worst = run(&t, 0, std::iter::repeat(false).take(100));
    assert_eq!(worst, 1);
    assert_eq!(t.update(worst, false), 1);
    assert_eq!(t.win_rate(worst), 0.0);
}

#[test]
fn alternating_results_hover_around_half() {
    let t = WinLossStates::build(21, 0, 0).unwrap();
    let mut s = 0u8;
    for i in 0..1000 {
        s = t.update(s, i % 2 == 0);
        if i > 50 {
            let rate = t.win_rate(s);
            assert!((0.3..=0.7).contains(&rate), "rate {rate} at step {i}");
        }
    }
}

#[test]
fn small_scales_use_the_counter_heuristic() {
    let t = WinLossStates::build(3, 0, 0).unwrap();
    let s = t.state_of(1, 3).unwrap();
    assert_eq!(t.wins_runs(t.update(s, true)), (2, 3));
    assert_eq!(t.wins_runs(t.update(s, false)), (0, 3));
}

#[test]
fn above_half_is_strict() {
    let t = WinLossStates::build(21, 0, 0).unwrap();
    assert!(t.is_above_half(t.state_of(2, 2).unwrap()));
    assert!(!t.is_above_half(t.threshold_half()));
    assert!(!t.is_above_half(t.state_of(0, 2).unwrap()));
    assert!(!t.is_above_half(0));
}

#[test]
fn invalid_parameters_are_rejected() {
    assert_eq!(
        WinLossStates::build(0, 0, 0).unwrap_err(),
        WlsError::InvalidEndScale(0)
    );
    assert_eq!(
        WinLossStates::build(22, 0, 0).unwrap_err(),
        WlsError::InvalidEndScale(22)
    );
    assert_eq!(
        WinLossStates::build(21, 2, 1).unwrap_err(),
        WlsError::InvalidPrior { wins: 2, visits: 1 }
    );
    assert!(matches!(
        WinLossStates::build_with_k(21, 0, 0, f64::NAN),
        Err(WlsError::InvalidConfirmationK(_))
    ));
}

#[test]
fn nearest_state_rescales_large_counts() {
    let t = WinLossStates::build(21, 0, 0).unwrap();
    assert_eq!(t.wins_runs(t.nearest_state(3, 5)), (3, 5));
    assert_eq!(t.wins_runs(t.nearest_state(500, 1000)), (11, 21));
    assert_eq!(t.wins_runs(t.nearest_state(1000, 1000)), (21, 21));
    assert_eq!(t.nearest_state(0, 0), 0);
}

#[test]
fn large_confirmation_constants_saturate_in_place() {
    for k in [2.5, 3.0, 1.0e9] {
        let t = WinLossStates::build_with_k(21, 0, 0, k).unwrap();
        for s in 0..t.num_states() {
            let s = s as u8;
            assert!(t.update(s, true) <= t.best_state(), "WIN[{s}] at k={k}");
            assert!(t.update(s, false) <= t.best_state(), "LOSS[{s}] at k={k}");
        }
        // One win out of 21 asks for more runs back than there are.
        let lopsided = t.state_of(1, 21).unwrap();
        assert_eq!(t.update(lopsided, true), lopsided, "k={k}");
        assert_eq!(t.update(t.best_state(), true), t.best_state());
    }
}
