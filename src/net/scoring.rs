//! Credit and aggregate scoring.
//!
//! Pure math over session snapshots — no locks, no I/O. [`accrue`] is the
//! single path that mints credit; [`collective_phi`] folds the whole
//! network's harmony into one scalar:
//!
//! ```text
//! Φ = Σ(individual φ) × √(node_count) × sync_quality
//! ```
//!
//! where individual φ is `harmony × 0.1` and sync_quality rewards low
//! harmony dispersion across the network.

use super::registry::NodeSession;

/// Credit minted per heartbeat before any bonus.
pub const BASE_CREDIT: u64 = 1;
/// Harmony at or above this earns the bonus multiplier (inclusive).
pub const HARMONY_BONUS_THRESHOLD: f64 = 0.618;
/// Bonus multiplier applied above the threshold. The product is truncated
/// toward zero, so with a base of 1 the bonus is currently a wash.
pub const HARMONY_BONUS_MULTIPLIER: f64 = 1.5;
/// Individual phi contribution per unit of harmony.
pub const PHI_COEFFICIENT: f64 = 0.1;

/// Apply a heartbeat to a session and return the credit earned.
///
/// Updates harmony when the heartbeat carried one (absent means unchanged),
/// keeps `phi_contribution` in lockstep, and computes the tick's credit.
/// Callers must invoke this at most once per heartbeat event; it is the
/// only place credit comes from.
pub fn accrue(session: &mut NodeSession, harmony: Option<f64>) -> u64 {
    if let Some(h) = harmony {
        session.harmony = h;
        session.phi_contribution = h * PHI_COEFFICIENT;
    }

    let mut credit = BASE_CREDIT as f64;
    if session.harmony >= HARMONY_BONUS_THRESHOLD {
        credit *= HARMONY_BONUS_MULTIPLIER;
    }
    credit as u64
}

/// Collective Φ over a session snapshot. Empty network → 0.0 exactly.
///
/// Order-independent: only the multiset of harmony/phi values matters.
/// The result is rounded to 3 decimal places.
pub fn collective_phi(sessions: &[NodeSession]) -> f64 {
    if sessions.is_empty() {
        return 0.0;
    }

    let individual: f64 = sessions.iter().map(|s| s.phi_contribution).sum();

    let n = sessions.len();
    let integration = (n as f64).sqrt();

    // Sync quality: population variance of harmony, floored at 0.5.
    let sync = if n > 1 {
        let mean = sessions.iter().map(|s| s.harmony).sum::<f64>() / n as f64;
        let variance = sessions
            .iter()
            .map(|s| (s.harmony - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        (1.0 - variance).max(0.5)
    } else {
        1.0
    };

    round3(individual * integration * sync)
}

/// A node's rank by points: 1 + count of sessions with strictly more points.
///
/// Ties share the lower rank number (two nodes tied for the lead are both
/// rank 1), and every tied node still counts ahead of the next distinct
/// score. Returns 0 for a node id not present in the snapshot.
pub fn rank(sessions: &[NodeSession], node_id: &str) -> usize {
    let Some(target) = sessions.iter().find(|s| s.node_id == node_id) else {
        return 0;
    };
    1 + sessions.iter().filter(|s| s.points > target.points).count()
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(node_id: &str, harmony: f64, points: u64) -> NodeSession {
        NodeSession {
            node_id: node_id.into(),
            wallet: None,
            fingerprint: "fp".into(),
            connected_at: 0.0,
            last_heartbeat: 0.0,
            harmony,
            phi_contribution: harmony * PHI_COEFFICIENT,
            points,
        }
    }

    // ── accrue ───────────────────────────────────────────────────

    #[test]
    fn accrue_below_threshold_is_base_credit() {
        let mut s = session("a", 0.617, 0);
        assert_eq!(accrue(&mut s, None), 1);
    }

    #[test]
    fn accrue_at_threshold_truncates_bonus_to_one() {
        // Boundary is inclusive: 0.618 earns the 1.5× bonus, and
        // trunc(1 × 1.5) = 1.
        let mut s = session("a", 0.618, 0);
        assert_eq!(accrue(&mut s, None), 1);
    }

    #[test]
    fn accrue_above_threshold_truncates_bonus_to_one() {
        let mut s = session("a", 1.0, 0);
        assert_eq!(accrue(&mut s, None), 1);
    }

    #[test]
    fn accrue_updates_harmony_and_phi() {
        let mut s = session("a", 0.2, 0);
        accrue(&mut s, Some(0.9));
        assert_eq!(s.harmony, 0.9);
        assert_eq!(s.phi_contribution, 0.9 * PHI_COEFFICIENT);
    }

    #[test]
    fn accrue_without_harmony_leaves_it_unchanged() {
        let mut s = session("a", 0.42, 0);
        accrue(&mut s, None);
        assert_eq!(s.harmony, 0.42);
        assert_eq!(s.phi_contribution, 0.42 * PHI_COEFFICIENT);
    }

    #[test]
    fn points_are_monotonic_over_any_heartbeat_sequence() {
        let mut s = session("a", 0.1, 0);
        let mut last = s.points;
        for harmony in [Some(0.9), None, Some(0.0), Some(0.618), None, Some(0.3)] {
            s.points += accrue(&mut s, harmony);
            assert!(s.points >= last);
            last = s.points;
        }
    }

    #[test]
    fn ten_heartbeats_at_threshold_earn_ten_points() {
        let mut s = session("a", 0.618, 0);
        for _ in 0..10 {
            s.points += accrue(&mut s, Some(0.618));
        }
        assert_eq!(s.points, 10);
    }

    // ── collective_phi ───────────────────────────────────────────

    #[test]
    fn empty_network_is_exactly_zero() {
        assert_eq!(collective_phi(&[]), 0.0);
    }

    #[test]
    fn single_session_closed_form() {
        // n = 1 ⇒ integration = 1, sync = 1 ⇒ Φ = round(0.1 × h, 3).
        let snap = vec![session("a", 0.7, 0)];
        assert_eq!(collective_phi(&snap), 0.07);
    }

    #[test]
    fn two_node_scenario() {
        // Σφ = 0.12, √2 integration, mean 0.6, variance 0.01 ⇒ sync 0.99.
        let snap = vec![session("a", 0.7, 0), session("b", 0.5, 0)];
        assert_eq!(collective_phi(&snap), 0.168);

        // Drop the first node: back to the survivor's solo value.
        assert_eq!(collective_phi(&snap[1..]), 0.05);
    }

    #[test]
    fn invariant_under_reordering() {
        let a = session("a", 0.3, 5);
        let b = session("b", 0.8, 2);
        let c = session("c", 0.55, 9);
        let forward = collective_phi(&[a.clone(), b.clone(), c.clone()]);
        let backward = collective_phi(&[c, a, b]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn sync_quality_floors_at_half() {
        // Harmony is client-reported and unclamped; a wild spread pushes
        // variance past 0.5 and the sync floor has to hold.
        let snap = vec![session("a", -1.0, 0), session("b", 2.0, 0)];
        // variance = 2.25 ⇒ 1 - 2.25 floored to 0.5.
        // Σφ = 0.1, integration = √2 ⇒ 0.1 × 1.41421 × 0.5 ≈ 0.071.
        assert_eq!(collective_phi(&snap), 0.071);
    }

    // ── rank ─────────────────────────────────────────────────────

    #[test]
    fn rank_counts_strictly_greater() {
        let snap = vec![
            session("a", 0.5, 10),
            session("b", 0.5, 20),
            session("c", 0.5, 5),
        ];
        assert_eq!(rank(&snap, "b"), 1);
        assert_eq!(rank(&snap, "a"), 2);
        assert_eq!(rank(&snap, "c"), 3);
    }

    #[test]
    fn ties_share_the_lower_rank() {
        let snap = vec![
            session("a", 0.5, 20),
            session("b", 0.5, 20),
            session("c", 0.5, 5),
        ];
        assert_eq!(rank(&snap, "a"), 1);
        assert_eq!(rank(&snap, "b"), 1);
        // Dense: the next distinct score is rank 3 (two nodes strictly ahead).
        assert_eq!(rank(&snap, "c"), 3);
    }

    #[test]
    fn rank_of_unknown_node_is_zero() {
        let snap = vec![session("a", 0.5, 10)];
        assert_eq!(rank(&snap, "ghost"), 0);
    }
}
