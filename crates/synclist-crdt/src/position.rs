//! Fractional positions for dense ordering without neighbour rewrites.
//!
//! A position is a non-empty sequence of `(digit, actor)` components compared
//! lexicographically, with missing components reading as `(0, "")`. Between
//! any two positions another one can be generated, so concurrent inserts from
//! different replicas never force existing entries to move.

use crate::{CrdtError, CrdtResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use synclist_common::ActorId;

/// Levels a generated position may grow to before generation fails with
/// [`CrdtError::PositionExhausted`].
const MAX_DEPTH: usize = 64;

/// Digit step used when there is no upper bound to bisect against.
const GAP: u64 = 16;

/// One level of a fractional position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionComponent {
    pub digit: u64,
    pub actor: String,
}

impl PositionComponent {
    pub fn new(digit: u64, actor: impl Into<String>) -> Self {
        Self {
            digit,
            actor: actor.into(),
        }
    }

    fn key(&self) -> (u64, &str) {
        (self.digit, self.actor.as_str())
    }
}

/// An immutable ordering key made of [`PositionComponent`]s.
///
/// Positions are small value types; they are cloned freely and compared as
/// pure functions of their components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position(Vec<PositionComponent>);

impl Position {
    /// Build a position from raw components. Empty positions are not valid
    /// ordering keys and are rejected.
    pub fn new(components: Vec<PositionComponent>) -> CrdtResult<Self> {
        if components.is_empty() {
            return Err(CrdtError::InvalidBounds("empty position".to_string()));
        }
        Ok(Position(components))
    }

    /// Components of this position, shallowest first.
    pub fn components(&self) -> &[PositionComponent] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Component at `depth`, with missing levels reading as `(0, "")`.
    fn component_or_zero(&self, depth: usize) -> (u64, &str) {
        self.0
            .get(depth)
            .map(|c| c.key())
            .unwrap_or((0, ""))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        let depth = self.0.len().max(other.0.len());
        for level in 0..depth {
            let ord = self
                .component_or_zero(level)
                .cmp(&other.component_or_zero(level));
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|c| format!("{}:{}", c.digit, c.actor))
            .collect();
        write!(f, "[{}]", parts.join(","))
    }
}

/// Generate a position strictly between `left` and `right`.
///
/// Either bound may be absent, meaning the open side. The result is
/// deterministic for a given `(left, right, actor)` triple and always ends
/// with a component carrying `actor`, so concurrent generations between the
/// same bounds by distinct actors compare unequal.
pub fn generate_between(
    left: Option<&Position>,
    right: Option<&Position>,
    actor: &ActorId,
) -> CrdtResult<Position> {
    if let (Some(l), Some(r)) = (left, right) {
        if l >= r {
            return Err(CrdtError::InvalidBounds(format!(
                "left bound {l} is not below right bound {r}"
            )));
        }
    }

    let mut components: Vec<PositionComponent> = Vec::new();
    // While a bound stays "active" the prefix built so far equals that
    // bound's prefix, so its next component still constrains the choice.
    let mut right_active = right.is_some();

    for depth in 0..MAX_DEPTH {
        let (low_digit, low_actor) = match left {
            Some(l) => l.component_or_zero(depth),
            None => (0, ""),
        };

        if let Some(r) = right.filter(|_| right_active) {
            let (high_digit, high_actor) = r.component_or_zero(depth);
            if high_digit.saturating_sub(low_digit) >= 2 {
                // Integer room at this level: bisect.
                let digit = low_digit + (high_digit - low_digit) / 2;
                components.push(PositionComponent::new(digit, actor.as_str()));
                return Position::new(components);
            }
            // No room; copy the lower component and descend one level.
            let copied = PositionComponent::new(low_digit, low_actor);
            match copied.key().cmp(&(high_digit, high_actor)) {
                Ordering::Less => right_active = false,
                Ordering::Equal => {}
                Ordering::Greater => {
                    return Err(CrdtError::InvalidBounds(format!(
                        "bounds cross at depth {depth}"
                    )))
                }
            }
            components.push(copied);
        } else {
            // Open on the right: step past the lower digit.
            let digit = low_digit.saturating_add(GAP);
            if digit > low_digit {
                components.push(PositionComponent::new(digit, actor.as_str()));
                return Position::new(components);
            }
            // Saturated digit; descend along the left bound.
            components.push(PositionComponent::new(low_digit, low_actor));
        }
    }

    Err(CrdtError::PositionExhausted(MAX_DEPTH))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(name: &str) -> ActorId {
        ActorId::new(name)
    }

    fn pos(components: &[(u64, &str)]) -> Position {
        Position::new(
            components
                .iter()
                .map(|(d, a)| PositionComponent::new(*d, *a))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn missing_components_compare_as_zero() {
        assert_eq!(pos(&[(1, "x")]), pos(&[(1, "x"), (0, "")]));
        assert!(pos(&[(1, "x")]) < pos(&[(1, "x"), (0, "a")]));
        assert!(pos(&[(1, "x")]) < pos(&[(1, "x"), (1, "")]));
    }

    #[test]
    fn comparison_is_lexicographic() {
        assert!(pos(&[(1, "a")]) < pos(&[(2, "a")]));
        assert!(pos(&[(1, "a")]) < pos(&[(1, "b")]));
        assert!(pos(&[(1, "b")]) < pos(&[(2, "a")]));
        assert!(pos(&[(1, "a"), (9, "z")]) < pos(&[(2, "a")]));
    }

    #[test]
    fn generates_into_empty_space() {
        let p = generate_between(None, None, &actor("a")).unwrap();
        assert_eq!(p, pos(&[(GAP, "a")]));
    }

    #[test]
    fn generates_after_open_right() {
        let left = pos(&[(16, "a")]);
        let p = generate_between(Some(&left), None, &actor("b")).unwrap();
        assert!(p > left);
        assert_eq!(p, pos(&[(32, "b")]));
    }

    #[test]
    fn generates_before_open_left() {
        let right = pos(&[(16, "a")]);
        let p = generate_between(None, Some(&right), &actor("b")).unwrap();
        assert!(p < right);
    }

    #[test]
    fn bisects_when_room_exists() {
        let left = pos(&[(10, "a")]);
        let right = pos(&[(20, "a")]);
        let p = generate_between(Some(&left), Some(&right), &actor("b")).unwrap();
        assert!(left < p && p < right);
        assert_eq!(p.depth(), 1);
    }

    #[test]
    fn descends_when_no_integer_fits() {
        // Adjacent digits: the generator must extend one level deeper.
        let left = pos(&[(1, "x")]);
        let right = pos(&[(2, "x")]);
        let p = generate_between(Some(&left), Some(&right), &actor("a")).unwrap();
        assert!(left < p && p < right);
        assert!(p.depth() > 1);

        // And again between the left bound and the fresh position.
        let q = generate_between(Some(&left), Some(&p), &actor("b")).unwrap();
        assert!(left < q && q < p);
    }

    #[test]
    fn descends_between_same_digit_different_actor() {
        let left = pos(&[(1, "x")]);
        let right = pos(&[(1, "y")]);
        let p = generate_between(Some(&left), Some(&right), &actor("a")).unwrap();
        assert!(left < p && p < right);
    }

    #[test]
    fn distinct_actors_generate_distinct_positions() {
        let left = pos(&[(1, "x")]);
        let right = pos(&[(2, "x")]);
        let p = generate_between(Some(&left), Some(&right), &actor("a")).unwrap();
        let q = generate_between(Some(&left), Some(&right), &actor("b")).unwrap();
        assert_ne!(p, q);
        assert!(left < p && p < right);
        assert!(left < q && q < right);
    }

    #[test]
    fn generation_is_deterministic() {
        let left = pos(&[(4, "x")]);
        let right = pos(&[(5, "x"), (3, "y")]);
        let p = generate_between(Some(&left), Some(&right), &actor("a")).unwrap();
        let q = generate_between(Some(&left), Some(&right), &actor("a")).unwrap();
        assert_eq!(p, q);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let left = pos(&[(2, "x")]);
        let right = pos(&[(1, "x")]);
        assert!(matches!(
            generate_between(Some(&left), Some(&right), &actor("a")),
            Err(CrdtError::InvalidBounds(_))
        ));
        assert!(matches!(
            generate_between(Some(&left), Some(&left.clone()), &actor("a")),
            Err(CrdtError::InvalidBounds(_))
        ));
    }

    #[test]
    fn repeated_narrowing_eventually_exhausts() {
        let mut left = pos(&[(1, "x")]);
        let mut right = pos(&[(2, "x")]);
        let mut failed = false;
        // Each round squeezes the gap; the cap has to fire before we give up.
        for round in 0..2000 {
            match generate_between(Some(&left), Some(&right), &actor("a")) {
                Ok(p) => {
                    assert!(left < p && p < right, "round {round}");
                    // Narrow from alternating sides to force depth growth.
                    if round % 2 == 0 {
                        left = p;
                    } else {
                        right = p;
                    }
                }
                Err(CrdtError::PositionExhausted(_)) => {
                    failed = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(failed, "expected exhaustion under adversarial narrowing");
    }

    #[test]
    fn serde_round_trip() {
        let p = pos(&[(1, "x"), (8, "actor-a")]);
        let json = serde_json::to_string(&p).unwrap();
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
