//! Fair-share batch allocation.
//!
//! Given flags partitioned into groups (one group per exploit/target pair)
//! and a capacity limit, [`allocate`] selects a bounded subset such that no
//! single group can starve the others of submission capacity.
//!
//! # Invariants
//!
//! - The result never exceeds the limit
//! - Every returned element comes from exactly one input group, at most once
//! - A group that fits within its fair share is never truncated
//! - An oversized group contributes its fair share deterministically, plus
//!   at most one extra element won in the leftover-capacity lottery
//! - If every group fits, the result is exactly the union of all groups
//!
//! The function is pure apart from the caller-supplied random source, so
//! tests can seed it and assert on exact outcomes.

use rand::seq::{index, SliceRandom};
use rand::Rng;

/// Select at most `limit` elements from `groups`, distributing capacity
/// fairly across groups.
///
/// Groups must be non-empty. The per-group fair share is the remaining
/// capacity divided by the number of groups not yet satisfied; processing
/// the smallest groups first lets their unused capacity be reclaimed before
/// the larger groups are evaluated. Groups larger than their share are
/// sampled uniformly without replacement and stake one residual candidate
/// on a final lottery over whatever capacity the deterministic pass left
/// unused. The result is shuffled so submission order carries no
/// information about group identity or size.
pub fn allocate<T, R>(mut groups: Vec<Vec<T>>, limit: usize, rng: &mut R) -> Vec<T>
where
    R: Rng + ?Sized,
{
    if groups.is_empty() {
        return Vec::new();
    }

    groups.sort_by_key(Vec::len);

    let mut places_left = limit;
    let mut group_count = groups.len();
    let mut fair_share = places_left / group_count;

    let mut result = Vec::new();
    let mut residuals = Vec::new();

    for group in groups {
        if group.len() <= fair_share {
            places_left -= group.len();
            group_count -= 1;
            result.extend(group);
            // The fair share may have grown because this group used less
            // than its quota. Size ordering guarantees the smaller groups
            // are processed first, so the recomputed share is what the
            // remaining (larger) groups get to keep.
            if group_count > 0 {
                fair_share = places_left / group_count;
            }
        } else {
            let mut drawn = draw(group, fair_share + 1, rng);
            if let Some(candidate) = drawn.pop() {
                residuals.push(candidate);
            }
            result.extend(drawn);
        }
    }

    // Lottery over the capacity the deterministic pass left unused: each
    // capped group staked exactly one candidate, so leftover slots rotate
    // among the capped groups instead of always favoring the same one.
    let slots_left = limit - result.len();
    let winners = slots_left.min(residuals.len());
    if winners > 0 {
        result.extend(draw(residuals, winners, rng));
    }

    result.shuffle(rng);
    result
}

/// Draw `count` distinct elements uniformly without replacement.
///
/// The returned elements are in uniform random order, so a prefix of the
/// result is itself a uniform sample.
fn draw<T, R>(group: Vec<T>, count: usize, rng: &mut R) -> Vec<T>
where
    R: Rng + ?Sized,
{
    let picked = index::sample(rng, group.len(), count);
    let mut slots: Vec<Option<T>> = group.into_iter().map(Some).collect();
    picked.iter().filter_map(|i| slots[i].take()).collect()
}
