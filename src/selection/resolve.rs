//! Bounded fixed-point iteration.
//!
//! Patch and kext selection feed each other: a checked patch can pull in a
//! companion kext and a selected kext can enable a patch guard. Both passes
//! are re-run until the kext set stops changing.

use crate::error::SelectionError;

/// Rounds allowed before giving up.
pub const MAX_ROUNDS: usize = 8;

/// Apply `step` from `seed` until the state repeats.
///
/// Returns the stable state and the number of rounds it took. A state that
/// keeps changing after `max_rounds` is reported as
/// [`SelectionError::NoFixedPoint`].
pub fn fixed_point<S, F>(seed: S, max_rounds: usize, mut step: F) -> Result<(S, usize), SelectionError>
where
    S: PartialEq,
    F: FnMut(&S) -> Result<S, SelectionError>,
{
    let mut current = seed;
    for round in 1..=max_rounds {
        let next = step(&current)?;
        if next == current {
            log::debug!("[Resolver] Converged after {} round(s)", round);
            return Ok((next, round));
        }
        current = next;
    }
    log::warn!("[Resolver] No fixed point after {} rounds", max_rounds);
    Err(SelectionError::NoFixedPoint(max_rounds))
}
