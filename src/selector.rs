//! Weighted random choice: `P(item) = weight(item) / sum(weights)`.
//!
//! Negative and non-finite weights count as zero. A draw that walks off the
//! end of the list (zero total weight, float drift) resolves to the last item.

use rand::Rng;

/// Picks one item using a draw from `rng`. `None` only for an empty list.
pub fn select_weighted<'a, T, F, R>(items: &'a [T], weight: F, rng: &mut R) -> Option<&'a T>
where
    F: Fn(&T) -> f64,
    R: Rng + ?Sized,
{
    if items.is_empty() {
        return None;
    }
    let draw: f64 = rng.gen();
    select_weighted_with_draw(items, weight, draw)
}

/// Deterministic core: `unit_draw` in `[0, 1)` is scaled by the total weight.
pub fn select_weighted_with_draw<T, F>(items: &[T], weight: F, unit_draw: f64) -> Option<&T>
where
    F: Fn(&T) -> f64,
{
    let last = items.last()?;
    let weights: Vec<f64> = items.iter().map(|item| usable(weight(item))).collect();
    let total: f64 = weights.iter().sum();
    let unit = if unit_draw.is_finite() { unit_draw.clamp(0.0, 1.0) } else { 0.0 };
    let target = unit * total;

    let mut cumulative = 0.0;
    for (item, w) in items.iter().zip(&weights) {
        cumulative += w;
        if target < cumulative {
            return Some(item);
        }
    }
    Some(last)
}

fn usable(w: f64) -> f64 {
    if w.is_finite() && w > 0.0 {
        w
    } else {
        0.0
    }
}
