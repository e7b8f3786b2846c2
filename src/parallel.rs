//! Fork-join primitives over independent index ranges.
//!
//! Both helpers run on rayon's global pool and return only after every task
//! has finished, so a call is a full barrier for the caller.
//!
//! # Contract
//!
//! The closure handed to either primitive may read shared, immutable state
//! freely, but it may write only to the element it was given (or the value it
//! returns). It must never touch another element or any shared mutable state.
//! Under that contract the result is identical to a sequential loop over the
//! same range, whatever the interleaving.

use rayon::prelude::*;

/// Builds `len` values where value `i` depends only on `i`.
///
/// Collection preserves order: element `i` of the result is `make(i)`.
pub fn build<T, F>(len: usize, make: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    (0..len).into_par_iter().map(make).collect()
}

/// Applies `apply` to every element of `items`, passing the element's position.
pub fn for_each_mut<T, F>(items: &mut [T], apply: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    items
        .par_iter_mut()
        .enumerate()
        .for_each(|(position, item)| apply(position, item));
}
