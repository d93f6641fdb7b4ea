use rayon::prelude::*;

/// Apply `f` to every element of `arr1` in parallel, passing the element
/// index. The kernel execution span uses this to advance particles; the
/// stepping loop itself stays single-threaded.
pub fn par_iter_mut1<T1: Send + Sync, F: Fn(usize, &mut T1) + Send + Sync>(arr1: &mut [T1], f: F) {
    arr1.into_par_iter().enumerate().for_each(|(idx, v1)| {
        f(idx, v1);
    });
}
