/// CPU pause hint for spin loops.
///
/// Lowers to `pause` on x86-64 and `yield` on aarch64. Wait loops that may
/// spin for more than a handful of iterations should prefer
/// [`crossbeam_utils::Backoff`], which escalates to a thread yield; this is
/// the raw hint for the tight inner retry of a CAS.
#[inline(always)]
pub fn spin_pause() {
    std::hint::spin_loop();
}
