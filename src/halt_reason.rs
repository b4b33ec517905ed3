use bitflags::bitflags;

bitflags! {
    /// Why guest execution returned to the host.
    ///
    /// Several reasons may be pending at once; the dispatcher returns the
    /// OR of everything that accumulated while it was running.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HaltReason: u32 {
        /// A single-stepped instruction retired.
        const STEP               = 1 << 0;
        /// The guest executed SVC and the embedder requested a stop.
        const SVC                = 1 << 1;
        /// BKPT / BRK was executed.
        const BREAKPOINT         = 1 << 2;
        /// An undefined or unpredictable instruction raised an exception.
        const EXCEPTION_RAISED   = 1 << 3;
        /// A cache invalidation is pending and must be serviced.
        const CACHE_INVALIDATION = 1 << 4;
        /// The embedder called `halt_execution`.
        const EXTERNAL_HALT      = 1 << 5;
        /// Interpreter fallback was requested by a translated block.
        const INTERPRET          = 1 << 6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_and_test() {
        let r = HaltReason::SVC | HaltReason::CACHE_INVALIDATION;
        assert!(r.contains(HaltReason::SVC));
        assert!(!r.contains(HaltReason::STEP));
        assert_eq!(HaltReason::from_bits_truncate(r.bits()), r);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(HaltReason::empty().bits(), 0);
    }
}
