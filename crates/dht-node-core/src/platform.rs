//! Board services the core needs but cannot provide itself.

/// Host platform diagnostics and the hard-reset escape hatch.
pub trait Platform {
    /// Discards all device state and restarts. Never returns.
    fn reset(&mut self) -> !;

    fn cpu_frequency_mhz(&self) -> u32;

    /// Bytes currently allocated on the heap
    fn heap_used(&self) -> usize;

    /// Bytes still available on the heap
    fn heap_free(&self) -> usize;
}

impl<P: Platform + ?Sized> Platform for &mut P {
    fn reset(&mut self) -> ! {
        (**self).reset()
    }

    fn cpu_frequency_mhz(&self) -> u32 {
        (**self).cpu_frequency_mhz()
    }

    fn heap_used(&self) -> usize {
        (**self).heap_used()
    }

    fn heap_free(&self) -> usize {
        (**self).heap_free()
    }
}
