use std::{
    fmt::{self, Display, Formatter},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStat {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl CacheStat {
    fn new(hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        Self {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

impl Display for CacheStat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits: {:>8}, misses: {:>8}, hit_rate: {:>6.2}%",
            self.hits,
            self.misses,
            self.hit_rate * 100.0
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub field_fast_path: CacheStat,
    pub method_fast_path: CacheStat,
}

impl Display for CacheStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cache Statistics:")?;
        writeln!(f, "  Field Fast Path:   {}", self.field_fast_path)?;
        writeln!(f, "  Method Fast Path:  {}", self.method_fast_path)?;
        Ok(())
    }
}

/// Runtime counters.
///
/// All counters use `Ordering::Relaxed`: they are independent and never used to
/// synchronize other memory.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub class_loads: AtomicU64,
    pub class_initializations: AtomicU64,
    /// Slow-path resolutions, i.e. those that missed the per-class cache.
    pub type_resolutions: AtomicU64,
    pub string_resolutions: AtomicU64,
    pub field_resolutions: AtomicU64,
    pub method_resolutions: AtomicU64,
    pub field_fast_hits: AtomicU64,
    pub field_fast_misses: AtomicU64,
    pub method_fast_hits: AtomicU64,
    pub method_fast_misses: AtomicU64,
    pub allocations: AtomicU64,
    pub checkpoints_run: AtomicU64,
    pub suspensions: AtomicU64,
    pub suspend_all_count: AtomicU64,
    pub suspend_all_total_us: AtomicU64,
    pub gc_count: AtomicU64,
}

macro_rules! counters {
    ($($record:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $record(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    counters! {
        record_class_load => class_loads,
        record_class_initialization => class_initializations,
        record_type_resolution => type_resolutions,
        record_string_resolution => string_resolutions,
        record_field_resolution => field_resolutions,
        record_method_resolution => method_resolutions,
        record_field_fast_hit => field_fast_hits,
        record_field_fast_miss => field_fast_misses,
        record_method_fast_hit => method_fast_hits,
        record_method_fast_miss => method_fast_misses,
        record_allocation => allocations,
        record_checkpoint => checkpoints_run,
        record_suspension => suspensions,
        record_gc => gc_count,
    }

    pub fn record_suspend_all(&self, duration: Duration) {
        self.suspend_all_total_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.suspend_all_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn cache_statistics(&self) -> CacheStats {
        CacheStats {
            field_fast_path: CacheStat::new(
                Self::get(&self.field_fast_hits),
                Self::get(&self.field_fast_misses),
            ),
            method_fast_path: CacheStat::new(
                Self::get(&self.method_fast_hits),
                Self::get(&self.method_fast_misses),
            ),
        }
    }
}

impl Display for RuntimeMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Runtime Metrics:")?;
        writeln!(f, "  Classes loaded:       {}", Self::get(&self.class_loads))?;
        writeln!(f, "  Classes initialized:  {}", Self::get(&self.class_initializations))?;
        writeln!(
            f,
            "  Resolutions:          types {}, strings {}, fields {}, methods {}",
            Self::get(&self.type_resolutions),
            Self::get(&self.string_resolutions),
            Self::get(&self.field_resolutions),
            Self::get(&self.method_resolutions)
        )?;
        writeln!(f, "  Allocations:          {}", Self::get(&self.allocations))?;
        writeln!(f, "  Checkpoints run:      {}", Self::get(&self.checkpoints_run))?;
        writeln!(f, "  Suspensions:          {}", Self::get(&self.suspensions))?;
        let count = Self::get(&self.suspend_all_count);
        let total = Self::get(&self.suspend_all_total_us);
        writeln!(
            f,
            "  Suspend-all pauses:   {} (avg {}us)",
            count,
            if count == 0 { 0 } else { total / count }
        )?;
        write!(f, "{}", self.cache_statistics())
    }
}
