//! Wall-clock accounting per field and phase, enabled by the `timing` feature.
//!
//! Without the feature every recorder just runs its closure.

use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Assembly,
    LinearSolve,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PhaseTotals {
    pub calls: usize,
    pub elapsed: Duration,
}

/// Totals keyed by field name, e.g. `U` assembly or `p` linear solve.
#[derive(Default, Clone, Debug)]
pub struct TimingStats {
    pub fields: BTreeMap<String, BTreeMap<Phase, PhaseTotals>>,
    pub total_time: Duration,
}

impl TimingStats {
    pub fn record(&mut self, field: &str, phase: Phase, elapsed: Duration) {
        let totals = self
            .fields
            .entry(field.to_string())
            .or_default()
            .entry(phase)
            .or_default();
        totals.calls += 1;
        totals.elapsed += elapsed;
    }

    pub fn phase_total(&self, phase: Phase) -> PhaseTotals {
        self.fields
            .values()
            .filter_map(|phases| phases.get(&phase))
            .fold(PhaseTotals::default(), |acc, t| PhaseTotals {
                calls: acc.calls + t.calls,
                elapsed: acc.elapsed + t.elapsed,
            })
    }

    pub fn print_summary(&self) {
        if self.fields.is_empty() {
            return;
        }
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let assembly = self.phase_total(Phase::Assembly);
        let solve = self.phase_total(Phase::LinearSolve);

        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "SOLVER TIMING SUMMARY");
        println!("{}", "=".repeat(60));
        println!("Total run time:                {:.3}s", self.total_time.as_secs_f64());
        println!("{}", "-".repeat(60));
        println!("{:<10} {:>12} {:>8} {:>14} {:>8}", "Field", "assembly ms", "calls", "lin.solve ms", "calls");
        for (field, phases) in &self.fields {
            let a = phases.get(&Phase::Assembly).copied().unwrap_or_default();
            let s = phases.get(&Phase::LinearSolve).copied().unwrap_or_default();
            println!(
                "{:<10} {:>12.3} {:>8} {:>14.3} {:>8}",
                field,
                ms(a.elapsed),
                a.calls,
                ms(s.elapsed),
                s.calls
            );
        }
        println!("{}", "=".repeat(60));
        let overhead = self.total_time.saturating_sub(assembly.elapsed + solve.elapsed);
        println!("Overhead/Other:                {:>9.3}ms\n", ms(overhead));
    }
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING_STATS: std::cell::RefCell<TimingStats> = std::cell::RefCell::new(TimingStats::default());
}

#[cfg(feature = "timing")]
fn timed<R>(field: &str, phase: Phase, f: impl FnOnce() -> R) -> R {
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| stats.borrow_mut().record(field, phase, elapsed));
    result
}

#[cfg(not(feature = "timing"))]
fn timed<R>(_field: &str, _phase: Phase, f: impl FnOnce() -> R) -> R {
    f()
}

pub fn record_assembly<R>(field: &str, f: impl FnOnce() -> R) -> R {
    timed(field, Phase::Assembly, f)
}

pub fn record_linear_solve<R>(field: &str, f: impl FnOnce() -> R) -> R {
    timed(field, Phase::LinearSolve, f)
}

#[cfg(feature = "timing")]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        s.total_time = total_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TimingStats {
        total_time,
        ..TimingStats::default()
    }
}

pub fn finalize_and_print(total_time: Duration) {
    finalize_timing(total_time).print_summary();
}
