// ============================================================
// Layer 5 — Learning-Rate Schedules
// ============================================================
// Burn optimisers take the learning rate as an argument to every
// step() call, so a schedule here is just a pure function from a
// step counter to a learning rate. Which counter drives it depends
// on the schedule's interval:
//
//   OneCycleLR    per optimiser step   cosine warm-up to max_lr,
//                                      then cosine anneal to ~0;
//                                      beta_1 stays fixed
//   LinearWarmup  per epoch            linear ramp over the first
//                                      10% of epochs, then linear
//                                      decay to zero

use std::f64::consts::PI;

use crate::domain::options::LrSchedulerKind;

/// Peak learning rate of the one-cycle policy (independent of the base lr).
pub const ONE_CYCLE_MAX_LR: f64 = 1e-2;
const ONE_CYCLE_PCT_START: f64 = 0.3;
const ONE_CYCLE_DIV_FACTOR: f64 = 25.0;
const ONE_CYCLE_FINAL_DIV_FACTOR: f64 = 1e4;
const WARMUP_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleInterval {
    Step,
    Epoch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LrSchedule {
    OneCycle {
        max_lr: f64,
        total_steps: usize,
    },
    LinearWarmup {
        base_lr: f64,
        warmup_steps: usize,
        total_steps: usize,
    },
}

impl LrSchedule {
    pub fn new(kind: LrSchedulerKind, base_lr: f64, epochs: usize, steps_per_epoch: usize) -> Self {
        match kind {
            LrSchedulerKind::OneCycle => LrSchedule::OneCycle {
                max_lr: ONE_CYCLE_MAX_LR,
                total_steps: epochs * steps_per_epoch,
            },
            LrSchedulerKind::LinearWarmup => {
                let warmup_steps = (epochs as f64 * WARMUP_FRACTION) as usize;
                tracing::info!(
                    "Using linear warmup with {}/{} warmup steps",
                    warmup_steps,
                    epochs
                );
                LrSchedule::LinearWarmup {
                    base_lr,
                    warmup_steps,
                    total_steps: epochs,
                }
            }
        }
    }

    pub fn interval(&self) -> ScheduleInterval {
        match self {
            LrSchedule::OneCycle { .. } => ScheduleInterval::Step,
            LrSchedule::LinearWarmup { .. } => ScheduleInterval::Epoch,
        }
    }

    /// Metric a plateau-aware orchestrator should watch, if any.
    pub fn monitor(&self) -> Option<&'static str> {
        match self {
            LrSchedule::OneCycle { .. } => Some("val_loss"),
            LrSchedule::LinearWarmup { .. } => None,
        }
    }

    /// Learning rate for the given counters; picks the one matching the interval.
    pub fn lr_for(&self, epoch: usize, global_step: usize) -> f64 {
        match self.interval() {
            ScheduleInterval::Step => self.lr_at(global_step),
            ScheduleInterval::Epoch => self.lr_at(epoch),
        }
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        match *self {
            LrSchedule::OneCycle { max_lr, total_steps } => one_cycle_lr(max_lr, total_steps, step),
            LrSchedule::LinearWarmup {
                base_lr,
                warmup_steps,
                total_steps,
            } => base_lr * linear_warmup_factor(warmup_steps, total_steps, step),
        }
    }
}

fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}

/// Learning rate only. AdamW's beta_1 is set once in the optimiser
/// config and is not cycled against the rate (no momentum cycling).
fn one_cycle_lr(max_lr: f64, total_steps: usize, step: usize) -> f64 {
    let initial_lr = max_lr / ONE_CYCLE_DIV_FACTOR;
    let min_lr = initial_lr / ONE_CYCLE_FINAL_DIV_FACTOR;
    let step = step as f64;
    let warm_end = ONE_CYCLE_PCT_START * total_steps as f64 - 1.0;
    let last = total_steps as f64 - 1.0;

    if step <= warm_end {
        let pct = if warm_end > 0.0 { step / warm_end } else { 1.0 };
        cosine_anneal(initial_lr, max_lr, pct)
    } else {
        let span = last - warm_end;
        let pct = if span > 0.0 { ((step - warm_end) / span).min(1.0) } else { 1.0 };
        cosine_anneal(max_lr, min_lr, pct)
    }
}

fn linear_warmup_factor(warmup_steps: usize, total_steps: usize, step: usize) -> f64 {
    if step < warmup_steps {
        step as f64 / warmup_steps.max(1) as f64
    } else {
        let remaining = total_steps.saturating_sub(step) as f64;
        (remaining / total_steps.saturating_sub(warmup_steps).max(1) as f64).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_one_cycle_shape() {
        let schedule = LrSchedule::new(LrSchedulerKind::OneCycle, 5e-5, 10, 100);
        assert_eq!(schedule.interval(), ScheduleInterval::Step);
        assert_eq!(schedule.monitor(), Some("val_loss"));

        let start = schedule.lr_at(0);
        assert!(close(start, ONE_CYCLE_MAX_LR / 25.0));
        // Peak at pct_start * total - 1
        assert!(close(schedule.lr_at(299), ONE_CYCLE_MAX_LR));
        let end = schedule.lr_at(999);
        assert!(close(end, ONE_CYCLE_MAX_LR / 25.0 / 1e4));
        assert!(schedule.lr_at(150) > start && schedule.lr_at(150) < ONE_CYCLE_MAX_LR);
        assert!(schedule.lr_at(600) < ONE_CYCLE_MAX_LR && schedule.lr_at(600) > end);
    }

    #[test]
    fn test_linear_warmup_shape() {
        let schedule = LrSchedule::new(LrSchedulerKind::LinearWarmup, 1e-3, 20, 500);
        assert_eq!(schedule.interval(), ScheduleInterval::Epoch);
        assert_eq!(
            schedule,
            LrSchedule::LinearWarmup { base_lr: 1e-3, warmup_steps: 2, total_steps: 20 }
        );
        assert!(close(schedule.lr_at(0), 0.0));
        assert!(close(schedule.lr_at(1), 5e-4));
        assert!(close(schedule.lr_at(2), 1e-3));
        assert!(close(schedule.lr_at(11), 1e-3 * 9.0 / 18.0));
        assert!(close(schedule.lr_at(20), 0.0));
        assert!(close(schedule.lr_at(25), 0.0));
    }

    #[test]
    fn test_short_runs_have_no_warmup() {
        // int(5 * 0.1) == 0: starts at the full rate
        let schedule = LrSchedule::new(LrSchedulerKind::LinearWarmup, 1e-3, 5, 10);
        assert!(close(schedule.lr_at(0), 1e-3));
    }

    #[test]
    fn test_lr_for_uses_matching_counter() {
        let per_epoch = LrSchedule::new(LrSchedulerKind::LinearWarmup, 1e-3, 20, 10);
        assert!(close(per_epoch.lr_for(1, 999), per_epoch.lr_at(1)));
        let per_step = LrSchedule::new(LrSchedulerKind::OneCycle, 1e-3, 2, 10);
        assert!(close(per_step.lr_for(1, 7), per_step.lr_at(7)));
    }
}
