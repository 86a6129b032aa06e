// src/schedule.rs
//! Minute-of-hour phase windows plus the run ledger that keeps each window
//! occurrence to a single execution.
//!
//! | minutes   | phase   |
//! |-----------|---------|
//! | 0         | Publish |
//! | 1..=10    | Scrape  |
//! | 20..=25   | Analyze |
//! | otherwise | Standby |

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Scrape,
    Analyze,
    Publish,
    Standby,
}

impl Phase {
    /// Phases that actually do work, in pipeline order.
    pub const ACTIVE: [Phase; 3] = [Phase::Scrape, Phase::Analyze, Phase::Publish];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Scrape => "scrape",
            Phase::Analyze => "analyze",
            Phase::Publish => "publish",
            Phase::Standby => "standby",
        }
    }

    /// Inclusive minute range of this phase's window.
    fn minutes(self) -> Option<(u32, u32)> {
        match self {
            Phase::Publish => Some((0, 0)),
            Phase::Scrape => Some((1, 10)),
            Phase::Analyze => Some((20, 25)),
            Phase::Standby => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn phase_for_minute(minute: u32) -> Phase {
    match minute {
        0 => Phase::Publish,
        1..=10 => Phase::Scrape,
        20..=25 => Phase::Analyze,
        _ => Phase::Standby,
    }
}

pub fn phase_at(now: DateTime<Utc>) -> Phase {
    phase_for_minute(now.minute())
}

fn hour_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(Duration::hours(1)).unwrap_or(now)
}

/// `[start, end)` of `phase`'s window inside the hour beginning at `hour`.
fn window_in_hour(phase: Phase, hour: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (from, to) = phase.minutes()?;
    Some((
        hour + Duration::minutes(from as i64),
        hour + Duration::minutes(to as i64 + 1),
    ))
}

/// The most recent occurrence of `phase`'s window that has fully closed by `now`.
pub fn last_closed_window(phase: Phase, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let hour = hour_start(now);
    let this_hour = window_in_hour(phase, hour)?;
    if this_hour.1 <= now {
        Some(this_hour)
    } else {
        window_in_hour(phase, hour - Duration::hours(1))
    }
}

/// Last successful run per phase.
pub type Ledger = HashMap<Phase, DateTime<Utc>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    OutsideWindow,
    AlreadyRan,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::OutsideWindow => "outside_window",
            SkipReason::AlreadyRan => "already_ran",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run { phase: Phase, catch_up: bool },
    Standby(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickPlan {
    pub decision: Decision,
    /// Phases whose last closed window passed without a recorded run.
    pub missed: Vec<Phase>,
}

/// Decide what a tick at `now` should do, given the run ledger.
///
/// A phase inside its window runs unless the ledger shows a run at or after the
/// window's start. A phase that has never run is not reported as missed.
pub fn plan_tick(now: DateTime<Utc>, ledger: &Ledger, catch_up_missed: bool) -> TickPlan {
    let missed: Vec<Phase> = Phase::ACTIVE
        .into_iter()
        .filter(|p| {
            let Some(last) = ledger.get(p) else {
                return false;
            };
            last_closed_window(*p, now).is_some_and(|(start, _)| *last < start)
        })
        .collect();

    let current = phase_at(now);
    let decision = match window_in_hour(current, hour_start(now)) {
        Some((start, _)) => {
            if ledger.get(&current).is_some_and(|last| *last >= start) {
                Decision::Standby(SkipReason::AlreadyRan)
            } else {
                Decision::Run {
                    phase: current,
                    catch_up: false,
                }
            }
        }
        None => match missed.first() {
            Some(p) if catch_up_missed => Decision::Run {
                phase: *p,
                catch_up: true,
            },
            _ => Decision::Standby(SkipReason::OutsideWindow),
        },
    };

    TickPlan { decision, missed }
}
