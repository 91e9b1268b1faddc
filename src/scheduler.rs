/*
 *  scheduler.rs
 *
 *  dialbridge - one poll, many widgets
 *  (c) 2020-26 Stuart Hunter
 *
 *  The one refresh timer shared by every visible widget
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use log::{debug, info};
use tokio::time::{self, Duration, Instant, Interval, MissedTickBehavior};

#[derive(Debug)]
struct RunningTimer {
    interval: Interval,
    period: Duration,
    run_id: u64,
}

#[derive(Debug)]
enum SchedulerState {
    Stopped,
    Running(RunningTimer),
}

/// Recurring refresh timer, owned by the coordinator's event loop.
///
/// There is only ever one `Interval` alive, and only while `Running`.
/// The timer never fires immediately on start; the caller runs the first
/// tick itself so widgets do not wait a full period for their first update.
#[derive(Debug)]
pub struct GlobalUpdateScheduler {
    state: SchedulerState,
    starts: u64,
}

impl Default for GlobalUpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalUpdateScheduler {
    pub fn new() -> Self {
        GlobalUpdateScheduler { state: SchedulerState::Stopped, starts: 0 }
    }

    /// `Stopped -> Running`. Returns false, and changes nothing, when
    /// already running.
    pub fn start(&mut self, period: Duration) -> bool {
        if let SchedulerState::Running(timer) = &self.state {
            info!("scheduler already running (run {}, every {:?}), start ignored", timer.run_id, timer.period);
            return false;
        }

        let mut interval = time::interval_at(Instant::now() + period, period);
        // a late tick is dropped, the next stays on the original grid
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.starts += 1;
        let run_id = self.starts;
        info!("scheduler started (run {}, every {:?})", run_id, period);
        self.state = SchedulerState::Running(RunningTimer { interval, period, run_id });
        true
    }

    /// `Running -> Stopped`. Drops the timer; work already issued is not
    /// touched.
    pub fn stop(&mut self) -> bool {
        match std::mem::replace(&mut self.state, SchedulerState::Stopped) {
            SchedulerState::Running(timer) => {
                info!("scheduler stopped (run {})", timer.run_id);
                true
            }
            SchedulerState::Stopped => {
                debug!("scheduler already stopped");
                false
            }
        }
    }

    pub fn restart(&mut self, period: Duration) {
        self.stop();
        self.start(period);
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, SchedulerState::Running(_))
    }

    /// Identifies the current run. Changes only on a fresh start.
    pub fn run_id(&self) -> Option<u64> {
        match &self.state {
            SchedulerState::Running(timer) => Some(timer.run_id),
            SchedulerState::Stopped => None,
        }
    }

    pub fn period(&self) -> Option<Duration> {
        match &self.state {
            SchedulerState::Running(timer) => Some(timer.period),
            SchedulerState::Stopped => None,
        }
    }

    /// Number of `Stopped -> Running` transitions so far.
    pub fn starts(&self) -> u64 {
        self.starts
    }

    /// Resolves on the next tick of the current run. Never resolves while
    /// stopped, so it can sit in a `select!` unconditionally.
    pub async fn tick(&mut self) -> u64 {
        match &mut self.state {
            SchedulerState::Running(timer) => {
                timer.interval.tick().await;
                timer.run_id
            }
            SchedulerState::Stopped => std::future::pending().await,
        }
    }
}
