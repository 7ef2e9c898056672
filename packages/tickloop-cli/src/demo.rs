use crate::config::DemoConfig;
use anyhow::Result;
use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};
use tickloop_scheduler::{BoxError, Flow, Host, MainLoop, ManualHost};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub frames: u32,
    pub blockers: u32,
    pub elapsed_ms: f64,
    pub last_status: Option<String>,
}

/// Runs the configured demo against a [`ManualHost`] pumped in real time.
pub fn run(config: &DemoConfig) -> Result<Report> {
    let clock = WallClock::new();
    let host = ManualHost::new();
    host.set_refresh_interval(config.refresh_interval_ms);
    let main_loop = MainLoop::with_config(host.clone(), config.loop_config.clone());

    let blockers_run = Rc::new(Cell::new(0));
    main_loop.set_expected_blockers(config.blockers);
    for i in 0..config.blockers + config.uncounted_blockers {
        let host = host.clone();
        let cost = config.blocker_cost_ms;
        let blockers_run = blockers_run.clone();
        let task = move |_: &MainLoop<ManualHost>| -> Result<(), BoxError> {
            clock.work(&host, cost);
            blockers_run.set(blockers_run.get() + 1);
            Ok(())
        };
        if i < config.blockers {
            main_loop.push_blocker(format!("asset {}", i + 1), task);
        } else {
            main_loop.push_uncounted_blocker(format!("extra {}", i + 1 - config.blockers), task);
        }
    }

    let frames = Rc::new(Cell::new(0));
    {
        let host = host.clone();
        let frames = frames.clone();
        let target = config.frames;
        let cost = config.frame_cost_ms;
        main_loop.start(config.timing, move |_| {
            clock.work(&host, cost);
            frames.set(frames.get() + 1);
            Ok(if frames.get() >= target {
                Flow::Exit
            } else {
                Flow::Continue
            })
        })?;
    }
    info!(mode = ?config.timing.mode, value = config.timing.value, "demo loop started");

    clock.pump(&host);

    if let Some(fault) = host.take_faults().into_iter().next() {
        return Err(fault.into());
    }
    Ok(Report {
        frames: frames.get(),
        blockers: blockers_run.get(),
        elapsed_ms: host.now(),
        last_status: host.last_status(),
    })
}

#[derive(Clone, Copy)]
struct WallClock {
    start: Instant,
}

impl WallClock {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Simulates `cost_ms` of work and lets the host clock catch up.
    fn work(&self, host: &ManualHost, cost_ms: f64) {
        if cost_ms > 0.0 {
            thread::sleep(Duration::from_secs_f64(cost_ms / 1000.0));
        }
        host.set_now(self.elapsed_ms());
    }

    /// Steps the host until nothing is pending, sleeping until each deadline.
    fn pump(&self, host: &ManualHost) {
        loop {
            host.set_now(self.elapsed_ms());
            let Some(at) = host.next_event_at() else {
                break;
            };
            let wait = at - host.now();
            if wait > 0.0 {
                thread::sleep(Duration::from_secs_f64(wait / 1000.0));
                continue;
            }
            host.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickloop_scheduler::Timing;

    fn quick(timing: Timing) -> DemoConfig {
        DemoConfig {
            timing,
            frames: 4,
            blockers: 2,
            uncounted_blockers: 1,
            blocker_cost_ms: 0.0,
            frame_cost_ms: 0.0,
            refresh_interval_ms: 1.0,
            ..DemoConfig::default()
        }
    }

    #[test]
    fn runs_every_mode_to_completion() {
        for timing in [
            Timing::immediate(),
            Timing::display_sync(2),
            Timing::fixed_delay(1.0),
        ] {
            let report = run(&quick(timing)).unwrap();
            assert_eq!(report.frames, 4);
            assert_eq!(report.blockers, 3);
        }
    }

    #[test]
    fn display_sync_frames_land_in_real_time() {
        let config = DemoConfig {
            frames: 3,
            blockers: 0,
            uncounted_blockers: 0,
            refresh_interval_ms: 16.0,
            ..quick(Timing::display_sync(1))
        };

        let report = run(&config).unwrap();
        assert_eq!(report.frames, 3);
        assert!(report.elapsed_ms >= 48.0);
        assert!(report.elapsed_ms < 1000.0);
    }

    #[test]
    fn status_ends_without_counts() {
        let report = run(&quick(Timing::immediate())).unwrap();
        assert_eq!(report.last_status.as_deref(), Some("Please wait..."));
    }
}
