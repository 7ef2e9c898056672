use std::cell::Cell;
use std::rc::Rc;
use tickloop_scheduler::{Flow, LoopError, MainLoop, ManualHost, Timing, TimingMode};

fn counting_loop(host: &ManualHost, timing: Timing) -> (MainLoop<ManualHost>, Rc<Cell<u32>>) {
    let main_loop = MainLoop::new(host.clone());
    let runs = Rc::new(Cell::new(0));
    {
        let runs = runs.clone();
        main_loop
            .start(timing, move |_| {
                runs.set(runs.get() + 1);
                Ok(Flow::Continue)
            })
            .unwrap();
    }
    (main_loop, runs)
}

#[test]
fn test_start_twice_is_rejected() {
    let host = ManualHost::new();
    let (main_loop, _runs) = counting_loop(&host, Timing::immediate());

    let err = main_loop
        .start(Timing::fixed_delay(10.0), |_| Ok(Flow::Continue))
        .unwrap_err();
    assert!(matches!(err, LoopError::AlreadyRunning));
    assert_eq!(main_loop.timing(), Timing::immediate());

    main_loop.cancel();
    main_loop.cancel();
    assert!(!main_loop.is_configured());
    assert!(main_loop.start(Timing::fixed_delay(10.0), |_| Ok(Flow::Continue)).is_ok());
}

#[test]
fn test_pause_resume_restores_ticking_without_duplicates() {
    let host = ManualHost::new();
    let (main_loop, runs) = counting_loop(&host, Timing::fixed_delay(10.0));

    host.step();
    assert_eq!(runs.get(), 1);

    // The tick armed by the last frame is still pending in the host.
    main_loop.pause();
    assert!(!main_loop.is_active());
    assert_eq!(main_loop.method(), "");

    main_loop.resume();
    assert!(main_loop.is_active());
    assert_eq!(main_loop.timing(), Timing::fixed_delay(10.0));
    assert_eq!(host.pending_timers(), 2);

    // Only the fresh arming runs the payload; the stale one is a no-op.
    host.run_until(20.0);
    assert_eq!(runs.get(), 2);
    assert_eq!(host.pending_timers(), 1);
}

#[test]
fn test_double_pause_single_resume_stays_inactive() {
    let host = ManualHost::new();
    let (main_loop, runs) = counting_loop(&host, Timing::immediate());

    main_loop.pause();
    main_loop.pause();
    main_loop.resume();

    assert!(!main_loop.is_active());
    host.run_steps(10);
    assert_eq!(runs.get(), 0);

    main_loop.resume();
    assert!(main_loop.is_active());
    host.run_steps(3);
    assert_eq!(runs.get(), 3);
}

#[test]
fn test_generation_increments_on_pause_and_resume() {
    let host = ManualHost::new();
    let (main_loop, _runs) = counting_loop(&host, Timing::immediate());

    let before = main_loop.generation();
    main_loop.pause();
    main_loop.resume();
    assert_eq!(main_loop.generation(), before + 2);
}

#[test]
fn test_resume_without_start_is_noop() {
    let host = ManualHost::new();
    let main_loop = MainLoop::new(host.clone());

    main_loop.resume();

    assert!(!main_loop.is_active());
    assert!(!host.step());
}

#[test]
fn test_start_unarmed_waits_for_resume() {
    let host = ManualHost::new();
    let main_loop = MainLoop::new(host.clone());
    let runs = Rc::new(Cell::new(0));
    {
        let runs = runs.clone();
        main_loop
            .start_unarmed(Timing::immediate(), move |_| {
                runs.set(runs.get() + 1);
                Ok(Flow::Continue)
            })
            .unwrap();
    }
    assert!(main_loop.is_configured());
    assert!(!host.step());

    main_loop.resume();
    host.run_steps(2);
    assert_eq!(runs.get(), 2);
}

#[test]
fn test_payload_can_pause_itself() {
    let host = ManualHost::new();
    let main_loop = MainLoop::new(host.clone());
    let runs = Rc::new(Cell::new(0));
    {
        let runs = runs.clone();
        main_loop
            .start(Timing::immediate(), move |main_loop| {
                runs.set(runs.get() + 1);
                if runs.get() == 2 {
                    main_loop.pause();
                }
                Ok(Flow::Continue)
            })
            .unwrap();
    }

    host.run_steps(10);
    assert_eq!(runs.get(), 2);
    assert!(!main_loop.is_active());
    assert!(main_loop.is_configured());
}

#[test]
fn test_exit_flow_cancels_loop() {
    let host = ManualHost::new();
    let main_loop = MainLoop::new(host.clone());
    let runs = Rc::new(Cell::new(0));
    {
        let runs = runs.clone();
        main_loop
            .start(Timing::immediate(), move |_| {
                runs.set(runs.get() + 1);
                Ok(if runs.get() == 3 { Flow::Exit } else { Flow::Continue })
            })
            .unwrap();
    }

    host.run_steps(10);
    assert_eq!(runs.get(), 3);
    assert!(!main_loop.is_configured());
    assert!(host.take_faults().is_empty());
}

#[test]
fn test_payload_fault_stops_loop_and_reaches_host() {
    let host = ManualHost::new();
    let main_loop = MainLoop::new(host.clone());
    let runs = Rc::new(Cell::new(0));
    {
        let runs = runs.clone();
        main_loop
            .start(Timing::immediate(), move |_| {
                runs.set(runs.get() + 1);
                Err("out of memory".into())
            })
            .unwrap();
    }

    host.run_steps(10);
    assert_eq!(runs.get(), 1);
    assert!(!main_loop.is_active());
    assert!(main_loop.is_configured());

    let faults = host.take_faults();
    assert_eq!(faults.len(), 1);
    assert!(matches!(&faults[0], LoopError::PayloadFault { label, .. } if label == "payload"));
    assert!(faults[0].to_string().contains("out of memory"));
}

#[test]
fn test_blocker_fault_reports_its_label() {
    let host = ManualHost::new();
    let (main_loop, runs) = counting_loop(&host, Timing::immediate());
    main_loop.push_blocker("decode assets", |_| Err("corrupt archive".into()));

    host.run_steps(10);

    assert_eq!(runs.get(), 0);
    assert!(!main_loop.is_active());
    let faults = host.take_faults();
    assert!(matches!(&faults[0], LoopError::PayloadFault { label, .. } if label == "decode assets"));
}

#[test]
fn test_abort_stops_ticks() {
    let host = ManualHost::new();
    let (_main_loop, runs) = counting_loop(&host, Timing::immediate());

    host.step();
    host.abort();
    host.run_steps(10);
    assert_eq!(runs.get(), 1);
}

#[test]
fn test_set_timing_mode_requires_configured_loop() {
    let host = ManualHost::new();
    let main_loop = MainLoop::new(host.clone());

    let err = main_loop.set_timing_mode(Timing::immediate()).unwrap_err();
    assert!(matches!(err, LoopError::NoActiveLoop));
    assert_eq!(main_loop.timing().mode, TimingMode::DisplaySync);
}

#[test]
fn test_dropping_every_handle_stops_the_loop() {
    let host = ManualHost::new();
    let (main_loop, runs) = counting_loop(&host, Timing::immediate());
    drop(main_loop);

    host.run_steps(5);
    assert_eq!(runs.get(), 0);
}

#[test]
fn test_payload_restart_after_cancel() {
    let host = ManualHost::new();
    let main_loop = MainLoop::new(host.clone());
    let log = Rc::new(std::cell::RefCell::new(Vec::new()));
    {
        let log = log.clone();
        main_loop
            .start(Timing::immediate(), move |main_loop| {
                log.borrow_mut().push("old");
                main_loop.cancel();
                let log = log.clone();
                main_loop.start(Timing::immediate(), move |_| {
                    log.borrow_mut().push("new");
                    Ok(Flow::Continue)
                })?;
                Ok(Flow::Continue)
            })
            .unwrap();
    }

    assert!(host.step());
    assert_eq!(host.pending_immediates(), 1);

    host.run_steps(3);
    assert_eq!(*log.borrow(), vec!["old", "new", "new", "new"]);
    assert!(host.take_faults().is_empty());
}

#[test]
fn test_invalid_timing_is_rejected() {
    let host = ManualHost::new();
    let main_loop = MainLoop::new(host.clone());
    let fractional = Timing {
        mode: TimingMode::DisplaySync,
        value: 2.5,
    };

    let err = main_loop
        .start(fractional, |_| Ok(Flow::Continue))
        .unwrap_err();
    assert!(matches!(err, LoopError::InvalidTiming { .. }));
    assert!(!main_loop.is_configured());

    main_loop
        .start(Timing::display_sync(2), |_| Ok(Flow::Continue))
        .unwrap();
    let generation = main_loop.generation();
    for timing in [
        fractional,
        Timing {
            mode: TimingMode::DisplaySync,
            value: f64::INFINITY,
        },
        Timing::fixed_delay(-5.0),
        Timing::fixed_delay(f64::NAN),
    ] {
        let err = main_loop.set_timing_mode(timing).unwrap_err();
        assert!(matches!(err, LoopError::InvalidTiming { .. }));
    }
    assert_eq!(main_loop.timing(), Timing::display_sync(2));
    assert_eq!(main_loop.generation(), generation);
}
