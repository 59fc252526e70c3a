//! End-to-end pipeline scenarios: serial line in, step pulses out.
//!
//! Each test drives the full stack — serial classification, line
//! interpreter, motion shim, planner, interpolator, supervisor — over
//! the virtual MCU and asserts on the emitted pulses and protocol
//! responses.

use fresa_common::grbl::rt;
use fresa_common::hal::Mcu;
use fresa_common::settings::Settings;
use fresa_common::state::ExecState;
use fresa_core::cnc::Cnc;
use fresa_hal::VirtualMcu;

const PUMP_GUARD: usize = 2_000_000;

fn make_cnc(tune: impl FnOnce(&mut Settings)) -> Cnc<VirtualMcu> {
    let mut settings = Settings {
        step_per_mm: [10.0; 3],
        max_feed_rate: [600.0; 3],
        acceleration: [500.0; 3],
        ..Settings::default()
    };
    tune(&mut settings);

    let mut mcu = VirtualMcu::new();
    settings.save(&mut mcu);
    let mut cnc = Cnc::new(mcu, Settings::default());
    cnc.reset();
    cnc.mcu_mut().take_uart_output();
    cnc
}

fn send_line(cnc: &mut Cnc<VirtualMcu>, line: &str) {
    for byte in line.bytes() {
        cnc.rx_isr(byte);
    }
    cnc.poll_command();
}

fn motion_done(cnc: &Cnc<VirtualMcu>) -> bool {
    cnc.planner().is_empty()
        && cnc.interpolator().is_idle()
        && !cnc.exec_state().contains(ExecState::RUN)
}

fn pump_to_idle(cnc: &mut Cnc<VirtualMcu>) {
    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        if motion_done(cnc) {
            return;
        }
    }
    panic!("motion never completed");
}

// ── S1: two collinear segments at full feed ─────────────────────────

#[test]
fn collinear_segments_run_through_without_deceleration() {
    let mut cnc = make_cnc(|_| {});
    send_line(&mut cnc, "G1X10F600\n");
    send_line(&mut cnc, "X20\n");

    let mut min_junction_feed = f32::INFINITY;
    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        let edges = cnc.mcu().step_edges()[0];
        if (80..120).contains(&edges) {
            min_junction_feed = min_junction_feed.min(cnc.interpolator().rt_feed());
        }
        if motion_done(&cnc) {
            break;
        }
    }

    // Total step count covers both segments exactly.
    assert_eq!(cnc.mcu().step_edges(), [200, 0, 0]);
    // 600 mm/min = 10 mm/s; the junction never dips.
    assert!(
        min_junction_feed > 9.0,
        "junction feed dipped to {min_junction_feed}"
    );
    let out = cnc.mcu_mut().take_uart_output();
    assert_eq!(out.matches("ok").count(), 2);
}

// ── S2: right-angle turn forces a full stop ─────────────────────────

#[test]
fn right_angle_turn_stops_at_junction() {
    let mut cnc = make_cnc(|_| {});
    send_line(&mut cnc, "G1X10F600\n");
    send_line(&mut cnc, "Y10\n");

    let mut corner_feed = f32::INFINITY;
    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        let edges = cnc.mcu().step_edges();
        if edges[0] == 100 && edges[1] <= 1 {
            corner_feed = corner_feed.min(cnc.interpolator().rt_feed());
        }
        if motion_done(&cnc) {
            break;
        }
    }

    assert_eq!(cnc.mcu().step_edges(), [100, 100, 0]);
    assert!(corner_feed < 2.0, "corner feed was {corner_feed}");
}

// ── S3: feed override mid-motion ────────────────────────────────────

#[test]
fn feed_override_retimes_remaining_motion() {
    let mut cnc = make_cnc(|_| {});
    send_line(&mut cnc, "G1X100F600\n");

    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        if cnc.mcu().step_edges()[0] >= 500 {
            break;
        }
    }

    // Three coarse decrements → 70%.
    for _ in 0..3 {
        cnc.rx_isr(rt::FEED_DEC_COARSE);
        cnc.doevents();
    }
    assert_eq!(cnc.planner().overrides().feed, 70);

    // Segments committed before the override still execute at the old
    // speed; let them drain before sampling.
    for _ in 0..50 {
        cnc.doevents();
    }

    let mut max_feed_after = 0.0f32;
    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        max_feed_after = max_feed_after.max(cnc.interpolator().rt_feed());
        if motion_done(&cnc) {
            break;
        }
    }

    // Net length is unchanged; the remaining profile obeys 0.7 × feed.
    assert_eq!(cnc.mcu().step_edges()[0], 1000);
    assert!(
        max_feed_after <= 10.0 * 0.7 + 0.5,
        "feed {max_feed_after} exceeds the override ceiling"
    );
}

// ── S4: hold, then reset during motion ──────────────────────────────

#[test]
fn hold_then_reset_aborts_with_reference_lost() {
    let mut cnc = make_cnc(|s| s.homing_enabled = true);
    // Homing machines boot locked: unlock to run the test motion.
    send_line(&mut cnc, "$X\n");
    send_line(&mut cnc, "G1X50F600\n");

    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        if cnc.mcu().step_edges()[0] >= 100 {
            break;
        }
    }

    cnc.rx_isr(rt::FEED_HOLD);
    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        if !cnc.exec_state().contains(ExecState::RUN) {
            break;
        }
    }
    let held_at = cnc.mcu().step_edges()[0];
    assert!(held_at < 500, "hold did not stop motion early");
    assert!(cnc.exec_state().contains(ExecState::HOLD));
    // The planner queue is retained through the hold.
    assert!(!cnc.planner().is_empty());

    cnc.rx_isr(rt::RESET);
    assert!(cnc.exec_state().contains(ExecState::ABORT));
    cnc.doevents(); // dispatch the reset
    cnc.doevents(); // interlock emits the alarm
    let out = cnc.mcu_mut().take_uart_output();
    assert!(out.contains("ALARM:0"), "missing reset alarm in {out:?}");
    assert_eq!(cnc.mcu().step_edges()[0], held_at, "motion after abort");

    cnc.reset();
    assert!(cnc.exec_state().contains(ExecState::NOHOME));
    assert!(cnc.exec_state().contains(ExecState::LOCKED));
}

// ── S5: hard limit asserted mid-run ─────────────────────────────────

#[test]
fn hard_limit_mid_run_latches_alarm_until_cleared() {
    let mut cnc = make_cnc(|s| s.hard_limits_enabled = true);
    send_line(&mut cnc, "G1X50F600\n");

    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        if cnc.mcu().step_edges()[0] >= 100 {
            break;
        }
    }

    cnc.mcu_mut().inject_limits(0b001);
    cnc.doevents();
    cnc.doevents();

    let state = cnc.exec_state();
    assert!(state.contains(ExecState::LIMITS));
    assert!(state.contains(ExecState::ABORT));
    let out = cnc.mcu_mut().take_uart_output();
    assert!(out.contains("ALARM:1"), "missing hard-limit alarm in {out:?}");

    let frozen = cnc.mcu().step_edges()[0];
    for _ in 0..100 {
        cnc.doevents();
    }
    assert_eq!(cnc.mcu().step_edges()[0], frozen, "motion continued in alarm");

    // With the switch still pressed, a reset keeps the limit latched.
    cnc.reset();
    cnc.doevents();
    assert!(cnc.exec_state().contains(ExecState::LIMITS));

    // Clearing the input and resetting recovers the machine.
    cnc.mcu_mut().inject_limits(0);
    cnc.reset();
    cnc.doevents();
    assert!(!cnc.exec_state().contains(ExecState::LIMITS));
    assert!(!cnc.exec_state().has_alarm());
}

// ── S6: real-time interception inside a line ────────────────────────

#[test]
fn report_byte_inside_line_reports_without_corrupting_it() {
    let mut cnc = make_cnc(|_| {});

    for byte in "G1X10?F600\n".bytes() {
        cnc.rx_isr(byte);
    }
    // The report byte acts within one event-pump cycle, before the
    // line is even parsed.
    cnc.doevents();
    cnc.poll_command();

    let out = cnc.mcu_mut().take_uart_output();
    let report_at = out.find('<').expect("no status report");
    let ok_at = out.find("ok").expect("no line response");
    assert!(report_at < ok_at, "report did not precede the line response");

    // The enqueued line parsed as if `?` was never there.
    assert_eq!(cnc.planner().inflight(), 1);
    let block = cnc.planner().get_block().unwrap();
    assert!((block.distance - 10.0).abs() < 1e-4);

    pump_to_idle(&mut cnc);
    assert_eq!(cnc.mcu().step_edges(), [100, 0, 0]);
}

// ── Door: hold with tool shutdown ───────────────────────────────────

#[test]
fn safety_door_holds_and_stops_tools() {
    let mut cnc = make_cnc(|_| {});
    send_line(&mut cnc, "M3S500\n");
    send_line(&mut cnc, "G1X50F600\n");

    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        if cnc.mcu().step_edges()[0] >= 50 {
            break;
        }
    }
    assert!(cnc.mcu().get_pwm(0) > 0, "spindle should be running");

    cnc.rx_isr(rt::SAFETY_DOOR);
    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        if !cnc.exec_state().contains(ExecState::RUN) {
            break;
        }
    }
    cnc.doevents();

    let state = cnc.exec_state();
    assert!(state.contains(ExecState::DOOR));
    assert!(state.contains(ExecState::HOLD));
    assert_eq!(cnc.mcu().get_pwm(0), 0, "door must stop the spindle");
}

// ── Status report during motion ─────────────────────────────────────

#[test]
fn status_report_reflects_run_state_and_position() {
    let mut cnc = make_cnc(|_| {});
    send_line(&mut cnc, "G1X10F600\n");

    for _ in 0..PUMP_GUARD {
        cnc.doevents();
        if cnc.mcu().step_edges()[0] >= 50 {
            break;
        }
    }
    cnc.mcu_mut().take_uart_output();

    cnc.rx_isr(rt::REPORT);
    cnc.doevents();
    let out = cnc.mcu_mut().take_uart_output();
    assert!(out.starts_with("<Run|MPos:"), "unexpected report {out:?}");
    assert!(out.contains("|Ov:100,100,100>"));

    pump_to_idle(&mut cnc);
    cnc.mcu_mut().take_uart_output();
    cnc.rx_isr(rt::REPORT);
    cnc.doevents();
    let out = cnc.mcu_mut().take_uart_output();
    assert!(out.starts_with("<Idle|MPos:10.000,"), "{out:?}");
}

// ── Dwell in-line ───────────────────────────────────────────────────

#[test]
fn dwell_line_pauses_between_motions() {
    let mut cnc = make_cnc(|_| {});
    send_line(&mut cnc, "G1X5F600\n");
    send_line(&mut cnc, "G4P0.5\n");
    send_line(&mut cnc, "X10\n");
    pump_to_idle(&mut cnc);
    assert_eq!(cnc.mcu().step_edges()[0], 100);
    let out = cnc.mcu_mut().take_uart_output();
    assert_eq!(out.matches("ok").count(), 3);
}
