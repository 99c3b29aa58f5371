//! Keepalive
//!
//! An asynchronous machine whose background scheduler pops a keepalive
//! timer in real time.
//!
//! Key concepts:
//! - Async mode: no one calls `check_timers`, the scheduler thread does
//! - A timer action that feeds an input back into the machine
//! - An action that queues a further input from inside a dispatch
//!
//! Run with: cargo run --example keepalive

use sip_fsm::action::{ActionSpec, Call};
use sip_fsm::builder::{Template, TransitionBuilder};
use sip_fsm::machine::{Machine, Mode, StateMachine};
use sip_fsm::timer::BackoffPolicy;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PINGS_BEFORE_CLOSE: usize = 5;

#[derive(Default)]
struct Flow {
    pings: AtomicUsize,
}

impl Machine for Flow {
    type State = &'static str;
    type Input = &'static str;
    type Arg = ();
}

fn send_ping(flow: &Flow, call: &Call<'_, Flow>) -> sip_fsm::ActionResult {
    let sent = flow.pings.fetch_add(1, Ordering::SeqCst) + 1;
    println!("  -> CRLF keepalive #{sent}");
    if sent == PINGS_BEFORE_CLOSE {
        call.handle().hit("close")?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Keepalive ===\n");

    let template = Template::<Flow>::builder("keepalive")
        .initial("idle")
        .method("send_ping", send_ping)
        .timer(
            "keepalive",
            BackoffPolicy::constant(Duration::from_millis(100))?,
            ActionSpec::hit("ping"),
        )?
        .transition(TransitionBuilder::new().from("idle").on("connect").to("connected").start_timer("keepalive"))?
        .transition(TransitionBuilder::new().from("connected").on("ping").to("connected").action("send_ping"))?
        .transition(TransitionBuilder::new().from("connected").on("close").to("closed").stop_timer("keepalive"))?
        .build()?;

    let mut machine = StateMachine::builder(Arc::new(template), Flow::default())
        .mode(Mode::Async)
        .build()?;

    machine.hit("connect")?;
    machine.wait_for_state(&"closed", Duration::from_secs(5))?;

    let history = machine.history();
    println!("\nPath: {:?}", history.get_path());
    println!("Keepalives sent: {}", machine.machine().pings.load(Ordering::SeqCst));
    println!("Timer still running: {}", machine.timer_running("keepalive")?);

    machine.shutdown()?;
    Ok(())
}
