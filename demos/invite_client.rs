//! INVITE Client Transaction
//!
//! Drives an RFC 3261 INVITE client transaction with a manual clock so
//! every retransmission is visible.
//!
//! Key concepts:
//! - Timer A retransmits with exponential backoff from T1 up to T2
//! - Timer B ends the transaction after 64*T1
//! - A delegate (the transaction user) is told about the timeout
//! - One late `check_timers` replays every missed deadline in order
//!
//! Run with: cargo run --example invite_client

use sip_fsm::action::{ActionSpec, Call, DelegateActions};
use sip_fsm::builder::{Template, TransitionBuilder};
use sip_fsm::core::ManualClock;
use sip_fsm::machine::{Machine, StateMachine};
use sip_fsm::timer::BackoffPolicy;
use sip_fsm::{input_enum, state_enum};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

state_enum! {
    enum TxState {
        Init,
        Calling,
        Proceeding,
        Terminated,
    }
}

input_enum! {
    enum TxInput {
        Invite,
        TimerA,
        TimerB,
        Provisional,
    }
}

const T1: Duration = Duration::from_millis(500);
const T2: Duration = Duration::from_secs(4);

#[derive(Default)]
struct InviteClient {
    invites: AtomicUsize,
}

impl Machine for InviteClient {
    type State = TxState;
    type Input = TxInput;
    type Arg = u16;
}

fn step(from: TxState, on: TxInput, to: TxState) -> TransitionBuilder<InviteClient> {
    TransitionBuilder::new().from(from).on(on).to(to)
}

fn template() -> Result<Template<InviteClient>, Box<dyn std::error::Error>> {
    use TxInput::*;
    use TxState::*;

    let template = Template::<InviteClient>::builder("invite_client")
        .initial(Init)
        .method("send_invite", |client: &InviteClient, _: &Call<'_, InviteClient>| {
            let sent = client.invites.fetch_add(1, Ordering::SeqCst) + 1;
            println!("  -> INVITE (transmission {sent})");
            Ok(())
        })
        .timer("A", BackoffPolicy::exponential(T1, T2)?, ActionSpec::hit(TimerA))?
        .timer("B", BackoffPolicy::fixed([T1 * 64]), ActionSpec::hit(TimerB))?
        .transition(step(Init, Invite, Calling).action("send_invite").start_timer("A").start_timer("B"))?
        .transition(step(Calling, TimerA, Calling).action("send_invite"))?
        .transition(step(Calling, TimerB, Terminated).stop_timer("A").action("timeout"))?
        .transition(step(Calling, Provisional, Proceeding).stop_timer("A").stop_timer("B"))?
        .build()?;
    Ok(template)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== INVITE Client Transaction ===\n");

    let timeouts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&timeouts);
    let user = Arc::new(DelegateActions::new().on(
        "delegate_timeout",
        move |_: &Call<'_, InviteClient>| {
            seen.fetch_add(1, Ordering::SeqCst);
            println!("  TU: transaction timed out");
            Ok(())
        },
    ));

    let clock = Arc::new(ManualClock::new());
    let machine = StateMachine::builder(Arc::new(template()?), InviteClient::default())
        .clock(clock.clone())
        .delegate(&user)
        .build()?;

    machine.hit(TxInput::Invite)?;
    for millis in [500, 1_500, 3_500] {
        clock.set(Duration::from_millis(millis));
        machine.check_timers()?;
        println!("t={millis}ms state={:?}", machine.state());
    }

    // Nobody checks again until well past timer B.
    clock.set(Duration::from_secs(40));
    let popped = machine.check_timers()?;
    println!("t=40000ms popped {popped} deadlines, state={:?}", machine.state());

    println!("\nINVITEs sent: {}", machine.machine().invites.load(Ordering::SeqCst));
    println!("Timeouts reported: {}", timeouts.load(Ordering::SeqCst));
    Ok(())
}
