//! An INVITE client transaction (RFC 3261 section 17.1.1) driven by the
//! engine: timer A retransmits with exponential backoff, timer B gives up
//! after 64*T1 and timer D absorbs response retransmissions.

use parking_lot::Mutex;
use sip_fsm::action::{ActionSpec, Call, Delegate};
use sip_fsm::builder::{Template, TransitionBuilder};
use sip_fsm::core::ManualClock;
use sip_fsm::machine::{Machine, Mode, StateMachine};
use sip_fsm::timer::BackoffPolicy;
use sip_fsm::{input_enum, state_enum, ActionResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

state_enum! {
    enum TxState {
        Init,
        Calling,
        Proceeding,
        Completed,
        Terminated,
    }
}

input_enum! {
    enum TxInput {
        Invite,
        TimerA,
        TimerB,
        TimerD,
        Provisional,
        Success,
        Failure,
    }
}

#[derive(Default)]
struct InviteClient {
    invites: AtomicUsize,
    acks: AtomicUsize,
}

impl Machine for InviteClient {
    type State = TxState;
    type Input = TxInput;
    /// Response status code.
    type Arg = u16;
}

/// The transaction user: sees responses and timeouts.
#[derive(Default)]
struct TransactionUser {
    responses: Mutex<Vec<u16>>,
    timeouts: AtomicUsize,
}

impl Delegate<InviteClient> for TransactionUser {
    fn responds_to(&self, method: &str) -> bool {
        matches!(method, "delegate_pass_up" | "delegate_timeout")
    }

    fn perform(&self, method: &str, call: &Call<'_, InviteClient>) -> ActionResult {
        match method {
            "delegate_pass_up" => self.responses.lock().extend_from_slice(call.args()),
            "delegate_timeout" => {
                self.timeouts.fetch_add(1, Ordering::SeqCst);
            }
            other => return Err(format!("unexpected delegate method {other}").into()),
        }
        Ok(())
    }
}

const T1: Duration = Duration::from_millis(500);
const T2: Duration = Duration::from_secs(4);

fn step(from: TxState, on: TxInput, to: TxState) -> TransitionBuilder<InviteClient> {
    TransitionBuilder::new().from(from).on(on).to(to)
}

fn invite_template(t1: Duration, t2: Duration) -> Arc<Template<InviteClient>> {
    use TxInput::*;
    use TxState::*;

    let template = Template::<InviteClient>::builder("invite_client")
        .initial(Init)
        .method("send_invite", |m: &InviteClient, _: &Call<'_, InviteClient>| {
            m.invites.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .method("send_ack", |m: &InviteClient, _: &Call<'_, InviteClient>| {
            m.acks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .timer("A", BackoffPolicy::exponential(t1, t2).unwrap(), ActionSpec::hit(TimerA))
        .unwrap()
        .timer("B", BackoffPolicy::fixed([t1 * 64]), ActionSpec::hit(TimerB))
        .unwrap()
        .timer("D", BackoffPolicy::fixed([Duration::from_secs(32)]), ActionSpec::hit(TimerD))
        .unwrap()
        .transition(step(Init, Invite, Calling).action("send_invite").start_timer("A").start_timer("B"))
        .unwrap()
        .transition(step(Calling, TimerA, Calling).action("send_invite"))
        .unwrap()
        .transition(step(Calling, TimerB, Terminated).stop_timer("A").action("timeout"))
        .unwrap()
        .transition(step(Calling, Provisional, Proceeding).stop_timer("A").stop_timer("B").action("pass_up"))
        .unwrap()
        .transition(step(Calling, Success, Terminated).stop_timer("A").stop_timer("B").action("pass_up"))
        .unwrap()
        .transition(
            step(Calling, Failure, Completed)
                .stop_timer("A")
                .stop_timer("B")
                .action("send_ack")
                .action("pass_up")
                .start_timer("D"),
        )
        .unwrap()
        .transition(step(Proceeding, Provisional, Proceeding).action("pass_up"))
        .unwrap()
        .transition(step(Proceeding, Success, Terminated).action("pass_up"))
        .unwrap()
        .transition(
            step(Proceeding, Failure, Completed)
                .action("send_ack")
                .action("pass_up")
                .start_timer("D"),
        )
        .unwrap()
        .transition(step(Completed, Failure, Completed).action("send_ack"))
        .unwrap()
        .transition(step(Completed, TimerD, Terminated))
        .unwrap()
        .build()
        .unwrap();
    Arc::new(template)
}

fn transaction(
    user: &Arc<TransactionUser>,
) -> (StateMachine<InviteClient>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new());
    let machine = StateMachine::builder(invite_template(T1, T2), InviteClient::default())
        .clock(clock.clone())
        .delegate(user)
        .build()
        .unwrap();
    (machine, clock)
}

fn at(machine: &StateMachine<InviteClient>, clock: &ManualClock, millis: u64) {
    clock.set(Duration::from_millis(millis));
    machine.check_timers().unwrap();
}

#[test]
fn unanswered_invite_retransmits_then_times_out() {
    let user = Arc::new(TransactionUser::default());
    let (mut machine, clock) = transaction(&user);

    machine.hit(TxInput::Invite).unwrap();
    assert_eq!(machine.machine().invites.load(Ordering::SeqCst), 1);

    // Timer A: 0.5, 1.5, 3.5, 7.5, then every T2.
    for (millis, expected) in [(500, 2), (1_499, 2), (1_500, 3), (3_500, 4), (7_500, 5), (11_500, 6)] {
        at(&machine, &clock, millis);
        assert_eq!(machine.machine().invites.load(Ordering::SeqCst), expected, "at {millis}ms");
    }
    assert_eq!(machine.state(), TxState::Calling);

    at(&machine, &clock, 32_000);

    assert_eq!(machine.state(), TxState::Terminated);
    // Initial send plus A pops up to 31.5s.
    assert_eq!(machine.machine().invites.load(Ordering::SeqCst), 11);
    assert_eq!(user.timeouts.load(Ordering::SeqCst), 1);
    assert!(!machine.timer_running("A").unwrap());
    assert!(!machine.timer_running("B").unwrap());
    machine.shutdown().unwrap();
}

#[test]
fn catching_up_in_one_check_replays_every_retransmission() {
    let user = Arc::new(TransactionUser::default());
    let (machine, clock) = transaction(&user);

    machine.hit(TxInput::Invite).unwrap();
    at(&machine, &clock, 32_000);

    assert_eq!(machine.machine().invites.load(Ordering::SeqCst), 11);
    assert_eq!(machine.state(), TxState::Terminated);
    assert_eq!(user.timeouts.load(Ordering::SeqCst), 1);
}

#[test]
fn late_check_stops_retransmitting_once_timer_b_fires() {
    let user = Arc::new(TransactionUser::default());
    let (machine, clock) = transaction(&user);

    machine.hit(TxInput::Invite).unwrap();
    // A would also be due at 35.5s and 39.5s, after B has terminated.
    at(&machine, &clock, 40_000);

    assert_eq!(machine.machine().invites.load(Ordering::SeqCst), 11);
    assert_eq!(machine.state(), TxState::Terminated);
    assert_eq!(user.timeouts.load(Ordering::SeqCst), 1);
    assert!(!machine.timer_running("A").unwrap());
}

#[test]
fn provisional_response_stops_retransmission() {
    let user = Arc::new(TransactionUser::default());
    let (machine, clock) = transaction(&user);

    machine.hit(TxInput::Invite).unwrap();
    at(&machine, &clock, 500);
    machine.hit_with(TxInput::Provisional, vec![180]).unwrap();
    at(&machine, &clock, 60_000);

    assert_eq!(machine.state(), TxState::Proceeding);
    assert_eq!(machine.machine().invites.load(Ordering::SeqCst), 2);
    assert_eq!(user.timeouts.load(Ordering::SeqCst), 0);

    machine.hit_with(TxInput::Provisional, vec![183]).unwrap();
    machine.hit_with(TxInput::Success, vec![200]).unwrap();

    assert_eq!(machine.state(), TxState::Terminated);
    assert_eq!(*user.responses.lock(), vec![180, 183, 200]);
    assert_eq!(machine.machine().acks.load(Ordering::SeqCst), 0);
}

#[test]
fn final_failure_is_acked_and_absorbed_until_timer_d() {
    let user = Arc::new(TransactionUser::default());
    let (machine, clock) = transaction(&user);

    machine.hit(TxInput::Invite).unwrap();
    machine.hit_with(TxInput::Failure, vec![486]).unwrap();
    assert_eq!(machine.state(), TxState::Completed);
    assert!(machine.timer_running("D").unwrap());

    // Retransmitted final responses are acked again but not passed up.
    machine.hit_with(TxInput::Failure, vec![486]).unwrap();
    at(&machine, &clock, 31_999);
    assert_eq!(machine.state(), TxState::Completed);

    at(&machine, &clock, 32_000);

    assert_eq!(machine.state(), TxState::Terminated);
    assert_eq!(machine.machine().acks.load(Ordering::SeqCst), 2);
    assert_eq!(*user.responses.lock(), vec![486]);
    assert_eq!(machine.machine().invites.load(Ordering::SeqCst), 1);

    let history = machine.history();
    assert_eq!(
        history.get_path(),
        vec![
            &TxState::Init,
            &TxState::Calling,
            &TxState::Completed,
            &TxState::Completed,
            &TxState::Terminated
        ]
    );
}

#[test]
fn released_user_is_no_longer_told() {
    let user = Arc::new(TransactionUser::default());
    let (machine, _clock) = transaction(&user);
    let seen = Arc::clone(&user);
    drop(user);

    machine.hit(TxInput::Invite).unwrap();
    machine.hit_with(TxInput::Provisional, vec![100]).unwrap();
    assert_eq!(seen.responses.lock().len(), 1);

    drop(seen);
    machine.hit_with(TxInput::Success, vec![200]).unwrap();
    assert_eq!(machine.state(), TxState::Terminated);
}

#[test]
fn async_transaction_times_out_on_its_own() {
    let user = Arc::new(TransactionUser::default());
    let t1 = Duration::from_millis(10);
    let mut machine = StateMachine::builder(invite_template(t1, t1 * 4), InviteClient::default())
        .mode(Mode::Async)
        .delegate(&user)
        .build()
        .unwrap();

    machine.hit(TxInput::Invite).unwrap();
    machine
        .wait_for_state(&TxState::Terminated, Duration::from_secs(5))
        .unwrap();

    assert!(machine.machine().invites.load(Ordering::SeqCst) >= 5);
    assert_eq!(user.timeouts.load(Ordering::SeqCst), 1);
    machine.shutdown().unwrap();
}
