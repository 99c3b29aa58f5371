//! sip-fsm: the state-machine engine under a SIP stack
//!
//! Transport connections, client and server transactions, and dialogs are
//! all state machines that retransmit on timers and react to socket
//! readiness. This crate provides the engine they share:
//!
//! - **Timers** driven by backoff policies, checked against a pluggable clock
//! - **A scheduler** thread that waits on deadlines and input sources together
//! - **Action resolution** with dual dispatch to the machine and a delegate
//! - **State machines** with FIFO re-entrant input handling, worker threads
//!   and blocking wait helpers
//!
//! # Example
//!
//! ```rust
//! use sip_fsm::builder::{Template, TransitionBuilder};
//! use sip_fsm::core::ManualClock;
//! use sip_fsm::machine::{Machine, StateMachine};
//! use sip_fsm::timer::BackoffPolicy;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Default)]
//! struct Ticker {
//!     ticks: AtomicUsize,
//! }
//!
//! impl Machine for Ticker {
//!     type State = &'static str;
//!     type Input = &'static str;
//!     type Arg = ();
//! }
//!
//! let template = Arc::new(
//!     Template::<Ticker>::builder("ticker")
//!         .initial("idle")
//!         .method("tick", |m, _| {
//!             m.ticks.fetch_add(1, Ordering::SeqCst);
//!             Ok(())
//!         })
//!         .timer("t", BackoffPolicy::constant(Duration::from_secs(1)).unwrap(), "tick")
//!         .unwrap()
//!         .transition(TransitionBuilder::new().from("idle").on("start").to("running").start_timer("t"))
//!         .unwrap()
//!         .transition(TransitionBuilder::new().from("running").on("stop").to("idle").stop_timer("t"))
//!         .unwrap()
//!         .build()
//!         .unwrap(),
//! );
//!
//! let clock = Arc::new(ManualClock::new());
//! let mut machine = StateMachine::builder(template, Ticker::default())
//!     .clock(clock.clone())
//!     .build()
//!     .unwrap();
//!
//! machine.hit("start").unwrap();
//! clock.advance(Duration::from_millis(3500));
//! machine.check_timers().unwrap();
//! machine.hit("stop").unwrap();
//! clock.advance(Duration::from_secs(1));
//! machine.check_timers().unwrap();
//!
//! assert_eq!(machine.machine().ticks.load(Ordering::SeqCst), 3);
//! machine.shutdown().unwrap();
//! ```

pub mod action;
pub mod builder;
pub mod core;
pub mod machine;
pub mod scheduler;
pub mod timer;

// Re-export commonly used types
pub use action::{ActionError, ActionResult, ActionSpec, Call, Delegate, DelegateActions, ThreadStep};
pub use builder::{BuildError, Template, TemplateBuilder, TransitionBuilder};
pub use core::{Clock, Input, ManualClock, MonotonicClock, SharedClock, State, StateHistory};
pub use machine::{FsmError, Handle, Machine, MachineBuilder, MachineConfig, Mode, StateMachine};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerHandle};
pub use timer::{Backoff, BackoffPolicy, Timer, TimerError};
