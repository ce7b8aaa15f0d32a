//! Heartbeat engine
//!
//! ## Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │  HeartbeatScheduler  │  one long-lived task
//!                 └──────────┬───────────┘
//!                            │ due set, oldest first
//!                 ┌──────────▼───────────┐
//!                 │      Dispatcher      │  ≤ N probes, paced starts
//!                 └──────────┬───────────┘
//!              ┌─────────────┼─────────────┐
//!        ┌─────▼─────┐ ┌─────▼─────┐ ┌─────▼─────┐
//!        │ probe task│ │ probe task│ │ probe task│
//!        └─────┬─────┘ └─────┬─────┘ └─────┬─────┘
//!              │ FailureCounterStore + transition
//!              ├──► DeviceRepository::update_device
//!              └──► broadcast<HeartbeatEvent>
//! ```
//!
//! ## Components
//!
//! - **FailureCounterStore**: in-memory consecutive failures per device
//! - **transition**: pure status state machine
//! - **Dispatcher**: bounded, paced fan-out of one batch of probes
//! - **HeartbeatScheduler**: startup reset, grace reactivation, due-set
//!   selection and the tick loop; started and stopped via [`SchedulerHandle`]
//!
//! A single `CancellationToken` is shared by the loop, the dispatcher and
//! every probe task.

pub mod dispatcher;
pub mod failures;
pub mod messages;
pub mod scheduler;
pub mod transition;

pub use dispatcher::Dispatcher;
pub use failures::FailureCounterStore;
pub use messages::{HeartbeatEvent, HeartbeatEventKind};
pub use scheduler::{HeartbeatScheduler, SchedulerHandle};
