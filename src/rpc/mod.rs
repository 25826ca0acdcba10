//! Request/reply channel subsystem.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      RPC Stack                             │
//! │                                                            │
//! │  ┌───────────┐   ┌──────────┐   ┌───────────────────────┐  │
//! │  │ Transport │──▶│  Codec   │──▶│  ChannelSession       │  │
//! │  │ (trait)   │   │ (ZMTP)   │   │  (send/recv lockstep) │  │
//! │  └───────────┘   └──────────┘   └───────────────────────┘  │
//! │                                            ▲               │
//! │                      ┌─────────────────────┘               │
//! │                      │                                     │
//! │  ┌──────────┐   ┌──────────┐                               │
//! │  │ Channels │──▶│ io_task  │◀── PollSchedule (stream)      │
//! │  │ (embassy)│   │ (worker) │                               │
//! │  └──────────┘   └──────────┘                               │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod channels;
pub mod codec;
pub mod io_task;
pub mod session;
pub mod stream;
pub mod tcp;
pub mod transport;
