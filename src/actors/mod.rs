//! Long-running tasks of the agent
//!
//! ## Overview
//!
//! ```text
//!   CollectorLoop (ping)   CollectorLoop (dns)   ...      RollupJob
//!          │                      │                          │
//!          └──────── append ──────┴──────────▶ SampleStore ◀─┘ upsert buckets
//!                                                   │
//!                                         WindowAggregator (read)
//!                                                   │
//!                                          BroadcasterActor ──▶ subscribers
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Cancellation**: collector loops and the rollup job observe a
//!    `CancellationToken` derived from the process-wide shutdown token
//! 2. **Commands**: the broadcaster has an mpsc command channel
//! 3. **Request/Response**: oneshot channels for replies to commands
//! 4. **Shared state**: runtime counters live in a `RuntimeRegistry`, written
//!    only by the owning collector loop

pub mod broadcaster;
pub mod collector;
pub mod messages;
pub mod rollup;
pub mod runtime;
