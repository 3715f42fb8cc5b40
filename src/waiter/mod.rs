// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Condition polling with timeouts and event-driven early abort.

pub mod condition;
pub mod fail_fast;

pub use condition::{AbortReason, WaitOutcome, Waiter};
pub use fail_fast::{EventFailFast, FailFast};
