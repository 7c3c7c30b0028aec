//! Pass infrastructure for graph rewriting.
//!
//! This module provides the middle layer between analysis and orchestration:
//!
//! - [`crate::analysis`] - flat body → graph construction, stack walker
//! - [`compiler`](self) - graph passes, scheduling, codegen (graph → flat body)
//! - [`crate::deobfuscation`] - evaluators, inliner, engine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Rewrite Pipeline                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  PassContext                  Shared per-run state               │
//! │    ├─ Method graphs           (taken out while a pass runs)      │
//! │    ├─ Processed / failed sets                                    │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  PassScheduler                2-phase fixpoint execution         │
//! │    ├─ Normalize               (dead, nop, merge, layout)         │
//! │    └─ Value                   (call-result inlining)             │
//! │    Each phase: run → normalize → repeat until stable             │
//! │                                                                  │
//! │  CfgPass trait                Interface for all passes           │
//! │    ├─ run_on_method()         Per-method transformation          │
//! │    └─ initialize()            One-time setup before pipeline     │
//! │                                                                  │
//! │  CfgCodeGenerator             Graph → flat body                  │
//! │    ├─ Branch re-materialization                                  │
//! │    └─ Exception region remapping                                 │
//! │                                                                  │
//! │  EventLog                     Change tracking and diagnostics    │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod codegen;
mod context;
mod events;
mod pass;
mod passes;
mod scheduler;

pub use codegen::CfgCodeGenerator;
pub use context::PassContext;
pub use events::{DerivedStats, Event, EventBuilder, EventKind, EventLog};
pub use pass::CfgPass;
pub use passes::{
    BlockMergePass, BranchLayoutPass, CallInliningPass, ConstantBranchPass, DeadBlockPass,
    NopBlockPass,
};
pub use scheduler::PassScheduler;
