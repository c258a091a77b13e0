//! Partition assignment.
//!
//! Every node independently computes the same owner table from the same
//! queue registry and membership snapshot; no coordinator is involved.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     AssignmentEngine                          │
//! │                                                              │
//! │  registry snapshot ─┐                                        │
//! │                     ├─► compute_assignment ─► Assignment     │
//! │  members (sorted) ──┘        │                   │           │
//! │                              ▼                   ▼           │
//! │            Strategy per queue type       LocalOwnership      │
//! │            - single hash pick             (this node)        │
//! │            - label group                      │              │
//! │            - round robin                      ▼              │
//! │                                    diff ─► ChangeNotifier    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod assignment;
mod engine;
mod ownership;
mod strategy;

pub use assignment::{compute_assignment, Assignment, ResponsibleMembers};
pub use engine::{AssignmentEngine, RecalculationOutcome};
pub use ownership::{LocalOwnership, OwnedQueue, OwnershipState};
pub use strategy::{round_robin, single_hash_pick, LabelGroups, Strategy};
