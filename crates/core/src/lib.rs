//! Beton dispatch core.
//!
//! Pure domain logic for the delivery dispatch board: the workflow state
//! machine and its guards, the credit gate, truck assignment validation,
//! scheduling conflict detection and board categorization. Nothing here
//! performs I/O; the async layer in `beton-dispatch` feeds these functions
//! with snapshots loaded from the external stores.

pub mod alert;
pub mod approval;
pub mod audit;
pub mod board;
pub mod clock;
pub mod conflict;
pub mod credit;
pub mod delivery;
pub mod error;
pub mod policy;
pub mod purchase_order;
pub mod roles;
pub mod truck;
pub mod types;
pub mod workflow;
