//! Beton change-notification infrastructure.
//!
//! This crate provides the building blocks the dispatch board uses to
//! stay reconciled with concurrent external writes:
//!
//! - [`ChangeBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`DeliveryChange`]: the change envelope, scoped by scheduled date.
//! - [`DateSubscription`]: a subscriber that only sees its active date.
//! - [`Debouncer`]: collapses notification bursts into one wake-up.

pub mod bus;
pub mod debounce;

pub use bus::{ChangeBus, ChangeKind, DateSubscription, DeliveryChange, Notification};
pub use debounce::{Burst, Debouncer};
