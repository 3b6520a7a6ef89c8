//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a store is open.
//!
//! # Tasks
//! - Expiry Reclaimer: physically removes expired rows from every master

mod reclaimer;

pub use reclaimer::Reclaimer;
