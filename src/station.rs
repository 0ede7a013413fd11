//! Hardware context of one field station
//!
//! Built once at startup and lent to each component for the duration of a
//! call, so there is exactly one modem, one storage and one clock per
//! process.

use crate::delay::Delay;
use crate::modem::Modem;
use crate::storage::Storage;

/// The station's modem, data storage and clock
#[derive(Debug)]
pub struct Station<M, S, D> {
    pub modem: M,
    pub storage: S,
    pub delay: D,
}

impl<M, S, D> Station<M, S, D>
where
    M: Modem,
    S: Storage,
    D: Delay,
{
    pub fn new(modem: M, storage: S, delay: D) -> Self {
        Self { modem, storage, delay }
    }
}
