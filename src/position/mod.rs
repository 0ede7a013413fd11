//! # Position Module
//!
//! GNSS fix type and the blocking acquisition loop.
//!
//! A fix is only trusted once latitude, longitude and altitude are all
//! non-zero: the modem reports zeros until the receiver has locked. A genuine
//! reading exactly on the equator, the prime meridian or at sea level is
//! therefore indistinguishable from "no fix yet" and is waited out.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::delay::Delay;
use crate::modem::Modem;

/// Interval between position polls
pub const FIX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One GNSS reading: position, motion and UTC time
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Fix {
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: f32,
    /// Ground speed in km/h
    pub speed_kph: f32,
    /// Course over ground in degrees
    pub heading: f32,
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: f32,
}

impl Fix {
    /// Whether the reading can be acted upon
    pub fn is_valid(&self) -> bool {
        self.latitude != 0.0 && self.longitude != 0.0 && self.altitude != 0.0
    }

    /// UTC time of the fix, `None` if the date/time fields are out of range
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        if !(0.0..60.0).contains(&self.second) {
            return None;
        }

        let whole = self.second.trunc() as u32;
        let millis = ((self.second - self.second.trunc()) * 1000.0).round().min(999.0) as u32;

        let date = NaiveDate::from_ymd_opt(
            i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?;
        let time =
            date.and_hms_milli_opt(u32::from(self.hour), u32::from(self.minute), whole, millis)?;
        Some(time.and_utc())
    }

    /// CSV measurement line: `utc,latitude,longitude,altitude,speed,heading`
    pub fn to_record(&self) -> String {
        format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:06.3}Z,{:.6},{:.6},{:.6},{:.6},{:.6}",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.latitude,
            self.longitude,
            self.altitude,
            self.speed_kph,
            self.heading
        )
    }
}

impl fmt::Display for Fix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat {:.6}, lon {:.6}, alt {:.6} at {:04}/{:02}/{:02} {:02}:{:02}:{:.3}",
            self.latitude,
            self.longitude,
            self.altitude,
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second
        )
    }
}

/// Blocks until the modem reports a valid fix
#[derive(Debug)]
pub struct PositionAcquirer {
    poll_interval: Duration,
    scratch: Fix,
}

impl Default for PositionAcquirer {
    fn default() -> Self {
        Self::new(FIX_POLL_INTERVAL)
    }
}

impl PositionAcquirer {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            scratch: Fix::default(),
        }
    }

    /// Enable the receiver, poll until a valid fix, disable the receiver.
    ///
    /// There is no timeout: a fix is required before data collection
    /// continues. Modem errors while polling are logged and polled through.
    pub async fn acquire_fix<M, D>(&mut self, modem: &mut M, delay: &mut D) -> Fix
    where
        M: Modem + ?Sized,
        D: Delay + ?Sized,
    {
        info!("Updating location");
        self.scratch = Fix::default();

        if let Err(e) = modem.set_gps(true).await {
            warn!("Failed to turn GPS on: {}", e);
        }

        let mut polls: u64 = 0;
        loop {
            polls += 1;
            match modem.position().await {
                Ok(fix) => self.scratch = fix,
                Err(e) => {
                    warn!("Position poll failed: {}", e);
                    self.scratch = Fix::default();
                }
            }

            if self.scratch.is_valid() {
                break;
            }

            debug!("No fix yet after {} polls", polls);
            delay.sleep(self.poll_interval).await;
        }

        if let Err(e) = modem.set_gps(false).await {
            warn!("Failed to turn GPS off: {}", e);
        }

        let fix = self.scratch;
        info!("Current location: {}", fix);
        fix
    }
}
