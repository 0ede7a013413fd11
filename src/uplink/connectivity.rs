//! # Connectivity State Machine
//!
//! Tracks cellular registration and escalates to a power cycle when the
//! modem stays unregistered.
//!
//! [`LinkMonitor::observe`] is the pure step: it takes one raw registration
//! code and says what to do next. [`LinkMonitor::wait_until_registered`] is
//! the outer polling loop that feeds it from the modem and performs the
//! waits and resets it asks for.
//!
//! ```text
//! Disconnected ─► Registering ─► Registered(Home | Roaming)
//!                     ▲   │
//!                     │   └──► Denied | Unknown | Disconnected ──(1 s)──┐
//!                     └─────────────────────────────────────────────────┘
//!          every 10th consecutive miss: power off, 5 s, power on, 5 s
//! ```

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::delay::Delay;
use crate::modem::{rssi_to_dbm, Functionality, Modem, PowerState};

/// Interval between registration polls
pub const REGISTRATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive unregistered polls that trigger a power cycle
pub const RESET_THRESHOLD: u32 = 10;

/// Wait after each power transition of a power cycle
pub const POWER_CYCLE_QUIESCENT: Duration = Duration::from_secs(5);

/// APN used when none is configured
pub const DEFAULT_APN: &str = "hologram";

/// Which network the modem registered on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Home,
    Roaming,
}

/// Link-layer state of the radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    Disconnected,
    Registering,
    Registered(Registration),
    Denied,
    Unknown,
}

impl ConnectivityState {
    /// Map a raw `+CREG` status code
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Disconnected,
            1 => Self::Registered(Registration::Home),
            2 => Self::Registering,
            3 => Self::Denied,
            5 => Self::Registered(Registration::Roaming),
            _ => Self::Unknown,
        }
    }

    /// Only a registered link may carry transfers
    pub fn permits_transfer(&self) -> bool {
        matches!(self, Self::Registered(_))
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Disconnected => "Not registered",
            Self::Registering => "Not registered (searching)",
            Self::Registered(Registration::Home) => "Registered (home)",
            Self::Registered(Registration::Roaming) => "Registered roaming",
            Self::Denied => "Denied",
            Self::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// What the polling loop must do after an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStep {
    /// Registered; stop polling
    Registered(Registration),
    /// Wait the poll interval and poll again
    Retry,
    /// Power-cycle the modem, then poll again
    PowerCycle,
}

/// Timing and profile of the connectivity state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    pub apn: String,
    pub poll_interval: Duration,
    pub reset_threshold: u32,
    pub quiescent: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            apn: DEFAULT_APN.to_string(),
            poll_interval: REGISTRATION_POLL_INTERVAL,
            reset_threshold: RESET_THRESHOLD,
            quiescent: POWER_CYCLE_QUIESCENT,
        }
    }
}

/// Owner of the authoritative connectivity state
#[derive(Debug)]
pub struct LinkMonitor {
    settings: LinkSettings,
    state: ConnectivityState,
    reset_counter: u32,
    power_cycles: u32,
}

impl LinkMonitor {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            settings,
            state: ConnectivityState::Disconnected,
            reset_counter: 0,
            power_cycles: 0,
        }
    }

    /// Current connectivity state
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Consecutive unregistered polls since the last reset
    pub fn reset_counter(&self) -> u32 {
        self.reset_counter
    }

    /// Power cycles performed over the monitor's lifetime
    pub fn power_cycles(&self) -> u32 {
        self.power_cycles
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Mark the start of a registration attempt
    pub fn begin(&mut self) {
        self.state = ConnectivityState::Registering;
    }

    /// Feed one raw registration code through the state machine
    pub fn observe(&mut self, code: u8) -> LinkStep {
        self.state = ConnectivityState::from_code(code);
        self.step()
    }

    /// Record a poll that failed at the modem level; counts as `Unknown`
    pub fn observe_failure(&mut self) -> LinkStep {
        self.state = ConnectivityState::Unknown;
        self.step()
    }

    fn step(&mut self) -> LinkStep {
        if let ConnectivityState::Registered(kind) = self.state {
            self.reset_counter = 0;
            return LinkStep::Registered(kind);
        }

        self.reset_counter += 1;
        if self.reset_counter >= self.settings.reset_threshold {
            self.reset_counter = 0;
            return LinkStep::PowerCycle;
        }

        LinkStep::Retry
    }

    /// Block until the modem reports a registered state.
    ///
    /// Never fails: unregistered polls are retried every poll interval and
    /// every `reset_threshold` consecutive misses power-cycle the modem.
    pub async fn wait_until_registered<M, D>(
        &mut self,
        modem: &mut M,
        delay: &mut D,
    ) -> Registration
    where
        M: Modem + ?Sized,
        D: Delay + ?Sized,
    {
        self.begin();

        loop {
            let step = match modem.registration_status().await {
                Ok(code) => {
                    let step = self.observe(code);
                    info!("Network status {}: {}", code, self.state);
                    step
                }
                Err(e) => {
                    warn!("Network status poll failed: {}", e);
                    self.observe_failure()
                }
            };

            match step {
                LinkStep::Registered(kind) => return kind,
                LinkStep::Retry => delay.sleep(self.settings.poll_interval).await,
                LinkStep::PowerCycle => {
                    warn!(
                        "The device has not registered after {} attempts. Performing reset",
                        self.settings.reset_threshold
                    );
                    self.power_cycle(modem, delay).await;
                }
            }
        }
    }

    /// Power off, wait, power up, wait; then resume registering
    pub async fn power_cycle<M, D>(&mut self, modem: &mut M, delay: &mut D)
    where
        M: Modem + ?Sized,
        D: Delay + ?Sized,
    {
        info!("Turning off modem");
        if let Err(e) = modem.set_power(PowerState::Off).await {
            warn!("Power off failed: {}", e);
        }
        self.state = ConnectivityState::Disconnected;
        delay.sleep(self.settings.quiescent).await;

        self.power_up(modem).await;
        delay.sleep(self.settings.quiescent).await;

        self.power_cycles += 1;
        self.state = ConnectivityState::Registering;
    }

    /// Power on and apply the radio profile. Failures are logged only.
    pub async fn power_up<M>(&mut self, modem: &mut M)
    where
        M: Modem + ?Sized,
    {
        info!("Turning on modem");
        if let Err(e) = modem.set_power(PowerState::On).await {
            warn!("Power on failed: {}", e);
        }
        if let Err(e) = modem.set_functionality(Functionality::Full).await {
            warn!("Setting full functionality failed: {}", e);
        }
        if let Err(e) = modem.set_network_profile(&self.settings.apn).await {
            warn!("Setting APN {} failed: {}", self.settings.apn, e);
        }
    }

    /// Log the current signal strength. Returns dBm when known.
    pub async fn report_signal<M>(&self, modem: &mut M) -> Option<i16>
    where
        M: Modem + ?Sized,
    {
        match modem.signal_quality().await {
            Ok(raw) => {
                let dbm = rssi_to_dbm(raw);
                match dbm {
                    Some(dbm) => info!("RSSI = {}: {} dBm", raw, dbm),
                    None => info!("RSSI = {}: unknown", raw),
                }
                dbm
            }
            Err(e) => {
                debug!("Signal quality query failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::mocks::RecordingDelay;
    use crate::error::UplinkError;
    use crate::modem::mocks::{ModemCall, ScriptedModem};

    #[test]
    fn test_state_from_code() {
        assert_eq!(ConnectivityState::from_code(0), ConnectivityState::Disconnected);
        assert_eq!(
            ConnectivityState::from_code(1),
            ConnectivityState::Registered(Registration::Home)
        );
        assert_eq!(ConnectivityState::from_code(2), ConnectivityState::Registering);
        assert_eq!(ConnectivityState::from_code(3), ConnectivityState::Denied);
        assert_eq!(ConnectivityState::from_code(4), ConnectivityState::Unknown);
        assert_eq!(
            ConnectivityState::from_code(5),
            ConnectivityState::Registered(Registration::Roaming)
        );
        assert_eq!(ConnectivityState::from_code(9), ConnectivityState::Unknown);
    }

    #[test]
    fn test_only_registered_permits_transfer() {
        for code in 0..=6u8 {
            let state = ConnectivityState::from_code(code);
            assert_eq!(state.permits_transfer(), code == 1 || code == 5, "code {}", code);
        }
    }

    #[test]
    fn test_reset_fires_once_per_threshold_and_clears() {
        let mut monitor = LinkMonitor::new(LinkSettings::default());

        for round in 0..3 {
            for i in 1..RESET_THRESHOLD {
                assert_eq!(monitor.observe(0), LinkStep::Retry, "round {} poll {}", round, i);
                assert_eq!(monitor.reset_counter(), i);
            }
            assert_eq!(monitor.observe(2), LinkStep::PowerCycle);
            assert_eq!(monitor.reset_counter(), 0);
        }
    }

    #[test]
    fn test_registration_clears_counter() {
        let mut monitor = LinkMonitor::new(LinkSettings::default());
        for _ in 0..7 {
            monitor.observe(3);
        }
        assert_eq!(monitor.observe(5), LinkStep::Registered(Registration::Roaming));
        assert_eq!(monitor.reset_counter(), 0);
        assert_eq!(monitor.observe(0), LinkStep::Retry);
        assert_eq!(monitor.reset_counter(), 1);
    }

    #[test]
    fn test_modem_failure_counts_as_unknown() {
        let mut monitor = LinkMonitor::new(LinkSettings::default());
        assert_eq!(monitor.observe_failure(), LinkStep::Retry);
        assert_eq!(monitor.state(), ConnectivityState::Unknown);
        assert_eq!(monitor.reset_counter(), 1);
    }

    #[tokio::test]
    async fn test_immediate_registration() {
        let mut modem = ScriptedModem::new().with_registration(&[1]);
        let mut delay = RecordingDelay::new();
        let mut monitor = LinkMonitor::new(LinkSettings::default());

        let kind = monitor.wait_until_registered(&mut modem, &mut delay).await;

        assert_eq!(kind, Registration::Home);
        assert_eq!(monitor.state(), ConnectivityState::Registered(Registration::Home));
        assert!(delay.sleeps().is_empty());
        assert_eq!(modem.count(&ModemCall::Registration), 1);
    }

    #[tokio::test]
    async fn test_reset_after_ten_misses_then_registers() {
        let mut modem = ScriptedModem::new().with_registration(&[0, 0, 2, 0, 0, 0, 0, 0, 0, 0, 1]);
        let mut delay = RecordingDelay::new();
        let mut monitor = LinkMonitor::new(LinkSettings::default());

        let kind = monitor.wait_until_registered(&mut modem, &mut delay).await;

        assert_eq!(kind, Registration::Home);
        assert_eq!(modem.count(&ModemCall::Registration), 11);
        assert_eq!(monitor.power_cycles(), 1);
        assert_eq!(monitor.reset_counter(), 0);

        // Power cycle sits between the 10th and 11th poll
        let off = modem
            .calls
            .iter()
            .position(|c| *c == ModemCall::Power(PowerState::Off))
            .unwrap();
        let polls_before = modem.calls[..off]
            .iter()
            .filter(|c| **c == ModemCall::Registration)
            .count();
        assert_eq!(polls_before, 10);
        assert_eq!(modem.count(&ModemCall::Power(PowerState::On)), 1);
        assert_eq!(modem.count(&ModemCall::Functionality(Functionality::Full)), 1);
        assert_eq!(modem.count(&ModemCall::NetworkProfile("hologram".to_string())), 1);

        // Nine poll waits, two quiescent waits
        assert_eq!(delay.count_of(REGISTRATION_POLL_INTERVAL), 9);
        assert_eq!(delay.count_of(POWER_CYCLE_QUIESCENT), 2);
    }

    #[tokio::test]
    async fn test_repeated_resets_and_failed_polls() {
        let mut modem = ScriptedModem::new();
        for _ in 0..15 {
            modem.registration.push_back(Ok(4));
        }
        for _ in 0..5 {
            modem.registration.push_back(Err(UplinkError::Modem("no reply".to_string())));
        }
        modem.registration.push_back(Ok(5));
        modem.fail_power = true;
        let mut delay = RecordingDelay::new();
        let mut monitor = LinkMonitor::new(LinkSettings::default());

        let kind = monitor.wait_until_registered(&mut modem, &mut delay).await;

        assert_eq!(kind, Registration::Roaming);
        assert_eq!(monitor.power_cycles(), 2);
        assert_eq!(delay.count_of(POWER_CYCLE_QUIESCENT), 4);
        assert_eq!(delay.count_of(REGISTRATION_POLL_INTERVAL), 18);
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let settings = LinkSettings {
            reset_threshold: 3,
            ..LinkSettings::default()
        };
        let mut modem = ScriptedModem::new().with_registration(&[0, 0, 0, 0, 0, 0, 1]);
        let mut delay = RecordingDelay::new();
        let mut monitor = LinkMonitor::new(settings);

        monitor.wait_until_registered(&mut modem, &mut delay).await;

        assert_eq!(monitor.power_cycles(), 2);
    }

    #[tokio::test]
    async fn test_report_signal() {
        let mut modem = ScriptedModem::new();
        modem.rssi = 31;
        let monitor = LinkMonitor::new(LinkSettings::default());
        assert_eq!(monitor.report_signal(&mut modem).await, Some(-52));

        modem.rssi = 99;
        assert_eq!(monitor.report_signal(&mut modem).await, None);
    }
}
