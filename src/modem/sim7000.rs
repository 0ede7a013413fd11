//! # SIM7000 Driver
//!
//! [`Modem`] implementation for SIMCom SIM7000-series LTE/GNSS modules over
//! their AT command port.
//!
//! Commands are written as `AT...\r\n` and answered with zero or more
//! information lines followed by `OK` or `ERROR`. Echoed command lines are
//! ignored so the driver works whether or not `ATE0` has taken effect.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Functionality, FtpServer, Modem, PowerState};
use crate::delay::{Delay, TokioDelay};
use crate::error::{Result, UplinkError};
use crate::position::Fix;
use crate::serial::port_trait::SerialPortIO;

/// Time to wait for any single response line
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// `AT` probes sent after power-on before giving up
const POWER_ON_PROBES: u32 = 10;

/// Wait between power-on probes
const POWER_ON_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Status of a `+FTPPUT: 1,<status>` report meaning "ready for data"
const FTPPUT_READY: u32 = 1;

/// Status of a `+FTPPUT: 1,<status>` report meaning "session closed, upload complete"
const FTPPUT_DONE: u32 = 0;

/// SIM7000 over a serial port, waiting out power-on with `D`
pub struct Sim7000<P: SerialPortIO, D: Delay = TokioDelay> {
    port: P,
    delay: D,
    timeout: Duration,
    apn: String,
}

impl<P: SerialPortIO, D: Delay> std::fmt::Debug for Sim7000<P, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sim7000")
            .field("timeout", &self.timeout)
            .field("apn", &self.apn)
            .finish_non_exhaustive()
    }
}

impl<P: SerialPortIO> Sim7000<P> {
    pub fn new(port: P, timeout: Duration) -> Self {
        Self::with_delay(port, timeout, TokioDelay)
    }
}

impl<P: SerialPortIO, D: Delay> Sim7000<P, D> {
    pub fn with_delay(port: P, timeout: Duration, delay: D) -> Self {
        Self {
            port,
            delay,
            timeout,
            apn: String::new(),
        }
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        debug!("> {}", command);
        let line = format!("{}\r\n", command);
        self.port
            .write_all(line.as_bytes())
            .await
            .map_err(|e| UplinkError::Serial(format!("Failed to write '{}': {}", command, e)))?;
        self.port
            .flush()
            .await
            .map_err(|e| UplinkError::Serial(format!("Failed to flush serial port: {}", e)))
    }

    async fn read_line(&mut self) -> Result<String> {
        let line = self
            .port
            .read_line(self.timeout)
            .await
            .map_err(|e| UplinkError::Serial(format!("Failed to read response: {}", e)))?;
        debug!("< {}", line);
        Ok(line)
    }

    /// Send `command` and collect the information lines before `OK`
    async fn command(&mut self, command: &str) -> Result<Vec<String>> {
        self.send(command).await?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "OK" {
                return Ok(lines);
            }
            if is_error(&line) {
                return Err(UplinkError::Modem(format!("{} -> {}", command, line)));
            }
            if line != command {
                lines.push(line);
            }
        }
    }

    /// Send `command` and return the payload of its `prefix` information line
    async fn query(&mut self, command: &str, prefix: &str) -> Result<String> {
        let lines = self.command(command).await?;
        lines
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
            .map(|rest| rest.trim().to_string())
            .ok_or_else(|| UplinkError::Modem(format!("{} -> no {} line", command, prefix)))
    }

    /// Read until a line starting with `prefix` and return what follows it
    async fn wait_for(&mut self, prefix: &str) -> Result<String> {
        loop {
            let line = self.read_line().await?;
            if let Some(rest) = line.strip_prefix(prefix) {
                return Ok(rest.trim().to_string());
            }
            if is_error(&line) {
                return Err(UplinkError::Modem(format!("waiting for {} -> {}", prefix, line)));
            }
        }
    }

    async fn wait_ok(&mut self) -> Result<()> {
        self.wait_for("OK").await.map(|_| ())
    }

    async fn power_on(&mut self) -> Result<()> {
        for probe in 1..=POWER_ON_PROBES {
            match self.command("AT").await {
                Ok(_) => {
                    if let Err(e) = self.command("ATE0").await {
                        debug!("Could not disable echo: {}", e);
                    }
                    return Ok(());
                }
                Err(e) => {
                    debug!("Modem not answering (probe {}): {}", probe, e);
                    self.delay.sleep(POWER_ON_PROBE_INTERVAL).await;
                }
            }
        }

        Err(UplinkError::Modem(format!(
            "no response after {} power-on probes",
            POWER_ON_PROBES
        )))
    }

    /// Open the FTP session and check the modem is ready for data.
    /// Returns the largest chunk the modem accepts per write.
    async fn ftp_open(&mut self, remote_name: &str, remote_path: &str) -> Result<Option<usize>> {
        self.command(&format!("AT+FTPPUTNAME=\"{}\"", remote_name)).await?;
        self.command(&format!("AT+FTPPUTPATH=\"{}\"", remote_path)).await?;
        self.command("AT+FTPPUT=1").await?;

        let (status, max_len) = parse_ftpput_session(&self.wait_for("+FTPPUT: 1,").await?)?;
        if status != FTPPUT_READY {
            warn!("FTP session for {} refused with status {}", remote_name, status);
            return Ok(None);
        }

        Ok(Some(max_len.unwrap_or(usize::MAX).max(1)))
    }
}

fn is_error(line: &str) -> bool {
    line == "ERROR" || line.starts_with("+CME ERROR") || line.starts_with("+CMS ERROR")
}

fn field<T: std::str::FromStr>(fields: &[&str], index: usize) -> Option<T> {
    fields.get(index).and_then(|f| f.trim().parse().ok())
}

/// Registration status from a `+CREG: <n>,<stat>` payload
pub fn parse_creg(payload: &str) -> Result<u8> {
    let fields: Vec<&str> = payload.split(',').collect();
    let index = if fields.len() >= 2 { 1 } else { 0 };
    field(&fields, index)
        .ok_or_else(|| UplinkError::Modem(format!("bad +CREG payload '{}'", payload)))
}

/// RSSI code from a `+CSQ: <rssi>,<ber>` payload
pub fn parse_csq(payload: &str) -> Result<u8> {
    let fields: Vec<&str> = payload.split(',').collect();
    field(&fields, 0).ok_or_else(|| UplinkError::Modem(format!("bad +CSQ payload '{}'", payload)))
}

/// Position and time from a `+CGNSINF:` payload
///
/// Fields: run status, fix status, `yyyyMMddhhmmss.sss` UTC, latitude,
/// longitude, MSL altitude, speed over ground (km/h), course over ground,
/// and more that are not used. Missing or empty fields read as zero; position
/// fields are zero unless the receiver reports a fix.
pub fn parse_cgnsinf(payload: &str) -> Fix {
    let fields: Vec<&str> = payload.split(',').collect();
    let number = |index: usize| field::<f32>(&fields, index).unwrap_or(0.0);

    let mut fix = Fix::default();

    let stamp = fields.get(2).map(|s| s.trim()).unwrap_or_default();
    fix.year = stamp_part(stamp, 0..4);
    fix.month = stamp_part(stamp, 4..6);
    fix.day = stamp_part(stamp, 6..8);
    fix.hour = stamp_part(stamp, 8..10);
    fix.minute = stamp_part(stamp, 10..12);
    fix.second = stamp.get(12..).and_then(|s| s.parse().ok()).unwrap_or(0.0);

    if field::<u8>(&fields, 1) == Some(1) {
        fix.latitude = number(3);
        fix.longitude = number(4);
        fix.altitude = number(5);
        fix.speed_kph = number(6);
        fix.heading = number(7);
    }

    fix
}

fn stamp_part<T: std::str::FromStr + Default>(stamp: &str, range: std::ops::Range<usize>) -> T {
    stamp.get(range).and_then(|s| s.parse().ok()).unwrap_or_default()
}

/// `(status, max_len)` from a `+FTPPUT: 1,<status>[,<max_len>]` payload
/// (the text after `+FTPPUT: 1,`)
pub fn parse_ftpput_session(payload: &str) -> Result<(u32, Option<usize>)> {
    let fields: Vec<&str> = payload.split(',').collect();
    let status = field(&fields, 0)
        .ok_or_else(|| UplinkError::Modem(format!("bad +FTPPUT payload '{}'", payload)))?;
    Ok((status, field(&fields, 1)))
}

#[async_trait]
impl<P: SerialPortIO, D: Delay> Modem for Sim7000<P, D> {
    async fn set_power(&mut self, state: PowerState) -> Result<()> {
        match state {
            PowerState::On => self.power_on().await,
            PowerState::Off => {
                self.send("AT+CPOWD=1").await?;
                self.wait_for("NORMAL POWER DOWN").await.map(|_| ())
            }
        }
    }

    async fn set_functionality(&mut self, level: Functionality) -> Result<()> {
        self.command(&format!("AT+CFUN={}", level as u8)).await.map(|_| ())
    }

    async fn set_network_profile(&mut self, apn: &str) -> Result<()> {
        self.command(&format!("AT+CGDCONT=1,\"IP\",\"{}\"", apn)).await?;
        self.apn = apn.to_string();
        Ok(())
    }

    async fn registration_status(&mut self) -> Result<u8> {
        let payload = self.query("AT+CREG?", "+CREG:").await?;
        parse_creg(&payload)
    }

    async fn signal_quality(&mut self) -> Result<u8> {
        let payload = self.query("AT+CSQ", "+CSQ:").await?;
        parse_csq(&payload)
    }

    async fn set_gps(&mut self, enabled: bool) -> Result<()> {
        self.command(&format!("AT+CGNSPWR={}", u8::from(enabled))).await.map(|_| ())
    }

    async fn position(&mut self) -> Result<Fix> {
        let payload = self.query("AT+CGNSINF", "+CGNSINF:").await?;
        Ok(parse_cgnsinf(&payload))
    }

    async fn set_data(&mut self, enabled: bool) -> Result<()> {
        let command = if enabled {
            format!("AT+CNACT=1,\"{}\"", self.apn)
        } else {
            "AT+CNACT=0".to_string()
        };
        self.command(&command).await.map(|_| ())
    }

    async fn ftp_connect(&mut self, server: &FtpServer) -> Result<bool> {
        let commands = [
            "AT+FTPCID=1".to_string(),
            format!("AT+FTPSERV=\"{}\"", server.host),
            format!("AT+FTPPORT={}", server.port),
            format!("AT+FTPUN=\"{}\"", server.username),
            format!("AT+FTPPW=\"{}\"", server.password),
        ];

        for command in &commands {
            match self.command(command).await {
                Ok(_) => {}
                Err(UplinkError::Modem(e)) => {
                    warn!("FTP setup rejected: {}", e);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(true)
    }

    async fn ftp_put(
        &mut self,
        remote_name: &str,
        remote_path: &str,
        payload: &[u8],
    ) -> Result<bool> {
        let Some(max_len) = self.ftp_open(remote_name, remote_path).await? else {
            return Ok(false);
        };

        for chunk in payload.chunks(max_len) {
            self.send(&format!("AT+FTPPUT=2,{}", chunk.len())).await?;
            let granted: usize = self
                .wait_for("+FTPPUT: 2,")
                .await?
                .parse()
                .map_err(|_| UplinkError::Modem("bad +FTPPUT: 2 length".to_string()))?;
            if granted != chunk.len() {
                warn!("Modem accepted {} of {} bytes for {}", granted, chunk.len(), remote_name);
                return Ok(false);
            }

            self.port
                .write_all(chunk)
                .await
                .map_err(|e| UplinkError::Serial(format!("Failed to write FTP data: {}", e)))?;
            self.port
                .flush()
                .await
                .map_err(|e| UplinkError::Serial(format!("Failed to flush serial port: {}", e)))?;
            self.wait_ok().await?;

            let (status, _) = parse_ftpput_session(&self.wait_for("+FTPPUT: 1,").await?)?;
            if status != FTPPUT_READY {
                warn!("FTP upload of {} interrupted with status {}", remote_name, status);
                return Ok(false);
            }
        }

        self.command("AT+FTPPUT=2,0").await?;
        let (status, _) = parse_ftpput_session(&self.wait_for("+FTPPUT: 1,").await?)?;
        Ok(status == FTPPUT_DONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::mocks::RecordingDelay;
    use crate::serial::port_trait::mocks::MockSerialPort;

    fn modem(port: &MockSerialPort) -> Sim7000<MockSerialPort, RecordingDelay> {
        Sim7000::with_delay(port.clone(), DEFAULT_RESPONSE_TIMEOUT, RecordingDelay::new())
    }

    #[test]
    fn test_parse_creg() {
        assert_eq!(parse_creg("0,1").unwrap(), 1);
        assert_eq!(parse_creg(" 2,5").unwrap(), 5);
        assert_eq!(parse_creg("3").unwrap(), 3);
        assert!(parse_creg("x,y").is_err());
    }

    #[test]
    fn test_parse_csq() {
        assert_eq!(parse_csq("20,0").unwrap(), 20);
        assert_eq!(parse_csq("99,99").unwrap(), 99);
        assert!(parse_csq("").is_err());
    }

    #[test]
    fn test_parse_cgnsinf_with_fix() {
        let fix = parse_cgnsinf(
            "1,1,20200702140309.250,43.084100,-77.674200,160.500,0.52,271.3,1,,1.1,1.4,0.9,,10,7,,,38,,",
        );

        assert!(fix.is_valid());
        assert_eq!(fix.year, 2020);
        assert_eq!(fix.month, 7);
        assert_eq!(fix.day, 2);
        assert_eq!(fix.hour, 14);
        assert_eq!(fix.minute, 3);
        assert!((fix.second - 9.25).abs() < 1e-3);
        assert!((fix.latitude - 43.0841).abs() < 1e-4);
        assert!((fix.longitude + 77.6742).abs() < 1e-4);
        assert!((fix.altitude - 160.5).abs() < 1e-3);
        assert!((fix.speed_kph - 0.52).abs() < 1e-3);
        assert!((fix.heading - 271.3).abs() < 1e-3);
    }

    #[test]
    fn test_parse_cgnsinf_without_fix() {
        let fix = parse_cgnsinf("1,0,20200702140309.000,,,,0.00,0.0,0,,,,,,3,0,,,,,");
        assert!(!fix.is_valid());
        assert_eq!(fix.year, 2020);

        let fix = parse_cgnsinf("0,,,,,,,,,,,,,,,,,,,,");
        assert_eq!(fix, Fix::default());
        assert_eq!(parse_cgnsinf(""), Fix::default());
    }

    #[test]
    fn test_parse_ftpput_session() {
        assert_eq!(parse_ftpput_session("1,1360").unwrap(), (1, Some(1360)));
        assert_eq!(parse_ftpput_session("0").unwrap(), (0, None));
        assert_eq!(parse_ftpput_session("61").unwrap(), (61, None));
        assert!(parse_ftpput_session("").is_err());
    }

    #[tokio::test]
    async fn test_registration_status_ignores_echo() {
        let port = MockSerialPort::new();
        port.respond(&["AT+CREG?", "+CREG: 0,5", "OK"]);

        let status = modem(&port).registration_status().await.unwrap();

        assert_eq!(status, 5);
        assert_eq!(port.written_text(), "AT+CREG?\r\n");
        assert_eq!(port.pending_responses(), 0);
    }

    #[tokio::test]
    async fn test_error_response_is_modem_error() {
        let port = MockSerialPort::new();
        port.respond(&["+CME ERROR: 30"]);

        let result = modem(&port).signal_quality().await;

        match result {
            Err(UplinkError::Modem(msg)) => assert!(msg.contains("+CME ERROR: 30")),
            other => panic!("Expected Modem error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_serial_error() {
        let port = MockSerialPort::new();
        let result = modem(&port).registration_status().await;
        assert!(matches!(result, Err(UplinkError::Serial(_))));
    }

    #[tokio::test]
    async fn test_write_failure_is_serial_error() {
        let port = MockSerialPort::new();
        port.set_write_error(std::io::ErrorKind::BrokenPipe);
        let result = modem(&port).set_gps(true).await;
        assert!(matches!(result, Err(UplinkError::Serial(_))));
    }

    #[tokio::test]
    async fn test_position_query() {
        let port = MockSerialPort::new();
        port.respond(&["+CGNSINF: 1,1,20200702140309.000,43.1,-77.6,150.0,0.0,0.0,1", "OK"]);

        let fix = modem(&port).position().await.unwrap();

        assert!(fix.is_valid());
        assert_eq!(port.written_text(), "AT+CGNSINF\r\n");
    }

    #[tokio::test]
    async fn test_data_bearer_uses_configured_apn() {
        let port = MockSerialPort::new();
        port.respond(&["OK", "OK", "OK"]);
        let mut modem = modem(&port);

        modem.set_network_profile("hologram").await.unwrap();
        modem.set_data(true).await.unwrap();
        modem.set_data(false).await.unwrap();

        assert_eq!(
            port.written_text(),
            "AT+CGDCONT=1,\"IP\",\"hologram\"\r\nAT+CNACT=1,\"hologram\"\r\nAT+CNACT=0\r\n"
        );
    }

    #[tokio::test]
    async fn test_power_cycle_commands() {
        let port = MockSerialPort::new();
        port.respond(&["NORMAL POWER DOWN", "OK", "OK", "OK"]);
        let mut modem = modem(&port);

        modem.set_power(PowerState::Off).await.unwrap();
        modem.set_power(PowerState::On).await.unwrap();
        modem.set_functionality(Functionality::Full).await.unwrap();

        assert_eq!(port.written_text(), "AT+CPOWD=1\r\nAT\r\nATE0\r\nAT+CFUN=1\r\n");
    }

    #[tokio::test]
    async fn test_power_on_gives_up() {
        let port = MockSerialPort::new();
        let delay = RecordingDelay::new();
        let mut modem = Sim7000::with_delay(port.clone(), DEFAULT_RESPONSE_TIMEOUT, delay.clone());

        let result = modem.set_power(PowerState::On).await;

        assert!(matches!(result, Err(UplinkError::Modem(_))));
        assert_eq!(port.get_written_data().len(), POWER_ON_PROBES as usize);
        assert_eq!(delay.count_of(POWER_ON_PROBE_INTERVAL), POWER_ON_PROBES as usize);
    }

    #[tokio::test]
    async fn test_power_on_waits_between_probes_until_answer() {
        let port = MockSerialPort::new();
        let delay = RecordingDelay::new();
        let mut modem = Sim7000::with_delay(port.clone(), DEFAULT_RESPONSE_TIMEOUT, delay.clone());
        port.respond(&["ERROR", "ERROR", "OK", "OK"]);

        modem.set_power(PowerState::On).await.unwrap();

        assert_eq!(delay.sleeps(), vec![POWER_ON_PROBE_INTERVAL, POWER_ON_PROBE_INTERVAL]);
        assert_eq!(port.written_text(), "AT\r\nAT\r\nAT\r\nATE0\r\n");
    }

    #[tokio::test]
    async fn test_ftp_connect() {
        let port = MockSerialPort::new();
        port.respond(&["OK", "OK", "OK", "OK", "OK"]);
        let server = FtpServer {
            host: "ftp.example.org".to_string(),
            port: 21,
            username: "user".to_string(),
            password: "pass".to_string(),
        };

        assert!(modem(&port).ftp_connect(&server).await.unwrap());
        let text = port.written_text();
        assert!(text.contains("AT+FTPSERV=\"ftp.example.org\"\r\n"));
        assert!(text.contains("AT+FTPPORT=21\r\n"));
        assert!(text.contains("AT+FTPPW=\"pass\"\r\n"));
    }

    #[tokio::test]
    async fn test_ftp_connect_refused() {
        let port = MockSerialPort::new();
        port.respond(&["OK", "ERROR"]);
        let server = FtpServer {
            host: "ftp.example.org".to_string(),
            port: 21,
            username: "user".to_string(),
            password: "pass".to_string(),
        };

        assert!(!modem(&port).ftp_connect(&server).await.unwrap());
    }

    #[tokio::test]
    async fn test_ftp_put_success() {
        let port = MockSerialPort::new();
        port.respond(&[
            "OK",
            "OK",
            "OK",
            "+FTPPUT: 1,1,1360",
            "+FTPPUT: 2,10",
            "OK",
            "+FTPPUT: 1,1,1360",
            "OK",
            "+FTPPUT: 1,0",
        ]);

        let acknowledged = modem(&port)
            .ftp_put("DATA.000", "/pub/upload/", b"a,1\r\nb,2\r\n")
            .await
            .unwrap();

        assert!(acknowledged);
        let written = port.get_written_data();
        assert!(written.contains(&b"a,1\r\nb,2\r\n".to_vec()));
        let text = port.written_text();
        assert!(text.starts_with(
            "AT+FTPPUTNAME=\"DATA.000\"\r\nAT+FTPPUTPATH=\"/pub/upload/\"\r\nAT+FTPPUT=1\r\n"
        ));
        assert!(text.ends_with("AT+FTPPUT=2,0\r\n"));
        assert_eq!(port.pending_responses(), 0);
    }

    #[tokio::test]
    async fn test_ftp_put_chunks_to_modem_limit() {
        let port = MockSerialPort::new();
        port.respond(&[
            "OK",
            "OK",
            "OK",
            "+FTPPUT: 1,1,4",
            "+FTPPUT: 2,4",
            "OK",
            "+FTPPUT: 1,1,4",
            "+FTPPUT: 2,2",
            "OK",
            "+FTPPUT: 1,1,4",
            "OK",
            "+FTPPUT: 1,0",
        ]);

        assert!(modem(&port).ftp_put("D.000", "/", b"abcdef").await.unwrap());
        let written = port.get_written_data();
        assert!(written.contains(&b"abcd".to_vec()));
        assert!(written.contains(&b"ef".to_vec()));
    }

    #[tokio::test]
    async fn test_ftp_put_session_refused() {
        let port = MockSerialPort::new();
        port.respond(&["OK", "OK", "OK", "+FTPPUT: 1,61"]);

        let acknowledged = modem(&port)
            .ftp_put("DATA.000", "/pub/upload/", b"x\r\n")
            .await
            .unwrap();

        assert!(!acknowledged);
    }

    #[tokio::test]
    async fn test_ftp_put_timeout_is_error() {
        let port = MockSerialPort::new();
        port.respond(&["OK", "OK", "OK"]);

        let result = modem(&port).ftp_put("DATA.000", "/pub/upload/", b"x\r\n").await;

        assert!(matches!(result, Err(UplinkError::Serial(_))));
    }
}
