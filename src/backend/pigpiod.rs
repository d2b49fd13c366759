use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;

use crate::backend::chips::GpioChip;
use crate::backend::{BindError, ClaimedLine, Level, PulseBackend};
use crate::config::{LineConfig, Pull};
use crate::pulse::EdgeRouter;

// pigpiod socket commands
const CMD_MODES: u32 = 0;
const CMD_PUD: u32 = 2;
const CMD_HWVER: u32 = 17;
const CMD_NB: u32 = 19;
const CMD_NC: u32 = 21;
const CMD_FG: u32 = 97;
const CMD_NOIB: u32 = 99;

const MODE_INPUT: u32 = 0;
const PUD_OFF: u32 = 0;
const PUD_DOWN: u32 = 1;
const PUD_UP: u32 = 2;

// report flag bits; non-zero flags carry no level for a watched line
const NTFY_FLAGS_WATCHDOG: u16 = 1 << 5;

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Daemon-based family speaking the pigpiod socket protocol. One command
/// connection configures the line; a second connection is turned into a
/// notification stream with NOIB and read by a listener thread.
pub struct PigpiodBackend {
    addr: SocketAddr,
}

impl PigpiodBackend {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

impl Default for PigpiodBackend {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8888)))
    }
}

/// Sends one 16-byte command and returns the daemon's result word.
fn exec(stream: &mut TcpStream, cmd: u32, p1: u32, p2: u32) -> io::Result<i32> {
    let mut request = [0u8; 16];
    request[0..4].copy_from_slice(&cmd.to_le_bytes());
    request[4..8].copy_from_slice(&p1.to_le_bytes());
    request[8..12].copy_from_slice(&p2.to_le_bytes());
    stream.write_all(&request)?;
    let mut response = [0u8; 16];
    stream.read_exact(&mut response)?;
    Ok(i32::from_le_bytes(response[12..16].try_into().unwrap()))
}

fn exec_claim(stream: &mut TcpStream, what: &str, cmd: u32, p1: u32, p2: u32) -> Result<i32, BindError> {
    let res = exec(stream, cmd, p1, p2)
        .map_err(|e| BindError::Claim(format!("pigpiod {what}: {e}")))?;
    if res < 0 {
        return Err(BindError::Claim(format!("pigpiod {what}: error {res}")));
    }
    Ok(res)
}

fn connect(addr: &SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(addr, PROBE_TIMEOUT)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(PROBE_TIMEOUT))?;
    Ok(stream)
}

/// Extracts the logical level of `gpio` from one notification report, or
/// `None` when the report carries no level for it.
fn report_level(flags: u16, levels: u32, gpio: u32) -> Option<Level> {
    if flags & NTFY_FLAGS_WATCHDOG != 0 {
        return Some(Level::Timeout);
    }
    if flags != 0 {
        return None;
    }
    Some(if levels >> gpio & 1 == 1 {
        Level::High
    } else {
        Level::Low
    })
}

impl PulseBackend for PigpiodBackend {
    fn family(&self) -> &'static str {
        "pigpio"
    }

    fn probe(&self) -> Result<(), BindError> {
        let mut stream = connect(&self.addr)
            .map_err(|e| BindError::Probe(format!("pigpiod not reachable: {e}")))?;
        stream
            .set_read_timeout(Some(PROBE_TIMEOUT))
            .map_err(|e| BindError::Probe(format!("pigpiod socket: {e}")))?;
        let revision = exec(&mut stream, CMD_HWVER, 0, 0)
            .map_err(|e| BindError::Probe(format!("pigpiod hwver: {e}")))?;
        // pigpiod reports revision 0 when not running on a Pi
        if revision == 0 {
            return Err(BindError::Probe("hardware revision 0 (not a Pi)".into()));
        }
        Ok(())
    }

    fn claim(
        &self,
        line: &LineConfig,
        router: Arc<EdgeRouter>,
        _chip: Option<&GpioChip>,
    ) -> Result<Box<dyn ClaimedLine>, BindError> {
        if line.gpio > 31 {
            return Err(BindError::Claim(format!(
                "line {} outside pigpiod notification range",
                line.gpio
            )));
        }

        let mut control = connect(&self.addr)
            .map_err(|e| BindError::Claim(format!("pigpiod connect: {e}")))?;
        exec_claim(&mut control, "set mode", CMD_MODES, line.gpio, MODE_INPUT)?;
        let pud = match line.pull {
            Pull::Up => PUD_UP,
            Pull::Down => PUD_DOWN,
            Pull::None => PUD_OFF,
        };
        exec_claim(&mut control, "set pull", CMD_PUD, line.gpio, pud)?;
        if line.debounce_us > 0 {
            // the glitch filter is pigpiod's native debounce, already in µs
            exec_claim(&mut control, "glitch filter", CMD_FG, line.gpio, line.debounce_us)?;
        }

        let notify = connect(&self.addr)
            .map_err(|e| BindError::Claim(format!("pigpiod notify connect: {e}")))?;
        let mut notify_cmd = notify
            .try_clone()
            .map_err(|e| BindError::Claim(format!("pigpiod notify socket: {e}")))?;
        let handle = exec_claim(&mut notify_cmd, "notify open", CMD_NOIB, 0, 0)? as u32;
        exec_claim(&mut control, "notify begin", CMD_NB, handle, 1u32 << line.gpio)?;

        let listener = ReportListener::spawn(notify, line.gpio, router)
            .map_err(|e| BindError::Claim(format!("pigpiod listener: {e}")))?;

        Ok(Box::new(PigpiodClaim {
            listener: Some(listener),
            control,
            handle,
            gpio: line.gpio,
        }))
    }
}

/// Reads 12-byte level reports off the notification socket and forwards
/// the watched line's level to the router.
struct ReportListener {
    cancel: Arc<AtomicBool>,
    socket: TcpStream,
    thread: Option<JoinHandle<()>>,
}

impl ReportListener {
    fn spawn(socket: TcpStream, gpio: u32, router: Arc<EdgeRouter>) -> io::Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut stream = socket.try_clone()?;

        let thread = std::thread::spawn(move || {
            let mut report = [0u8; 12];
            let mut last_level: Option<Level> = None;
            while !cancel_flag.load(Ordering::Relaxed) {
                // blocking read; cancellation shuts the socket down to unblock it
                if stream.read_exact(&mut report).is_err() {
                    break;
                }
                let flags = u16::from_le_bytes(report[2..4].try_into().unwrap());
                let levels = u32::from_le_bytes(report[8..12].try_into().unwrap());
                let Some(level) = report_level(flags, levels, gpio) else {
                    continue;
                };
                // reports snapshot the whole bank; only transitions of the
                // watched line count
                if level != Level::Timeout && last_level == Some(level) {
                    continue;
                }
                if level != Level::Timeout {
                    last_level = Some(level);
                }
                router.deliver(level);
            }
        });

        Ok(Self {
            cancel,
            socket,
            thread: Some(thread),
        })
    }
}

impl Drop for ReportListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        let _ = self.socket.shutdown(Shutdown::Both);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct PigpiodClaim {
    listener: Option<ReportListener>,
    control: TcpStream,
    handle: u32,
    gpio: u32,
}

impl ClaimedLine for PigpiodClaim {
    fn describe(&self) -> String {
        "pigpio".to_string()
    }
}

impl Drop for PigpiodClaim {
    fn drop(&mut self) {
        // listener first: no report can arrive once it has joined
        self.listener.take();
        if let Err(e) = exec(&mut self.control, CMD_NC, self.handle, 0) {
            debug!("pigpio: notify close for line {} failed: {e}", self.gpio);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_level_reads_the_watched_bit() {
        assert_eq!(report_level(0, 1 << 17, 17), Some(Level::High));
        assert_eq!(report_level(0, 0, 17), Some(Level::Low));
        assert_eq!(report_level(0, 1 << 16, 17), Some(Level::Low));
    }

    #[test]
    fn watchdog_reports_become_the_timeout_sentinel() {
        assert_eq!(report_level(NTFY_FLAGS_WATCHDOG | 17, 0, 17), Some(Level::Timeout));
    }

    #[test]
    fn other_flagged_reports_carry_no_level() {
        assert_eq!(report_level(1 << 6, 1 << 17, 17), None);
    }
}
