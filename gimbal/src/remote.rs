//! Setpoint sources
//!
//! The push button arrives as a POSIX signal: the handler only writes a byte on a
//! socket and the button task, sleeping in a poll on the other end, does the
//! debounce and the setpoint update. Commands typed on a line based input set
//! both axes at once.

use std::io::{BufRead, ErrorKind, Read};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use mio::{Interest, Token};

use crate::config::RemoteParameters;
use crate::polling::Poller;
use crate::shared::{SharedCell, SharedState};
use crate::types::Setpoint;

const BUTTON: Token = Token(0);

/// Outcome of a button press
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Press {
    /// Too close to the previous accepted press
    Bounce,
    Toggled(Setpoint),
    /// Accepted but the setpoint lock stayed busy
    Busy,
}

/// Debounced toggle of the roll setpoint between level and a preset angle
#[derive(Debug)]
pub struct ButtonToggle {
    debounce: Duration,
    toggle_roll_deg: f32,
    lock_timeout: Duration,
    last_press: Option<Instant>,
}

impl ButtonToggle {
    pub fn new(params: &RemoteParameters) -> Self {
        Self {
            debounce: params.debounce(),
            toggle_roll_deg: params.toggle_roll_deg,
            lock_timeout: params.lock_timeout(),
            last_press: None,
        }
    }

    pub fn press(&mut self, now: Instant, setpoint: &SharedCell<Setpoint>) -> Press {
        if let Some(last) = self.last_press {
            if now.saturating_duration_since(last) <= self.debounce {
                return Press::Bounce;
            }
        }
        self.last_press = Some(now);

        let toggle_roll_deg = self.toggle_roll_deg;
        let toggled = setpoint.update_within(self.lock_timeout, |setpoint| {
            setpoint.roll_deg = if setpoint.roll_deg == 0.0 { toggle_roll_deg } else { 0.0 };
        });
        match toggled {
            Some(setpoint) => {
                log::info!("Roll setpoint toggled to {:.1}°", setpoint.roll_deg);
                Press::Toggled(setpoint)
            },
            None => {
                log::warn!("Setpoint lock busy, button press lost");
                Press::Busy
            },
        }
    }
}

/// Wakes up when a given signal is delivered to the process
pub struct SignalListener {
    reader: UnixStream,
    poller: Poller,
}

impl SignalListener {
    pub fn new(signal: i32) -> Result<Self> {
        let (reader, writer) = UnixStream::pair().context("Creating signal socket")?;
        reader.set_nonblocking(true).context("Configuring signal socket")?;
        signal_hook::low_level::pipe::register(signal, writer).context("Registering signal handler")?;

        let mut poller = Poller::new(8)?;
        poller.register(&reader, BUTTON, Interest::READABLE)?;
        Ok(Self {
            reader,
            poller,
        })
    }

    /// Wait for the signal, `false` if none arrived within `timeout`.
    ///
    /// Deliveries received since the last call are merged into one.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let pending = !self.poller.poll(timeout)?.is_empty();
        if pending {
            self.drain()?;
        }
        Ok(pending)
    }

    fn drain(&mut self) -> Result<()> {
        let mut buffer = [0u8; 16];
        loop {
            match self.reader.read(&mut buffer) {
                Ok(0) => return Ok(()),
                Ok(_) => (),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => (),
                Err(e) => return Err(e).context("Reading signal socket"),
            }
        }
    }
}

/// Button task: toggle the roll setpoint on every debounced `SIGUSR1`.
pub fn button_task(params: RemoteParameters, shared: Arc<SharedState>) -> Result<()> {
    let mut listener = SignalListener::new(signal_hook::consts::SIGUSR1)?;
    let mut button = ButtonToggle::new(&params);
    log::info!("Button ready: kill -USR1 {}", std::process::id());

    loop {
        if listener.wait(None)? {
            button.press(Instant::now(), &shared.setpoint);
        }
    }
}

/// Parse a `<pitch_deg> <roll_deg>` command.
pub fn parse_setpoint(line: &str) -> Option<Setpoint> {
    let mut fields = line.split_whitespace();
    let pitch_deg = fields.next()?.parse::<f32>().ok()?;
    let roll_deg = fields.next()?.parse::<f32>().ok()?;
    if fields.next().is_some() || !pitch_deg.is_finite() || !roll_deg.is_finite() {
        return None;
    }
    Some(Setpoint::new(pitch_deg, roll_deg))
}

/// Command task: apply every setpoint line read from `input` until it closes.
pub fn command_task<R: BufRead>(input: R, params: RemoteParameters, shared: Arc<SharedState>) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Reading commands")?;
        if line.trim().is_empty() {
            continue;
        }
        match parse_setpoint(&line) {
            Some(setpoint) => {
                if shared.setpoint.write_within(setpoint, params.lock_timeout()) {
                    log::info!("Setpoint pitch {:.1}° roll {:.1}°", setpoint.pitch_deg, setpoint.roll_deg);
                } else {
                    log::warn!("Setpoint lock busy, command dropped");
                }
            },
            None => log::warn!("Invalid command {:?}, expected <pitch_deg> <roll_deg>", line),
        }
    }
    log::info!("Command input closed");
    Ok(())
}
