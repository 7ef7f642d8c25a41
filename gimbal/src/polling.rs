use anyhow::{Context, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Readiness poller over raw file descriptors
pub struct Poller {
    inner: Poll,
    events: Events,
}

impl Poller {
    pub fn new(capacity: usize) -> Result<Self> {
        let inner = Poll::new().context("Error creating poller")?;
        let events = Events::with_capacity(capacity);
        Ok(Self {
            inner,
            events,
        })
    }

    pub fn register<T: AsRawFd>(&mut self, source: &T, token: Token, interest: Interest) -> Result<()> {
        self.inner
            .registry()
            .register(&mut SourceFd(&source.as_raw_fd()), token, interest)
            .context("Error registering event")
    }

    /// Wait for readiness events. Sources are edge triggered: drain them until `WouldBlock`.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<&Events> {
        loop {
            match self.inner.poll(&mut self.events, timeout) {
                Ok(()) => return Ok(&self.events),
                // A signal landed while sleeping
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context("Error polling for events"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_readable_socket() {
        let (reader, mut writer) = UnixStream::pair().unwrap();
        let mut poller = Poller::new(4).unwrap();
        poller.register(&reader, Token(3), Interest::READABLE).unwrap();

        assert!(poller.poll(Some(Duration::from_millis(10))).unwrap().is_empty());
        writer.write_all(&[1]).unwrap();
        let tokens: Vec<_> = poller.poll(Some(Duration::from_secs(1))).unwrap().iter().map(|e| e.token()).collect();
        assert_eq!(tokens, vec![Token(3)]);
    }
}
