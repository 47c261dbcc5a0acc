//! Readiness-interest registration state for the socket.
//!
//! The interest set is recomputed from the connection's current need after
//! every event-processing pass and pushed to the poll registry, so stale
//! interest never silently stalls the connection.

use std::io;

use mio::event::Source;
use mio::{Interest, Registry, Token};

#[derive(Default)]
pub(crate) struct Registration {
    current: Option<Interest>,
}

impl Registration {
    /// Bring the registry in line with the wanted interest set. `None` means
    /// no interest: the source is deregistered.
    pub(crate) fn update<S: Source>(
        &mut self,
        registry: &Registry,
        source: &mut S,
        token: Token,
        want: Option<Interest>,
    ) -> io::Result<()> {
        match (self.current, want) {
            (None, None) => Ok(()),
            (None, Some(interest)) => {
                registry.register(source, token, interest)?;
                self.current = Some(interest);
                Ok(())
            }
            (Some(_), None) => {
                registry.deregister(source)?;
                self.current = None;
                Ok(())
            }
            (Some(current), Some(interest)) if current == interest => Ok(()),
            (Some(_), Some(interest)) => {
                registry.reregister(source, token, interest)?;
                self.current = Some(interest);
                Ok(())
            }
        }
    }

    /// Forget the registration without touching the registry. Used when the
    /// socket is dropped, which removes it from the poll set implicitly.
    pub(crate) fn reset(&mut self) {
        self.current = None;
    }
}
