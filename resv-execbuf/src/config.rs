use resv::{RESERVATION_CLASS, TicketClass};

/// Engine configuration.
///
/// ```rust
/// use resv_execbuf::ExecbufConfig;
///
/// let config = ExecbufConfig::default().interruptible(false);
/// assert!(!config.interruptible);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ExecbufConfig {
    /// Blocking waits give up when the waiting thread's signal is raised.
    pub interruptible: bool,
    /// Class tickets are stamped from.
    pub class: &'static TicketClass,
}

impl ExecbufConfig {
    /// Set whether blocking waits are interruptible.
    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    /// Stamp tickets from `class` instead of the global reservation class.
    pub fn ticket_class(mut self, class: &'static TicketClass) -> Self {
        self.class = class;
        self
    }
}

impl Default for ExecbufConfig {
    fn default() -> Self {
        Self {
            interruptible: true,
            class: &RESERVATION_CLASS,
        }
    }
}
