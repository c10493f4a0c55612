//! `KillSwitch` trait for the independent hard power cutoff.
//!
//! The soft abort already zeroes the heat command; the kill switch is the
//! second line of defence for a relay that has failed closed.

use kiln_types::KilnError;

/// Best-effort power cutoff, fired once per emergency abort.
pub trait KillSwitch: Send {
    fn id(&self) -> &str;

    /// Cut power to the kiln.
    ///
    /// # Errors
    ///
    /// Returns [`KilnError::HardwareFault`] if the cutoff device did not
    /// acknowledge the command.
    fn kill(&mut self) -> Result<(), KilnError>;
}
