//! `HeatOutput` trait for the solid-state relay that switches the heating
//! element.
//!
//! The actuator is also the pacing mechanism of the control loop: each call
//! holds the output level for the requested duration before returning, and
//! the engine always splits one tick into a heat-on and a heat-off part.

use std::time::Duration;

use kiln_types::KilnError;

/// An on/off heating element driver.
///
/// `cool(Duration::ZERO)` is the idempotent "ensure off" command used on
/// every transition into a non-heating state.
pub trait HeatOutput: Send {
    /// Stable identifier for this output, e.g. `"ssr_gpio23"`.
    fn id(&self) -> &str;

    /// Energise the element and hold it on for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`KilnError::HardwareFault`] if the output cannot be driven.
    fn heat(&mut self, duration: Duration) -> Result<(), KilnError>;

    /// De-energise the element and hold it off for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`KilnError::HardwareFault`] if the output cannot be driven.
    fn cool(&mut self, duration: Duration) -> Result<(), KilnError>;

    /// `true` while the element is energised.
    fn is_on(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockOutput {
        on: bool,
        on_time: Duration,
    }

    impl HeatOutput for MockOutput {
        fn id(&self) -> &str {
            "mock_ssr"
        }

        fn heat(&mut self, duration: Duration) -> Result<(), KilnError> {
            self.on = true;
            self.on_time += duration;
            Ok(())
        }

        fn cool(&mut self, _duration: Duration) -> Result<(), KilnError> {
            self.on = false;
            Ok(())
        }

        fn is_on(&self) -> bool {
            self.on
        }
    }

    #[test]
    fn mock_output_toggles_and_accumulates() {
        let mut out = MockOutput {
            on: false,
            on_time: Duration::ZERO,
        };
        assert_eq!(out.id(), "mock_ssr");
        out.heat(Duration::from_millis(400)).unwrap();
        assert!(out.is_on());
        out.cool(Duration::ZERO).unwrap();
        assert!(!out.is_on());
        assert_eq!(out.on_time, Duration::from_millis(400));
    }
}
