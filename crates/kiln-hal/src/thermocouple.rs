//! Thermocouple sensor contract and the MAX31855 frame decoder.
//!
//! Bus access (SPI bit-banging, chip select timing) is left to a
//! [`FrameSource`]; this module only turns a raw 32-bit conversion frame
//! into a classified [`SensorSample`].
//!
//! # MAX31855 frame layout
//!
//! | Bits | Meaning |
//! |---|---|
//! | 31..18 | thermocouple temperature, 14-bit two's complement, 0.25 °C/LSB |
//! | 16 | fault (any of the bits below) |
//! | 15..4 | cold-junction temperature, 12-bit, 0.0625 °C/LSB |
//! | 2 | short to VCC |
//! | 1 | short to GND |
//! | 0 | open circuit |

use kiln_types::{KilnError, SensorFault, SensorSample};

/// A temperature probe that can be sampled at sub-tick rate.
pub trait Thermocouple: Send {
    fn id(&self) -> &str;

    /// Take one reading.
    ///
    /// Amplifier fault flags are reported through [`SensorSample::fault`];
    /// an `Err` means the bus transaction itself failed.
    fn read(&mut self) -> Result<SensorSample, KilnError>;
}

/// Raw 32-bit frame provider (the SPI transaction).
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<u32, KilnError>;
}

const FAULT_BIT: u32 = 1 << 16;
const SHORT_VCC_BIT: u32 = 1 << 2;
const SHORT_GND_BIT: u32 = 1 << 1;
const OPEN_CIRCUIT_BIT: u32 = 1;

/// Decode a MAX31855 frame.
///
/// The temperature is reported in Celsius, or Fahrenheit when
/// `fahrenheit` is set.
pub fn decode_max31855(frame: u32, fahrenheit: bool) -> SensorSample {
    let fault = if frame & FAULT_BIT == 0 {
        SensorFault::Ok
    } else if frame & OPEN_CIRCUIT_BIT != 0 {
        SensorFault::NoConnection
    } else if frame & SHORT_GND_BIT != 0 {
        SensorFault::ShortToGround
    } else if frame & SHORT_VCC_BIT != 0 {
        SensorFault::ShortToVcc
    } else {
        SensorFault::Unknown
    };

    // Arithmetic shift sign-extends the 14-bit reading.
    let celsius = f64::from((frame as i32) >> 18) * 0.25;
    let temperature = if fahrenheit {
        celsius * 9.0 / 5.0 + 32.0
    } else {
        celsius
    };

    SensorSample { temperature, fault }
}

/// MAX31855 thermocouple amplifier on top of any [`FrameSource`].
pub struct Max31855<B> {
    id: String,
    bus: B,
    fahrenheit: bool,
}

impl<B: FrameSource> Max31855<B> {
    pub fn new(id: impl Into<String>, bus: B, fahrenheit: bool) -> Self {
        Self {
            id: id.into(),
            bus,
            fahrenheit,
        }
    }
}

impl<B: FrameSource> Thermocouple for Max31855<B> {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&mut self) -> Result<SensorSample, KilnError> {
        let frame = self.bus.read_frame()?;
        Ok(decode_max31855(frame, self.fahrenheit))
    }
}
