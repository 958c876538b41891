//! Minimal Firmata framing: the handful of messages the tank rig needs.
//!
//! Outgoing: pin mode, analog reporting, PWM (analog) write, digital port write.
//! Incoming: analog reports, digital port reports and the version banner.
//! Sysex payloads are skipped.

use crate::error::{HwError, Result};

pub const ANALOG_MESSAGE: u8 = 0xE0;
pub const DIGITAL_MESSAGE: u8 = 0x90;
pub const REPORT_ANALOG: u8 = 0xC0;
pub const SET_PIN_MODE: u8 = 0xF4;
pub const REPORT_VERSION: u8 = 0xF9;
pub const START_SYSEX: u8 = 0xF0;
pub const END_SYSEX: u8 = 0xF7;

/// Largest value an Arduino 10-bit ADC reports.
pub const ADC_MAX: u16 = 1023;
/// Largest 8-bit PWM value.
pub const PWM_MAX: u16 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PinMode {
    Output = 0x01,
    Pwm = 0x03,
}

#[inline]
fn check_pin(pin: u8) -> Result<u8> {
    if pin > 0x0F {
        return Err(HwError::InvalidPin(pin));
    }
    Ok(pin)
}

pub fn encode_set_pin_mode(pin: u8, mode: PinMode) -> [u8; 3] {
    [SET_PIN_MODE, pin & 0x7F, mode as u8]
}

pub fn encode_report_analog(channel: u8, enable: bool) -> Result<[u8; 2]> {
    let ch = check_pin(channel)?;
    Ok([REPORT_ANALOG | ch, u8::from(enable)])
}

/// PWM write: `duty` in `[0, 1]` maps to `0..=255`; non-finite duty writes 0.
pub fn encode_pwm_write(pin: u8, duty: f64) -> Result<[u8; 3]> {
    let pin = check_pin(pin)?;
    let value = duty_to_pwm(duty);
    Ok([
        ANALOG_MESSAGE | pin,
        (value & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
    ])
}

/// Write an 8-pin digital port; bit `n` of `mask` drives pin `port * 8 + n`.
pub fn encode_digital_port(port: u8, mask: u8) -> [u8; 3] {
    [
        DIGITAL_MESSAGE | (port & 0x0F),
        mask & 0x7F,
        (mask >> 7) & 0x01,
    ]
}

#[inline]
pub fn duty_to_pwm(duty: f64) -> u16 {
    if !duty.is_finite() {
        return 0;
    }
    (duty.clamp(0.0, 1.0) * f64::from(PWM_MAX)).round() as u16
}

/// Normalize a raw ADC value into `[0, 1]`.
#[inline]
pub fn adc_to_unit(raw: u16) -> f64 {
    f64::from(raw.min(ADC_MAX)) / f64::from(ADC_MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmataEvent {
    Analog { channel: u8, value: u16 },
    DigitalPort { port: u8, mask: u8 },
    Version { major: u8, minor: u8 },
}

#[derive(Debug, Clone, Copy, Default)]
enum Pending {
    #[default]
    Idle,
    Analog(u8),
    Digital(u8),
    Version,
    Sysex,
}

/// Incremental decoder fed with raw bytes from the serial link.
///
/// Bytes that arrive outside a recognised frame are dropped; a command byte in
/// the middle of a frame restarts decoding at that byte.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Pending,
    data: [u8; 2],
    len: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, byte: u8) -> Option<FirmataEvent> {
        if byte & 0x80 != 0 {
            return self.start(byte);
        }
        match self.pending {
            Pending::Idle | Pending::Sysex => None,
            _ => {
                self.data[self.len] = byte;
                self.len += 1;
                if self.len < 2 {
                    return None;
                }
                let (lsb, msb) = (self.data[0], self.data[1]);
                let ev = match self.pending {
                    Pending::Analog(channel) => FirmataEvent::Analog {
                        channel,
                        value: u16::from(lsb) | (u16::from(msb) << 7),
                    },
                    Pending::Digital(port) => FirmataEvent::DigitalPort {
                        port,
                        mask: lsb | ((msb & 0x01) << 7),
                    },
                    _ => FirmataEvent::Version {
                        major: lsb,
                        minor: msb,
                    },
                };
                self.reset();
                Some(ev)
            }
        }
    }

    /// Feed a buffer, collecting every completed event.
    pub fn extend(&mut self, bytes: &[u8], out: &mut Vec<FirmataEvent>) {
        for &b in bytes {
            if let Some(ev) = self.push(b) {
                out.push(ev);
            }
        }
    }

    fn start(&mut self, cmd: u8) -> Option<FirmataEvent> {
        if matches!(self.pending, Pending::Sysex) && cmd == END_SYSEX {
            self.reset();
            return None;
        }
        self.len = 0;
        self.pending = match cmd {
            c if c & 0xF0 == ANALOG_MESSAGE => Pending::Analog(c & 0x0F),
            c if c & 0xF0 == DIGITAL_MESSAGE => Pending::Digital(c & 0x0F),
            REPORT_VERSION => Pending::Version,
            START_SYSEX => Pending::Sysex,
            _ => Pending::Idle,
        };
        None
    }

    fn reset(&mut self) {
        self.pending = Pending::Idle;
        self.len = 0;
    }
}
