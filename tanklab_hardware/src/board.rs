//! Serial Firmata board (Arduino running StandardFirmata).
//!
//! Owns the write half of the serial port. A background thread owns a cloned
//! read half, drains incoming frames so the OS buffer never overflows, and
//! publishes the latest analog values through atomics. The thread only reads;
//! every command is issued from the control loop through `&mut self`.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tanklab_traits::{DeviceError, LevelSensor, Pump};
use tracing::{debug, info, trace, warn};

use crate::error::{HwError, Result};
use crate::firmata::{self, FirmataEvent, FrameDecoder, PinMode};
use crate::util::wait_until_with_timeout;

const NO_SAMPLE: u32 = u32::MAX;

/// Wiring and timing of the rig.
#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub port: String,
    pub baud: u32,
    /// Analog channel of the upper tank sensor.
    pub h1_channel: u8,
    /// Analog channel of the lower tank sensor.
    pub h2_channel: u8,
    pub pwm_pin: u8,
    /// Optional H-bridge direction pins driven (high, low) on open.
    pub direction_pins: Option<(u8, u8)>,
    /// Physical units per unit of normalized ADC reading.
    pub level_scale: f64,
    /// Max age of the newest analog report before reads fail.
    pub read_timeout: Duration,
    /// Wait after opening the port for the bootloader to hand over to Firmata.
    pub boot_delay: Duration,
}

struct Shared {
    analog: [AtomicU32; 16],
    last_frame_ms: AtomicU64,
    link_lost: AtomicBool,
    shutdown: AtomicBool,
}

pub struct FirmataBoard {
    port: Box<dyn serialport::SerialPort>,
    cfg: BoardConfig,
    shared: Arc<Shared>,
    epoch: Instant,
    port_masks: [u8; 16],
    drain: Option<JoinHandle<()>>,
}

impl FirmataBoard {
    /// Open the serial link, start the drain thread and configure the pins.
    pub fn open(cfg: BoardConfig) -> Result<Self> {
        info!(port = %cfg.port, baud = cfg.baud, "opening firmata board");
        let port = serialport::new(&cfg.port, cfg.baud)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| HwError::Serial(format!("open {}: {e}", cfg.port)))?;
        let reader = port
            .try_clone()
            .map_err(|e| HwError::Serial(format!("clone {}: {e}", cfg.port)))?;

        let shared = Arc::new(Shared {
            analog: std::array::from_fn(|_| AtomicU32::new(NO_SAMPLE)),
            last_frame_ms: AtomicU64::new(0),
            link_lost: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });
        let epoch = Instant::now();
        let drain = spawn_drain(reader, shared.clone(), epoch);

        let mut board = Self {
            port,
            cfg,
            shared,
            epoch,
            port_masks: [0; 16],
            drain: Some(drain),
        };
        std::thread::sleep(board.cfg.boot_delay);
        board.configure()?;

        let (c1, c2) = (board.cfg.h1_channel, board.cfg.h2_channel);
        let shared = board.shared.clone();
        wait_until_with_timeout(
            || {
                shared.analog[usize::from(c1)].load(Ordering::Relaxed) != NO_SAMPLE
                    && shared.analog[usize::from(c2)].load(Ordering::Relaxed) != NO_SAMPLE
            },
            board.cfg.read_timeout.max(Duration::from_millis(500)),
            Duration::from_millis(5),
        )?;
        info!("firmata board ready");
        Ok(board)
    }

    fn configure(&mut self) -> Result<()> {
        let h1 = self.cfg.h1_channel;
        let h2 = self.cfg.h2_channel;
        for ch in [h1, h2] {
            self.send(&firmata::encode_report_analog(ch, true)?)?;
        }
        let pwm = self.cfg.pwm_pin;
        self.send(&firmata::encode_set_pin_mode(pwm, PinMode::Pwm))?;
        self.send(&firmata::encode_pwm_write(pwm, 0.0)?)?;
        if let Some((fwd, rev)) = self.cfg.direction_pins {
            self.send(&firmata::encode_set_pin_mode(fwd, PinMode::Output))?;
            self.send(&firmata::encode_set_pin_mode(rev, PinMode::Output))?;
            self.digital_write(fwd, true)?;
            self.digital_write(rev, false)?;
        }
        debug!(h1, h2, pwm, "pins configured");
        Ok(())
    }

    fn digital_write(&mut self, pin: u8, high: bool) -> Result<()> {
        let port = usize::from(pin / 8) & 0x0F;
        let bit = 1u8 << (pin % 8);
        if high {
            self.port_masks[port] |= bit;
        } else {
            self.port_masks[port] &= !bit;
        }
        let frame = firmata::encode_digital_port(port as u8, self.port_masks[port]);
        self.send(&frame)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.shared.link_lost.load(Ordering::Relaxed) {
            return Err(HwError::LinkLost);
        }
        self.port.write_all(bytes)?;
        self.port.flush()?;
        trace!(?bytes, "firmata tx");
        Ok(())
    }

    fn channel_unit(&self, channel: u8) -> Result<f64> {
        let raw = self.shared.analog[usize::from(channel)].load(Ordering::Relaxed);
        if raw == NO_SAMPLE {
            return Err(HwError::NoData(channel));
        }
        Ok(firmata::adc_to_unit(raw as u16))
    }

    /// Latest scaled levels `(h1, h2)`.
    pub fn levels(&self) -> Result<(f64, f64)> {
        if self.shared.link_lost.load(Ordering::Relaxed) {
            return Err(HwError::LinkLost);
        }
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        let age = now_ms.saturating_sub(self.shared.last_frame_ms.load(Ordering::Relaxed));
        if age > self.cfg.read_timeout.as_millis() as u64 {
            return Err(HwError::Timeout);
        }
        let h1 = self.channel_unit(self.cfg.h1_channel)? * self.cfg.level_scale;
        let h2 = self.channel_unit(self.cfg.h2_channel)? * self.cfg.level_scale;
        Ok((h1, h2))
    }

    pub fn write_pwm(&mut self, duty: f64) -> Result<()> {
        let frame = firmata::encode_pwm_write(self.cfg.pwm_pin, duty)?;
        self.send(&frame)
    }
}

fn spawn_drain(
    mut reader: Box<dyn serialport::SerialPort>,
    shared: Arc<Shared>,
    epoch: Instant,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 256];
        let mut events = Vec::with_capacity(64);
        while !shared.shutdown.load(Ordering::Relaxed) {
            match reader.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    events.clear();
                    decoder.extend(&buf[..n], &mut events);
                    for ev in &events {
                        match *ev {
                            FirmataEvent::Analog { channel, value } => {
                                shared.analog[usize::from(channel)]
                                    .store(u32::from(value), Ordering::Relaxed);
                                shared
                                    .last_frame_ms
                                    .store(epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
                            }
                            FirmataEvent::Version { major, minor } => {
                                debug!(major, minor, "firmata version");
                            }
                            FirmataEvent::DigitalPort { .. } => {}
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!(error = %e, "serial read failed; drain thread exiting");
                    shared.link_lost.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
        trace!("drain thread exiting cleanly");
    })
}

impl Drop for FirmataBoard {
    fn drop(&mut self) {
        if let Err(e) = self.write_pwm(0.0) {
            warn!(error = %e, "failed to zero pump on close");
        }
        self.shared.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.drain.take()
            && handle.join().is_err()
        {
            warn!("drain thread panicked during shutdown");
        }
    }
}

impl LevelSensor for FirmataBoard {
    fn read_levels(&mut self) -> std::result::Result<(f64, f64), DeviceError> {
        self.levels().map_err(|e| Box::new(e) as DeviceError)
    }
}

impl Pump for FirmataBoard {
    fn set_duty(&mut self, duty: f64) -> std::result::Result<(), DeviceError> {
        self.write_pwm(duty).map_err(|e| Box::new(e) as DeviceError)
    }

    fn stop(&mut self) -> std::result::Result<(), DeviceError> {
        self.write_pwm(0.0).map_err(|e| Box::new(e) as DeviceError)
    }
}
