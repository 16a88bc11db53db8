// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::registers::{FieldMode, FieldSpec, RegisterCollection, RegisterSpec};
use crate::{AccessWidths, Peripheral};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const WHO_AM_I: u8 = 0x0F;
pub const CTRL_REG1: u8 = 0x10;
pub const CTRL_REG2: u8 = 0x11;
pub const STATUS: u8 = 0x27;
pub const PRESS_OUT_XL: u8 = 0x28;
pub const PRESS_OUT_L: u8 = 0x29;
pub const PRESS_OUT_H: u8 = 0x2A;
pub const TEMP_OUT_L: u8 = 0x2B;
pub const TEMP_OUT_H: u8 = 0x2C;

const DEVICE_ID: u64 = 0b1011_0011;
const PRESSURE_SCALE: i64 = 4096;
const TEMPERATURE_SCALE: f64 = 100.0;
/// Register auto-increment wraps before the reserved tail of the map.
const ADDRESS_WRAP: u8 = 0x7B;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Readings {
    pressure_hpa: f64,
    temperature_c: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Idle,
    Data,
}

#[derive(Debug)]
struct Serial {
    state: Transfer,
    address: u8,
}

/// LPS22-class barometric pressure sensor.
///
/// Reachable either memory-mapped (one byte register per offset) or through
/// its serial transaction interface, where the first byte of a transfer
/// selects the register and following bytes auto-increment.
#[derive(Debug)]
pub struct PressureSensor {
    registers: Mutex<RegisterCollection>,
    readings: Arc<Mutex<Readings>>,
    serial: Mutex<Serial>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PressureSensor {
    pub fn new() -> Self {
        let readings = Arc::new(Mutex::new(Readings {
            pressure_hpa: 0.0,
            temperature_c: 0.0,
        }));

        let pressure = |shift: u32| {
            let r = readings.clone();
            move |_: u64| {
                let raw = lock(&r).pressure_hpa.trunc() as i64 * PRESSURE_SCALE;
                ((raw >> shift) & 0xFF) as u64
            }
        };
        let temperature = |shift: u32| {
            let r = readings.clone();
            move |_: u64| {
                let raw = (lock(&r).temperature_c * TEMPERATURE_SCALE).round() as i16;
                ((raw >> shift) & 0xFF) as u64
            }
        };
        let output = |offset: u8, name: &str, provider: Box<dyn Fn(u64) -> u64 + Send + Sync>| {
            RegisterSpec::new(offset as u64, 8)
                .named(name)
                .with_field(FieldSpec::value(name, 0, 8, FieldMode::Read).with_value_provider(provider))
        };

        let specs = [
            RegisterSpec::new(WHO_AM_I as u64, 8)
                .named("WHO_AM_I")
                .with_reset(DEVICE_ID)
                .with_value_field("ID", 0, 8, FieldMode::Read),
            RegisterSpec::new(CTRL_REG1 as u64, 8)
                .named("CTRL_REG1")
                .with_value_field("ODR", 4, 3, FieldMode::ReadWrite)
                .with_tag("EN_LPFP", 3, 1, 0)
                .with_tag("LPFP_CFG", 2, 1, 0)
                .with_tag("BDU", 1, 1, 0)
                .with_tag("SIM", 0, 1, 0),
            RegisterSpec::new(CTRL_REG2 as u64, 8)
                .named("CTRL_REG2")
                .with_reset(0b0000_1000),
            RegisterSpec::new(STATUS as u64, 8)
                .named("STATUS")
                .with_reset(0b0000_0011),
            output(PRESS_OUT_XL, "PRESS_OUT_XL", Box::new(pressure(0))),
            output(PRESS_OUT_L, "PRESS_OUT_L", Box::new(pressure(8))),
            output(PRESS_OUT_H, "PRESS_OUT_H", Box::new(pressure(16))),
            output(TEMP_OUT_L, "TEMP_OUT_L", Box::new(temperature(0))),
            output(TEMP_OUT_H, "TEMP_OUT_H", Box::new(temperature(8))),
        ];

        let mut registers = RegisterCollection::new("lps22");
        for spec in specs {
            if let Err(e) = registers.define(spec) {
                tracing::error!("lps22: invalid register layout: {}", e);
            }
        }

        Self {
            registers: Mutex::new(registers),
            readings,
            serial: Mutex::new(Serial {
                state: Transfer::Idle,
                address: 0,
            }),
        }
    }

    pub fn pressure(&self) -> f64 {
        lock(&self.readings).pressure_hpa
    }

    pub fn set_pressure(&self, hpa: f64) {
        lock(&self.readings).pressure_hpa = hpa;
    }

    pub fn temperature(&self) -> f64 {
        lock(&self.readings).temperature_c
    }

    pub fn set_temperature(&self, celsius: f64) {
        lock(&self.readings).temperature_c = celsius;
    }

    /// Output data rate selector (CTRL_REG1 bits 6:4).
    pub fn output_data_rate(&self) -> u8 {
        lock(&self.registers)
            .peek(CTRL_REG1 as u64)
            .map_or(0, |v| ((v >> 4) & 0b111) as u8)
    }

    /// Feeds bytes of a serial write transaction.
    pub fn write(&self, data: &[u8]) {
        for byte in data {
            self.write_byte(*byte);
        }
    }

    fn write_byte(&self, byte: u8) {
        let mut serial = lock(&self.serial);
        match serial.state {
            Transfer::Idle => {
                serial.address = byte & 0x7F;
                serial.state = Transfer::Data;
                tracing::trace!("lps22: register address set to {:#04x}", serial.address);
            }
            Transfer::Data => {
                let address = serial.address;
                serial.address = (address + 1) % ADDRESS_WRAP;
                drop(serial);
                tracing::trace!("lps22: write {:#04x} to register {:#04x}", byte, address);
                lock(&self.registers).write(address as u64, byte as u64);
            }
        }
    }

    /// Reads `count` bytes from the current register address, auto-incrementing.
    pub fn read(&self, count: usize) -> Vec<u8> {
        (0..count)
            .map(|_| {
                let address = {
                    let mut serial = lock(&self.serial);
                    let address = serial.address;
                    serial.address = (address + 1) % ADDRESS_WRAP;
                    address
                };
                let value = lock(&self.registers).read(address as u64) as u8;
                tracing::trace!("lps22: read {:#04x} from register {:#04x}", value, address);
                value
            })
            .collect()
    }

    /// Ends the current transaction; the next byte written selects a register.
    pub fn finish_transmission(&self) {
        lock(&self.serial).state = Transfer::Idle;
    }
}

impl Default for PressureSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for PressureSensor {
    fn widths(&self) -> AccessWidths {
        AccessWidths::BYTE
    }

    fn read_u8(&self, offset: u64) -> u8 {
        lock(&self.registers).read(offset) as u8
    }

    fn write_u8(&self, offset: u64, value: u8) {
        lock(&self.registers).write(offset, value as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(0x80)
    }

    fn reset(&self) {
        lock(&self.registers).reset();
        let mut serial = lock(&self.serial);
        serial.state = Transfer::Idle;
        serial.address = 0;
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}
