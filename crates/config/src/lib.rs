// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_quantum_us() -> u64 {
    100
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Unsupported schema_version '{0}' (expected 1.0)")]
    UnsupportedSchema(String),
    #[error("Duplicate id '{0}'")]
    DuplicateId(String),
    #[error("time.quantum_us must be greater than zero")]
    ZeroQuantum,
    #[error("Size of '{0}' must be greater than zero")]
    ZeroSize(String),
    #[error("Register '{register}': bit range [{msb}, {lsb}] does not fit a {size}-bit register")]
    InvalidBitRange {
        register: String,
        msb: u8,
        lsb: u8,
        size: u8,
    },
    #[error("Register '{0}': size must be 8, 16, 32 or 64 bits")]
    InvalidRegisterSize(String),
}

/// Virtual time settings of the master time source.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TimeConfig {
    /// Distance between two consecutive sync points, in virtual microseconds.
    #[serde(default = "default_quantum_us")]
    pub quantum_us: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            quantum_us: default_quantum_us(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryDescriptor {
    pub id: String,
    pub base: u64,
    pub size: String, // e.g. "128KiB"
    /// Additional bus addresses where the same storage is visible.
    #[serde(default)]
    pub aliases: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: String, // "declarative", "pressure_sensor", ...
    pub base_address: u64,
    #[serde(default)]
    pub size: Option<String>,
    /// Region tag for multi-region peripherals.
    #[serde(default)]
    pub region: Option<String>,
    /// Map on top of an already-claimed range instead of failing.
    #[serde(default)]
    pub overlay: bool,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MachineDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub memory: Vec<MemoryDescriptor>,
    #[serde(default)]
    pub peripherals: Vec<PeripheralConfig>,
}

impl MachineDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read machine descriptor {:?}", path))?;

        let desc: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse machine descriptor JSON from {:?}", path))?
        } else {
            serde_yaml::from_str(&content).context("Failed to parse Machine Descriptor YAML")?
        };
        desc.validate()?;
        tracing::debug!(
            "Loaded machine descriptor '{}' ({} memories, {} peripherals)",
            desc.name,
            desc.memory.len(),
            desc.peripherals.len()
        );
        Ok(desc)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let desc: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Machine Descriptor YAML")?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            return Err(DescriptorError::UnsupportedSchema(self.schema_version.clone()).into());
        }
        if self.time.quantum_us == 0 {
            return Err(DescriptorError::ZeroQuantum.into());
        }

        let mut ids = HashSet::new();
        for mem in &self.memory {
            if !ids.insert(mem.id.as_str()) {
                return Err(DescriptorError::DuplicateId(mem.id.clone()).into());
            }
            let size = parse_size(&mem.size)
                .with_context(|| format!("Invalid size for memory '{}'", mem.id))?;
            if size == 0 {
                return Err(DescriptorError::ZeroSize(mem.id.clone()).into());
            }
        }
        for p in &self.peripherals {
            if !ids.insert(p.id.as_str()) {
                return Err(DescriptorError::DuplicateId(p.id.clone()).into());
            }
            if let Some(size) = &p.size {
                let size = parse_size(size)
                    .with_context(|| format!("Invalid size for peripheral '{}'", p.id))?;
                if size == 0 {
                    return Err(DescriptorError::ZeroSize(p.id.clone()).into());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Access {
    #[serde(alias = "R/W", alias = "rw")]
    ReadWrite,
    #[serde(alias = "RO", alias = "r")]
    ReadOnly,
    #[serde(alias = "WO", alias = "w")]
    WriteOnly,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReadAction {
    None,
    Clear,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    None,
    #[serde(alias = "oneToClear")]
    WriteOneToClear,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SideEffectsDescriptor {
    #[serde(default)]
    pub read_action: Option<ReadAction>,
    #[serde(default)]
    pub write_action: Option<WriteAction>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FieldDescriptor {
    pub name: String,
    pub bit_range: [u8; 2], // [msb, lsb]
    #[serde(default)]
    pub description: Option<String>,
    /// Overrides the register access for this field.
    #[serde(default)]
    pub access: Option<Access>,
    #[serde(default)]
    pub side_effects: Option<SideEffectsDescriptor>,
    /// Reserved bits: writes are accepted and dropped, reads return this value.
    #[serde(default)]
    pub tagged: Option<u64>,
}

impl FieldDescriptor {
    pub fn lsb(&self) -> u8 {
        self.bit_range[1]
    }

    pub fn width(&self) -> u8 {
        self.bit_range[0].saturating_sub(self.bit_range[1]) + 1
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegisterDescriptor {
    pub id: String,
    pub address_offset: u64,
    pub size: u8, // 8, 16, 32, 64
    pub access: Access,
    #[serde(default)]
    pub reset_value: u64,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub side_effects: Option<SideEffectsDescriptor>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralDescriptor {
    pub peripheral: String,
    #[serde(default = "default_schema_version")]
    pub version: String,
    pub registers: Vec<RegisterDescriptor>,
}

impl PeripheralDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read peripheral descriptor {:?}", path))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            let desc: Self = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse peripheral descriptor from {:?}", path))?;
            desc.validate()?;
            Ok(desc)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let desc: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Peripheral Descriptor")?;
        desc.validate()?;
        Ok(desc)
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for reg in &self.registers {
            if !ids.insert(reg.id.as_str()) {
                return Err(DescriptorError::DuplicateId(reg.id.clone()).into());
            }
            if !matches!(reg.size, 8 | 16 | 32 | 64) {
                return Err(DescriptorError::InvalidRegisterSize(reg.id.clone()).into());
            }
            for field in &reg.fields {
                let [msb, lsb] = field.bit_range;
                if msb < lsb || msb >= reg.size {
                    return Err(DescriptorError::InvalidBitRange {
                        register: reg.id.clone(),
                        msb,
                        lsb,
                        size: reg.size,
                    }
                    .into());
                }
                if field.tagged.is_some() && (field.access.is_some() || field.side_effects.is_some()) {
                    tracing::warn!(
                        "Field '{}.{}' is tagged; its access and side effects are ignored",
                        reg.id,
                        field.name
                    );
                }
            }
        }
        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
