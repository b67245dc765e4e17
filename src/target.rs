// This module resolves symbolic device names into the concrete parameters LLVM needs to
// generate code: triple, data layout, CPU name, feature string and pointer width. "host"
// queries the running machine and derives the data layout from a throwaway TargetMachine;
// known board and platform names come from a fixed table; "custom" devices carry a
// caller-supplied triple and CPU. Backend initialization happens once per process behind a
// std::sync::Once. TargetDevice values are plain data, cloned into compiler options and
// machine-code options, and never change after resolution.

//! Target device descriptors.

use std::sync::Once;

use inkwell::targets::{
    CodeModel, InitializationConfig, RelocMode, Target, TargetMachine, TargetTriple,
};
use inkwell::OptimizationLevel;

use crate::error::{EmitterError, EmitterResult};

static BACKEND_INIT: Once = Once::new();

/// Register every LLVM backend compiled into the linked library.
pub fn initialize_backends() {
    BACKEND_INIT.call_once(|| {
        Target::initialize_all(&InitializationConfig::default());
        log::debug!("Initialized LLVM target backends");
    });
}

/// Code-generation parameters for the machine an artifact will run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDevice {
    pub device_name: String,
    pub triple: String,
    pub architecture: String,
    pub data_layout: String,
    pub cpu: String,
    pub features: String,
    pub num_bits: u32,
}

impl Default for TargetDevice {
    /// An unresolved host device. Resolution happens when a module is created.
    fn default() -> Self {
        Self {
            device_name: "host".to_string(),
            triple: String::new(),
            architecture: String::new(),
            data_layout: String::new(),
            cpu: String::new(),
            features: String::new(),
            num_bits: 0,
        }
    }
}

struct KnownDevice {
    name: &'static str,
    triple: &'static str,
    data_layout: &'static str,
    num_bits: u32,
    cpu: &'static str,
    features: &'static str,
}

const ARM32_LAYOUT: &str = "e-m:e-p:32:32-Fi8-i64:64-v128:64:128-a:0:32-n32-S64";
const AARCH64_ELF_LAYOUT: &str = "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128";
const AARCH64_MACHO_LAYOUT: &str = "e-m:o-i64:64-i128:128-n32:64-S128";
const X86_64_ELF_LAYOUT: &str =
    "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128";
const X86_64_MACHO_LAYOUT: &str =
    "e-m:o-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128";
const X86_64_COFF_LAYOUT: &str =
    "e-m:w-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128";

const KNOWN_DEVICES: &[KnownDevice] = &[
    KnownDevice {
        name: "pi0",
        triple: "arm-linux-gnueabihf",
        data_layout: ARM32_LAYOUT,
        num_bits: 32,
        cpu: "arm1136jf-s",
        features: "",
    },
    KnownDevice {
        name: "pi3",
        triple: "armv7-linux-gnueabihf",
        data_layout: ARM32_LAYOUT,
        num_bits: 32,
        cpu: "cortex-a53",
        features: "+neon",
    },
    KnownDevice {
        name: "orangepi0",
        triple: "armv7-linux-gnueabihf",
        data_layout: ARM32_LAYOUT,
        num_bits: 32,
        cpu: "cortex-a7",
        features: "+neon",
    },
    KnownDevice {
        name: "pi3_64",
        triple: "aarch64-unknown-linux-gnu",
        data_layout: AARCH64_ELF_LAYOUT,
        num_bits: 64,
        cpu: "cortex-a53",
        features: "+neon",
    },
    KnownDevice {
        name: "aarch64",
        triple: "aarch64-unknown-linux-gnu",
        data_layout: AARCH64_ELF_LAYOUT,
        num_bits: 64,
        cpu: "cortex-a53",
        features: "+neon",
    },
    KnownDevice {
        name: "ios",
        triple: "aarch64-apple-ios",
        data_layout: AARCH64_MACHO_LAYOUT,
        num_bits: 64,
        cpu: "apple-a7",
        features: "+neon",
    },
    KnownDevice {
        name: "mac",
        triple: "x86_64-apple-macosx10.12.0",
        data_layout: X86_64_MACHO_LAYOUT,
        num_bits: 64,
        cpu: "",
        features: "",
    },
    KnownDevice {
        name: "linux",
        triple: "x86_64-pc-linux-gnu",
        data_layout: X86_64_ELF_LAYOUT,
        num_bits: 64,
        cpu: "",
        features: "",
    },
    KnownDevice {
        name: "windows",
        triple: "x86_64-pc-win32",
        data_layout: X86_64_COFF_LAYOUT,
        num_bits: 64,
        cpu: "",
        features: "",
    },
];

/// Names accepted by [`TargetDevice::resolve`], excluding "custom".
pub fn known_device_names() -> impl Iterator<Item = &'static str> {
    std::iter::once("host").chain(KNOWN_DEVICES.iter().map(|d| d.name))
}

fn architecture_of(triple: &str) -> String {
    triple.split('-').next().unwrap_or_default().to_string()
}

/// Build a target machine for `triple` only to read back facts about it.
fn target_machine_for(triple: &str, cpu: &str, features: &str) -> EmitterResult<TargetMachine> {
    initialize_backends();
    let target_triple = TargetTriple::create(triple);
    let target = Target::from_triple(&target_triple).map_err(|e| {
        EmitterError::TargetNotSupported(format!("{}: {}", triple, e.to_string_lossy()))
    })?;
    target
        .create_target_machine(
            &target_triple,
            cpu,
            features,
            OptimizationLevel::None,
            RelocMode::Default,
            CodeModel::Default,
        )
        .ok_or_else(|| EmitterError::TargetNotSupported(format!("no target machine for {triple}")))
}

impl TargetDevice {
    /// Resolve a device by name: "host", a known board/platform name, or "custom".
    ///
    /// "custom" carries no parameters of its own, so resolving it by name always fails with
    /// `BadFunctionArguments`; build custom devices with [`TargetDevice::custom`].
    pub fn resolve(name: &str) -> EmitterResult<TargetDevice> {
        initialize_backends();
        match name {
            "host" => Self::host(),
            "custom" => Self::custom("", "", "", ""),
            _ => {
                let known = KNOWN_DEVICES
                    .iter()
                    .find(|d| d.name == name)
                    .ok_or_else(|| EmitterError::TargetNotSupported(name.to_string()))?;
                log::info!("Resolved target device {} to {}", name, known.triple);
                Ok(TargetDevice {
                    device_name: known.name.to_string(),
                    triple: known.triple.to_string(),
                    architecture: architecture_of(known.triple),
                    data_layout: known.data_layout.to_string(),
                    cpu: known.cpu.to_string(),
                    features: known.features.to_string(),
                    num_bits: known.num_bits,
                })
            }
        }
    }

    /// Describe the machine the compiler is running on.
    pub fn host() -> EmitterResult<TargetDevice> {
        initialize_backends();
        let triple = TargetMachine::get_default_triple();
        let triple = triple.as_str().to_string_lossy().into_owned();
        let cpu = TargetMachine::get_host_cpu_name().to_string();
        let features = TargetMachine::get_host_cpu_features().to_string();

        let machine = target_machine_for(&triple, &cpu, &features)?;
        let target_data = machine.get_target_data();
        let data_layout = target_data.get_data_layout().as_str().to_string_lossy().into_owned();
        let num_bits = target_data.get_pointer_byte_size(None) * 8;

        log::info!("Resolved host target device: {} ({})", triple, cpu);
        Ok(TargetDevice {
            device_name: "host".to_string(),
            architecture: architecture_of(&triple),
            triple,
            data_layout,
            cpu,
            features,
            num_bits,
        })
    }

    /// A device described entirely by the caller. `triple` and `cpu` are required; an empty
    /// `data_layout` is derived from the backend.
    pub fn custom(triple: &str, cpu: &str, features: &str, data_layout: &str) -> EmitterResult<TargetDevice> {
        if triple.is_empty() || cpu.is_empty() {
            return Err(EmitterError::BadFunctionArguments(
                "custom target device requires a triple and a cpu".to_string(),
            ));
        }
        let machine = target_machine_for(triple, cpu, features)?;
        let target_data = machine.get_target_data();
        let data_layout = if data_layout.is_empty() {
            target_data.get_data_layout().as_str().to_string_lossy().into_owned()
        } else {
            data_layout.to_string()
        };
        Ok(TargetDevice {
            device_name: "custom".to_string(),
            triple: triple.to_string(),
            architecture: architecture_of(triple),
            data_layout,
            cpu: cpu.to_string(),
            features: features.to_string(),
            num_bits: target_data.get_pointer_byte_size(None) * 8,
        })
    }

    pub fn is_resolved(&self) -> bool {
        !self.triple.is_empty()
    }

    /// Return a fully resolved copy, resolving by name if needed.
    pub fn resolved(&self) -> EmitterResult<TargetDevice> {
        if self.is_resolved() {
            Ok(self.clone())
        } else {
            Self::resolve(&self.device_name)
        }
    }

    pub fn pointer_bits(&self) -> u32 {
        if self.num_bits == 0 { 64 } else { self.num_bits }
    }

    pub fn is_windows(&self) -> bool {
        self.triple.contains("win32") || self.triple.contains("windows")
    }

    pub fn is_macos(&self) -> bool {
        self.triple.contains("apple-macos") || self.triple.contains("darwin")
    }

    pub fn is_linux(&self) -> bool {
        self.triple.contains("linux")
    }

    pub fn is_arm(&self) -> bool {
        self.architecture.starts_with("arm") || self.architecture.starts_with("aarch64")
    }

    pub fn is_x86(&self) -> bool {
        self.architecture == "x86_64" || self.architecture.starts_with("i686") || self.architecture.starts_with("i386")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_device() {
        let device = TargetDevice::resolve("pi3").unwrap();
        assert_eq!(device.triple, "armv7-linux-gnueabihf");
        assert_eq!(device.cpu, "cortex-a53");
        assert_eq!(device.num_bits, 32);
        assert!(device.is_arm());
        assert!(device.is_linux());
    }

    #[test]
    fn test_resolve_unknown_device() {
        let err = TargetDevice::resolve("toaster").unwrap_err();
        assert!(matches!(err, EmitterError::TargetNotSupported(_)));
    }

    #[test]
    fn test_custom_requires_triple_and_cpu() {
        assert!(matches!(
            TargetDevice::resolve("custom"),
            Err(EmitterError::BadFunctionArguments(_))
        ));
        assert!(matches!(
            TargetDevice::custom("x86_64-pc-linux-gnu", "", "", ""),
            Err(EmitterError::BadFunctionArguments(_))
        ));
    }

    #[test]
    fn test_custom_derives_data_layout() {
        let device = TargetDevice::custom("x86_64-pc-linux-gnu", "x86-64", "", "").unwrap();
        assert!(!device.data_layout.is_empty());
        assert_eq!(device.num_bits, 64);
        assert!(device.is_x86());
    }

    #[test]
    fn test_host_device() {
        let device = TargetDevice::resolve("host").unwrap();
        assert!(device.is_resolved());
        assert!(!device.data_layout.is_empty());
        assert!(device.num_bits == 32 || device.num_bits == 64);
    }

    #[test]
    fn test_default_resolves_to_host() {
        let device = TargetDevice::default();
        assert!(!device.is_resolved());
        assert_eq!(device.resolved().unwrap().device_name, "host");
    }
}
