//! Kernel programs committed to the core grid
//!
//! A [`Program`] collects everything one operation puts on the device:
//! kernels with their compile-time arguments and defines, per-core runtime
//! arguments, and the circular buffers those kernels stream through. The
//! program owns its circular buffers; dropping it (or calling
//! [`Program::release`]) returns every window to the device ledger.

use crate::circular_buffer::{CircularBuffer, CircularBufferConfig};
use crate::core_coord::{CoreCoord, CoreRangeSet};
use crate::device::Device;
use crate::error::{DeviceError, Result};
use serde::Serialize;
use std::collections::BTreeMap;

/// Which on-core processor runs a kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KernelKind {
    /// Data movement: bulk storage or other cores into circular buffers.
    Reader,
    /// Data movement: circular buffers out to bulk storage.
    Writer,
    /// Math engine between circular buffers.
    Compute,
}

/// Index of a kernel inside its program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct KernelHandle(usize);

impl KernelHandle {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Kernel settings fixed at compile time
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct KernelConfig {
    pub compile_args: Vec<u32>,
    pub defines: BTreeMap<String, String>,
}

impl KernelConfig {
    pub fn new(compile_args: Vec<u32>) -> Self {
        Self {
            compile_args,
            defines: BTreeMap::new(),
        }
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }
}

/// One kernel bound to a core range set
#[derive(Debug, Clone, Serialize)]
pub struct Kernel {
    pub source: String,
    pub kind: KernelKind,
    pub core_ranges: CoreRangeSet,
    pub compile_args: Vec<u32>,
    pub defines: BTreeMap<String, String>,
    #[serde(skip)]
    runtime_args: BTreeMap<CoreCoord, Vec<u32>>,
}

impl Kernel {
    pub fn runtime_args(&self, core: CoreCoord) -> Option<&[u32]> {
        self.runtime_args.get(&core).map(Vec::as_slice)
    }

    /// Cores with runtime arguments, ordered by coordinate.
    pub fn cores_with_args(&self) -> impl Iterator<Item = CoreCoord> + '_ {
        self.runtime_args.keys().copied()
    }

    pub fn has_define(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }
}

/// Kernels, runtime arguments and circular buffers for one operation
#[derive(Debug)]
pub struct Program {
    device: Device,
    kernels: Vec<Kernel>,
    circular_buffers: Vec<CircularBuffer>,
}

impl Program {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
            kernels: Vec::new(),
            circular_buffers: Vec::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn add_kernel(
        &mut self,
        source: impl Into<String>,
        core_ranges: impl Into<CoreRangeSet>,
        kind: KernelKind,
        config: KernelConfig,
    ) -> KernelHandle {
        let handle = KernelHandle(self.kernels.len());
        let kernel = Kernel {
            source: source.into(),
            kind,
            core_ranges: core_ranges.into(),
            compile_args: config.compile_args,
            defines: config.defines,
            runtime_args: BTreeMap::new(),
        };
        tracing::trace!(
            kernel = %kernel.source,
            kind = ?kind,
            cores = %kernel.core_ranges,
            "kernel_added"
        );
        self.kernels.push(kernel);
        handle
    }

    /// Set the runtime arguments `kernel` sees on `core`.
    pub fn set_runtime_args(&mut self, kernel: KernelHandle, core: CoreCoord, args: Vec<u32>) -> Result<()> {
        let entry = self
            .kernels
            .get_mut(kernel.0)
            .ok_or(DeviceError::UnknownKernel(kernel.0))?;
        if !entry.core_ranges.contains(core) {
            return Err(DeviceError::CoreNotInKernel {
                core,
                kernel: entry.source.clone(),
            });
        }
        entry.runtime_args.insert(core, args);
        Ok(())
    }

    /// Reserve a circular buffer on the device and take ownership of it.
    pub fn add_circular_buffer(&mut self, config: CircularBufferConfig) -> Result<&CircularBuffer> {
        let buffer = self.device.reserve_circular_buffer(config)?;
        self.circular_buffers.push(buffer);
        Ok(&self.circular_buffers[self.circular_buffers.len() - 1])
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    pub fn kernel(&self, handle: KernelHandle) -> Option<&Kernel> {
        self.kernels.get(handle.0)
    }

    /// First kernel of `kind` built from `source`.
    pub fn find_kernel(&self, kind: KernelKind, source: &str) -> Option<&Kernel> {
        self.kernels.iter().find(|kernel| kernel.kind == kind && kernel.source == source)
    }

    pub fn circular_buffers(&self) -> &[CircularBuffer] {
        &self.circular_buffers
    }

    /// Circular buffer bound to `slot` on `core`, if any.
    pub fn circular_buffer(&self, slot: u8, core: CoreCoord) -> Option<&CircularBuffer> {
        self.circular_buffers
            .iter()
            .find(|cb| cb.buffer_index() == slot && cb.is_on_core(core))
    }

    /// Union of every kernel's cores.
    pub fn num_cores(&self) -> usize {
        let mut cores: Vec<CoreCoord> = self.kernels.iter().flat_map(|kernel| kernel.core_ranges.cores()).collect();
        cores.sort_unstable();
        cores.dedup();
        cores.len()
    }

    /// Release every circular buffer back to the device.
    pub fn release(mut self) -> Result<()> {
        for buffer in self.circular_buffers.drain(..) {
            self.device.release_circular_buffer(buffer)?;
        }
        Ok(())
    }

    /// JSON description of the kernels, for inspection and golden tests.
    pub fn kernels_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.kernels)
    }
}
