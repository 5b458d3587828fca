//! Interleaved tensor copy, optionally converting the data format
//!
//! Pages (tiles, or row-major sticks) stream from the source through slot
//! 0 to the writer. A format conversion inserts a compute kernel that
//! re-packs slot 0 into slot 16.
//!
//! Kernel argument layout:
//!
//! ```text
//! reader  compile [src_is_dram, (stick_size_is_pow2, log2_or_page_size)]
//!         runtime [src_addr, num_pages, start_id]
//! writer  compile [out_cb, dst_is_dram, (stick_size_is_pow2, log2_or_page_size)]
//!         runtime [dst_addr, num_pages, start_id]
//! compute compile [num_pages]
//! ```
//!
//! The bracketed pairs are present for row-major tensors only.

use crate::error::{Error, Result};
use crate::operation::{operand, DeviceOperation};
use crate::strategy::{select_strategy, ParallelizationStrategy};
use crate::tensor::{page_size_args, Layout, MemoryConfig, Shape, TensorMemoryLayout, TensorSpec};
use crate::work_split::split_work_to_cores;
use gridtile_device::{
    slots, CircularBufferConfig, CoreCoord, CoreRangeSet, DataFormat, Device, KernelConfig, KernelKind, Program,
};

pub const READER_TILES: &str = "reader_unary_interleaved_start_id.cpp";
pub const WRITER_TILES: &str = "writer_unary_interleaved_start_id.cpp";
pub const READER_STICKS: &str = "reader_unary_stick_layout_interleaved_start_id.cpp";
pub const WRITER_STICKS: &str = "writer_unary_stick_layout_interleaved_start_id.cpp";
pub const COMPUTE_COPY: &str = "eltwise_copy.cpp";

/// Pages buffered between reader and writer.
const NUM_BUFFERED_PAGES: u32 = 2;

/// Copy `inputs[0]` into a new tensor, or into `inputs[1]` when given
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOp {
    pub output_dtype: DataFormat,
    pub output_mem_config: MemoryConfig,
}

impl CopyOp {
    pub fn new(output_dtype: DataFormat) -> Self {
        Self {
            output_dtype,
            output_mem_config: MemoryConfig::default(),
        }
    }

    pub fn with_mem_config(mut self, output_mem_config: MemoryConfig) -> Self {
        self.output_mem_config = output_mem_config;
        self
    }

    fn converts(&self, input: &TensorSpec) -> bool {
        self.output_dtype != input.dtype
    }

    fn destination<'a>(inputs: &'a [TensorSpec], outputs: &'a [TensorSpec]) -> Result<&'a TensorSpec> {
        let destination = outputs.first().or(inputs.get(1)).ok_or(Error::MissingOperand { operand: "output" })?;
        if !destination.is_on_device() {
            return Err(Error::NotOnDevice { operand: "output" });
        }
        if destination.buffer.is_none() {
            return Err(Error::MissingBuffer { operand: "output" });
        }
        Ok(destination)
    }
}

impl DeviceOperation for CopyOp {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn validate(&self, inputs: &[TensorSpec]) -> Result<()> {
        let input = operand(inputs, 0, "input")?;
        if !input.is_on_device() {
            return Err(Error::NotOnDevice { operand: "input" });
        }
        if input.buffer.is_none() {
            return Err(Error::MissingBuffer { operand: "input" });
        }
        if input.memory_layout != TensorMemoryLayout::Interleaved {
            return Err(Error::UnsupportedMemoryLayout {
                operand: "input",
                actual: input.memory_layout.to_string(),
            });
        }
        if let Some(destination) = inputs.get(1) {
            if input.shape != destination.shape {
                return Err(Error::mismatch(
                    "shape",
                    format!("{:?}", input.shape),
                    format!("{:?}", destination.shape),
                ));
            }
            if input.layout != destination.layout {
                return Err(Error::mismatch(
                    "layout",
                    format!("{:?}", input.layout),
                    format!("{:?}", destination.layout),
                ));
            }
            if input.memory_layout != destination.memory_layout {
                return Err(Error::mismatch("memory layout", input.memory_layout, destination.memory_layout));
            }
        }
        if self.converts(input) && input.layout != Layout::Tile {
            return Err(Error::UnsupportedConversion {
                from: input.dtype.to_string(),
                to: self.output_dtype.to_string(),
            });
        }
        if input.page_size().is_none() {
            return Err(Error::InvalidShape(format!("row-major {} tensors have no stick size", input.dtype)));
        }
        Ok(())
    }

    fn compute_output_shapes(&self, inputs: &[TensorSpec]) -> Vec<Shape> {
        inputs.get(1).or(inputs.first()).map(|t| t.shape).into_iter().collect()
    }

    fn parallelization_strategy(&self, inputs: &[TensorSpec]) -> ParallelizationStrategy {
        inputs.first().map_or(ParallelizationStrategy::SingleCore, select_strategy)
    }

    #[tracing::instrument(skip_all, fields(strategy))]
    fn create_program(&self, device: &Device, inputs: &[TensorSpec], outputs: &[TensorSpec]) -> Result<Program> {
        let input = operand(inputs, 0, "input")?;
        let output = Self::destination(inputs, outputs)?;
        let strategy = self.parallelization_strategy(inputs);
        tracing::Span::current().record("strategy", tracing::field::display(strategy));

        match strategy {
            ParallelizationStrategy::SingleCore => self.copy_single_core(device, input, output),
            ParallelizationStrategy::MultiCore => self.copy_multi_core(device, input, output),
        }
    }
}

/// Kernel handles shared by both program shapes.
struct CopyKernels {
    reader: gridtile_device::KernelHandle,
    writer: gridtile_device::KernelHandle,
}

impl CopyOp {
    fn num_pages(input: &TensorSpec) -> Result<u32> {
        u32::try_from(input.num_pages())
            .map_err(|_| Error::InvalidShape(format!("{} pages exceed a 32-bit page index", input.num_pages())))
    }

    /// Reserve slot 0 (and slot 16 when converting) and add the reader and
    /// writer kernels on `cores`.
    fn build_dataflow(
        &self,
        program: &mut Program,
        input: &TensorSpec,
        output: &TensorSpec,
        cores: &CoreRangeSet,
    ) -> Result<CopyKernels> {
        let page_size = input.page_size().ok_or(Error::NotTiled { operand: "input" })?;
        program.add_circular_buffer(
            CircularBufferConfig::new(cores.clone(), slots::IN0, NUM_BUFFERED_PAGES, input.dtype)
                .with_size(NUM_BUFFERED_PAGES * page_size),
        )?;

        let out_cb = if self.converts(input) {
            program.add_circular_buffer(CircularBufferConfig::new(
                cores.clone(),
                slots::OUT0,
                NUM_BUFFERED_PAGES,
                self.output_dtype,
            ))?;
            slots::OUT0
        } else {
            slots::IN0
        };

        let mut reader_args = vec![input.is_dram() as u32];
        let mut writer_args = vec![out_cb as u32, output.is_dram() as u32];
        let (reader_source, writer_source) = match input.layout {
            Layout::Tile => (READER_TILES, WRITER_TILES),
            Layout::RowMajor => {
                let (is_pow2, log2_or_size) = page_size_args(page_size);
                reader_args.extend([is_pow2, log2_or_size]);
                writer_args.extend([is_pow2, log2_or_size]);
                (READER_STICKS, WRITER_STICKS)
            }
        };

        let reader = program.add_kernel(reader_source, cores.clone(), KernelKind::Reader, KernelConfig::new(reader_args));
        let writer = program.add_kernel(writer_source, cores.clone(), KernelKind::Writer, KernelConfig::new(writer_args));
        Ok(CopyKernels { reader, writer })
    }

    fn copy_single_core(&self, device: &Device, input: &TensorSpec, output: &TensorSpec) -> Result<Program> {
        let core = CoreCoord::new(0, 0);
        let cores = CoreRangeSet::from(core);
        let num_pages = Self::num_pages(input)?;

        let mut program = Program::new(device);
        let kernels = self.build_dataflow(&mut program, input, output, &cores)?;
        if self.converts(input) {
            program.add_kernel(COMPUTE_COPY, cores, KernelKind::Compute, KernelConfig::new(vec![num_pages]));
        }

        program.set_runtime_args(kernels.reader, core, vec![input.address(), num_pages, 0])?;
        program.set_runtime_args(kernels.writer, core, vec![output.address(), num_pages, 0])?;
        Ok(program)
    }

    fn copy_multi_core(&self, device: &Device, input: &TensorSpec, output: &TensorSpec) -> Result<Program> {
        let grid = device.compute_with_storage_grid_size();
        let num_pages = Self::num_pages(input)?;
        let split = split_work_to_cores(grid, num_pages, false)?;

        let mut program = Program::new(device);
        let kernels = self.build_dataflow(&mut program, input, output, &split.all_cores)?;
        if self.converts(input) {
            for (group, pages) in [
                (&split.core_group_1, split.units_per_core_group_1),
                (&split.core_group_2, split.units_per_core_group_2),
            ] {
                if !group.is_empty() {
                    program.add_kernel(COMPUTE_COPY, group.clone(), KernelKind::Compute, KernelConfig::new(vec![pages]));
                }
            }
        }

        for (core, start_id, pages) in split.assignments(grid) {
            program.set_runtime_args(kernels.reader, core, vec![input.address(), pages, start_id])?;
            program.set_runtime_args(kernels.writer, core, vec![output.address(), pages, start_id])?;
        }
        Ok(program)
    }
}
