//! Layer normalization over the innermost dimension
//!
//! Each core normalizes whole tile rows: `NCHt` rows of `Wt` tiles are split
//! across the grid and every core reads its rows in `blk`-tile chunks. An
//! optional pre-add input is summed before normalizing; optional gamma and
//! beta row-major vectors scale and shift the result.
//!
//! Reader argument layout:
//!
//! ```text
//! runtime [src_addr, num_rows, Wt, tile_offset, scaler, eps, gamma_addr, beta_addr, b_addr]
//! compile [src0_is_dram, src1_is_dram, gamma_is_dram, beta_is_dram, blk,
//!          stick_size_is_pow2, log2_or_page_size]
//! ```
//!
//! `scaler` is `1 / W` as two packed bfloat16 halves; `eps` is the raw f32
//! bit pattern (the kernel keeps its upper half).

use crate::error::{Error, Result};
use crate::operation::{operand, DeviceOperation};
use crate::strategy::ParallelizationStrategy;
use crate::tensor::{page_size_args, Layout, MemoryConfig, Shape, TensorMemoryLayout, TensorSpec};
use crate::work_split::split_work_to_cores;
use gridtile_device::{
    slots, CircularBufferConfig, CoreRangeSet, DataFormat, Device, GridSize, KernelConfig, KernelKind, Program,
    TILE_HEIGHT, TILE_WIDTH,
};

pub const READER_LAYERNORM: &str = "reader_unary_interleaved_ln_rm_gb.cpp";
pub const WRITER_LAYERNORM: &str = "writer_unary_interleaved_start_id_blocked.cpp";
pub const COMPUTE_LAYERNORM: &str = "layernorm.cpp";

pub const FUSE_PRE_ADD: &str = "FUSE_PRE_ADD";
pub const FUSE_GAMMA: &str = "FUSE_GAMMA";
pub const FUSE_BETA: &str = "FUSE_BETA";

/// Upper bound on tiles moved per reader step.
const MAX_BLOCK_TILES: u32 = 8;

/// Intermediate and constant tiles are kept in bfloat16.
const INTERMEDIATE_FORMAT: DataFormat = DataFormat::Float16B;

/// `y = ((a + b) - mean) / sqrt(var + eps) * gamma + beta`
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNormOp {
    pub eps: f32,
    pub pre_add: Option<TensorSpec>,
    pub gamma: Option<TensorSpec>,
    pub beta: Option<TensorSpec>,
    pub output_mem_config: MemoryConfig,
}

impl LayerNormOp {
    pub fn new(eps: f32) -> Self {
        Self {
            eps,
            pre_add: None,
            gamma: None,
            beta: None,
            output_mem_config: MemoryConfig::default(),
        }
    }

    pub fn with_pre_add(mut self, b: TensorSpec) -> Self {
        self.pre_add = Some(b);
        self
    }

    pub fn with_gamma(mut self, gamma: TensorSpec) -> Self {
        self.gamma = Some(gamma);
        self
    }

    pub fn with_beta(mut self, beta: TensorSpec) -> Self {
        self.beta = Some(beta);
        self
    }

    fn defines(&self, mut config: KernelConfig) -> KernelConfig {
        if self.pre_add.is_some() {
            config = config.with_define(FUSE_PRE_ADD, "1");
        }
        if self.gamma.is_some() {
            config = config.with_define(FUSE_GAMMA, "1");
        }
        if self.beta.is_some() {
            config = config.with_define(FUSE_BETA, "1");
        }
        config
    }

    /// Row-major stick size shared by gamma and beta.
    fn stick_size(&self) -> u32 {
        let dtype = self
            .gamma
            .as_ref()
            .or(self.beta.as_ref())
            .map_or(INTERMEDIATE_FORMAT, |t| t.dtype);
        dtype.element_size().unwrap_or(2) * TILE_WIDTH
    }
}

/// Largest block of at most eight tiles dividing `wt`.
pub fn block_size(wt: u32) -> u32 {
    (1..=MAX_BLOCK_TILES).rev().find(|blk| wt % blk == 0).unwrap_or(1)
}

/// bfloat16 bits of `value`, by truncation.
pub fn bfloat16_bits(value: f32) -> u16 {
    (value.to_bits() >> 16) as u16
}

/// `value` as bfloat16, duplicated into both halves of a word.
pub fn pack_two_bfloat16(value: f32) -> u32 {
    let half = bfloat16_bits(value) as u32;
    (half << 16) | half
}

fn check_device_operand(tensor: &TensorSpec, name: &'static str) -> Result<()> {
    if !tensor.is_on_device() {
        return Err(Error::NotOnDevice { operand: name });
    }
    if tensor.buffer.is_none() {
        return Err(Error::MissingBuffer { operand: name });
    }
    if tensor.memory_layout != TensorMemoryLayout::Interleaved {
        return Err(Error::UnsupportedMemoryLayout {
            operand: name,
            actual: tensor.memory_layout.to_string(),
        });
    }
    Ok(())
}

fn check_affine_operand(tensor: &TensorSpec, name: &'static str, width: u32) -> Result<()> {
    check_device_operand(tensor, name)?;
    if tensor.layout != Layout::RowMajor {
        return Err(Error::mismatch("layout", "RowMajor", format!("{:?}", tensor.layout)));
    }
    if tensor.width() != TILE_WIDTH || tensor.volume() != width as u64 {
        return Err(Error::InvalidShape(format!(
            "{name} must hold {width} elements in {TILE_WIDTH}-wide sticks, got {:?}",
            tensor.shape
        )));
    }
    if tensor.dtype.element_size().is_none() {
        return Err(Error::InvalidShape(format!("{name} cannot be row-major {}", tensor.dtype)));
    }
    Ok(())
}

impl DeviceOperation for LayerNormOp {
    fn name(&self) -> &'static str {
        "layernorm"
    }

    fn validate(&self, inputs: &[TensorSpec]) -> Result<()> {
        let a = operand(inputs, 0, "input")?;
        check_device_operand(a, "input")?;
        if a.layout != Layout::Tile {
            return Err(Error::NotTiled { operand: "input" });
        }
        if !a.is_tile_aligned() {
            return Err(Error::InvalidShape(format!(
                "input height and width must be multiples of {TILE_HEIGHT}, got {:?}",
                a.shape
            )));
        }
        if a.volume() == 0 {
            return Err(Error::InvalidShape(format!("input {:?} has no tiles", a.shape)));
        }

        if let Some(b) = &self.pre_add {
            check_device_operand(b, "b")?;
            if b.layout != Layout::Tile {
                return Err(Error::NotTiled { operand: "b" });
            }
            if b.shape != a.shape {
                return Err(Error::mismatch("shape", format!("{:?}", a.shape), format!("{:?}", b.shape)));
            }
        }
        if let Some(gamma) = &self.gamma {
            check_affine_operand(gamma, "gamma", a.width())?;
        }
        if let Some(beta) = &self.beta {
            check_affine_operand(beta, "beta", a.width())?;
        }
        if let (Some(gamma), Some(beta)) = (&self.gamma, &self.beta) {
            if gamma.dtype != beta.dtype {
                return Err(Error::mismatch("gamma/beta dtype", gamma.dtype, beta.dtype));
            }
        }
        Ok(())
    }

    fn compute_output_shapes(&self, inputs: &[TensorSpec]) -> Vec<Shape> {
        inputs.first().map(|a| a.shape).into_iter().collect()
    }

    fn parallelization_strategy(&self, inputs: &[TensorSpec]) -> ParallelizationStrategy {
        let rows = inputs.first().map_or(0, |a| a.num_tiles() / a.width_tiles().max(1) as u64);
        ParallelizationStrategy::for_units(rows)
    }

    #[tracing::instrument(skip_all, fields(eps = self.eps, fused_gamma = self.gamma.is_some(), fused_beta = self.beta.is_some()))]
    fn create_program(&self, device: &Device, inputs: &[TensorSpec], outputs: &[TensorSpec]) -> Result<Program> {
        let a = operand(inputs, 0, "input")?;
        let output = operand(outputs, 0, "output")?;
        check_device_operand(output, "output")?;

        let grid = match self.parallelization_strategy(inputs) {
            ParallelizationStrategy::SingleCore => GridSize::new(1, 1),
            ParallelizationStrategy::MultiCore => device.compute_with_storage_grid_size(),
        };

        let wt = a.width_tiles();
        let ncht = u32::try_from(a.num_tiles() / wt as u64)
            .map_err(|_| Error::InvalidShape(format!("{:?} has too many tile rows", a.shape)))?;
        let blk = block_size(wt);
        let split = split_work_to_cores(grid, ncht, false)?;
        let cores = &split.all_cores;

        let mut program = Program::new(device);
        self.reserve_buffers(&mut program, a, cores, wt, blk)?;

        let (stick_size_is_pow2, log2_or_page_size) = page_size_args(self.stick_size());
        let is_dram = |t: &Option<TensorSpec>| t.as_ref().is_some_and(TensorSpec::is_dram) as u32;
        let reader_args = vec![
            a.is_dram() as u32,
            is_dram(&self.pre_add),
            is_dram(&self.gamma),
            is_dram(&self.beta),
            blk,
            stick_size_is_pow2,
            log2_or_page_size,
        ];
        let reader = program.add_kernel(
            READER_LAYERNORM,
            cores.clone(),
            KernelKind::Reader,
            self.defines(KernelConfig::new(reader_args)),
        );
        let writer = program.add_kernel(
            WRITER_LAYERNORM,
            cores.clone(),
            KernelKind::Writer,
            KernelConfig::new(vec![slots::OUT0 as u32, output.is_dram() as u32, blk]),
        );
        for (group, rows) in [
            (&split.core_group_1, split.units_per_core_group_1),
            (&split.core_group_2, split.units_per_core_group_2),
        ] {
            if group.is_empty() {
                continue;
            }
            let compute_args = vec![
                rows,
                wt,
                blk,
                self.gamma.is_some() as u32,
                self.beta.is_some() as u32,
            ];
            program.add_kernel(
                COMPUTE_LAYERNORM,
                group.clone(),
                KernelKind::Compute,
                self.defines(KernelConfig::new(compute_args)),
            );
        }

        let scaler = pack_two_bfloat16(1.0 / a.width() as f32);
        let eps = self.eps.to_bits();
        let address = |t: &Option<TensorSpec>| t.as_ref().map_or(0, TensorSpec::address);
        for (core, start_row, rows) in split.assignments(grid) {
            let tile_offset = start_row * wt;
            program.set_runtime_args(
                reader,
                core,
                vec![
                    a.address(),
                    rows,
                    wt,
                    tile_offset,
                    scaler,
                    eps,
                    address(&self.gamma),
                    address(&self.beta),
                    address(&self.pre_add),
                ],
            )?;
            program.set_runtime_args(writer, core, vec![output.address(), rows * wt, tile_offset])?;
        }

        tracing::debug!(ncht, wt, blk, num_cores = split.num_cores, "layernorm_planned");
        Ok(program)
    }
}

impl LayerNormOp {
    fn reserve_buffers(&self, program: &mut Program, a: &TensorSpec, cores: &CoreRangeSet, wt: u32, blk: u32) -> Result<()> {
        let double_block = 2 * blk;
        let mut configs = vec![
            CircularBufferConfig::new(cores.clone(), slots::IN0, wt, a.dtype),
            CircularBufferConfig::new(cores.clone(), slots::IN2, 2, INTERMEDIATE_FORMAT),
            CircularBufferConfig::new(cores.clone(), slots::IN3, 2, INTERMEDIATE_FORMAT),
            CircularBufferConfig::new(cores.clone(), slots::OUT0, double_block, a.dtype),
            CircularBufferConfig::new(cores.clone(), slots::INTERMED0, wt, INTERMEDIATE_FORMAT),
            CircularBufferConfig::new(cores.clone(), slots::INTERMED1, double_block, INTERMEDIATE_FORMAT),
        ];
        if let Some(b) = &self.pre_add {
            configs.push(CircularBufferConfig::new(cores.clone(), slots::IN1, double_block, b.dtype));
        }
        if let Some(gamma) = &self.gamma {
            configs.push(CircularBufferConfig::new(cores.clone(), slots::IN5, wt, gamma.dtype));
        }
        if let Some(beta) = &self.beta {
            configs.push(CircularBufferConfig::new(cores.clone(), slots::IN6, wt, beta.dtype));
        }

        for config in configs {
            program.add_circular_buffer(config)?;
        }
        Ok(())
    }
}
