//! Batched tiled matrix multiply, `[.., M, K] x [.., K, N]`
//!
//! Three program shapes:
//!
//! * single core: one core walks every output tile with the outer-product
//!   kernel;
//! * block reuse: the block planner picks per-core output blocks and the
//!   cores form a rectangle, each core streaming `in0_block_w`-wide slices of
//!   its row and column panels;
//! * output-tile split: when no block plan fits, output tiles are spread
//!   over the grid like any other independent work.
//!
//! A second operand with batch 1 is broadcast over the first operand's
//! batch.

use crate::core_range::{core_extent, CoreExtent};
use crate::error::{Error, Result};
use crate::matmul::{large_matmul_params, BlockShape};
use crate::operation::{operand, DeviceOperation};
use crate::strategy::ParallelizationStrategy;
use crate::tensor::{Layout, Shape, TensorMemoryLayout, TensorSpec};
use crate::work_split::split_work_to_cores;
use gridtile_device::{
    slots, CircularBufferConfig, CoreCoord, CoreRangeSet, DataFormat, Device, KernelConfig, KernelKind, Program,
};
use gridtile_tracing::perf_event;

pub const READER_SINGLE_CORE: &str = "reader_bmm_8bank.cpp";
pub const READER_OUTPUT_TILES: &str = "reader_bmm_8bank_output_tiles_partitioned.cpp";
pub const READER_BLOCKS: &str = "reader_bmm_tile_layout.cpp";
pub const WRITER_BLOCKS: &str = "writer_bmm_tile_layout.cpp";
pub const WRITER_TILES: &str = "writer_unary_interleaved_start_id.cpp";
pub const COMPUTE_TILES: &str = "bmm.cpp";
pub const COMPUTE_BLOCKS: &str = "bmm_large_block_zm.cpp";

const NUM_BUFFERED_TILES: u32 = 2;

/// `a @ b` with the result written in `output_dtype`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulOp {
    pub output_dtype: DataFormat,
}

/// Tile-level problem size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MatmulDims {
    batch: u32,
    mt: u32,
    kt: u32,
    nt: u32,
    bcast_b: bool,
}

impl MatmulDims {
    fn new(a: &TensorSpec, b: &TensorSpec) -> Result<Self> {
        let too_large = || Error::InvalidShape(format!("{:?} x {:?} exceeds a 32-bit tile index", a.shape, b.shape));
        let dims = Self {
            batch: u32::try_from(a.batch()).map_err(|_| too_large())?,
            mt: a.height_tiles(),
            kt: a.width_tiles(),
            nt: b.width_tiles(),
            bcast_b: b.batch() == 1,
        };
        let within_u32 = |tiles: u64| u32::try_from(tiles).is_ok();
        if !within_u32(a.num_tiles()) || !within_u32(b.num_tiles()) || !within_u32(dims.output_tiles_u64()) {
            return Err(too_large());
        }
        Ok(dims)
    }

    fn output_tiles_u64(&self) -> u64 {
        self.batch as u64 * self.mt as u64 * self.nt as u64
    }

    fn output_tiles(&self) -> u32 {
        self.batch * self.mt * self.nt
    }

    /// `[Mt*Kt, Kt*Nt, batch, bcast_b]`
    fn batch_strides(&self) -> [u32; 4] {
        [self.mt * self.kt, self.kt * self.nt, self.batch, self.bcast_b as u32]
    }

    fn in0_block_w(&self) -> u32 {
        if self.kt % 2 == 0 {
            2
        } else {
            1
        }
    }
}

impl MatmulOp {
    pub fn new(output_dtype: DataFormat) -> Self {
        Self { output_dtype }
    }

    /// Block plan and core rectangle for the reuse program, or `None` when
    /// the problem has to fall back to splitting output tiles.
    pub fn block_plan(&self, device: &Device, inputs: &[TensorSpec]) -> Result<Option<(BlockShape, CoreExtent)>> {
        let dims = MatmulDims::new(operand(inputs, 0, "a")?, operand(inputs, 1, "b")?)?;
        let grid = device.compute_with_storage_grid_size();
        let block = large_matmul_params(dims.mt, dims.nt, grid.y, grid.x, dims.in0_block_w());
        if block.is_none() {
            return Ok(None);
        }
        let extent = core_extent(dims.mt / block.row_block, dims.nt / block.col_block, grid.y, grid.x);
        Ok((!extent.is_empty()).then_some((block, extent)))
    }

    fn add_tile_buffers(&self, program: &mut Program, cores: &CoreRangeSet, a: &TensorSpec, b: &TensorSpec) -> Result<()> {
        for config in [
            CircularBufferConfig::new(cores.clone(), slots::IN0, NUM_BUFFERED_TILES, a.dtype),
            CircularBufferConfig::new(cores.clone(), slots::IN1, NUM_BUFFERED_TILES, b.dtype),
            CircularBufferConfig::new(cores.clone(), slots::OUT0, NUM_BUFFERED_TILES, self.output_dtype),
        ] {
            program.add_circular_buffer(config)?;
        }
        Ok(())
    }

    fn matmul_single_core(
        &self,
        device: &Device,
        dims: MatmulDims,
        (a, b, output): (&TensorSpec, &TensorSpec, &TensorSpec),
    ) -> Result<Program> {
        let core = CoreCoord::new(0, 0);
        let cores = CoreRangeSet::from(core);

        let mut program = Program::new(device);
        self.add_tile_buffers(&mut program, &cores, a, b)?;
        let reader = program.add_kernel(
            READER_SINGLE_CORE,
            cores.clone(),
            KernelKind::Reader,
            KernelConfig::new(vec![a.is_dram() as u32, b.is_dram() as u32]),
        );
        let writer = program.add_kernel(
            WRITER_TILES,
            cores.clone(),
            KernelKind::Writer,
            KernelConfig::new(vec![slots::OUT0 as u32, output.is_dram() as u32]),
        );
        program.add_kernel(
            COMPUTE_TILES,
            cores,
            KernelKind::Compute,
            KernelConfig::new(vec![dims.batch, dims.mt, dims.kt, dims.nt]),
        );

        let mut reader_args = vec![a.address(), b.address(), dims.mt, dims.kt, dims.nt];
        reader_args.extend(dims.batch_strides());
        program.set_runtime_args(reader, core, reader_args)?;
        program.set_runtime_args(writer, core, vec![output.address(), dims.output_tiles(), 0])?;
        Ok(program)
    }

    fn matmul_output_tiles(
        &self,
        device: &Device,
        dims: MatmulDims,
        (a, b, output): (&TensorSpec, &TensorSpec, &TensorSpec),
    ) -> Result<Program> {
        let grid = device.compute_with_storage_grid_size();
        let split = split_work_to_cores(grid, dims.output_tiles(), false)?;
        let cores = &split.all_cores;

        let mut program = Program::new(device);
        self.add_tile_buffers(&mut program, cores, a, b)?;
        let reader = program.add_kernel(
            READER_OUTPUT_TILES,
            cores.clone(),
            KernelKind::Reader,
            KernelConfig::new(vec![a.is_dram() as u32, b.is_dram() as u32]),
        );
        let writer = program.add_kernel(
            WRITER_TILES,
            cores.clone(),
            KernelKind::Writer,
            KernelConfig::new(vec![slots::OUT0 as u32, output.is_dram() as u32]),
        );
        for (group, tiles) in [
            (&split.core_group_1, split.units_per_core_group_1),
            (&split.core_group_2, split.units_per_core_group_2),
        ] {
            if !group.is_empty() {
                program.add_kernel(
                    COMPUTE_TILES,
                    group.clone(),
                    KernelKind::Compute,
                    KernelConfig::new(vec![1, 1, dims.kt, tiles]),
                );
            }
        }

        let mt_nt = dims.mt * dims.nt;
        for (core, start_tile, tiles) in split.assignments(grid) {
            let mut reader_args = vec![a.address(), b.address(), dims.mt, dims.kt, dims.nt];
            reader_args.extend(dims.batch_strides());
            reader_args.extend([start_tile, tiles, mt_nt]);
            program.set_runtime_args(reader, core, reader_args)?;
            program.set_runtime_args(writer, core, vec![output.address(), tiles, start_tile])?;
        }
        Ok(program)
    }

    /// Reuse program over `extent`; core `(x, y)` owns output block `(y, x)`.
    ///
    /// ```text
    /// reader  runtime [in0_addr, in0_start, 1, Kt, w, w, row_block, row_block*w,
    ///                  in1_addr, in1_start, 1, Nt, w*Nt, col_block, w, col_block*w,
    ///                  num_blocks, Mt*Kt, Kt*Nt, batch, bcast_b]
    /// writer  runtime [out_addr, out_start, 1, Nt, sub_w, sub_h*Nt, sub_w, sub_h,
    ///                  sub_w*sub_h, col_block/sub_w, row_block/sub_h, Mt*Nt, batch]
    /// ```
    fn matmul_block_reuse(
        &self,
        device: &Device,
        dims: MatmulDims,
        (block, extent): (BlockShape, CoreExtent),
        (a, b, output): (&TensorSpec, &TensorSpec, &TensorSpec),
    ) -> Result<Program> {
        let range = extent
            .as_range()
            .ok_or_else(|| Error::InvalidShape(format!("empty core extent for {block}")))?;
        let cores = CoreRangeSet::from(range);
        let w = dims.in0_block_w();
        let BlockShape {
            row_block,
            col_block,
            subblock_rows,
            subblock_cols,
        } = block;
        let num_blocks = dims.kt / w;

        let mut program = Program::new(device);
        for config in [
            CircularBufferConfig::new(cores.clone(), slots::IN0, 2 * row_block * w, a.dtype),
            CircularBufferConfig::new(cores.clone(), slots::IN1, 2 * col_block * w, b.dtype),
            CircularBufferConfig::new(cores.clone(), slots::OUT0, row_block * col_block, self.output_dtype),
        ] {
            program.add_circular_buffer(config)?;
        }

        let reader = program.add_kernel(
            READER_BLOCKS,
            cores.clone(),
            KernelKind::Reader,
            KernelConfig::new(vec![a.is_dram() as u32, b.is_dram() as u32]),
        );
        let writer = program.add_kernel(
            WRITER_BLOCKS,
            cores.clone(),
            KernelKind::Writer,
            KernelConfig::new(vec![output.is_dram() as u32]),
        );
        program.add_kernel(
            COMPUTE_BLOCKS,
            cores,
            KernelKind::Compute,
            KernelConfig::new(vec![
                w,
                block.num_subblocks_rows(),
                row_block * w,
                subblock_rows * w,
                block.num_subblocks_cols(),
                col_block * w,
                col_block,
                num_blocks,
                subblock_rows,
                subblock_cols,
                block.subblock_tiles(),
                dims.batch,
            ]),
        );

        let [mt_kt, kt_nt, batch, bcast_b] = dims.batch_strides();
        for core in range.cores() {
            let in0_start = core.y * row_block * dims.kt;
            let in1_start = core.x * col_block;
            let out_start = core.y * row_block * dims.nt + core.x * col_block;
            program.set_runtime_args(
                reader,
                core,
                vec![
                    a.address(),
                    in0_start,
                    1,
                    dims.kt,
                    w,
                    w,
                    row_block,
                    row_block * w,
                    b.address(),
                    in1_start,
                    1,
                    dims.nt,
                    w * dims.nt,
                    col_block,
                    w,
                    col_block * w,
                    num_blocks,
                    mt_kt,
                    kt_nt,
                    batch,
                    bcast_b,
                ],
            )?;
            program.set_runtime_args(
                writer,
                core,
                vec![
                    output.address(),
                    out_start,
                    1,
                    dims.nt,
                    subblock_cols,
                    subblock_rows * dims.nt,
                    subblock_cols,
                    subblock_rows,
                    block.subblock_tiles(),
                    block.num_subblocks_cols(),
                    block.num_subblocks_rows(),
                    dims.mt * dims.nt,
                    batch,
                ],
            )?;
        }
        Ok(program)
    }
}

fn check_operand(tensor: &TensorSpec, name: &'static str) -> Result<()> {
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
    if tensor.layout != Layout::Tile {
        return Err(Error::NotTiled { operand: name });
    }
    if !tensor.is_tile_aligned() {
        return Err(Error::InvalidShape(format!("{name} {:?} is not tile aligned", tensor.shape)));
    }
    if tensor.volume() == 0 {
        return Err(Error::InvalidShape(format!("{name} {:?} has no tiles", tensor.shape)));
    }
    Ok(())
}

impl DeviceOperation for MatmulOp {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn validate(&self, inputs: &[TensorSpec]) -> Result<()> {
        let a = operand(inputs, 0, "a")?;
        let b = operand(inputs, 1, "b")?;
        check_operand(a, "a")?;
        check_operand(b, "b")?;
        if a.width() != b.height() {
            return Err(Error::mismatch("inner dimension", a.width(), b.height()));
        }
        if b.batch() != 1 && b.batch() != a.batch() {
            return Err(Error::mismatch("batch", a.batch(), b.batch()));
        }
        Ok(())
    }

    fn compute_output_shapes(&self, inputs: &[TensorSpec]) -> Vec<Shape> {
        match inputs {
            [a, b, ..] => vec![[a.shape[0], a.shape[1], a.shape[2], b.shape[3]]],
            _ => Vec::new(),
        }
    }

    fn parallelization_strategy(&self, inputs: &[TensorSpec]) -> ParallelizationStrategy {
        let output_tiles = match inputs {
            [a, b, ..] => a
                .batch()
                .saturating_mul(a.height_tiles() as u64)
                .saturating_mul(b.width_tiles() as u64),
            _ => 0,
        };
        ParallelizationStrategy::for_units(output_tiles)
    }

    #[tracing::instrument(skip_all, fields(strategy, path))]
    fn create_program(&self, device: &Device, inputs: &[TensorSpec], outputs: &[TensorSpec]) -> Result<Program> {
        let a = operand(inputs, 0, "a")?;
        let b = operand(inputs, 1, "b")?;
        let output = operand(outputs, 0, "output")?;
        if !output.is_on_device() {
            return Err(Error::NotOnDevice { operand: "output" });
        }
        if output.buffer.is_none() {
            return Err(Error::MissingBuffer { operand: "output" });
        }
        if output.dtype != self.output_dtype {
            return Err(Error::mismatch("output dtype", self.output_dtype, output.dtype));
        }

        let dims = MatmulDims::new(a, b)?;
        let tensors = (a, b, output);
        let strategy = self.parallelization_strategy(inputs);
        let span = tracing::Span::current();
        span.record("strategy", tracing::field::display(strategy));

        match strategy {
            ParallelizationStrategy::SingleCore => {
                span.record("path", "single_core");
                self.matmul_single_core(device, dims, tensors)
            }
            ParallelizationStrategy::MultiCore => match self.block_plan(device, inputs)? {
                Some((block, extent)) => {
                    span.record("path", "block_reuse");
                    perf_event!(
                        "matmul_block_plan",
                        block = block.to_string(),
                        cores_x = extent.x,
                        cores_y = extent.y
                    );
                    self.matmul_block_reuse(device, dims, (block, extent), tensors)
                }
                None => {
                    span.record("path", "output_tiles");
                    self.matmul_output_tiles(device, dims, tensors)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::run_operation;
    use crate::tensor::DeviceBuffer;

    const A_ADDR: u32 = 0x10_0000;
    const B_ADDR: u32 = 0x20_0000;
    const OUT_ADDR: u32 = 0x30_0000;

    fn tiled(shape: Shape, address: u32) -> TensorSpec {
        TensorSpec::on_device(shape, Layout::Tile, DataFormat::Float16B, DeviceBuffer::dram(address))
    }

    fn run(a: Shape, b: Shape) -> Program {
        let op = MatmulOp::new(DataFormat::Float16B);
        let out = op.compute_output_shapes(&[tiled(a, A_ADDR), tiled(b, B_ADDR)])[0];
        run_operation(
            &Device::wormhole(),
            &op,
            &[tiled(a, A_ADDR), tiled(b, B_ADDR)],
            &[tiled(out, OUT_ADDR)],
        )
        .unwrap()
    }

    #[test]
    fn validation() {
        let op = MatmulOp::new(DataFormat::Float16B);
        assert!(matches!(
            op.validate(&[tiled([1, 1, 32, 64], 0), tiled([1, 1, 96, 32], 0)]),
            Err(Error::Mismatch { property: "inner dimension", .. })
        ));
        assert!(matches!(
            op.validate(&[tiled([2, 1, 32, 64], 0), tiled([3, 1, 64, 32], 0)]),
            Err(Error::Mismatch { property: "batch", .. })
        ));
        let host = TensorSpec::on_host([1, 1, 64, 32], Layout::Tile, DataFormat::Float16B);
        assert_eq!(
            op.validate(&[tiled([1, 1, 32, 64], 0), host]),
            Err(Error::NotOnDevice { operand: "b" })
        );
        let rm = TensorSpec {
            layout: Layout::RowMajor,
            ..tiled([1, 1, 32, 64], 0)
        };
        assert_eq!(
            op.validate(&[rm, tiled([1, 1, 64, 32], 0)]),
            Err(Error::NotTiled { operand: "a" })
        );
        assert_eq!(
            op.validate(&[tiled([1, 1, 32, 64], 0)]),
            Err(Error::MissingOperand { operand: "b" })
        );
        assert!(op.validate(&[tiled([4, 1, 32, 64], 0), tiled([1, 1, 64, 32], 0)]).is_ok());
    }

    #[test]
    fn empty_operands_are_rejected() {
        let op = MatmulOp::new(DataFormat::Float16B);
        // Kt = 0
        assert!(matches!(
            op.validate(&[tiled([1, 1, 32, 0], 0), tiled([1, 1, 0, 32], 0)]),
            Err(Error::InvalidShape(_))
        ));
        assert!(matches!(
            op.validate(&[tiled([1, 1, 32, 64], 0), tiled([1, 1, 64, 0], 0)]),
            Err(Error::InvalidShape(_))
        ));
        assert!(matches!(
            op.validate(&[tiled([0, 1, 32, 64], 0), tiled([1, 1, 64, 32], 0)]),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn huge_batch_does_not_overflow() {
        let op = MatmulOp::new(DataFormat::Float16B);
        let inputs = [
            tiled([u32::MAX, u32::MAX, 32, 64], 0),
            tiled([1, 1, 64, 32], 0),
        ];
        assert_eq!(op.parallelization_strategy(&inputs), ParallelizationStrategy::MultiCore);
        assert!(matches!(
            op.block_plan(&Device::wormhole(), &inputs),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn output_shape_and_strategy() {
        let op = MatmulOp::new(DataFormat::Float16B);
        let inputs = [tiled([3, 2, 64, 96], 0), tiled([1, 1, 96, 160], 0)];
        assert_eq!(op.compute_output_shapes(&inputs), vec![[3, 2, 64, 160]]);
        assert_eq!(op.parallelization_strategy(&inputs), ParallelizationStrategy::MultiCore);

        let single = [tiled([1, 1, 32, 64], 0), tiled([1, 1, 64, 32], 0)];
        assert_eq!(op.parallelization_strategy(&single), ParallelizationStrategy::SingleCore);
    }

    #[test]
    fn single_output_tile_runs_on_one_core() {
        let program = run([1, 1, 32, 64], [1, 1, 64, 32]);
        let core = CoreCoord::new(0, 0);
        assert_eq!(program.num_cores(), 1);

        let reader = program.find_kernel(KernelKind::Reader, READER_SINGLE_CORE).unwrap();
        assert_eq!(reader.runtime_args(core), Some(&[A_ADDR, B_ADDR, 1, 2, 1, 2, 2, 1, 1][..]));
        let compute = program.find_kernel(KernelKind::Compute, COMPUTE_TILES).unwrap();
        assert_eq!(compute.compile_args, vec![1, 1, 2, 1]);
        let writer = program.find_kernel(KernelKind::Writer, WRITER_TILES).unwrap();
        assert_eq!(writer.runtime_args(core), Some(&[OUT_ADDR, 1, 0][..]));
    }

    #[test]
    fn block_reuse_program() {
        // Mt = Nt = 8, Kt = 2: 8x2 blocks with 4x2 subblocks on a 4x1 rectangle
        let program = run([1, 1, 256, 64], [1, 1, 64, 256]);
        assert_eq!(program.num_cores(), 4);

        let core = CoreCoord::new(2, 0);
        assert_eq!(program.circular_buffer(slots::IN0, core).unwrap().num_tiles(), 32);
        assert_eq!(program.circular_buffer(slots::IN1, core).unwrap().num_tiles(), 8);
        assert_eq!(program.circular_buffer(slots::OUT0, core).unwrap().num_tiles(), 16);
        assert!(program.circular_buffer(slots::IN0, CoreCoord::new(0, 1)).is_none());

        let compute = program.find_kernel(KernelKind::Compute, COMPUTE_BLOCKS).unwrap();
        assert_eq!(compute.compile_args, vec![2, 2, 16, 8, 1, 4, 2, 1, 4, 2, 8, 1]);

        let reader = program.find_kernel(KernelKind::Reader, READER_BLOCKS).unwrap();
        let args = reader.runtime_args(core).unwrap();
        assert_eq!(args.len(), 21);
        assert_eq!(args[1], 0);
        assert_eq!(args[9], 4);
        assert_eq!(&args[16..], &[1, 16, 16, 1, 1]);

        let writer = program.find_kernel(KernelKind::Writer, WRITER_BLOCKS).unwrap();
        let args = writer.runtime_args(core).unwrap();
        assert_eq!(&args[..2], &[OUT_ADDR, 4]);
        assert_eq!(&args[9..11], &[1, 2]);
    }

    #[test]
    fn unplannable_problem_splits_output_tiles() {
        // 97 is prime and larger than the grid
        let program = run([1, 1, 97 * 32, 64], [1, 1, 64, 97 * 32]);
        assert_eq!(program.num_cores(), 64);
        assert!(program.find_kernel(KernelKind::Reader, READER_BLOCKS).is_none());

        let computes: Vec<_> = program
            .kernels()
            .iter()
            .filter(|k| k.kind == KernelKind::Compute)
            .map(|k| k.compile_args.clone())
            .collect();
        assert_eq!(computes, vec![vec![1, 1, 2, 148], vec![1, 1, 2, 147]]);

        let reader = program.find_kernel(KernelKind::Reader, READER_OUTPUT_TILES).unwrap();
        let args = reader.runtime_args(CoreCoord::new(0, 1)).unwrap();
        assert_eq!(&args[9..], &[148, 147, 97 * 97]);
    }

    #[test]
    fn single_block_with_batch_falls_back_to_tile_split() {
        let op = MatmulOp::new(DataFormat::Float16B);
        let inputs = [tiled([2, 1, 32, 64], A_ADDR), tiled([1, 1, 64, 32], B_ADDR)];
        assert_eq!(op.block_plan(&Device::wormhole(), &inputs).unwrap(), None);

        let program = run([2, 1, 32, 64], [1, 1, 64, 32]);
        assert_eq!(program.num_cores(), 2);
        let reader = program.find_kernel(KernelKind::Reader, READER_OUTPUT_TILES).unwrap();
        assert_eq!(
            reader.runtime_args(CoreCoord::new(0, 1)),
            Some(&[A_ADDR, B_ADDR, 1, 2, 1, 2, 2, 2, 1, 1, 1, 1][..])
        );
    }

    #[test]
    fn output_dtype_must_match() {
        let op = MatmulOp::new(DataFormat::Float32);
        let result = run_operation(
            &Device::wormhole(),
            &op,
            &[tiled([1, 1, 32, 64], A_ADDR), tiled([1, 1, 64, 32], B_ADDR)],
            &[tiled([1, 1, 32, 32], OUT_ADDR)],
        );
        assert!(matches!(result, Err(Error::Mismatch { property: "output dtype", .. })));
    }
}
