//! Operation contract and the validate-then-build driver

use crate::error::{Error, Result};
use crate::strategy::ParallelizationStrategy;
use crate::tensor::{Shape, TensorSpec};
use gridtile_device::{Device, Program};
use gridtile_tracing::{perf_span, timed_block};

/// A tensor operation that lowers to one device [`Program`]
pub trait DeviceOperation {
    fn name(&self) -> &'static str;

    /// Reject inputs the generated program could not handle.
    fn validate(&self, inputs: &[TensorSpec]) -> Result<()>;

    fn compute_output_shapes(&self, inputs: &[TensorSpec]) -> Vec<Shape>;

    fn parallelization_strategy(&self, inputs: &[TensorSpec]) -> ParallelizationStrategy;

    /// Build the program. Inputs have already passed [`Self::validate`].
    fn create_program(&self, device: &Device, inputs: &[TensorSpec], outputs: &[TensorSpec]) -> Result<Program>;
}

/// Operand `index` of `inputs`.
pub(crate) fn operand<'a>(inputs: &'a [TensorSpec], index: usize, name: &'static str) -> Result<&'a TensorSpec> {
    inputs.get(index).ok_or(Error::MissingOperand { operand: name })
}

/// Validate, check output shapes, and build the program for `op`.
///
/// Nothing is reserved on the device unless validation passes; a failure
/// while building drops the partial program and its reservations.
#[tracing::instrument(skip_all, fields(op = op.name(), inputs = inputs.len(), outputs = outputs.len()))]
pub fn run_operation<Op: DeviceOperation + ?Sized>(
    device: &Device,
    op: &Op,
    inputs: &[TensorSpec],
    outputs: &[TensorSpec],
) -> Result<Program> {
    let _span = perf_span!(op.name());

    if inputs.is_empty() {
        return Err(Error::InvalidShape(format!("{} needs at least one input", op.name())));
    }
    op.validate(inputs)?;

    let expected = op.compute_output_shapes(inputs);
    for (shape, output) in expected.iter().zip(outputs) {
        if *shape != output.shape {
            return Err(Error::mismatch("output shape", format!("{shape:?}"), format!("{:?}", output.shape)));
        }
    }

    let strategy = op.parallelization_strategy(inputs);
    let (program, duration_us) = timed_block!(op.name(), { op.create_program(device, inputs, outputs) });
    let program = program?;

    gridtile_tracing::performance::record_plan(op.name(), program.num_cores(), duration_us);
    tracing::debug!(
        duration_us = duration_us,
        strategy = %strategy,
        kernels = program.kernels().len(),
        circular_buffers = program.circular_buffers().len(),
        "operation_planned"
    );

    Ok(program)
}
