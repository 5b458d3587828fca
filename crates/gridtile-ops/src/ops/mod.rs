//! Tensor operations lowered to device programs

pub mod copy;
pub mod layernorm;
pub mod matmul;

pub use copy::CopyOp;
pub use layernorm::LayerNormOp;
pub use matmul::MatmulOp;
