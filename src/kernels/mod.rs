//! Tensor kernels used by the layers.

pub mod tensor_ops;
