use std::fmt::{Debug, Display};

use tilecl_ir::EvalError;

/// Errors that can occur while executing a kernel on the reference executor.
pub enum ExecutionError {
    /// A tensor declared as input or output has no bound buffer.
    MissingBinding {
        /// Name of the tensor.
        tensor: String,
    },

    /// The buffer bound to a tensor does not have the declared number of elements.
    BindingSize {
        /// Name of the tensor.
        tensor: String,
        /// Number of elements declared by the kernel.
        expected: usize,
        /// Number of elements of the bound buffer.
        actual: usize,
    },

    /// An index expression could not be evaluated.
    Eval(EvalError),

    /// A statement addressed elements outside of a tensor.
    OutOfBounds {
        /// Name of the tensor.
        tensor: String,
        /// First element accessed, possibly negative.
        offset: i64,
        /// Number of elements accessed.
        len: usize,
        /// Number of elements of the tensor.
        size: usize,
    },

    /// The selector of a conditional anchor did not designate one of its variants.
    InvalidAnchorSelector {
        /// Index of the anchor in the kernel.
        anchor: u32,
        /// Evaluated selector.
        selected: i64,
        /// Number of variants of the anchor.
        variants: usize,
    },

    /// A worker thread panicked.
    WorkerPanicked,
}

impl From<EvalError> for ExecutionError {
    fn from(value: EvalError) -> Self {
        Self::Eval(value)
    }
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Debug for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::MissingBinding { tensor } => {
                writeln!(f, "No buffer bound to tensor {tensor}")
            }
            ExecutionError::BindingSize {
                tensor,
                expected,
                actual,
            } => writeln!(
                f,
                "Tensor {tensor} expects {expected} elements, but the bound buffer has {actual}"
            ),
            ExecutionError::Eval(err) => writeln!(f, "Unable to evaluate index: {err}"),
            ExecutionError::OutOfBounds {
                tensor,
                offset,
                len,
                size,
            } => writeln!(
                f,
                "Access of {len} elements at offset {offset} is out of bounds for tensor {tensor} of {size} elements"
            ),
            ExecutionError::InvalidAnchorSelector {
                anchor,
                selected,
                variants,
            } => writeln!(
                f,
                "Anchor #{anchor} selected variant {selected}, but only has {variants} variants"
            ),
            ExecutionError::WorkerPanicked => writeln!(f, "A worker thread panicked"),
        }
    }
}

impl std::error::Error for ExecutionError {}
