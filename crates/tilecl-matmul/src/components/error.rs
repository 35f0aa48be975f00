use std::fmt::{Debug, Display};

use tilecl_ir::ElemType;

use super::MatrixLayout;

/// Errors that can occur while planning a matmul kernel.
pub enum MatmulSetupError {
    /// The problem uses a feature the generated kernels do not support.
    Unsupported(MatmulUnsupportedError),

    /// The provided configuration is invalid or rejected by a component.
    InvalidConfig(InvalidConfigError),

    /// One of the extents of the problem is zero.
    EmptyProblem { m: usize, n: usize, k: usize },
}

/// A feature required by the problem is not supported by the generated kernels.
pub enum MatmulUnsupportedError {
    /// The micro-kernel has no variant for this combination of element types.
    ElemTypes {
        lhs: ElemType,
        rhs: ElemType,
        out: ElemType,
    },

    /// The rhs element type requires packed tiles, which only exist in the blocked layout.
    RhsLayout { rhs: ElemType, layout: MatrixLayout },

    /// The reduction block is not a multiple of the rhs packing factor.
    PackingFactor { block_k: usize, dtype_block: usize },
}

impl From<MatmulUnsupportedError> for MatmulSetupError {
    fn from(value: MatmulUnsupportedError) -> Self {
        Self::Unsupported(value)
    }
}

impl From<InvalidConfigError> for MatmulSetupError {
    fn from(value: InvalidConfigError) -> Self {
        Self::InvalidConfig(value)
    }
}

impl Display for MatmulSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Debug for MatmulSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatmulSetupError::Unsupported(err) => {
                writeln!(
                    f,
                    "Unable to plan matmul because a required feature is unsupported: {err:?}"
                )
            }
            MatmulSetupError::InvalidConfig(err) => {
                writeln!(
                    f,
                    "Unable to plan matmul because the config is invalid: {:?}",
                    err.to_string()
                )
            }
            MatmulSetupError::EmptyProblem { m, n, k } => {
                writeln!(
                    f,
                    "Unable to plan matmul because the problem is empty: m={m}, n={n}, k={k}"
                )
            }
        }
    }
}

impl std::error::Error for MatmulSetupError {}

impl Debug for MatmulUnsupportedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatmulUnsupportedError::ElemTypes { lhs, rhs, out } => {
                writeln!(f, "Types lhs={lhs}, rhs={rhs} and out={out} not supported.")
            }
            MatmulUnsupportedError::RhsLayout { rhs, layout } => {
                writeln!(
                    f,
                    "Rhs of type {rhs} must be packed, which the {layout:?} layout does not allow."
                )
            }
            MatmulUnsupportedError::PackingFactor {
                block_k,
                dtype_block,
            } => {
                writeln!(
                    f,
                    "Block k={block_k} is not a multiple of the packing factor {dtype_block}."
                )
            }
        }
    }
}

/// Message of an invalid configuration.
pub type InvalidConfigError = Box<dyn Display>;

/// Invalid configuration message, only formatted when displayed.
pub struct FormattedConfigError {
    func: Box<dyn Fn() -> String>,
}

impl FormattedConfigError {
    #[allow(clippy::new_ret_no_self)]
    pub fn new<F: Fn() -> String + 'static>(func: F) -> Box<dyn Display> {
        Box::new(Self {
            func: Box::new(func),
        })
    }
}

impl Display for FormattedConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = (self.func)();
        write!(f, "{string}")
    }
}
