use core::fmt::Display;
use core::ops::{Add, Div, Mul, Rem, Sub};

use serde::{Deserialize, Serialize};

/// Handle of a variable declared in a [kernel](crate::Kernel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

impl VarId {
    /// Position of the variable in the kernel variable table.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Integer index expression.
///
/// Expressions are folded when they are created: combining two constants produces a constant,
/// and neutral operands (`x + 0`, `x * 1`, ...) are dropped. Comparisons evaluate to `1` or `0`,
/// so they can be combined arithmetically into selector tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Integer literal.
    Const(i64),
    /// Value of a previously declared variable.
    Var(VarId),
    /// Index of the worker executing the expression.
    ThreadId,
    /// Arithmetic on two sub-expressions.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Comparison of two sub-expressions, producing `1` when it holds and `0` otherwise.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Ternary select.
    Select {
        /// Condition, considered true when non-zero.
        cond: Box<Expr>,
        /// Value when the condition holds.
        then: Box<Expr>,
        /// Value otherwise.
        or_else: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Min,
    Max,
    And,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Error raised while evaluating an [expression](Expr).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// A variable was read before being defined.
    UnboundVariable(VarId),
    /// A division or remainder by zero.
    DivisionByZero,
    /// The result does not fit in 64 bits.
    Overflow,
}

impl Display for EvalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EvalError::UnboundVariable(var) => {
                write!(f, "Variable %{} read before definition", var.0)
            }
            EvalError::DivisionByZero => f.write_str("Division by zero"),
            EvalError::Overflow => f.write_str("Integer overflow"),
        }
    }
}

/// Variable bindings used to [evaluate](Expr::eval) expressions.
pub trait ExprEnv {
    /// Current value of the variable, if it was defined.
    fn var(&self, id: VarId) -> Option<i64>;
    /// Index of the worker evaluating the expression.
    fn thread_id(&self) -> i64;
}

impl BinaryOp {
    /// Apply the operator on two integers.
    pub fn apply(&self, lhs: i64, rhs: i64) -> Result<i64, EvalError> {
        match self {
            BinaryOp::Add => lhs.checked_add(rhs).ok_or(EvalError::Overflow),
            BinaryOp::Sub => lhs.checked_sub(rhs).ok_or(EvalError::Overflow),
            BinaryOp::Mul => lhs.checked_mul(rhs).ok_or(EvalError::Overflow),
            BinaryOp::Div => match rhs {
                0 => Err(EvalError::DivisionByZero),
                _ => lhs.checked_div(rhs).ok_or(EvalError::Overflow),
            },
            BinaryOp::Rem => match rhs {
                0 => Err(EvalError::DivisionByZero),
                _ => lhs.checked_rem(rhs).ok_or(EvalError::Overflow),
            },
            BinaryOp::Min => Ok(lhs.min(rhs)),
            BinaryOp::Max => Ok(lhs.max(rhs)),
            BinaryOp::And => Ok((lhs != 0 && rhs != 0) as i64),
        }
    }

    pub(crate) fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::And => "&&",
        }
    }
}

impl CompareOp {
    /// Apply the comparison on two integers.
    pub fn apply(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }

    pub(crate) fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

impl Expr {
    /// Create a binary expression, folding it when possible.
    pub fn binary(op: BinaryOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        let lhs = lhs.into();
        let rhs = rhs.into();

        if let (Some(l), Some(r)) = (lhs.as_const(), rhs.as_const()) {
            if let Ok(value) = op.apply(l, r) {
                return Expr::Const(value);
            }
        }

        match (op, lhs.as_const(), rhs.as_const()) {
            (BinaryOp::Add, Some(0), _) => return rhs,
            (BinaryOp::Add | BinaryOp::Sub, _, Some(0)) => return lhs,
            (BinaryOp::Mul, Some(1), _) => return rhs,
            (BinaryOp::Mul | BinaryOp::Div, _, Some(1)) => return lhs,
            (BinaryOp::Mul, Some(0), _) | (BinaryOp::Mul, _, Some(0)) => return Expr::Const(0),
            (BinaryOp::Rem, _, Some(1)) => return Expr::Const(0),
            _ => {}
        }

        // (x + c1) + c2 => x + (c1 + c2)
        if let (BinaryOp::Add, Some(c2)) = (op, rhs.as_const()) {
            if let Expr::Binary {
                op: BinaryOp::Add,
                lhs: inner,
                rhs: c1,
            } = &lhs
            {
                if let Some(c1) = c1.as_const() {
                    if let Some(sum) = c1.checked_add(c2) {
                        return Expr::binary(BinaryOp::Add, (**inner).clone(), sum);
                    }
                }
            }
        }

        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Create a comparison, folding it when both sides are constants.
    pub fn compare(op: CompareOp, lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Self {
        let lhs = lhs.into();
        let rhs = rhs.into();

        if let (Some(l), Some(r)) = (lhs.as_const(), rhs.as_const()) {
            return Expr::Const(op.apply(l, r) as i64);
        }

        Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Create a select expression, folding it when the condition is a constant.
    pub fn select(cond: impl Into<Expr>, then: impl Into<Expr>, or_else: impl Into<Expr>) -> Self {
        let cond = cond.into();
        let then = then.into();
        let or_else = or_else.into();

        match cond.as_const() {
            Some(0) => or_else,
            Some(_) => then,
            None if then == or_else => then,
            None => Expr::Select {
                cond: Box::new(cond),
                then: Box::new(then),
                or_else: Box::new(or_else),
            },
        }
    }

    /// `self < rhs`
    pub fn lt(&self, rhs: impl Into<Expr>) -> Self {
        Expr::compare(CompareOp::Lt, self.clone(), rhs)
    }

    /// `self <= rhs`
    pub fn le(&self, rhs: impl Into<Expr>) -> Self {
        Expr::compare(CompareOp::Le, self.clone(), rhs)
    }

    /// `self > rhs`
    pub fn gt(&self, rhs: impl Into<Expr>) -> Self {
        Expr::compare(CompareOp::Gt, self.clone(), rhs)
    }

    /// `self >= rhs`
    pub fn ge(&self, rhs: impl Into<Expr>) -> Self {
        Expr::compare(CompareOp::Ge, self.clone(), rhs)
    }

    /// `self == rhs`
    pub fn equal(&self, rhs: impl Into<Expr>) -> Self {
        Expr::compare(CompareOp::Eq, self.clone(), rhs)
    }

    /// `self != rhs`
    pub fn not_equal(&self, rhs: impl Into<Expr>) -> Self {
        Expr::compare(CompareOp::Ne, self.clone(), rhs)
    }

    /// Logical and of two conditions.
    pub fn and(&self, rhs: impl Into<Expr>) -> Self {
        let rhs = rhs.into();
        match (self.as_const(), rhs.as_const()) {
            (Some(0), _) | (_, Some(0)) => Expr::Const(0),
            (Some(_), _) => rhs,
            (_, Some(_)) => self.clone(),
            _ => Expr::binary(BinaryOp::And, self.clone(), rhs),
        }
    }

    /// Minimum of two expressions.
    pub fn min(&self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(BinaryOp::Min, self.clone(), rhs)
    }

    /// Maximum of two expressions.
    pub fn max(&self, rhs: impl Into<Expr>) -> Self {
        Expr::binary(BinaryOp::Max, self.clone(), rhs)
    }

    /// `(self + divisor - 1) / divisor`
    pub fn div_ceil(&self, divisor: impl Into<Expr>) -> Self {
        let divisor = divisor.into();
        (self + divisor.clone() - 1) / divisor
    }

    /// The value of the expression when it is a literal.
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::Const(value) => Some(*value),
            _ => None,
        }
    }

    /// Evaluate the expression with the provided variable bindings.
    pub fn eval<E: ExprEnv + ?Sized>(&self, env: &E) -> Result<i64, EvalError> {
        match self {
            Expr::Const(value) => Ok(*value),
            Expr::Var(id) => env.var(*id).ok_or(EvalError::UnboundVariable(*id)),
            Expr::ThreadId => Ok(env.thread_id()),
            Expr::Binary { op, lhs, rhs } => op.apply(lhs.eval(env)?, rhs.eval(env)?),
            Expr::Compare { op, lhs, rhs } => Ok(op.apply(lhs.eval(env)?, rhs.eval(env)?) as i64),
            Expr::Select {
                cond,
                then,
                or_else,
            } => match cond.eval(env)? {
                0 => or_else.eval(env),
                _ => then.eval(env),
            },
        }
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }

        impl<T: Into<Expr>> $trait<T> for &Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::binary($op, self.clone(), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);
impl_binary_op!(Rem, rem, BinaryOp::Rem);

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Const(value as i64)
                }
            }
        )*
    };
}

impl_from_int!(i32, i64, u32, u64, usize);

impl From<VarId> for Expr {
    fn from(value: VarId) -> Self {
        Expr::Var(value)
    }
}

impl From<&Expr> for Expr {
    fn from(value: &Expr) -> Self {
        value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Env(Vec<Option<i64>>);

    impl ExprEnv for Env {
        fn var(&self, id: VarId) -> Option<i64> {
            self.0.get(id.index()).copied().flatten()
        }

        fn thread_id(&self) -> i64 {
            3
        }
    }

    #[test]
    fn constants_are_folded() {
        let expr = Expr::from(7) * 3 + 2;
        assert_eq!(expr, Expr::Const(23));

        let expr = Expr::from(10).div_ceil(4);
        assert_eq!(expr, Expr::Const(3));
    }

    #[test]
    fn neutral_operands_are_dropped() {
        let x = Expr::Var(VarId(0));

        assert_eq!(&x + 0, x);
        assert_eq!(&x * 1, x);
        assert_eq!(&x * 0, Expr::Const(0));
        assert_eq!(&x % 1, Expr::Const(0));
        assert_eq!(Expr::from(0) + &x, x);
    }

    #[test]
    fn constant_offsets_are_merged() {
        let x = Expr::Var(VarId(0));
        let expr = (&x + 3) + 4;

        assert_eq!(expr, Expr::binary(BinaryOp::Add, x, 7));
    }

    #[test]
    fn division_by_zero_is_not_folded() {
        let expr = Expr::from(4) / 0;

        assert!(expr.as_const().is_none());
        assert_eq!(expr.eval(&Env(vec![])), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn comparisons_evaluate_to_integers() {
        let x = Expr::Var(VarId(0));
        let tag = x.ge(4) * 2 + x.lt(2);

        assert_eq!(tag.eval(&Env(vec![Some(5)])), Ok(2));
        assert_eq!(tag.eval(&Env(vec![Some(1)])), Ok(1));
        assert_eq!(tag.eval(&Env(vec![Some(3)])), Ok(0));
    }

    #[test]
    fn select_and_thread_id() {
        let x = Expr::Var(VarId(0));
        let expr = Expr::select(x.le(1), Expr::ThreadId, &x * 10);

        assert_eq!(expr.eval(&Env(vec![Some(1)])), Ok(3));
        assert_eq!(expr.eval(&Env(vec![Some(2)])), Ok(20));
        assert_eq!(
            expr.eval(&Env(vec![None])),
            Err(EvalError::UnboundVariable(VarId(0)))
        );
    }
}
