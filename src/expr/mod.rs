//! Integrand expressions
//!
//! Integrands are supplied as text and compiled into a small expression tree
//! over the single variable `x`. The tree is the only form an integrand takes
//! inside parquad: it is evaluated locally, serialized to remote nodes, and
//! printed back in reports. Nothing is ever executed from the source string.
//!
//! # Grammar
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/' | '%') unary)*
//! unary  := ('-' | '+') unary | power
//! power  := atom (('**' | '^') unary)?
//! atom   := NUMBER | 'x' | CONST | FUNC '(' expr (',' expr)? ')' | '(' expr ')'
//! ```
//!
//! Power is right-associative and binds tighter than unary minus, so
//! `-x**2` is `-(x**2)`. Functions and constants may carry a `math.` prefix.
//!
//! # Example
//!
//! ```
//! use parquad::expr::parse;
//!
//! let f = parse("math.sin(x) ** 2 + 1").unwrap();
//! assert_eq!(f.eval(0.0).unwrap(), 1.0);
//! ```

pub mod parser;

pub use parser::{parse, ParseError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Evaluation failure for a single point
///
/// These mirror the failures a numeric integrand can hit at particular
/// inputs (singularities, domain violations, overflow). They are reported as
/// task failures, never folded into the sum.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("math domain error in {function}({arg})")]
    Domain { function: String, arg: f64 },

    #[error("numerical result out of range")]
    Overflow,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    /// Floored modulo (sign follows the divisor)
    Rem,
    Pow,
    Atan2,
}

/// Single-argument functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Log,
    Log10,
    Log2,
    Sqrt,
    Abs,
    Floor,
    Ceil,
}

impl Function {
    /// Look up a function by its source name (without `math.` prefix)
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "sin" => Function::Sin,
            "cos" => Function::Cos,
            "tan" => Function::Tan,
            "asin" => Function::Asin,
            "acos" => Function::Acos,
            "atan" => Function::Atan,
            "sinh" => Function::Sinh,
            "cosh" => Function::Cosh,
            "tanh" => Function::Tanh,
            "exp" => Function::Exp,
            "log" => Function::Log,
            "log10" => Function::Log10,
            "log2" => Function::Log2,
            "sqrt" => Function::Sqrt,
            "abs" | "fabs" => Function::Abs,
            "floor" => Function::Floor,
            "ceil" => Function::Ceil,
            _ => return None,
        };
        Some(func)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Sin => "sin",
            Function::Cos => "cos",
            Function::Tan => "tan",
            Function::Asin => "asin",
            Function::Acos => "acos",
            Function::Atan => "atan",
            Function::Sinh => "sinh",
            Function::Cosh => "cosh",
            Function::Tanh => "tanh",
            Function::Exp => "exp",
            Function::Log => "log",
            Function::Log10 => "log10",
            Function::Log2 => "log2",
            Function::Sqrt => "sqrt",
            Function::Abs => "abs",
            Function::Floor => "floor",
            Function::Ceil => "ceil",
        }
    }

    fn apply(&self, arg: f64) -> Result<f64, EvalError> {
        let domain_error = || EvalError::Domain {
            function: self.name().to_string(),
            arg,
        };

        let value = match self {
            Function::Sin => arg.sin(),
            Function::Cos => arg.cos(),
            Function::Tan => arg.tan(),
            Function::Asin | Function::Acos if !(-1.0..=1.0).contains(&arg) => {
                return Err(domain_error());
            }
            Function::Asin => arg.asin(),
            Function::Acos => arg.acos(),
            Function::Atan => arg.atan(),
            Function::Sinh => arg.sinh(),
            Function::Cosh => arg.cosh(),
            Function::Tanh => arg.tanh(),
            Function::Exp => arg.exp(),
            Function::Log | Function::Log10 | Function::Log2 if arg <= 0.0 => {
                return Err(domain_error());
            }
            Function::Log => arg.ln(),
            Function::Log10 => arg.log10(),
            Function::Log2 => arg.log2(),
            Function::Sqrt if arg < 0.0 => return Err(domain_error()),
            Function::Sqrt => arg.sqrt(),
            Function::Abs => arg.abs(),
            Function::Floor => arg.floor(),
            Function::Ceil => arg.ceil(),
        };

        if value.is_nan() {
            return Err(domain_error());
        }
        if value.is_infinite() && arg.is_finite() {
            return Err(EvalError::Overflow);
        }
        Ok(value)
    }
}

/// Compiled integrand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Numeric literal or named constant
    Const(f64),

    /// The integration variable `x`
    Var,

    Neg(Box<Expr>),

    Call {
        func: Function,
        arg: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate at `x`
    ///
    /// A non-finite final value is an error: an integrand that is infinite
    /// or undefined at a sample point has no trapezoid contribution.
    pub fn eval(&self, x: f64) -> Result<f64, EvalError> {
        let value = self.eval_inner(x)?;
        if value.is_nan() {
            return Err(EvalError::Domain {
                function: "f".to_string(),
                arg: x,
            });
        }
        if value.is_infinite() {
            return Err(EvalError::Overflow);
        }
        Ok(value)
    }

    fn eval_inner(&self, x: f64) -> Result<f64, EvalError> {
        match self {
            Expr::Const(c) => Ok(*c),
            Expr::Var => Ok(x),
            Expr::Neg(inner) => Ok(-inner.eval_inner(x)?),
            Expr::Call { func, arg } => func.apply(arg.eval_inner(x)?),
            Expr::Binary { op, lhs, rhs } => {
                let a = lhs.eval_inner(x)?;
                let b = rhs.eval_inner(x)?;
                apply_binary(*op, a, b)
            }
        }
    }

    /// Height of the tree (a leaf has depth 1)
    pub fn depth(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Var => 1,
            Expr::Neg(inner) => 1 + inner.depth(),
            Expr::Call { arg, .. } => 1 + arg.depth(),
            Expr::Binary { lhs, rhs, .. } => 1 + lhs.depth().max(rhs.depth()),
        }
    }

    /// Whether the expression references `x`
    pub fn depends_on_x(&self) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::Var => true,
            Expr::Neg(inner) => inner.depends_on_x(),
            Expr::Call { arg, .. } => arg.depends_on_x(),
            Expr::Binary { lhs, rhs, .. } => lhs.depends_on_x() || rhs.depends_on_x(),
        }
    }
}

fn apply_binary(op: BinaryOp, a: f64, b: f64) -> Result<f64, EvalError> {
    match op {
        BinaryOp::Add => Ok(a + b),
        BinaryOp::Sub => Ok(a - b),
        BinaryOp::Mul => Ok(a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(a / b)
        }
        BinaryOp::Rem => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                Ok(r + b)
            } else {
                Ok(r)
            }
        }
        BinaryOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(EvalError::Domain {
                    function: "pow".to_string(),
                    arg: a,
                });
            }
            let value = a.powf(b);
            if value.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(EvalError::Overflow);
            }
            Ok(value)
        }
        BinaryOp::Atan2 => Ok(a.atan2(b)),
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Atan2 => "atan2",
        };
        f.write_str(symbol)
    }
}

/// Fully parenthesized form; parses back to the same tree
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Var => f.write_str("x"),
            Expr::Neg(inner) => write!(f, "(-{})", inner),
            Expr::Call { func, arg } => write!(f, "{}({})", func.name(), arg),
            Expr::Binary { op: BinaryOp::Atan2, lhs, rhs } => write!(f, "atan2({}, {})", lhs, rhs),
            Expr::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
        }
    }
}
