// eval.rs — Constant arithmetic shared by folding and the backend machine
//
// The constant folder and the instruction interpreter both evaluate SNEX
// arithmetic through these helpers, so folding a subtree can never change
// observable rounding or truncation behavior.
//
// Preconditions: binary operands carry the same type (the resolver inserts
//   casts before folding or emission).
// Postconditions: `None` means the operation is not evaluable at compile
//   time (int division by zero is left to the runtime).
// Failure modes: none.
// Side effects: none.

use crate::ast::{BinaryOp, UnaryOp};
use crate::types::{ConstValue, Type};

/// Evaluate a binary operation on two same-typed constants.
pub fn binary(op: BinaryOp, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;
    if op.is_comparison() {
        let r = match (a, b) {
            (Int(x), Int(y)) => compare(op, x, y),
            (Float(x), Float(y)) => compare(op, x, y),
            (Double(x), Double(y)) => compare(op, x, y),
            _ => return None,
        };
        return Some(Int(r as i64));
    }
    if op.is_logical() {
        let (Int(x), Int(y)) = (a, b) else {
            return None;
        };
        let r = match op {
            BinaryOp::And => x != 0 && y != 0,
            BinaryOp::Or => x != 0 || y != 0,
            _ => unreachable!(),
        };
        return Some(Int(r as i64));
    }
    match (a, b) {
        (Int(x), Int(y)) => int_arith(op, x, y).map(Int),
        (Float(x), Float(y)) => Some(Float(float_arith(op, x, y)?)),
        (Double(x), Double(y)) => Some(Double(double_arith(op, x, y)?)),
        _ => None,
    }
}

/// Evaluate a unary operation on a constant.
pub fn unary(op: UnaryOp, a: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;
    match (op, a) {
        (UnaryOp::Neg, Int(v)) => Some(Int(v.wrapping_neg())),
        (UnaryOp::Neg, Float(v)) => Some(Float(-v)),
        (UnaryOp::Neg, Double(v)) => Some(Double(-v)),
        (UnaryOp::Not, Int(v)) => Some(Int((v == 0) as i64)),
        (UnaryOp::Not, _) => None,
    }
}

/// Evaluate a numeric cast on a constant.
pub fn cast(a: ConstValue, to: Type) -> Option<ConstValue> {
    a.cast_to(to)
}

fn compare<T: PartialOrd>(op: BinaryOp, x: T, y: T) -> bool {
    match op {
        BinaryOp::Eq => x == y,
        BinaryOp::Ne => x != y,
        BinaryOp::Lt => x < y,
        BinaryOp::Le => x <= y,
        BinaryOp::Gt => x > y,
        BinaryOp::Ge => x >= y,
        _ => unreachable!(),
    }
}

fn int_arith(op: BinaryOp, x: i64, y: i64) -> Option<i64> {
    match op {
        BinaryOp::Add => Some(x.wrapping_add(y)),
        BinaryOp::Sub => Some(x.wrapping_sub(y)),
        BinaryOp::Mul => Some(x.wrapping_mul(y)),
        // division by zero is never folded; the machine defines it as zero
        BinaryOp::Div if y != 0 => Some(x.wrapping_div(y)),
        BinaryOp::Mod if y != 0 => Some(x.wrapping_rem(y)),
        _ => None,
    }
}

fn float_arith(op: BinaryOp, x: f32, y: f32) -> Option<f32> {
    match op {
        BinaryOp::Add => Some(x + y),
        BinaryOp::Sub => Some(x - y),
        BinaryOp::Mul => Some(x * y),
        BinaryOp::Div => Some(x / y),
        BinaryOp::Mod => Some(x % y),
        _ => None,
    }
}

fn double_arith(op: BinaryOp, x: f64, y: f64) -> Option<f64> {
    match op {
        BinaryOp::Add => Some(x + y),
        BinaryOp::Sub => Some(x - y),
        BinaryOp::Mul => Some(x * y),
        BinaryOp::Div => Some(x / y),
        BinaryOp::Mod => Some(x % y),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_wrapping() {
        assert_eq!(
            binary(BinaryOp::Add, ConstValue::Int(i64::MAX), ConstValue::Int(1)),
            Some(ConstValue::Int(i64::MIN))
        );
    }

    #[test]
    fn int_div_by_zero_not_folded() {
        assert_eq!(binary(BinaryOp::Div, ConstValue::Int(1), ConstValue::Int(0)), None);
        assert_eq!(binary(BinaryOp::Mod, ConstValue::Int(1), ConstValue::Int(0)), None);
    }

    #[test]
    fn float_uses_f32_semantics() {
        // 0.1f + 0.2f in f32 differs from the f64 result
        let r = binary(
            BinaryOp::Add,
            ConstValue::Float(0.1),
            ConstValue::Float(0.2),
        );
        assert_eq!(r, Some(ConstValue::Float(0.1f32 + 0.2f32)));
    }

    #[test]
    fn float_div_by_zero_folds_to_inf() {
        let r = binary(
            BinaryOp::Div,
            ConstValue::Float(1.0),
            ConstValue::Float(0.0),
        );
        assert_eq!(r, Some(ConstValue::Float(f32::INFINITY)));
    }

    #[test]
    fn comparisons_yield_int() {
        assert_eq!(
            binary(BinaryOp::Lt, ConstValue::Double(1.0), ConstValue::Double(2.0)),
            Some(ConstValue::Int(1))
        );
        assert_eq!(
            binary(BinaryOp::Eq, ConstValue::Int(3), ConstValue::Int(4)),
            Some(ConstValue::Int(0))
        );
    }

    #[test]
    fn logical_and_not() {
        assert_eq!(
            binary(BinaryOp::And, ConstValue::Int(1), ConstValue::Int(0)),
            Some(ConstValue::Int(0))
        );
        assert_eq!(unary(UnaryOp::Not, ConstValue::Int(0)), Some(ConstValue::Int(1)));
        assert_eq!(unary(UnaryOp::Neg, ConstValue::Float(2.5)), Some(ConstValue::Float(-2.5)));
    }
}
