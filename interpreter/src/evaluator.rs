use tag_core::Operator;

use crate::ast::{Operand, Sequence};
use crate::error::{Error, TagResult};
use crate::value::Value;

/// Reduces a flat sequence to one value with a value stack and an operator stack. Before an
/// operator is pushed, every stacked operator binding at least as tightly is applied first, so
/// operators of equal precedence group to the left: `2 ** 3 ** 2` is `(2 ** 3) ** 2`.
///
/// Operands are produced by `operand` strictly left to right. The deeper of the two values
/// popped for an operator is its left-hand side.
pub(crate) fn reduce<F>(sequence: &Sequence, mut operand: F) -> TagResult<Value>
where
    F: FnMut(&Operand) -> TagResult<Value>,
{
    let (first, rest) = match sequence.operands.split_first() {
        Some(split) => split,
        None => return Ok(Value::None),
    };

    let mut values = vec![operand(first)?];
    if sequence.operators.is_empty() {
        return values.pop().ok_or_else(|| Error::operator(0, "empty expression"));
    }

    let mut ops: Vec<(Operator, usize)> = Vec::with_capacity(sequence.operators.len());
    for (&(op, line), next) in sequence.operators.iter().zip(rest) {
        while let Some(&(top, _)) = ops.last() {
            if top.precedence() < op.precedence() {
                break;
            }
            apply(&mut values, &mut ops)?;
        }
        ops.push((op, line));
        values.push(operand(next)?);
    }

    while !ops.is_empty() {
        apply(&mut values, &mut ops)?;
    }

    values
        .pop()
        .ok_or_else(|| Error::operator(0, "empty expression"))
}

fn apply(values: &mut Vec<Value>, ops: &mut Vec<(Operator, usize)>) -> TagResult<()> {
    let (op, line) = match ops.pop() {
        Some(top) => top,
        None => return Ok(()),
    };
    let (rhs, lhs) = match (values.pop(), values.pop()) {
        (Some(rhs), Some(lhs)) => (rhs, lhs),
        _ => return Err(Error::operator(line, format!("'{}' is missing an operand", op))),
    };

    let res = lhs
        .binary(op, &rhs)
        .map_err(|msg| Error::operator(line, msg))?;
    values.push(res);
    Ok(())
}

#[cfg(test)]
mod tests {
    use tag_core::Operator;

    use crate::ast::{NodeId, Operand, Sequence};
    use crate::error::ErrorKind;
    use crate::evaluator::reduce;
    use crate::value::Value;

    // Builds a sequence out of alternating values and operators; operand `i` evaluates to
    // `values[i]`.
    fn sequence(values: &[Value], operators: &[Operator]) -> Sequence {
        Sequence {
            operands: (0..values.len())
                .map(|i| Operand {
                    node: NodeId(i),
                    prefix: Vec::new(),
                    subscripts: Vec::new(),
                })
                .collect(),
            operators: operators.iter().map(|op| (*op, 1)).collect(),
        }
    }

    fn eval(values: &[Value], operators: &[Operator]) -> Value {
        let seq = sequence(values, operators);
        reduce(&seq, |operand| Ok(values[operand.node.0].clone())).unwrap()
    }

    #[test]
    fn test_precedence() {
        let res = eval(
            &[Value::from(1), Value::from(2), Value::from(3)],
            &[Operator::Add, Operator::Mul],
        );
        assert_eq!(res, Value::from(7));

        let res = eval(
            &[Value::from(2), Value::from(3), Value::from(4), Value::from(5)],
            &[Operator::Mul, Operator::Add, Operator::Mul],
        );
        assert_eq!(res, Value::from(26));
    }

    #[test]
    fn test_equal_precedence_groups_left() {
        let res = eval(
            &[Value::from(2), Value::from(3), Value::from(2)],
            &[Operator::Pow, Operator::Pow],
        );
        assert_eq!(res, Value::from(64));

        let res = eval(
            &[Value::from(10), Value::from(2), Value::from(3)],
            &[Operator::Sub, Operator::Sub],
        );
        assert_eq!(res, Value::from(5));

        let res = eval(
            &[Value::from(20), Value::from(2), Value::from(5)],
            &[Operator::Div, Operator::Div],
        );
        assert_eq!(res, Value::from(2));

        let res = eval(
            &[Value::from(17), Value::from(7), Value::from(2)],
            &[Operator::Mod, Operator::Mod],
        );
        assert_eq!(res, Value::from(1));
    }

    #[test]
    fn test_lower_precedence_after_higher() {
        // 1 < 2 == true
        let res = eval(
            &[Value::from(1), Value::from(2), Value::from(true)],
            &[Operator::Less, Operator::Equal],
        );
        assert_eq!(res, Value::from(true));

        // 8 - 2 ** (3 // 1)
        let res = eval(
            &[Value::from(8), Value::from(2), Value::from(3), Value::from(1)],
            &[Operator::Sub, Operator::Pow, Operator::Root],
        );
        assert_eq!(res, Value::from(0.0));
    }

    #[test]
    fn test_single_and_empty() {
        assert_eq!(eval(&[Value::from("x")], &[]), Value::from("x"));
        assert_eq!(eval(&[], &[]), Value::None);
    }

    #[test]
    fn test_operands_run_left_to_right() {
        let values = [Value::from(1), Value::from(2), Value::from(3)];
        let seq = sequence(&values, &[Operator::Add, Operator::Mul]);
        let mut order = Vec::new();
        reduce(&seq, |operand| {
            order.push(operand.node.0);
            Ok(values[operand.node.0].clone())
        })
        .unwrap();

        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_operator_error_carries_line() {
        let values = [Value::from(1), Value::from("a")];
        let seq = sequence(&values, &[Operator::Sub]);
        let err = reduce(&seq, |operand| Ok(values[operand.node.0].clone())).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Operator);
        assert_eq!(err.line(), 1);
    }
}
