use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use tag_core::{Literal, Operator};

/// A runtime value. Strings and arrays are reference counted so that copying a value out of the
/// registry stays cheap; arrays are copied on write.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Rc<String>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Rc<Vec<Value>>),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    String,
    Int,
    Float,
    Bool,
}

impl Value {
    pub fn array(values: Vec<Value>) -> Self {
        Value::Array(Rc::new(values))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Array(_) => "array",
            Value::None => "none",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(val) => Some(*val as f64),
            Value::Float(val) => Some(*val),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(val) => Some(val.as_str()),
            _ => None,
        }
    }

    pub fn binary(&self, op: Operator, rhs: &Value) -> Result<Value, String> {
        match op {
            Operator::Equal => Ok(Value::Bool(self == rhs)),
            Operator::NotEqual => Ok(Value::Bool(self != rhs)),
            Operator::And | Operator::Or => match (self, rhs) {
                (Value::Bool(lhs), Value::Bool(rhs)) => Ok(Value::Bool(if op == Operator::And {
                    *lhs && *rhs
                } else {
                    *lhs || *rhs
                })),
                _ => Err(mismatch(op, self, rhs)),
            },
            Operator::Less | Operator::Greater | Operator::LessEqual | Operator::GreaterEqual => {
                let ordering = self.compare(rhs).ok_or_else(|| mismatch(op, self, rhs))?;
                let res = match op {
                    Operator::Less => ordering == Ordering::Less,
                    Operator::Greater => ordering == Ordering::Greater,
                    Operator::LessEqual => ordering != Ordering::Greater,
                    _ => ordering != Ordering::Less,
                };
                Ok(Value::Bool(res))
            }
            Operator::Add => match (self, rhs) {
                (Value::Str(lhs), Value::Str(rhs)) => {
                    Ok(Value::from(String::from(lhs.as_str()) + rhs.as_str()))
                }
                (Value::Array(lhs), Value::Array(rhs)) => {
                    let mut joined = Vec::with_capacity(lhs.len() + rhs.len());
                    joined.extend(lhs.iter().cloned());
                    joined.extend(rhs.iter().cloned());
                    Ok(Value::array(joined))
                }
                _ => self.arithmetic(op, rhs),
            },
            Operator::Sub
            | Operator::Mul
            | Operator::Div
            | Operator::Mod
            | Operator::Pow
            | Operator::Root => self.arithmetic(op, rhs),
            _ => Err(format!("'{}' is not a binary operator", op)),
        }
    }

    pub fn unary(&self, op: Operator) -> Result<Value, String> {
        match (op, self) {
            (Operator::Sub, Value::Int(val)) => val
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| String::from("integer overflow")),
            (Operator::Sub, Value::Float(val)) => Ok(Value::Float(-val)),
            (Operator::Not, Value::Bool(val)) => Ok(Value::Bool(!val)),
            _ => Err(format!(
                "unary '{}' is not defined for {}",
                op,
                self.type_name()
            )),
        }
    }

    fn arithmetic(&self, op: Operator, rhs: &Value) -> Result<Value, String> {
        match (self, rhs) {
            (Value::Int(lhs), Value::Int(rhs)) => int_arithmetic(op, *lhs, *rhs),
            (Value::Int(_), Value::Float(_))
            | (Value::Float(_), Value::Int(_))
            | (Value::Float(_), Value::Float(_)) => {
                // Both sides are numeric here, so the conversions cannot fail.
                let lhs = self.as_float().unwrap_or_default();
                let rhs = rhs.as_float().unwrap_or_default();
                Ok(Value::Float(float_arithmetic(op, lhs, rhs)))
            }
            _ => Err(mismatch(op, self, rhs)),
        }
    }

    fn compare(&self, rhs: &Value) -> Option<Ordering> {
        match (self, rhs) {
            (Value::Int(lhs), Value::Int(rhs)) => Some(lhs.cmp(rhs)),
            (Value::Str(lhs), Value::Str(rhs)) => Some(lhs.cmp(rhs)),
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float()?.partial_cmp(&rhs.as_float()?)
            }
            _ => None,
        }
    }

    pub fn index(&self, index: &Value) -> Result<Value, String> {
        let items = match self {
            Value::Array(items) => items,
            _ => return Err(format!("cannot index into {}", self.type_name())),
        };
        let at = position(items.len(), index)?;
        Ok(items[at].clone())
    }

    /// Replaces the element found by following `path` through nested arrays.
    pub fn set_index(&mut self, path: &[Value], value: Value) -> Result<(), String> {
        let (first, rest) = match path.split_first() {
            Some(split) => split,
            None => {
                *self = value;
                return Ok(());
            }
        };

        let type_name = self.type_name();
        let items = match self {
            Value::Array(items) => Rc::make_mut(items),
            _ => return Err(format!("cannot index into {}", type_name)),
        };
        let at = position(items.len(), first)?;
        items[at].set_index(rest, value)
    }

    pub fn convert(&self, to: Conversion) -> Result<Value, String> {
        let failed = || format!("cannot convert {} '{}' to {:?}", self.type_name(), self, to);
        let converted = match to {
            Conversion::String => Value::from(self.to_string()),
            Conversion::Int => match self {
                Value::Int(val) => Value::Int(*val),
                Value::Float(val) => Value::Int(val.trunc() as i64),
                Value::Bool(val) => Value::Int(i64::from(*val)),
                Value::Str(val) => Value::Int(val.trim().parse().map_err(|_| failed())?),
                _ => return Err(failed()),
            },
            Conversion::Float => match self {
                Value::Int(val) => Value::Float(*val as f64),
                Value::Float(val) => Value::Float(*val),
                Value::Bool(val) => Value::Float(if *val { 1.0 } else { 0.0 }),
                Value::Str(val) => Value::Float(val.trim().parse().map_err(|_| failed())?),
                _ => return Err(failed()),
            },
            Conversion::Bool => match self {
                Value::Bool(val) => Value::Bool(*val),
                Value::Int(val) => Value::Bool(*val != 0),
                Value::Float(val) => Value::Bool(*val != 0.0),
                Value::Str(val) => match val.trim() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => return Err(failed()),
                },
                Value::Array(items) => Value::Bool(!items.is_empty()),
                Value::None => Value::Bool(false),
            },
        };
        Ok(converted)
    }
}

fn position(len: usize, index: &Value) -> Result<usize, String> {
    match index {
        Value::Int(at) if *at >= 0 && (*at as usize) < len => Ok(*at as usize),
        Value::Int(at) => Err(format!("index {} out of range for length {}", at, len)),
        other => Err(format!("index must be an int, got {}", other.type_name())),
    }
}

fn mismatch(op: Operator, lhs: &Value, rhs: &Value) -> String {
    format!(
        "'{}' is not defined for {} and {}",
        op,
        lhs.type_name(),
        rhs.type_name()
    )
}

fn int_arithmetic(op: Operator, lhs: i64, rhs: i64) -> Result<Value, String> {
    let overflow = || String::from("integer overflow");
    let res = match op {
        Operator::Add => lhs.checked_add(rhs).ok_or_else(overflow)?,
        Operator::Sub => lhs.checked_sub(rhs).ok_or_else(overflow)?,
        Operator::Mul => lhs.checked_mul(rhs).ok_or_else(overflow)?,
        Operator::Div | Operator::Mod if rhs == 0 => {
            return Err(String::from("division by zero"));
        }
        Operator::Div => lhs.checked_div(rhs).ok_or_else(overflow)?,
        Operator::Mod => lhs.checked_rem(rhs).ok_or_else(overflow)?,
        Operator::Pow if rhs >= 0 => {
            let exp = u32::try_from(rhs).map_err(|_| overflow())?;
            lhs.checked_pow(exp).ok_or_else(overflow)?
        }
        _ => return Ok(Value::Float(float_arithmetic(op, lhs as f64, rhs as f64))),
    };
    Ok(Value::Int(res))
}

fn float_arithmetic(op: Operator, lhs: f64, rhs: f64) -> f64 {
    match op {
        Operator::Add => lhs + rhs,
        Operator::Sub => lhs - rhs,
        Operator::Mul => lhs * rhs,
        Operator::Div => lhs / rhs,
        Operator::Mod => lhs % rhs,
        Operator::Pow => lhs.powf(rhs),
        // `a // b` is the b-th root of a
        _ => lhs.powf(1.0 / rhs),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(lhs), Value::Str(rhs)) => lhs == rhs,
            (Value::Int(lhs), Value::Int(rhs)) => lhs == rhs,
            (Value::Int(lhs), Value::Float(rhs)) => (*lhs as f64) == *rhs,
            (Value::Float(lhs), Value::Int(rhs)) => *lhs == (*rhs as f64),
            (Value::Float(lhs), Value::Float(rhs)) => lhs == rhs,
            (Value::Bool(lhs), Value::Bool(rhs)) => lhs == rhs,
            (Value::Array(lhs), Value::Array(rhs)) => lhs == rhs,
            (Value::None, Value::None) => true,
            _ => false,
        }
    }
}

impl From<Literal> for Value {
    fn from(value: Literal) -> Self {
        match value {
            Literal::Str(val) => Value::Str(Rc::new(val)),
            Literal::Int(val) => Value::Int(val),
            Literal::Float(val) => Value::Float(val),
            Literal::Bool(val) => Value::Bool(val),
            Literal::Nil => Value::None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(Rc::new(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Rc::new(String::from(value)))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

macro_rules! impl_from_int_for_value {
    ( $( $t:ident )* ) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Value {
                    Value::Int(n as i64)
                }
            }
        )*
    }
}

impl_from_int_for_value!(u8 i8 u16 i16 u32 i32 i64 usize);

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Str(val) => write!(f, "{}", val),
            Value::Int(val) => write!(f, "{}", val),
            Value::Float(val) => write!(f, "{:?}", val),
            Value::Bool(val) => write!(f, "{}", val),
            Value::Array(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::None => write!(f, "none"),
        }
    }
}
