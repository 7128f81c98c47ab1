use crate::catalog::DataType;
use crate::error::{MemDbError, MemDbResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// A single typed cell value. `None` payloads are SQL NULLs of that type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Boolean(Option<bool>),
    Int64(Option<i64>),
    Float64(Option<f64>),
    Varchar(Option<String>),
}

impl ScalarValue {
    pub fn new_empty(data_type: DataType) -> Self {
        match data_type {
            DataType::Boolean => Self::Boolean(None),
            DataType::Int64 => Self::Int64(None),
            DataType::Float64 => Self::Float64(None),
            DataType::Varchar(_) => Self::Varchar(None),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ScalarValue::Boolean(_) => DataType::Boolean,
            ScalarValue::Int64(_) => DataType::Int64,
            ScalarValue::Float64(_) => DataType::Float64,
            ScalarValue::Varchar(_) => DataType::Varchar(None),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            ScalarValue::Boolean(v) => v.is_none(),
            ScalarValue::Int64(v) => v.is_none(),
            ScalarValue::Float64(v) => v.is_none(),
            ScalarValue::Varchar(v) => v.is_none(),
        }
    }

    /// Numeric view used for interpolation and arithmetic.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int64(Some(v)) => Some(*v as f64),
            ScalarValue::Float64(Some(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(v) => *v,
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Varchar(Some(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Try to cast this value to a ScalarValue of type `data_type`
    pub fn cast_to(&self, data_type: &DataType) -> MemDbResult<Self> {
        let error =
            MemDbError::NotSupport(format!("Failed to cast {:?} to {} type", self, data_type));

        if self.data_type().same_kind(data_type) {
            return Ok(self.clone());
        }

        match data_type {
            DataType::Boolean => match self {
                ScalarValue::Int64(v) => Ok(ScalarValue::Boolean(v.map(|v| v != 0))),
                _ if self.is_null() => Ok(ScalarValue::Boolean(None)),
                _ => Err(error),
            },
            DataType::Int64 => match self {
                ScalarValue::Float64(Some(v)) if v.fract() == 0.0 => {
                    Ok(ScalarValue::Int64(Some(*v as i64)))
                }
                ScalarValue::Boolean(v) => Ok(ScalarValue::Int64(v.map(|v| v as i64))),
                _ if self.is_null() => Ok(ScalarValue::Int64(None)),
                _ => Err(error),
            },
            DataType::Float64 => match self {
                ScalarValue::Int64(v) => Ok(ScalarValue::Float64(v.map(|v| v as f64))),
                _ if self.is_null() => Ok(ScalarValue::Float64(None)),
                _ => Err(error),
            },
            DataType::Varchar(_) => match self {
                _ if self.is_null() => Ok(ScalarValue::Varchar(None)),
                other => Ok(ScalarValue::Varchar(Some(other.to_string()))),
            },
        }
    }

    /// Addition used by SUM/AVG accumulators. Integers stay integers.
    pub fn add(&self, other: &ScalarValue) -> MemDbResult<ScalarValue> {
        match (self, other) {
            (ScalarValue::Int64(Some(l)), ScalarValue::Int64(Some(r))) => l
                .checked_add(*r)
                .map(|v| ScalarValue::Int64(Some(v)))
                .ok_or_else(|| MemDbError::Execution(format!("Int64 overflow adding {l} + {r}"))),
            (l, r) if l.is_null() => Ok(r.clone()),
            (l, r) if r.is_null() => Ok(l.clone()),
            (l, r) => match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => Ok(ScalarValue::Float64(Some(a + b))),
                _ => Err(MemDbError::Execution(format!("Can not add {l} and {r}"))),
            },
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            ScalarValue::Boolean(_) => 0,
            ScalarValue::Int64(_) | ScalarValue::Float64(_) => 1,
            ScalarValue::Varchar(_) => 2,
        }
    }

    /// Total order: NULLs first, numerics compared by value across Int64/Float64,
    /// then values of different kinds ordered by kind.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return Ordering::Less,
            (false, true) => return Ordering::Greater,
            (false, false) => {}
        }
        match (self, other) {
            (ScalarValue::Boolean(Some(l)), ScalarValue::Boolean(Some(r))) => l.cmp(r),
            (ScalarValue::Int64(Some(l)), ScalarValue::Int64(Some(r))) => l.cmp(r),
            (ScalarValue::Varchar(Some(l)), ScalarValue::Varchar(Some(r))) => l.cmp(r),
            (ScalarValue::Float64(Some(l)), ScalarValue::Float64(Some(r))) => {
                // 0.0 and -0.0 are one value
                if l == r {
                    Ordering::Equal
                } else {
                    l.total_cmp(r)
                }
            }
            (ScalarValue::Int64(Some(l)), ScalarValue::Float64(Some(r))) => int_float_cmp(*l, *r),
            (ScalarValue::Float64(Some(l)), ScalarValue::Int64(Some(r))) => {
                int_float_cmp(*r, *l).reverse()
            }
            (l, r) => l.type_rank().cmp(&r.type_rank()),
        }
    }

    /// SQL comparison: `None` when either side is NULL or kinds are incomparable.
    pub fn sql_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.is_null() || other.is_null() || self.type_rank() != other.type_rank() {
            return None;
        }
        Some(self.total_cmp(other))
    }
}

// 2^63: the first float above every i64
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

/// `float` as an exact i64 when it is integral and in range.
fn integral_f64(float: f64) -> Option<i64> {
    if float.fract() == 0.0 && float >= -I64_UPPER && float < I64_UPPER {
        Some(float as i64)
    } else {
        None
    }
}

/// Exact comparison of an integer with a float, without rounding the integer.
fn int_float_cmp(int: i64, float: f64) -> Ordering {
    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= I64_UPPER {
        return Ordering::Less;
    }
    if float < -I64_UPPER {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal if float > whole => Ordering::Less,
        Ordering::Equal if float < whole => Ordering::Greater,
        other => other,
    }
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for ScalarValue {}

impl PartialOrd for ScalarValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScalarValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if self.is_null() {
            0u8.hash(state);
            return;
        }
        match self {
            ScalarValue::Boolean(Some(v)) => {
                1u8.hash(state);
                v.hash(state);
            }
            ScalarValue::Int64(Some(v)) => {
                2u8.hash(state);
                v.hash(state);
            }
            // integral floats must hash like the Int64 they compare equal to
            ScalarValue::Float64(Some(v)) => match integral_f64(*v) {
                Some(int) => {
                    2u8.hash(state);
                    int.hash(state);
                }
                None => {
                    3u8.hash(state);
                    v.to_bits().hash(state);
                }
            },
            ScalarValue::Varchar(Some(v)) => {
                4u8.hash(state);
                v.hash(state);
            }
            _ => {}
        }
    }
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Boolean(None) => write!(f, "NULL"),
            ScalarValue::Boolean(Some(v)) => write!(f, "{v}"),
            ScalarValue::Int64(None) => write!(f, "NULL"),
            ScalarValue::Int64(Some(v)) => write!(f, "{v}"),
            ScalarValue::Float64(None) => write!(f, "NULL"),
            ScalarValue::Float64(Some(v)) => write!(f, "{v}"),
            ScalarValue::Varchar(None) => write!(f, "NULL"),
            ScalarValue::Varchar(Some(v)) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Boolean(Some(value))
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int64(Some(value as i64))
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int64(Some(value))
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float64(Some(value))
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Varchar(Some(value.to_string()))
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Varchar(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(value: &ScalarValue) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn nulls_sort_first() {
        let mut values = vec![
            ScalarValue::from(3),
            ScalarValue::Int64(None),
            ScalarValue::from(-1),
        ];
        values.sort();
        assert!(values[0].is_null());
        assert_eq!(values[1], ScalarValue::from(-1));
    }

    #[test]
    fn mixed_numerics_compare_and_hash_alike() {
        let int = ScalarValue::from(5);
        let float = ScalarValue::from(5.0);
        assert_eq!(int, float);
        assert_eq!(hash_of(&int), hash_of(&float));
        assert!(ScalarValue::from(4.5) < int);
    }

    #[test]
    fn large_mixed_numerics_stay_transitive() {
        let exact = ScalarValue::from(1i64 << 53);
        let next = ScalarValue::from((1i64 << 53) + 1);
        let float = ScalarValue::from((1i64 << 53) as f64);
        assert_eq!(exact, float);
        assert_ne!(float, next);
        assert!(float < next);
        assert_ne!(exact, next);
        assert_eq!(hash_of(&exact), hash_of(&float));

        let mut keyed = std::collections::HashMap::new();
        keyed.insert(float.clone(), "float");
        assert_eq!(keyed.get(&exact), Some(&"float"));
        assert_eq!(keyed.get(&next), None);

        assert!(ScalarValue::from(i64::MAX) < ScalarValue::from(I64_UPPER));
        assert!(ScalarValue::from(i64::MIN) > ScalarValue::from(-I64_UPPER * 2.0));
        assert_eq!(ScalarValue::from(i64::MIN), ScalarValue::from(-I64_UPPER));
        assert!(ScalarValue::from(-3) > ScalarValue::from(-3.5));
        assert!(ScalarValue::from(-3) < ScalarValue::from(-2.5));
    }

    #[test]
    fn signed_zeros_are_equal() {
        let pos = ScalarValue::from(0.0);
        let neg = ScalarValue::from(-0.0);
        assert_eq!(pos, neg);
        assert_eq!(neg, ScalarValue::from(0));
        assert_eq!(hash_of(&pos), hash_of(&neg));
    }

    #[test]
    fn sql_cmp_rejects_null_and_mixed_kinds() {
        assert_eq!(ScalarValue::Int64(None).sql_cmp(&ScalarValue::from(1)), None);
        assert_eq!(ScalarValue::from("a").sql_cmp(&ScalarValue::from(1)), None);
        assert_eq!(
            ScalarValue::from("a").sql_cmp(&ScalarValue::from("b")),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn add_keeps_integers() {
        let sum = ScalarValue::from(2).add(&ScalarValue::from(3)).unwrap();
        assert!(matches!(sum, ScalarValue::Int64(Some(5))));
        let sum = ScalarValue::from(2).add(&ScalarValue::from(0.5)).unwrap();
        assert!(matches!(sum, ScalarValue::Float64(Some(v)) if v == 2.5));
    }

    #[test]
    fn cast_int_to_float() {
        let cast = ScalarValue::from(7).cast_to(&DataType::Float64).unwrap();
        assert!(matches!(cast, ScalarValue::Float64(Some(v)) if v == 7.0));
        assert!(ScalarValue::from("x").cast_to(&DataType::Int64).is_err());
    }
}
