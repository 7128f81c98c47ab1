use crate::error::{MemDbError, MemDbResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Boolean,
    Int64,
    Float64,
    Varchar(Option<usize>),
}

impl DataType {
    /// Varchar lengths are advisory, so `Varchar(Some(10))` and `Varchar(None)` match.
    pub fn same_kind(&self, other: &DataType) -> bool {
        matches!(
            (self, other),
            (DataType::Boolean, DataType::Boolean)
                | (DataType::Int64, DataType::Int64)
                | (DataType::Float64, DataType::Float64)
                | (DataType::Varchar(_), DataType::Varchar(_))
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int64 | DataType::Float64)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DataType::Boolean | DataType::Int64 | DataType::Float64 => write!(f, "{self:?}"),
            DataType::Varchar(len_opt) => {
                if let Some(len) = len_opt {
                    write!(f, "Varchar({len})")
                } else {
                    write!(f, "Varchar")
                }
            }
        }
    }
}

impl TryFrom<&str> for DataType {
    type Error = MemDbError;

    fn try_from(value: &str) -> MemDbResult<Self> {
        let lower = value.trim().to_ascii_lowercase();
        match lower.as_str() {
            "bool" | "boolean" => Ok(DataType::Boolean),
            "int" | "integer" | "bigint" | "int64" => Ok(DataType::Int64),
            "float" | "double" | "real" | "float64" => Ok(DataType::Float64),
            "text" | "varchar" | "string" => Ok(DataType::Varchar(None)),
            other => {
                if let Some(len) = other
                    .strip_prefix("varchar(")
                    .and_then(|rest| rest.strip_suffix(')'))
                {
                    let len = len.trim().parse::<usize>().map_err(|_| {
                        MemDbError::Plan(format!("Invalid varchar length in \"{value}\""))
                    })?;
                    return Ok(DataType::Varchar(Some(len)));
                }
                Err(MemDbError::NotSupport(format!("Unknown data type \"{value}\"")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::catalog::DataType;

    #[test]
    fn parse_data_type() {
        assert_eq!(DataType::try_from("INT").unwrap(), DataType::Int64);
        assert_eq!(
            DataType::try_from("varchar(100)").unwrap(),
            DataType::Varchar(Some(100))
        );
        assert!(DataType::try_from("blob").is_err());
    }
}
