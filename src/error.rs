use thiserror::Error;

/// 引擎统一结果类型
pub type EngineResult<T> = Result<T, EngineError>;

/// 计价引擎错误
///
/// `NotFound` / `InvalidInput` 只终止当前行，批量计算会把它们降级为行级错误；
/// `Database` 只出现在持久化边界。
#[derive(Error, Debug)]
pub enum EngineError {
    /// 技术卡片、版本、估算单、费用容器或链接不存在
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// 数量非正、十进制格式错误等
    #[error("Invalid input for '{field}': {value} - {reason}")]
    InvalidInput {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_input(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::InvalidInput {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// 是否可以记为单行错误而不中断批量
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            EngineError::NotFound { .. } | EngineError::InvalidInput { .. }
        )
    }

    /// 供接口层使用的稳定错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::InvalidInput { .. } => "INVALID_INPUT",
            EngineError::Database(_) => "DATABASE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::not_found("card", 7).error_code(), "NOT_FOUND");
        assert_eq!(
            EngineError::invalid_input("quantity", "0", "must be positive").error_code(),
            "INVALID_INPUT"
        );
    }

    #[test]
    fn test_row_level_classification() {
        assert!(EngineError::not_found("card", 1).is_row_level());
        assert!(EngineError::invalid_input("quantity", "-1", "negative").is_row_level());
        assert!(!EngineError::Database(sqlx::Error::PoolTimedOut).is_row_level());
    }

    #[test]
    fn test_not_found_message() {
        let err = EngineError::not_found("technical card", 42);
        assert_eq!(err.to_string(), "technical card 42 not found");
    }
}
