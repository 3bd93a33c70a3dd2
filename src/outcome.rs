use crate::error::TaskError;

/// How a task ended: the value it produced, or the failure it surfaced.
///
/// An `Outcome` is immutable once assigned; dependents receive clones of the
/// same value, and the failure side is a shared [`TaskError`] so one fault
/// can short-circuit an entire line of work verbatim.
#[derive(Debug, Clone)]
pub enum Outcome<S> {
    Success(S),
    Failure(TaskError),
}

impl<S> Outcome<S> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// The success value, if any.
    pub fn success(&self) -> Option<&S> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// The failure, if any.
    pub fn failure(&self) -> Option<&TaskError> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(error) => Some(error),
        }
    }

    /// Maps the success value, leaving a failure untouched.
    pub fn map<R>(self, f: impl FnOnce(S) -> R) -> Outcome<R> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(error) => Outcome::Failure(error),
        }
    }

    pub fn into_result(self) -> Result<S, TaskError> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(error) => Err(error),
        }
    }
}

impl<S, E> From<Result<S, E>> for Outcome<S>
where
    E: Into<anyhow::Error>,
{
    fn from(result: Result<S, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(TaskError::new(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let ok: Outcome<i32> = Outcome::Success(7);
        assert!(ok.is_success());
        assert_eq!(ok.success(), Some(&7));
        assert!(ok.failure().is_none());

        let err: Outcome<i32> = Outcome::Failure(TaskError::new(anyhow::anyhow!("nope")));
        assert!(err.is_failure());
        assert!(err.success().is_none());
        assert_eq!(err.failure().unwrap().to_string(), "nope");
    }

    #[test]
    fn test_map_passes_failure_through() {
        let err: Outcome<i32> = Outcome::Failure(TaskError::new(anyhow::anyhow!("nope")));
        let mapped = err.map(|v| v * 2);
        assert_eq!(mapped.failure().unwrap().to_string(), "nope");

        let ok = Outcome::Success(3).map(|v| v * 2);
        assert_eq!(ok.success(), Some(&6));
    }

    #[test]
    fn test_from_result() {
        let ok: Outcome<&str> = Ok::<_, std::io::Error>("done").into();
        assert_eq!(ok.success(), Some(&"done"));

        let err: Outcome<&str> = Err::<&str, _>(std::io::Error::other("io")).into();
        assert_eq!(err.into_result().unwrap_err().to_string(), "io");
    }
}
