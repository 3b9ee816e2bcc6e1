use crate::platform::SharedPtr;
use std::{error::Error, fmt};

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Clone)]
pub enum StreamError {
    /// The stream was ended and can no longer accept writes.
    Ended,
    Other(SharedPtr<dyn Error>),
}

impl StreamError {
    /// Wrap any error type into `StreamError`
    pub fn other<E>(e: E) -> Self
    where
        E: Error + 'static,
    {
        StreamError::Other(SharedPtr::new(e))
    }

    /// Wrap a boxed error
    pub fn other_boxed(e: Box<dyn Error>) -> Self {
        StreamError::Other(e.into())
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, StreamError::Ended)
    }
}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        #[derive(Debug)]
        struct SimpleError(String);
        impl fmt::Display for SimpleError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
        impl Error for SimpleError {}
        StreamError::Other(SharedPtr::new(SimpleError(s.to_string())))
    }
}

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::from(s.as_str())
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Other(SharedPtr::new(e))
    }
}

impl From<Box<dyn Error>> for StreamError {
    fn from(e: Box<dyn Error>) -> Self {
        StreamError::Other(e.into())
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Ended => write!(f, "Stream has ended"),
            StreamError::Other(err) => write!(f, "{}", err),
        }
    }
}

impl Error for StreamError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StreamError::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_work() {
        let _: StreamError = "error message".into();
        let _: StreamError = String::from("error").into();

        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "io error");
        let _: StreamError = io_err.into();

        #[derive(Debug)]
        struct CustomError;
        impl fmt::Display for CustomError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "custom error")
            }
        }
        impl Error for CustomError {}

        let _: StreamError = StreamError::other(CustomError);
    }

    #[test]
    fn question_mark_works() -> Result<(), Box<dyn Error>> {
        fn returns_stream_error() -> Result<(), StreamError> {
            Err("stream error".into())
        }

        assert!(returns_stream_error().is_err());
        Ok(())
    }

    #[test]
    fn ended_is_distinguishable() {
        assert!(StreamError::Ended.is_ended());
        assert!(!StreamError::from("boom").is_ended());
        assert_eq!(StreamError::Ended.to_string(), "Stream has ended");
    }
}
