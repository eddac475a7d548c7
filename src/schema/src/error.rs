use std::fmt::Display;

#[derive(Debug)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub context: String,
}

impl FetchError {
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        if self.context.is_empty() {
            self.context = ctx;
        } else {
            // Prepend new context, innermost first.
            self.context = format!("{ctx}: {}", self.context);
        }
        self
    }
}

impl Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.context)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    InvalidArgument,
    SchemaError,
    UnsupportedComposite,
    NotFound,
    DatabaseError,
    ImplementationError,
}

impl FetchErrorKind {
    pub fn to_error(self) -> FetchError {
        FetchError {
            kind: self,
            context: String::new(),
        }
    }
}

#[macro_export]
macro_rules! fail {
    ($kind:expr) => {
        return Err($kind.to_error())
    };
    ($kind:expr, $($arg:tt)*) => {
        return Err($kind.to_error().with_context(format!($($arg)*)))
    };
}

#[macro_export]
macro_rules! ensure {
    ($cond:expr, $kind:expr) => {
        if !($cond) {
            $crate::fail!($kind)
        }
    };
    ($cond:expr, $kind:expr, $($arg:tt)*) => {
        if !($cond) {
            $crate::fail!($kind, $($arg)*)
        }
    };
}

pub type Result<T> = std::result::Result<T, FetchError>;

impl From<sqlx::Error> for FetchError {
    fn from(e: sqlx::Error) -> Self {
        FetchErrorKind::DatabaseError.to_error().with_context(e.to_string())
    }
}
