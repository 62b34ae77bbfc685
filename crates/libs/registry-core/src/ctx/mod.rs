//! Request context passed through to every BMC method.
//!
//! [`Ctx`] identifies who is driving a model-layer call — a token principal,
//! a UI session user, or the system itself (background jobs, sync engine).
//! It carries no authorization logic; it exists so audit-relevant writes can
//! be attributed without threading an extra parameter through every call.

/// Who is making this model-layer call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    /// A background job, the sync engine, or process startup.
    System,
    /// An authenticated token (the `id` column of `tokens`).
    Token(String),
    /// An authenticated UI session user.
    Session(String),
}

/// Request-scoped context.
///
/// # Examples
///
/// ```
/// use registry_core::ctx::Ctx;
///
/// let ctx = Ctx::system();
/// assert!(ctx.principal_id().is_none());
/// ```
#[derive(Clone, Debug)]
pub struct Ctx {
    principal: Principal,
}

impl Ctx {
    /// Context for system-driven operations: migrations, the sync engine,
    /// and job-processor handlers that have no per-request caller.
    pub fn system() -> Self {
        Ctx {
            principal: Principal::System,
        }
    }

    /// Context for a request authenticated via a bearer token.
    pub fn for_token(token_id: impl Into<String>) -> Self {
        Ctx {
            principal: Principal::Token(token_id.into()),
        }
    }

    /// Context for a request authenticated via a UI session.
    pub fn for_session(user_id: impl Into<String>) -> Self {
        Ctx {
            principal: Principal::Session(user_id.into()),
        }
    }

    /// The underlying principal.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The principal's identifier, or `None` for [`Principal::System`].
    pub fn principal_id(&self) -> Option<&str> {
        match &self.principal {
            Principal::System => None,
            Principal::Token(id) | Principal::Session(id) => Some(id.as_str()),
        }
    }
}
