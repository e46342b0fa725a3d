/// Execution context of the client. Server-rendered contexts must skip
/// teardown's client-only effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMode {
    #[default]
    Client,
    Server,
}

/// Zero-argument action run when authentication cannot be recovered:
/// clearing persisted credentials, redirecting to a login surface, and so on.
pub trait SessionTeardown: Send + Sync {
    fn invoke(&self);
}

impl<F> SessionTeardown for F
where
    F: Fn() + Send + Sync,
{
    fn invoke(&self) {
        self()
    }
}
