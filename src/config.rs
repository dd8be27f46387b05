use crate::Context;

/// What happens when a settled (or locked-in) promise is settled again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SettlePolicy {
    /// Promise/A+ behaviour: the call is a no-op and reports success.
    #[default]
    Ignore,
    /// The call is still a no-op but returns
    /// [`Error::AlreadySettled`](crate::Error::AlreadySettled).
    Report,
}

/// Per-promise configuration, inherited by every promise chained from it.
///
/// # Examples
///
/// ```
/// use promise_aplus::{Config, Context, Error, Resolver, SettlePolicy};
/// let config = Config::new()
///     .with_default_context(Context::spawn())
///     .with_settle_policy(SettlePolicy::Report);
/// let (resolver, _promise) = Resolver::<i32, Error>::with_config(config, None);
/// resolver.fulfill(1).unwrap();
/// assert_eq!(resolver.fulfill(2), Err(Error::AlreadySettled));
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    default_context: Context,
    settle_policy: SettlePolicy,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context used by `then` and friends when the caller passes none.
    pub fn with_default_context(mut self, context: Context) -> Self {
        self.default_context = context;
        self
    }

    pub fn with_settle_policy(mut self, policy: SettlePolicy) -> Self {
        self.settle_policy = policy;
        self
    }

    pub fn default_context(&self) -> &Context {
        &self.default_context
    }

    pub fn settle_policy(&self) -> SettlePolicy {
        self.settle_policy
    }
}

impl Default for Config {
    /// Handlers run on [`Context::main`]; double settlement is ignored.
    fn default() -> Self {
        Self {
            default_context: Context::main(),
            settle_policy: SettlePolicy::default(),
        }
    }
}
