//! Named post-effects that fail independently.

use custodia_types::Result;

/// How one effect ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectReport {
    pub name: &'static str,
    /// `None` on success, the error text otherwise.
    pub error: Option<String>,
}

impl EffectReport {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

type Effect<'a> = Box<dyn FnOnce() -> Result<()> + 'a>;

/// Ordered list of effects run after a primary mutation.
///
/// Every effect runs, in order, regardless of earlier failures.
#[derive(Default)]
pub struct EffectList<'a> {
    effects: Vec<(&'static str, Effect<'a>)>,
}

impl<'a> EffectList<'a> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            effects: Vec::new(),
        }
    }

    #[must_use]
    pub fn then(mut self, name: &'static str, effect: impl FnOnce() -> Result<()> + 'a) -> Self {
        self.effects.push((name, Box::new(effect)));
        self
    }

    /// Run all effects. `context` is attached to failure logs.
    pub fn run(self, context: &str) -> Vec<EffectReport> {
        self.effects
            .into_iter()
            .map(|(name, effect)| match effect() {
                Ok(()) => EffectReport { name, error: None },
                Err(err) => {
                    tracing::warn!(effect = name, context, code = err.code(), error = %err, "Post-effect failed");
                    EffectReport {
                        name,
                        error: Some(err.to_string()),
                    }
                }
            })
            .collect()
    }
}

/// Names of the effects that failed.
#[must_use]
pub fn failed(reports: &[EffectReport]) -> Vec<&'static str> {
    reports
        .iter()
        .filter(|r| !r.succeeded())
        .map(|r| r.name)
        .collect()
}
