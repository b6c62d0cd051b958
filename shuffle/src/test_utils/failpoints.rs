use fail::FailScenario;

/// Fail point actions that stay active until the scenario is dropped.
///
/// The underlying [`FailScenario`] serializes tests using fail points and clears every action
/// when it goes away.
pub struct ShuffleFailScenario<'a> {
    _scenario: FailScenario<'a>,
}

impl ShuffleFailScenario<'_> {
    /// Applies each `(fail point, action)` pair, for example
    /// `(PUSH_DATA_BEFORE_SEND, "1*return(io)")`.
    ///
    /// # Panics
    ///
    /// Panics if an action does not parse.
    pub fn setup(actions: &[(&str, &str)]) -> Self {
        let scenario = FailScenario::setup();

        for (name, action) in actions {
            if let Err(err) = fail::cfg(*name, action) {
                panic!("invalid action `{action}` for fail point `{name}`: {err}");
            }
        }

        Self {
            _scenario: scenario,
        }
    }
}
