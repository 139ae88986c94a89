/// Human-readable trail of a decision.
///
/// Errors are always reported. Informational reasons are only kept when requested with
/// [`DecideOption::IncludeReasons`](crate::DecideOption::IncludeReasons), but are logged either
/// way. Reasons never influence the decision itself.
#[derive(Debug, Default, Clone)]
pub struct DecisionReasons {
    include_infos: bool,
    errors: Vec<String>,
    infos: Vec<String>,
}

impl DecisionReasons {
    pub fn new(include_infos: bool) -> Self {
        DecisionReasons {
            include_infos,
            ..Default::default()
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!(target: "optimizely", "{message}");
        self.errors.push(message);
    }

    pub fn add_info(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::debug!(target: "optimizely", "{message}");
        if self.include_infos {
            self.infos.push(message);
        }
    }

    /// Errors followed by informational reasons.
    pub fn into_vec(self) -> Vec<String> {
        let mut reasons = self.errors;
        reasons.extend(self.infos);
        reasons
    }
}
