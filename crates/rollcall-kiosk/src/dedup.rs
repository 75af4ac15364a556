use std::collections::HashSet;

/// Identities already logged during this run.
///
/// The set only grows. An identity is marked after the ledger confirmed the
/// write, so a failed write leaves it eligible for the next recognition.
#[derive(Debug, Default)]
pub struct SessionDedup {
    logged: HashSet<String>,
}

impl SessionDedup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_log(&self, identity: &str) -> bool {
        !identity.is_empty() && !self.logged.contains(identity)
    }

    /// Record `identity` as logged. Repeated marks are no-ops.
    pub fn mark_logged(&mut self, identity: &str) {
        if identity.is_empty() {
            return;
        }
        if !self.logged.contains(identity) {
            self.logged.insert(identity.to_string());
        }
    }

    /// Run `write` if `identity` still needs logging, marking it only when
    /// the write succeeds. Returns `Ok(None)` when the write was skipped.
    pub fn log_once<T, E>(
        &mut self,
        identity: &str,
        write: impl FnOnce() -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        if !self.should_log(identity) {
            return Ok(None);
        }
        let out = write()?;
        self.mark_logged(identity);
        Ok(Some(out))
    }

    pub fn len(&self) -> usize {
        self.logged.len()
    }
}
