//! Which session, if any, currently backs the visible UI surface.
//!
//! One context is shared by every session of an application and passed in
//! explicitly; nothing here is global.

use std::sync::Mutex;

use crate::listeners::lock;

#[derive(Debug, Default)]
pub struct ForegroundContext {
    current: Mutex<Option<String>>,
}

impl ForegroundContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&self, session_id: &str) {
        *lock(&self.current) = Some(session_id.to_string());
    }

    /// Clear the current session if it is `session_id`.
    pub fn clear_if(&self, session_id: &str) -> bool {
        let mut current = lock(&self.current);
        if current.as_deref() == Some(session_id) {
            *current = None;
            true
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<String> {
        lock(&self.current).clone()
    }

    pub fn is_current(&self, session_id: &str) -> bool {
        lock(&self.current).as_deref() == Some(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_only_affects_matching_session() {
        let ctx = ForegroundContext::new();
        ctx.set_current("a");
        assert!(!ctx.clear_if("b"));
        assert!(ctx.is_current("a"));
        assert!(ctx.clear_if("a"));
        assert_eq!(ctx.current(), None);
    }

    #[test]
    fn later_session_takes_over() {
        let ctx = ForegroundContext::new();
        ctx.set_current("a");
        ctx.set_current("b");
        assert!(!ctx.is_current("a"));
        assert_eq!(ctx.current().as_deref(), Some("b"));
    }
}
