//! Condvar-based core parking
//!
//! Used on platforms without futex support.

use super::Parker;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

pub struct CondvarParker {
    /// Wake token
    token: Mutex<bool>,
    condvar: Condvar,
}

impl CondvarParker {
    pub fn new() -> Self {
        Self {
            token: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }
}

impl Default for CondvarParker {
    fn default() -> Self {
        Self::new()
    }
}

impl Parker for CondvarParker {
    fn park(&self, timeout: Option<Duration>) -> bool {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        if !*token {
            token = match timeout {
                Some(t) => {
                    self.condvar
                        .wait_timeout(token, t)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self.condvar.wait(token).unwrap_or_else(PoisonError::into_inner),
            };
        }
        std::mem::replace(&mut *token, false)
    }

    fn unpark(&self) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.condvar.notify_one();
    }
}
