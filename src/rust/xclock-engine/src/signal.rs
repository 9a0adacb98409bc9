// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// One-shot latch raised by a single writer and awaited by any number of readers.
#[derive(Debug, Default)]
pub struct Signal {
    raised: Mutex<bool>,
    condvar: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        let mut raised = self.raised.lock();
        if !*raised {
            *raised = true;
            self.condvar.notify_all();
        }
    }

    pub fn is_raised(&self) -> bool {
        *self.raised.lock()
    }

    /// Wait until raised. Returns `false` if `timeout` elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut raised = self.raised.lock();
        if !*raised {
            self.condvar
                .wait_while_for(&mut raised, |raised| !*raised, timeout);
        }
        *raised
    }
}
