//! Local and remote typing flags. Timers live outside this type: every update
//! that needs one hands back a generation number, and a timer firing with a
//! stale generation is ignored.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalUpdate {
    /// `Some(true)` for `typing:start`, `Some(false)` for `typing:stop`.
    pub emit: Option<bool>,
    pub arm_timer: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteUpdate {
    pub changed: bool,
    pub arm_timer: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct TypingController {
    is_typing: bool,
    other_typing: bool,
    local_generation: u64,
    remote_generation: u64,
}

impl TypingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    pub fn other_typing(&self) -> bool {
        self.other_typing
    }

    pub fn on_input_changed(&mut self, content: &str) -> LocalUpdate {
        self.set_local(!content.trim().is_empty())
    }

    /// Keystroke-equivalent entry point: `true` behaves like non-empty input.
    pub fn set_local(&mut self, active: bool) -> LocalUpdate {
        self.local_generation += 1;
        if active {
            let emit = (!self.is_typing).then_some(true);
            self.is_typing = true;
            LocalUpdate {
                emit,
                arm_timer: Some(self.local_generation),
            }
        } else {
            let emit = self.is_typing.then_some(false);
            self.is_typing = false;
            LocalUpdate {
                emit,
                arm_timer: None,
            }
        }
    }

    /// Stop countdown expired. Returns `true` when `typing:stop` must be sent.
    pub fn on_local_timer(&mut self, generation: u64) -> bool {
        if generation != self.local_generation || !self.is_typing {
            return false;
        }
        self.is_typing = false;
        true
    }

    pub fn on_remote(&mut self, is_typing: bool) -> RemoteUpdate {
        self.remote_generation += 1;
        let changed = self.other_typing != is_typing;
        self.other_typing = is_typing;
        RemoteUpdate {
            changed,
            arm_timer: is_typing.then_some(self.remote_generation),
        }
    }

    /// Expiry for a lost remote `typing:stop`.
    pub fn on_remote_timeout(&mut self, generation: u64) -> bool {
        if generation != self.remote_generation || !self.other_typing {
            return false;
        }
        self.other_typing = false;
        true
    }

    /// The peer's message landed, so they are no longer composing it.
    pub fn clear_remote(&mut self) -> bool {
        self.remote_generation += 1;
        std::mem::replace(&mut self.other_typing, false)
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
