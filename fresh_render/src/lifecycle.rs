//! Render context lifecycle state machine
//!
//! ```text
//! Uninitialized --initialize--> Initialized <--begin/end_frame--> Recording
//!        \                          |                               |
//!         `--------------------shutdown------------------------------'--> ShutDown
//! ```
//!
//! Every backend embeds a [`Lifecycle`] and asks it before acting, so a
//! rejected call never touches GPU state.

use crate::error::{Error, Result};

/// Lifecycle state of a render context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Created by the factory, `initialize` not called yet (or it failed)
    Uninitialized,
    /// Device and swapchain ready, between frames
    Initialized,
    /// Between `begin_frame` and `end_frame`
    Recording,
    /// Terminal, after `shutdown`
    ShutDown,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ContextState,
    source: &'static str,
}

impl Lifecycle {
    /// `source` is the log source used when a transition is rejected
    pub fn new(source: &'static str) -> Self {
        Self {
            state: ContextState::Uninitialized,
            source,
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, ContextState::Initialized | ContextState::Recording)
    }

    pub fn is_recording(&self) -> bool {
        self.state == ContextState::Recording
    }

    /// Check that `initialize` may run; does not change state
    pub fn begin_initialize(&self) -> Result<()> {
        match self.state {
            ContextState::Uninitialized => Ok(()),
            ContextState::ShutDown => {
                crate::engine_error!(self.source, "initialize called after shutdown");
                Err(Error::AlreadyInitialized)
            }
            _ => {
                crate::engine_error!(self.source, "initialize called twice without shutdown");
                Err(Error::AlreadyInitialized)
            }
        }
    }

    /// Record a successful `initialize`
    pub fn mark_initialized(&mut self) {
        if self.state == ContextState::Uninitialized {
            self.state = ContextState::Initialized;
        }
    }

    /// Check that a frame-level operation may run
    pub fn require_initialized(&self, operation: &str) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            crate::engine_warn!(self.source, "{} called while {:?}", operation, self.state);
            Err(Error::NotInitialized)
        }
    }

    /// Check that an operation rebuilding frame targets may run: initialized
    /// and between frames
    pub fn require_idle(&self, operation: &str) -> Result<()> {
        self.require_initialized(operation)?;
        if self.is_recording() {
            crate::engine_warn!(self.source, "{} called while a frame is being recorded", operation);
            return Err(Error::FrameInProgress);
        }
        Ok(())
    }

    /// Check that `begin_frame` may run; does not change state
    pub fn check_begin_frame(&self) -> Result<()> {
        match self.state {
            ContextState::Initialized => Ok(()),
            ContextState::Recording => {
                crate::engine_warn!(self.source, "begin_frame called while a frame is being recorded");
                Err(Error::FrameInProgress)
            }
            state => {
                crate::engine_warn!(self.source, "begin_frame called while {:?}", state);
                Err(Error::NotInitialized)
            }
        }
    }

    /// Enter Recording after a successful `begin_frame`
    pub fn begin_recording(&mut self) {
        if self.state == ContextState::Initialized {
            self.state = ContextState::Recording;
        }
    }

    /// Check that `end_frame` may run; does not change state
    pub fn check_end_frame(&self) -> Result<()> {
        if self.state == ContextState::Recording {
            Ok(())
        } else {
            crate::engine_warn!(self.source, "end_frame called while {:?}", self.state);
            Err(Error::NotInitialized)
        }
    }

    /// Leave Recording
    pub fn end_recording(&mut self) {
        if self.state == ContextState::Recording {
            self.state = ContextState::Initialized;
        }
    }

    /// Enter the terminal state; returns whether teardown is needed
    pub fn shut_down(&mut self) -> bool {
        let was_initialized = self.is_initialized();
        self.state = ContextState::ShutDown;
        was_initialized
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
