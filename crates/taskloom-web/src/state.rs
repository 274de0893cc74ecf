//! Application state for the web server.
//!
//! The engine handle is already thread-safe and serializes writers
//! internally, so the state is just a cheap clone of it.

use taskloom_engine::ContextEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: ContextEngine,
}

impl AppState {
    pub fn new(engine: ContextEngine) -> Self {
        Self { engine }
    }
}
