//! Gates in front of protected views.
//!
//! Two layers, sharing one protected-prefix set so they cannot disagree:
//! the in-page guard (a projection of session state with a render latch)
//! and the coarser edge gate, which only checks that the token mirror side
//! channel holds a value.

use crate::session::SessionState;

/// Path prefixes that require a session, checked by both gates.
pub const PROTECTED_PREFIXES: &[&str] = &["/tasks", "/profile"];

/// What the in-page guard tells the view to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session not settled: show a neutral loading indicator, nothing else.
    Wait,
    /// Anonymous: go to the public landing, render nothing.
    Redirect,
    /// Authenticated: render the protected content.
    Render,
}

/// In-page guard over a protected view. The latch keeps protected content
/// from rendering in the gap between the state settling on Anonymous and
/// the redirect firing.
#[derive(Debug, Default)]
pub struct RouteGuard {
    may_render: bool,
}

impl RouteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current session state; returns what the view should do now.
    pub fn observe(&mut self, state: &SessionState) -> GuardDecision {
        match state {
            SessionState::Initializing => {
                self.may_render = false;
                GuardDecision::Wait
            }
            SessionState::Anonymous => {
                self.may_render = false;
                GuardDecision::Redirect
            }
            SessionState::Authenticated(_) => {
                self.may_render = true;
                GuardDecision::Render
            }
        }
    }

    /// True only after the guard has admitted rendering.
    pub fn may_render(&self) -> bool {
        self.may_render
    }
}

/// Edge-gate outcome for a requested path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDecision {
    /// Let the request through.
    Next,
    /// Protected path without a token: back to the public root.
    RedirectToRoot,
}

/// True when the path falls under a protected prefix.
pub fn is_protected_path(path: &str) -> bool {
    PROTECTED_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// The coarse gate in front of routing: protected paths require a token in
/// the mirror side channel; everything else passes. Independent of the
/// in-page guard and of whether the token is actually still valid.
pub fn edge_gate(path: &str, mirror_token: Option<&str>) -> EdgeDecision {
    if is_protected_path(path) && mirror_token.is_none() {
        EdgeDecision::RedirectToRoot
    } else {
        EdgeDecision::Next
    }
}
