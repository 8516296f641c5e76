//! Which area of the app a session state routes to.

use crate::auth::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    /// Initial storage read still pending; no routing decision yet
    Splash,
    Guest,
    Authenticated,
}

impl Area {
    pub fn from_state(state: &SessionState) -> Self {
        if state.is_loading() {
            Area::Splash
        } else if state.token().is_some() {
            Area::Authenticated
        } else {
            Area::Guest
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Area::Splash => "loading",
            Area::Guest => "signed out",
            Area::Authenticated => "signed in",
        }
    }
}
