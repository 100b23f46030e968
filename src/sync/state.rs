//! Observable session state

use serde::Serialize;
use std::sync::Arc;

use profile_sync_api::{ProfileSnapshot, Session};
use profile_sync_media::{GalleryItem, ImageRef};

/// Where the synchronizer is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    SignedOut,
    Authenticating,
    Authenticated,
    /// Authenticated with a state-changing operation in flight
    Mutating,
}

/// Immutable, server-confirmed view of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileView {
    pub profile: ProfileSnapshot,
    /// Cache-busted reference to `profile.profile_photo`
    pub photo: Option<ImageRef>,
    pub gallery: Vec<GalleryItem>,
}

/// What presentation layers observe
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    phase: Phase,
    session: Option<Session>,
    view: Option<Arc<ProfileView>>,
    pub(crate) epoch: u64,
}

impl SessionSnapshot {
    pub(crate) fn signed_out(epoch: u64) -> Self {
        Self {
            phase: Phase::SignedOut,
            session: None,
            view: None,
            epoch,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn view(&self) -> Option<&Arc<ProfileView>> {
        self.view.as_ref()
    }

    pub fn profile(&self) -> Option<&ProfileSnapshot> {
        self.view.as_ref().map(|v| &v.profile)
    }

    pub fn is_signed_in(&self) -> bool {
        self.session.is_some()
    }

    /// Drop the session and start a new epoch
    pub(crate) fn reset(&mut self) {
        *self = Self::signed_out(self.epoch + 1);
    }

    pub(crate) fn begin_authenticating(&mut self) -> u64 {
        self.reset();
        self.phase = Phase::Authenticating;
        self.epoch
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn authenticated(&mut self, session: Session, view: Arc<ProfileView>) {
        self.phase = Phase::Authenticated;
        self.session = Some(session);
        self.view = Some(view);
    }

    pub(crate) fn set_view(&mut self, view: Arc<ProfileView>) {
        self.view = Some(view);
    }

    pub(crate) fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }
}
