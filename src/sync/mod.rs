//! Session and profile synchronization
//!
//! [`Synchronizer`] owns the session token and the profile view. Every
//! state-changing operation is followed by a re-fetch, and only the server's
//! answer to that re-fetch replaces what presentation layers see.

mod state;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex, OwnedMutexGuard, RwLock};

use profile_sync_api::{
    ApiError, Credential, ImageKind, NewAccount, ProfileApi, ProfileFields, ProfileSnapshot,
    RemoteGalleryItem, Session,
};
use profile_sync_media::{
    BatchResult, CacheBuster, GalleryItem, ImageRef, LocalImage, UploadBatch, UploadPipeline,
};

use crate::config::ClientOptions;
use crate::error::{Error, Result};

pub use state::{Phase, ProfileView, SessionSnapshot};

/// Permission to run one state-changing operation
struct MutationTicket {
    epoch: u64,
    session: Session,
    _gate: OwnedMutexGuard<()>,
}

struct Inner {
    api: Arc<dyn ProfileApi>,
    pipeline: UploadPipeline,
    buster: Arc<CacheBuster>,
    state: watch::Sender<SessionSnapshot>,
    /// Held for the whole of a state-changing operation
    mutation: Arc<Mutex<()>>,
    /// Shared by reads, exclusive for mutations
    io: RwLock<()>,
}

/// The session state machine.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct Synchronizer {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Synchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synchronizer")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

impl Synchronizer {
    /// Create a signed-out synchronizer over `api`
    pub fn new(api: Arc<dyn ProfileApi>, options: &ClientOptions) -> Self {
        let buster = Arc::new(CacheBuster::with_param(options.cache_bust_param.clone()));
        let pipeline = UploadPipeline::new(api.clone(), buster.clone(), options.upload_options());
        let (state, _) = watch::channel(SessionSnapshot::signed_out(0));

        Self {
            inner: Arc::new(Inner {
                api,
                pipeline,
                buster,
                state,
                mutation: Arc::new(Mutex::new(())),
                io: RwLock::new(()),
            }),
        }
    }

    /// The current state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receive a new snapshot after every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.borrow().phase()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session().cloned()
    }

    pub fn view(&self) -> Option<Arc<ProfileView>> {
        self.inner.state.borrow().view().cloned()
    }

    /// Create an account on the server. Session state is not touched.
    pub async fn register(&self, account: &NewAccount) -> Result<()> {
        Ok(self.inner.api.register(account).await?)
    }

    /// Authenticate and load the profile of the returned user.
    ///
    /// Replaces any existing session. Fails with `Busy` while another sign-in
    /// or a mutation is in flight.
    pub async fn sign_in(&self, credential: Credential) -> Result<Arc<ProfileView>> {
        let epoch = self.inner.begin_sign_in()?;
        let inner = self.inner.clone();
        detached(async move { inner.complete_sign_in(epoch, credential).await })
            .await
            .map_err(|e| self.inner.abandon(epoch, Phase::SignedOut, e))
    }

    /// Update profile fields, then adopt the re-fetched profile
    pub async fn apply_mutation(&self, fields: ProfileFields) -> Result<Arc<ProfileView>> {
        let ticket = self.inner.begin_mutation()?;
        let epoch = ticket.epoch;
        let inner = self.inner.clone();
        detached(async move { inner.run_mutation(ticket, fields).await })
            .await
            .map_err(|e| self.inner.abandon(epoch, Phase::Authenticated, e))
    }

    /// Upload a profile photo or gallery images.
    ///
    /// Pre-flight rejections come back as `Error::Media`; otherwise the batch
    /// reports each item. A profile photo success re-fetches the profile;
    /// gallery successes are appended in selection order.
    pub async fn apply_photo_upload(
        &self,
        images: Vec<LocalImage>,
        kind: ImageKind,
    ) -> Result<UploadBatch> {
        let ticket = self.inner.begin_mutation()?;
        let epoch = ticket.epoch;
        let inner = self.inner.clone();
        detached(async move { inner.run_upload(ticket, images, kind).await })
            .await
            .map_err(|e| self.inner.abandon(epoch, Phase::Authenticated, e))
    }

    /// Delete a gallery item, then adopt the re-listed gallery
    pub async fn delete_gallery_item(&self, item_id: &str) -> Result<Arc<ProfileView>> {
        let ticket = self.inner.begin_mutation()?;
        let epoch = ticket.epoch;
        let inner = self.inner.clone();
        let item_id = item_id.to_string();
        detached(async move { inner.run_gallery_delete(ticket, item_id).await })
            .await
            .map_err(|e| self.inner.abandon(epoch, Phase::Authenticated, e))
    }

    /// Re-read the profile without changing anything on the server
    pub async fn refresh_profile(&self) -> Result<Arc<ProfileView>> {
        let (epoch, session) = self.inner.current_session()?;
        let _io = self.inner.io.read().await;
        self.inner.ensure_current(epoch)?;

        match self.inner.api.fetch_profile_by_token(&session.token).await {
            Ok(profile) => self.inner.install_profile(epoch, profile, None, false),
            Err(e) => Err(self.inner.fail_read(epoch, e)),
        }
    }

    /// Load the photo gallery
    pub async fn load_gallery(&self) -> Result<Arc<ProfileView>> {
        let (epoch, session) = self.inner.current_session()?;
        let _io = self.inner.io.read().await;
        self.inner.ensure_current(epoch)?;

        match self.inner.api.list_gallery(&session.token).await {
            Ok(items) => self.inner.install_gallery(epoch, items, false),
            Err(e) => Err(self.inner.fail_read(epoch, e)),
        }
    }

    /// Forget the session. Does nothing when already signed out.
    pub fn sign_out(&self) {
        let changed = self.inner.state.send_if_modified(|s| {
            if s.phase() == Phase::SignedOut {
                return false;
            }
            s.reset();
            true
        });
        if changed {
            log::info!("Signed out");
        }
    }

    /// Sign out and delete the account on the server.
    ///
    /// Local state is cleared before the request; its outcome is only reported.
    pub async fn delete_account(&self) -> Result<()> {
        let mut taken = None;
        self.inner.state.send_if_modified(|s| match s.take_session() {
            Some(session) => {
                s.reset();
                taken = Some(session);
                true
            }
            None => false,
        });
        let session = taken.ok_or(Error::NotSignedIn)?;
        log::info!("Signed out, deleting account {}", session.user_id);

        let api = self.inner.api.clone();
        detached(async move {
            api.delete_account(&session.token, &session.user_id)
                .await
                .map_err(Error::from)
        })
        .await
    }
}

impl Inner {
    fn begin_sign_in(&self) -> Result<u64> {
        let mut outcome = Err(Error::Busy);
        self.state.send_if_modified(|s| match s.phase() {
            Phase::Authenticating | Phase::Mutating => false,
            Phase::SignedOut | Phase::Authenticated => {
                outcome = Ok(s.begin_authenticating());
                log::debug!("Authenticating");
                true
            }
        });
        outcome
    }

    async fn complete_sign_in(&self, epoch: u64, credential: Credential) -> Result<Arc<ProfileView>> {
        let result = async {
            let session = self.api.authenticate(&credential).await?;
            let profile = self.api.fetch_profile(&session.token, &session.user_id).await?;
            Ok::<_, ApiError>((session, profile))
        }
        .await;

        let (session, profile) = match result {
            Ok(pair) => pair,
            Err(e) => {
                self.commit(epoch, |s| s.set_phase(Phase::SignedOut));
                log::debug!("Sign-in failed: {}", e);
                return Err(e.into());
            }
        };

        let photo = self.photo_ref(&profile, None, None);
        let view = Arc::new(ProfileView {
            profile,
            photo,
            gallery: Vec::new(),
        });

        let user_id = session.user_id.clone();
        let installed = view.clone();
        if self.commit(epoch, move |s| s.authenticated(session, installed)) {
            log::info!("Signed in as {}", user_id);
            Ok(view)
        } else {
            log::warn!("Discarding sign-in result for a superseded session");
            Err(Error::NotSignedIn)
        }
    }

    fn begin_mutation(&self) -> Result<MutationTicket> {
        let gate = self
            .mutation
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::Busy)?;

        let mut outcome = Err(Error::NotSignedIn);
        self.state.send_if_modified(|s| match (s.phase(), s.session().cloned()) {
            (Phase::Authenticated, Some(session)) => {
                s.set_phase(Phase::Mutating);
                outcome = Ok((s.epoch, session));
                true
            }
            (Phase::Authenticating | Phase::Mutating, _) => {
                outcome = Err(Error::Busy);
                false
            }
            _ => false,
        });

        let (epoch, session) = outcome?;
        log::debug!("Mutation started for {}", session.user_id);
        Ok(MutationTicket {
            epoch,
            session,
            _gate: gate,
        })
    }

    async fn run_mutation(&self, ticket: MutationTicket, fields: ProfileFields) -> Result<Arc<ProfileView>> {
        let _io = self.io.write().await;
        self.ensure_current(ticket.epoch)?;
        let session = &ticket.session;

        let result = async {
            let echoed = self
                .api
                .mutate_profile(&session.token, &session.user_id, &fields)
                .await?;
            let confirmed = self.api.fetch_profile_by_token(&session.token).await?;
            if echoed.is_some_and(|echo| echo != confirmed) {
                log::debug!("Server stored a different profile than it echoed; using the re-fetch");
            }
            Ok::<_, ApiError>(confirmed)
        }
        .await;

        match result {
            Ok(profile) => self.install_profile(ticket.epoch, profile, None, true),
            Err(e) => Err(self.fail_mutation(ticket.epoch, e.into())),
        }
    }

    async fn run_upload(
        &self,
        ticket: MutationTicket,
        images: Vec<LocalImage>,
        kind: ImageKind,
    ) -> Result<UploadBatch> {
        let _io = self.io.write().await;
        self.ensure_current(ticket.epoch)?;
        let session = &ticket.session;

        let batch = match self
            .pipeline
            .run(&session.token, &session.user_id, &images, kind)
            .await
        {
            Ok(batch) => batch,
            Err(e) => return Err(self.fail_mutation(ticket.epoch, e.into())),
        };

        if batch.is_unauthorized() {
            return Err(self.fail_mutation(ticket.epoch, ApiError::Unauthorized.into()));
        }

        match kind {
            ImageKind::GalleryItem => {
                let added = batch.gallery_items();
                let applied = self.commit(ticket.epoch, |s| {
                    if let Some(view) = s.view() {
                        let mut next = ProfileView::clone(view);
                        next.gallery.extend(added);
                        s.set_view(Arc::new(next));
                    }
                    s.set_phase(Phase::Authenticated);
                });
                if !applied {
                    log::warn!("Discarding upload result for a superseded session");
                    return Err(Error::NotSignedIn);
                }
                Ok(batch)
            }
            ImageKind::ProfilePhoto if batch.result() == BatchResult::AllFailed => {
                if !self.commit(ticket.epoch, |s| s.set_phase(Phase::Authenticated)) {
                    return Err(Error::NotSignedIn);
                }
                Ok(batch)
            }
            ImageKind::ProfilePhoto => match self.api.fetch_profile_by_token(&session.token).await {
                Ok(profile) => {
                    let uploaded = batch.succeeded().next().cloned();
                    self.install_profile(ticket.epoch, profile, uploaded, true)?;
                    Ok(batch)
                }
                Err(e) => Err(self.fail_mutation(ticket.epoch, e.into())),
            },
        }
    }

    async fn run_gallery_delete(&self, ticket: MutationTicket, item_id: String) -> Result<Arc<ProfileView>> {
        let _io = self.io.write().await;
        self.ensure_current(ticket.epoch)?;
        let token = &ticket.session.token;

        let result = async {
            self.api.delete_gallery_item(token, &item_id).await?;
            self.api.list_gallery(token).await
        }
        .await;

        match result {
            Ok(items) => self.install_gallery(ticket.epoch, items, true),
            Err(e) => Err(self.fail_mutation(ticket.epoch, e.into())),
        }
    }

    fn current_session(&self) -> Result<(u64, Session)> {
        let state = self.state.borrow();
        match state.session() {
            Some(session) => Ok((state.epoch, session.clone())),
            None => Err(Error::NotSignedIn),
        }
    }

    fn ensure_current(&self, epoch: u64) -> Result<()> {
        if self.state.borrow().epoch == epoch {
            Ok(())
        } else {
            Err(Error::NotSignedIn)
        }
    }

    /// Apply `update` only if the session it was started under is still current
    fn commit(&self, epoch: u64, update: impl FnOnce(&mut SessionSnapshot)) -> bool {
        self.state.send_if_modified(|s| {
            if s.epoch != epoch {
                return false;
            }
            update(s);
            true
        })
    }

    /// Pick the photo reference for a freshly fetched profile.
    ///
    /// `uploaded` is the reference stamped for a photo just stored. Without
    /// one, an unchanged URL keeps its previous reference.
    fn photo_ref(
        &self,
        profile: &ProfileSnapshot,
        previous: Option<&ImageRef>,
        uploaded: Option<ImageRef>,
    ) -> Option<ImageRef> {
        let url = profile.profile_photo.as_deref()?;
        match (uploaded, previous) {
            (Some(fresh), _) if fresh.remote_url() == url => Some(fresh),
            (None, Some(prev)) if prev.remote_url() == url => Some(prev.clone()),
            _ => Some(self.buster.refresh(url, &profile.id)),
        }
    }

    fn install_profile(
        &self,
        epoch: u64,
        profile: ProfileSnapshot,
        uploaded: Option<ImageRef>,
        ends_mutation: bool,
    ) -> Result<Arc<ProfileView>> {
        let mut installed = None;
        self.commit(epoch, |s| {
            let previous = s.view().cloned();
            let photo = self.photo_ref(
                &profile,
                previous.as_ref().and_then(|v| v.photo.as_ref()),
                uploaded,
            );
            let view = Arc::new(ProfileView {
                profile,
                photo,
                gallery: previous.map(|v| v.gallery.clone()).unwrap_or_default(),
            });
            s.set_view(view.clone());
            if ends_mutation {
                s.set_phase(Phase::Authenticated);
            }
            installed = Some(view);
        });

        installed.ok_or_else(|| {
            log::warn!("Discarding profile for a superseded session");
            Error::NotSignedIn
        })
    }

    fn install_gallery(
        &self,
        epoch: u64,
        items: Vec<RemoteGalleryItem>,
        ends_mutation: bool,
    ) -> Result<Arc<ProfileView>> {
        let mut installed = None;
        self.commit(epoch, |s| {
            if let Some(view) = s.view().cloned() {
                let known: HashMap<&str, &GalleryItem> =
                    view.gallery.iter().map(|g| (g.id.as_str(), g)).collect();

                let gallery = items
                    .into_iter()
                    .map(|remote| match known.get(remote.id.as_str()) {
                        Some(existing) if existing.image.remote_url() == remote.image_url => {
                            GalleryItem::clone(existing)
                        }
                        _ => GalleryItem {
                            image: self.buster.refresh(&remote.image_url, &view.profile.id),
                            id: remote.id,
                        },
                    })
                    .collect();

                let next = Arc::new(ProfileView {
                    gallery,
                    ..ProfileView::clone(&view)
                });
                s.set_view(next.clone());
                installed = Some(next);
            }
            if ends_mutation {
                s.set_phase(Phase::Authenticated);
            }
        });

        installed.ok_or_else(|| {
            log::warn!("Discarding gallery for a superseded session");
            Error::NotSignedIn
        })
    }

    /// Settle a failed mutation: `Unauthorized` signs out, anything else
    /// restores `Authenticated` with the prior view.
    fn fail_mutation(&self, epoch: u64, err: Error) -> Error {
        if err.is_unauthorized() {
            self.force_sign_out(epoch);
        } else {
            self.commit(epoch, |s| s.set_phase(Phase::Authenticated));
        }
        err
    }

    fn fail_read(&self, epoch: u64, err: ApiError) -> Error {
        if err.is_unauthorized() {
            self.force_sign_out(epoch);
        }
        err.into()
    }

    /// Settle the phase when a spawned operation ended without committing
    /// anything. Other errors were already settled by the operation itself.
    fn abandon(&self, epoch: u64, phase: Phase, err: Error) -> Error {
        if let Error::Task(reason) = &err {
            let settled = self.commit(epoch, |s| {
                if matches!(s.phase(), Phase::Authenticating | Phase::Mutating) {
                    s.set_phase(phase);
                }
            });
            if settled {
                log::warn!("Operation ended without a result ({}), now {:?}", reason, phase);
            }
        }
        err
    }

    fn force_sign_out(&self, epoch: u64) {
        if self.commit(epoch, |s| s.reset()) {
            log::warn!("Session rejected by the server, signed out");
        }
    }
}

/// Run `operation` on its own task so it finishes even if the caller stops
/// waiting; results are still only committed for the current session.
async fn detached<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| Error::Task(e.to_string()))?
}
