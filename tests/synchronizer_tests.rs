use async_trait::async_trait;
use profile_sync::api::{RemoteGalleryItem, UploadedImage};
use profile_sync::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JPEG_HEADER: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xE0];
const PHOTO_URL: &str = "https://cdn.example.com/user-1.jpg";

fn jpeg(name: &str, len: usize) -> LocalImage {
    let mut bytes = JPEG_HEADER.to_vec();
    bytes.resize(len.max(JPEG_HEADER.len()), 0);
    LocalImage::new(name, "image/jpeg", bytes)
}

fn profile_body(email: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": {
            "_id": "user-1",
            "name": "Asha Rao",
            "email": email,
            "mobile": "9876543210",
            "profile_photo": PHOTO_URL
        }
    }))
}

fn gallery_body(ids: &[&str]) -> ResponseTemplate {
    let items: Vec<_> = ids
        .iter()
        .map(|id| json!({ "_id": id, "image_url": format!("https://cdn.example.com/{}.jpg", id) }))
        .collect();
    ResponseTemplate::new(200).set_body_json(json!({ "success": true, "data": items }))
}

fn stored(id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "data": { "_id": id, "image_url": format!("https://cdn.example.com/{}.jpg", id) }
    }))
}

/// Mount the login and profile mocks and sign in
async fn signed_in(mock_server: &MockServer) -> ProfileClient {
    Mock::given(method("POST"))
        .and(path("/api/user/user_login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "token": "test_token" },
            "userId": "user-1"
        })))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/user/userDetails"))
        .and(query_param("userId", "user-1"))
        .respond_with(profile_body("asha@example.com"))
        .mount(mock_server)
        .await;

    let client = ProfileClient::new(&mock_server.uri()).unwrap();
    client
        .sync()
        .sign_in(Credential::new("asha@example.com", "secret"))
        .await
        .unwrap();
    client
}

#[tokio::test]
async fn test_sign_in_loads_profile() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;
    let sync = client.sync();

    assert_eq!(sync.phase(), Phase::Authenticated);
    assert_eq!(sync.session().unwrap().user_id, "user-1");

    let view = sync.view().unwrap();
    assert_eq!(view.profile.email.as_deref(), Some("asha@example.com"));
    let photo = view.photo.as_ref().unwrap();
    assert_eq!(photo.remote_url(), PHOTO_URL);
    assert!(photo.display_url().starts_with(PHOTO_URL));
    assert!(view.gallery.is_empty());
}

#[tokio::test]
async fn test_sign_in_failure_returns_to_signed_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user/user_login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Invalid password"
        })))
        .mount(&mock_server)
        .await;

    let client = ProfileClient::new(&mock_server.uri()).unwrap();
    let result = client
        .sync()
        .sign_in(Credential::new("asha@example.com", "wrong"))
        .await;

    assert!(matches!(
        result,
        Err(Error::Api(ApiError::InvalidCredentials(_)))
    ));
    assert_eq!(client.sync().phase(), Phase::SignedOut);
    assert!(client.sync().session().is_none());
}

#[tokio::test]
async fn test_mutation_adopts_refetched_profile() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("PUT"))
        .and(path("/api/user/updateUser"))
        .respond_with(profile_body("A@B.COM"))
        .expect(1)
        .mount(&mock_server)
        .await;

    // The server stores a normalized email
    Mock::given(method("GET"))
        .and(path("/api/user/display"))
        .respond_with(profile_body("a@b.com"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let view = client
        .sync()
        .apply_mutation(ProfileFields::new().with_email("A@B.COM"))
        .await
        .unwrap();

    assert_eq!(view.profile.email.as_deref(), Some("a@b.com"));
    let snapshot = client.sync().snapshot();
    assert_eq!(snapshot.phase(), Phase::Authenticated);
    assert_eq!(snapshot.profile().unwrap().email.as_deref(), Some("a@b.com"));
}

#[tokio::test]
async fn test_mutation_keeps_photo_reference_for_unchanged_url() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;
    let before = client.sync().view().unwrap().photo.clone().unwrap();

    Mock::given(method("PUT"))
        .and(path("/api/user/updateUser"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/user/display"))
        .respond_with(profile_body("asha@example.com"))
        .mount(&mock_server)
        .await;

    let view = client
        .sync()
        .apply_mutation(ProfileFields::new().with_city("Pune"))
        .await
        .unwrap();

    assert_eq!(view.photo.as_ref().unwrap(), &before);
}

#[tokio::test]
async fn test_mutation_validation_error_keeps_prior_view() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;
    let before = client.sync().view().unwrap();

    Mock::given(method("PUT"))
        .and(path("/api/user/updateUser"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "message": "Email already in use"
        })))
        .mount(&mock_server)
        .await;

    let result = client
        .sync()
        .apply_mutation(ProfileFields::new().with_email("taken@example.com"))
        .await;

    assert!(matches!(result, Err(Error::Api(ApiError::Validation { .. }))));
    assert_eq!(client.sync().phase(), Phase::Authenticated);
    assert_eq!(client.sync().view().unwrap(), before);
}

#[tokio::test]
async fn test_unauthorized_mutation_signs_out() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("PUT"))
        .and(path("/api/user/updateUser"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let result = client
        .sync()
        .apply_mutation(ProfileFields::new().with_name("Asha"))
        .await;

    assert_eq!(result.unwrap_err(), Error::Api(ApiError::Unauthorized));
    let snapshot = client.sync().snapshot();
    assert_eq!(snapshot.phase(), Phase::SignedOut);
    assert!(snapshot.session().is_none());
    assert!(snapshot.view().is_none());
}

#[tokio::test]
async fn test_unauthorized_read_signs_out() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/api/user/display"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let result = client.sync().refresh_profile().await;

    assert!(result.unwrap_err().is_unauthorized());
    assert_eq!(client.sync().phase(), Phase::SignedOut);
}

#[tokio::test]
async fn test_unauthorized_upload_signs_out() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("POST"))
        .and(path("/api/cart/add_cart"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = client
        .sync()
        .apply_photo_upload(vec![jpeg("1.jpg", 32), jpeg("2.jpg", 32)], ImageKind::GalleryItem)
        .await;

    assert_eq!(result.unwrap_err(), Error::Api(ApiError::Unauthorized));
    assert_eq!(client.sync().phase(), Phase::SignedOut);
}

#[tokio::test]
async fn test_profile_photo_tokens_increase() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;
    let initial = client.sync().view().unwrap().photo.clone().unwrap();

    // Same remote URL every time; only the cache token can tell them apart
    Mock::given(method("PUT"))
        .and(path("/api/user/updateWithPhoto"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "_id": "user-1", "profile_photo": PHOTO_URL }
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/user/display"))
        .respond_with(profile_body("asha@example.com"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut tokens = vec![initial.cache_token()];
    for _ in 0..2 {
        let batch = client
            .sync()
            .apply_photo_upload(vec![jpeg("me.jpg", 64)], ImageKind::ProfilePhoto)
            .await
            .unwrap();
        assert_eq!(batch.result(), BatchResult::AllSucceeded);

        let photo = client.sync().view().unwrap().photo.clone().unwrap();
        assert_eq!(photo.remote_url(), PHOTO_URL);
        assert_eq!(batch.succeeded().next(), Some(&photo));
        tokens.push(photo.cache_token());
    }

    assert!(tokens.windows(2).all(|w| w[0] < w[1]), "{:?}", tokens);
    assert_eq!(client.sync().phase(), Phase::Authenticated);
}

#[tokio::test]
async fn test_oversized_image_rejects_batch_before_upload() {
    let mock_server = MockServer::start().await;
    let client = ProfileClient::new_with_options(
        &mock_server.uri(),
        ClientOptions::default().with_max_image_bytes(1_024),
    )
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/api/user/user_login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "token": "test_token" },
            "userId": "user-1"
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/user/userDetails"))
        .respond_with(profile_body("asha@example.com"))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/cart/add_cart"))
        .respond_with(stored("never"))
        .expect(0)
        .mount(&mock_server)
        .await;

    client
        .sync()
        .sign_in(Credential::new("asha@example.com", "secret"))
        .await
        .unwrap();

    let images = (1..=5)
        .map(|i| jpeg(&format!("{}.jpg", i), if i == 3 { 4_096 } else { 100 }))
        .collect();
    let result = client
        .sync()
        .apply_photo_upload(images, ImageKind::GalleryItem)
        .await;

    match result {
        Err(Error::Media(MediaError::Validation(violations))) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].index, 2);
        }
        other => panic!("Expected a validation error, got {:?}", other),
    }
    assert_eq!(client.sync().phase(), Phase::Authenticated);
    assert!(client.sync().view().unwrap().gallery.is_empty());
}

#[tokio::test]
async fn test_partial_gallery_upload_appends_successes_in_order() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    for response in [stored("c1"), ResponseTemplate::new(503), stored("c3")] {
        Mock::given(method("POST"))
            .and(path("/api/cart/add_cart"))
            .respond_with(response)
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
    }

    let batch = client
        .sync()
        .apply_photo_upload(
            vec![jpeg("1.jpg", 32), jpeg("2.jpg", 32), jpeg("3.jpg", 32)],
            ImageKind::GalleryItem,
        )
        .await
        .unwrap();

    assert_eq!(batch.result(), BatchResult::Partial);
    assert!(matches!(
        batch.items[1].status,
        ItemStatus::Failed(ApiError::Network(_))
    ));

    let view = client.sync().view().unwrap();
    let ids: Vec<_> = view.gallery.iter().map(|g| g.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c3"]);
    assert!(view.gallery[0].image.cache_token() < view.gallery[1].image.cache_token());
    assert_eq!(client.sync().phase(), Phase::Authenticated);
}

#[tokio::test]
async fn test_gallery_delete_relists() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/api/cart/get_cart"))
        .respond_with(gallery_body(&["c1", "c2"]))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cart/get_cart"))
        .respond_with(gallery_body(&["c2"]))
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/cart/delete_cart"))
        .and(query_param("cartId", "c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let loaded = client.sync().load_gallery().await.unwrap();
    assert_eq!(loaded.gallery.len(), 2);
    let kept = loaded.gallery[1].clone();

    let view = client.sync().delete_gallery_item("c1").await.unwrap();
    assert_eq!(view.gallery, vec![kept]);
    assert_eq!(client.sync().phase(), Phase::Authenticated);
}

#[tokio::test]
async fn test_concurrent_mutation_is_busy() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("PUT"))
        .and(path("/api/user/updateUser"))
        .respond_with(profile_body("first@example.com").set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/user/display"))
        .respond_with(profile_body("first@example.com"))
        .mount(&mock_server)
        .await;

    let sync = client.sync().clone();
    let first = tokio::spawn(async move {
        sync.apply_mutation(ProfileFields::new().with_email("first@example.com"))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.sync().phase(), Phase::Mutating);

    let second = client
        .sync()
        .apply_mutation(ProfileFields::new().with_email("second@example.com"))
        .await;
    assert_eq!(second.unwrap_err(), Error::Busy);

    let view = first.await.unwrap().unwrap();
    assert_eq!(view.profile.email.as_deref(), Some("first@example.com"));
    assert_eq!(client.sync().phase(), Phase::Authenticated);
}

#[tokio::test]
async fn test_sign_out_discards_in_flight_result() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("PUT"))
        .and(path("/api/user/updateUser"))
        .respond_with(profile_body("late@example.com").set_delay(Duration::from_millis(300)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/user/display"))
        .respond_with(profile_body("late@example.com"))
        .mount(&mock_server)
        .await;

    let sync = client.sync().clone();
    let pending = tokio::spawn(async move {
        sync.apply_mutation(ProfileFields::new().with_email("late@example.com"))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.sync().sign_out();

    assert_eq!(pending.await.unwrap().unwrap_err(), Error::NotSignedIn);
    let snapshot = client.sync().snapshot();
    assert_eq!(snapshot.phase(), Phase::SignedOut);
    assert!(snapshot.view().is_none());
}

#[tokio::test]
async fn test_sign_out_is_idempotent() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;
    let mut rx = client.sync().subscribe();

    client.sync().sign_out();
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().phase(), Phase::SignedOut);

    client.sync().sign_out();
    assert!(!rx.has_changed().unwrap());

    assert_eq!(
        client.sync().refresh_profile().await.unwrap_err(),
        Error::NotSignedIn
    );
    assert_eq!(
        client
            .sync()
            .apply_mutation(ProfileFields::new().with_name("x"))
            .await
            .unwrap_err(),
        Error::NotSignedIn
    );
}

#[tokio::test]
async fn test_delete_account_clears_state_even_on_failure() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("DELETE"))
        .and(path("/api/user/delete"))
        .and(query_param("userId", "user-1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let result = client.sync().delete_account().await;

    assert!(matches!(result, Err(Error::Api(ApiError::Network(_)))));
    assert_eq!(client.sync().phase(), Phase::SignedOut);
    assert!(client.sync().session().is_none());
    assert_eq!(client.sync().delete_account().await.unwrap_err(), Error::NotSignedIn);
}

#[tokio::test]
async fn test_register_leaves_session_alone() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/user/add_user"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = ProfileClient::new(&mock_server.uri()).unwrap();
    client
        .sync()
        .register(&NewAccount::new("Asha Rao", "asha@example.com", "secret", "9876543210"))
        .await
        .unwrap();

    assert_eq!(client.sync().phase(), Phase::SignedOut);
}

/// Signs in normally, then fails by panicking where configured
struct PanickingApi {
    panic_on_login: bool,
}

#[async_trait]
impl ProfileApi for PanickingApi {
    async fn register(&self, _: &NewAccount) -> profile_sync::api::Result<()> {
        unimplemented!()
    }

    async fn authenticate(&self, _: &Credential) -> profile_sync::api::Result<Session> {
        if self.panic_on_login {
            panic!("login backend crashed");
        }
        Ok(Session::new("test_token", "user-1"))
    }

    async fn fetch_profile(&self, _: &str, _: &str) -> profile_sync::api::Result<ProfileSnapshot> {
        Ok(serde_json::from_value(json!({ "_id": "user-1", "email": "asha@example.com" })).unwrap())
    }

    async fn fetch_profile_by_token(&self, _: &str) -> profile_sync::api::Result<ProfileSnapshot> {
        unimplemented!()
    }

    async fn mutate_profile(
        &self,
        _: &str,
        _: &str,
        _: &ProfileFields,
    ) -> profile_sync::api::Result<Option<ProfileSnapshot>> {
        panic!("update backend crashed");
    }

    async fn mutate_profile_by_token(
        &self,
        _: &str,
        _: &ProfileFields,
    ) -> profile_sync::api::Result<Option<ProfileSnapshot>> {
        unimplemented!()
    }

    async fn upload_image(
        &self,
        _: &str,
        _: &str,
        _: &profile_sync::api::ImageUpload,
        _: ImageKind,
    ) -> profile_sync::api::Result<UploadedImage> {
        panic!("upload backend crashed");
    }

    async fn list_gallery(&self, _: &str) -> profile_sync::api::Result<Vec<RemoteGalleryItem>> {
        unimplemented!()
    }

    async fn delete_gallery_item(&self, _: &str, _: &str) -> profile_sync::api::Result<()> {
        unimplemented!()
    }

    async fn delete_account(&self, _: &str, _: &str) -> profile_sync::api::Result<()> {
        unimplemented!()
    }
}

fn panicking_client(panic_on_login: bool) -> ProfileClient {
    ProfileClient::with_api(
        "https://profiles.example.com",
        Arc::new(PanickingApi { panic_on_login }),
        ClientOptions::default(),
    )
}

#[tokio::test]
async fn test_crashed_mutation_restores_authenticated() {
    let client = panicking_client(false);
    let sync = client.sync();
    sync.sign_in(Credential::new("asha@example.com", "secret"))
        .await
        .unwrap();
    let before = sync.view().unwrap();

    let result = sync.apply_mutation(ProfileFields::new().with_name("Asha")).await;
    assert!(matches!(result, Err(Error::Task(_))));
    assert_eq!(sync.phase(), Phase::Authenticated);
    assert_eq!(sync.view().unwrap(), before);

    // Not stuck behind the crashed operation
    let again = sync.apply_mutation(ProfileFields::new().with_name("Asha")).await;
    assert!(matches!(again, Err(Error::Task(_))));

    let upload = sync
        .apply_photo_upload(vec![jpeg("me.jpg", 32)], ImageKind::ProfilePhoto)
        .await;
    assert!(matches!(upload, Err(Error::Task(_))));
    assert_eq!(sync.phase(), Phase::Authenticated);

    sync.sign_in(Credential::new("asha@example.com", "secret"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_crashed_sign_in_returns_to_signed_out() {
    let client = panicking_client(true);
    let sync = client.sync();

    let result = sync.sign_in(Credential::new("asha@example.com", "secret")).await;
    assert!(matches!(result, Err(Error::Task(_))));
    assert_eq!(sync.phase(), Phase::SignedOut);

    let again = sync.sign_in(Credential::new("asha@example.com", "secret")).await;
    assert!(matches!(again, Err(Error::Task(_))));
}

#[tokio::test]
async fn test_dropped_caller_does_not_cancel_mutation() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("PUT"))
        .and(path("/api/user/updateUser"))
        .respond_with(profile_body("kept@example.com").set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/user/display"))
        .respond_with(profile_body("kept@example.com"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut rx = client.sync().subscribe();
    let sync = client.sync().clone();
    let caller = tokio::spawn(async move {
        sync.apply_mutation(ProfileFields::new().with_email("kept@example.com"))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.sync().phase(), Phase::Mutating);
    caller.abort();
    assert!(caller.await.unwrap_err().is_cancelled());

    tokio::time::timeout(Duration::from_secs(5), async {
        while rx.borrow_and_update().phase() != Phase::Authenticated {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    let snapshot = client.sync().snapshot();
    assert_eq!(
        snapshot.profile().unwrap().email.as_deref(),
        Some("kept@example.com")
    );
}

#[tokio::test]
async fn test_sign_in_while_mutating_is_busy() {
    let mock_server = MockServer::start().await;
    let client = signed_in(&mock_server).await;

    Mock::given(method("PUT"))
        .and(path("/api/user/updateUser"))
        .respond_with(profile_body("asha@example.com").set_delay(Duration::from_millis(300)))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/user/display"))
        .respond_with(profile_body("asha@example.com"))
        .mount(&mock_server)
        .await;

    let sync = client.sync().clone();
    let pending = tokio::spawn(async move {
        sync.apply_mutation(ProfileFields::new().with_city("Pune"))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let result = client
        .sync()
        .sign_in(Credential::new("asha@example.com", "secret"))
        .await;
    assert_eq!(result.unwrap_err(), Error::Busy);

    assert!(pending.await.unwrap().is_ok());
    assert_eq!(client.sync().session().unwrap().user_id, "user-1");
    assert_eq!(client.sync().phase(), Phase::Authenticated);
}
