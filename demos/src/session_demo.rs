use dotenv::dotenv;
use std::env;

use profile_sync::prelude::*;

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    // Load PROFILE_SYNC_* variables from .env
    dotenv().ok();
    pretty_env_logger::init();

    let email = env::var("PROFILE_SYNC_EMAIL").expect("PROFILE_SYNC_EMAIL must be set");
    let password = env::var("PROFILE_SYNC_PASSWORD").expect("PROFILE_SYNC_PASSWORD must be set");

    let client = ProfileClient::from_env()?;
    let sync = client.sync().clone();

    // Print every state change
    let mut rx = sync.subscribe();
    let watcher = tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            let email = snapshot.profile().and_then(|p| p.email.clone());
            println!("  state: {:?} (email: {:?})", snapshot.phase(), email);
        }
    });

    println!("1. Sign in as {}", email);
    let view = match sync.sign_in(Credential::new(&email, &password)).await {
        Ok(view) => view,
        Err(e) => {
            println!("Sign-in failed: {}", e);
            return Ok(());
        }
    };
    println!("Signed in: {:?}", view.profile.name);
    if let Some(photo) = &view.photo {
        println!("Photo: {}", photo.display_url());
    }

    println!("\n2. Update city");
    let fields = ProfileFields::new().with_city("Pune");
    match sync.apply_mutation(fields).await {
        Ok(view) => println!("Server now stores city {:?}", view.profile.city),
        Err(Error::Api(ApiError::Validation { field, message })) => {
            println!("Rejected ({:?}): {}", field, message)
        }
        Err(e) => println!("Update failed: {}", e),
    }

    println!("\n3. Refresh profile");
    match sync.refresh_profile().await {
        Ok(view) => println!("Profile: {:?}", view.profile),
        Err(e) => println!("Refresh failed: {}", e),
    }

    println!("\n4. Sign out");
    sync.sign_out();
    drop(client);
    drop(sync);
    watcher.await?;

    Ok(())
}
