use dotenv::dotenv;
use std::env;
use std::path::Path;

use profile_sync::prelude::*;

fn declared_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

async fn load_images(paths: &[String]) -> std::io::Result<Vec<LocalImage>> {
    let mut images = Vec::with_capacity(paths.len());
    for p in paths {
        let path = Path::new(p);
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| p.clone());
        log::debug!("Read {} ({} bytes)", name, bytes.len());
        images.push(LocalImage::new(&name, declared_mime(path), bytes));
    }
    Ok(images)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    pretty_env_logger::init();

    let email = env::var("PROFILE_SYNC_EMAIL").expect("PROFILE_SYNC_EMAIL must be set");
    let password = env::var("PROFILE_SYNC_PASSWORD").expect("PROFILE_SYNC_PASSWORD must be set");

    // Usage: gallery_demo [--photo] <image>...
    let mut args: Vec<String> = env::args().skip(1).collect();
    let kind = if args.first().map(String::as_str) == Some("--photo") {
        args.remove(0);
        ImageKind::ProfilePhoto
    } else {
        ImageKind::GalleryItem
    };
    if args.is_empty() {
        println!("Usage: gallery_demo [--photo] <image>...");
        return Ok(());
    }

    let client = ProfileClient::from_env()?;
    let sync = client.sync();
    sync.sign_in(Credential::new(&email, &password)).await?;

    println!("1. Current gallery");
    let view = sync.load_gallery().await?;
    for item in &view.gallery {
        println!("  {} {}", item.id, item.image.display_url());
    }

    println!("\n2. Upload {} image(s) as {:?}", args.len(), kind);
    let images = load_images(&args).await?;
    match sync.apply_photo_upload(images, kind).await {
        Ok(batch) => {
            println!("Result: {:?}", batch.result());
            for item in &batch.items {
                match &item.status {
                    ItemStatus::Succeeded(image) => {
                        println!("  {} -> {}", item.file_name, image.display_url())
                    }
                    ItemStatus::Failed(e) => println!("  {} failed: {}", item.file_name, e),
                    ItemStatus::Pending => println!("  {} not attempted", item.file_name),
                }
            }
        }
        Err(Error::Media(MediaError::Validation(violations))) => {
            println!("Nothing uploaded:");
            for v in violations {
                println!("  {}", v);
            }
        }
        Err(e) => println!("Upload failed: {}", e),
    }

    if let Some(view) = sync.view() {
        if let Some(photo) = &view.photo {
            println!("\nProfile photo: {}", photo.display_url());
        }
        println!("Gallery now holds {} image(s)", view.gallery.len());
    }

    sync.sign_out();
    Ok(())
}
