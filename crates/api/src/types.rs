//! Wire and domain types for the profile service

use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::{ApiError, Result};

/// Email and password used once to authenticate
#[derive(Clone, Serialize)]
pub struct Credential {
    pub email: String,
    pub password: String,
}

impl Credential {
    /// Create a credential; the email is trimmed and lower-cased
    pub fn new(email: &str, password: &str) -> Self {
        Self {
            email: email.trim().to_lowercase(),
            password: password.to_string(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated session
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque token attached to every authorized request
    pub token: String,
    pub user_id: String,
}

impl Session {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Server-confirmed profile data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub mobile: Option<String>,
    #[serde(default)]
    pub dob: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub pincode: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Remote URL of the profile photo, as stored by the server
    #[serde(default)]
    pub profile_photo: Option<String>,
}

/// Profile fields to update; unset fields are left untouched on the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pincode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl ProfileFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_mobile(mut self, mobile: &str) -> Self {
        self.mobile = Some(mobile.to_string());
        self
    }

    pub fn with_dob(mut self, dob: &str) -> Self {
        self.dob = Some(dob.to_string());
        self
    }

    pub fn with_gender(mut self, gender: &str) -> Self {
        self.gender = Some(gender.to_string());
        self
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn with_city(mut self, city: &str) -> Self {
        self.city = Some(city.to_string());
        self
    }

    pub fn with_pincode(mut self, pincode: &str) -> Self {
        self.pincode = Some(pincode.to_string());
        self
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = Some(state.to_string());
        self
    }

    pub fn with_country(mut self, country: &str) -> Self {
        self.country = Some(country.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Trim every value and reduce `mobile`/`pincode` to their digits.
    ///
    /// Fails when no field is set.
    pub fn normalized(&self) -> Result<Self> {
        if self.is_empty() {
            return Err(ApiError::validation("no profile fields to update"));
        }

        let trim = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string());
        Ok(Self {
            name: trim(&self.name),
            email: trim(&self.email),
            mobile: self.mobile.as_deref().map(digits),
            dob: trim(&self.dob),
            gender: trim(&self.gender),
            address: trim(&self.address),
            city: trim(&self.city),
            pincode: self.pincode.as_deref().map(digits),
            state: trim(&self.state),
            country: trim(&self.country),
        })
    }
}

/// Registration payload for a new account
#[derive(Clone, Default, Serialize)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub password: String,
    pub mobile: String,
    pub dob: Option<String>,
    pub gender: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub pincode: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewAccount")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("mobile", &self.mobile)
            .finish_non_exhaustive()
    }
}

impl NewAccount {
    pub fn new(name: &str, email: &str, password: &str, mobile: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            mobile: mobile.to_string(),
            ..Default::default()
        }
    }

    /// Check the required fields and return the normalized payload
    pub fn validated(&self) -> Result<Self> {
        for (field, value) in [
            ("name", &self.name),
            ("email", &self.email),
            ("password", &self.password),
            ("mobile", &self.mobile),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::invalid_field(field, "is required"));
            }
        }

        let email = self.email.trim().to_lowercase();
        if !email_pattern().is_match(&email) {
            return Err(ApiError::invalid_field("email", "is not a valid email address"));
        }

        let mobile = digits(&self.mobile);
        if mobile.len() != 10 {
            return Err(ApiError::invalid_field("mobile", "must be a 10-digit number"));
        }

        let trim = |v: &Option<String>| {
            v.as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        Ok(Self {
            name: self.name.trim().to_string(),
            email,
            password: self.password.clone(),
            mobile,
            dob: trim(&self.dob),
            gender: trim(&self.gender).map(|g| g.to_lowercase()),
            address: trim(&self.address),
            city: trim(&self.city),
            pincode: trim(&self.pincode),
            state: trim(&self.state),
            country: trim(&self.country),
        })
    }
}

/// Where an uploaded image ends up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    /// Replaces the single profile photo
    ProfilePhoto,
    /// Appended to the multi-photo gallery
    GalleryItem,
}

impl ImageKind {
    /// Multipart field name the server expects for this kind
    pub fn field_name(&self) -> &'static str {
        match self {
            ImageKind::ProfilePhoto => "profile_photo",
            ImageKind::GalleryItem => "image",
        }
    }
}

/// An encoded image ready to be sent
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// What the server reports after storing an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// Gallery item id; always present for gallery uploads
    pub id: Option<String>,
    pub remote_url: String,
}

/// Gallery entry as listed by the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteGalleryItem {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub image_url: String,
}

fn digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"))
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(s)) => Some(s),
        Some(Raw::Number(n)) => Some(n.to_string()),
        None => None,
    })
}
