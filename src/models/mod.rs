use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod draft;
pub mod format;
pub(crate) mod lenient;

pub use draft::{PropertyDraft, ValidationError, MAX_DESCRIPTION_CHARS};

/// Shown in place of a listing's media when it has none
pub const PLACEHOLDER_IMAGE: &str = "https://images.unsplash.com/photo-1518791841217-8f162f1e1131?ixlib=rb-1.2.1&auto=format&fit=crop&w=800&q=60";

/// Enumerations stored as short upper-case codes in the remote store
pub trait WireCode: Sized {
    fn code(&self) -> &str;
    fn from_code(code: &str) -> Option<Self>;
}

/// Kind of building or lot being listed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    House,
    Shophouse,
    LandLot,
    Apartment,
}

impl WireCode for PropertyType {
    fn code(&self) -> &str {
        match self {
            Self::House => "RUMAH",
            Self::Shophouse => "RUKO",
            Self::LandLot => "KAVLING",
            // the store has always spelled it this way
            Self::Apartment => "APARTERMEN",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "RUMAH" => Some(Self::House),
            "RUKO" => Some(Self::Shophouse),
            "KAVLING" => Some(Self::LandLot),
            "APARTERMEN" | "APARTEMEN" => Some(Self::Apartment),
            _ => None,
        }
    }
}

/// Whether a listing is offered for sale or for rent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarketingType {
    ForSale,
    ForRent,
}

impl WireCode for MarketingType {
    fn code(&self) -> &str {
        match self {
            Self::ForSale => "JUAL",
            Self::ForRent => "SEWA",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "JUAL" => Some(Self::ForSale),
            "SEWA" => Some(Self::ForRent),
            _ => None,
        }
    }
}

/// Compass direction the front of the building faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    North,
    East,
    South,
    West,
}

impl WireCode for Orientation {
    fn code(&self) -> &str {
        match self {
            Self::North => "UTARA",
            Self::East => "TIMUR",
            Self::South => "SELATAN",
            Self::West => "BARAT",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "UTARA" => Some(Self::North),
            "TIMUR" => Some(Self::East),
            "SELATAN" => Some(Self::South),
            "BARAT" => Some(Self::West),
            _ => None,
        }
    }
}

/// Land title certificate attached to a listing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LegalCertificate {
    Shm,
    Hgb,
    Shgb,
    /// Anything else, stored as the text the admin typed
    Other(String),
}

impl WireCode for LegalCertificate {
    fn code(&self) -> &str {
        match self {
            Self::Shm => "SHM",
            Self::Hgb => "HGB",
            Self::Shgb => "SHGB",
            Self::Other(text) => text,
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        match code.to_ascii_uppercase().as_str() {
            "" => None,
            "SHM" => Some(Self::Shm),
            "HGB" => Some(Self::Hgb),
            "SHGB" => Some(Self::Shgb),
            _ => Some(Self::Other(code.to_string())),
        }
    }
}

/// A property listing as stored in the `properties` collection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Property {
    #[serde(default, deserialize_with = "lenient::text")]
    pub id: String,
    #[serde(rename = "kode", default, deserialize_with = "lenient::int")]
    pub code: u64,
    #[serde(rename = "wilayah", default, deserialize_with = "lenient::text")]
    pub region: String,
    #[serde(rename = "type", default, with = "lenient::code")]
    pub property_type: Option<PropertyType>,
    #[serde(rename = "status", default, with = "lenient::code")]
    pub marketing_type: Option<MarketingType>,
    /// Listing date as displayed, `dd-mm-yyyy`
    #[serde(rename = "tanggal", default, deserialize_with = "lenient::text")]
    pub listing_date: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub cluster: String,
    #[serde(rename = "hadap", default, with = "lenient::code")]
    pub orientation: Option<Orientation>,
    #[serde(rename = "luasTanah", default, deserialize_with = "lenient::int")]
    pub land_area: u64,
    #[serde(rename = "luasBangunan", default, deserialize_with = "lenient::int")]
    pub building_area: u64,
    #[serde(rename = "lantai", default, deserialize_with = "lenient::count")]
    pub floors: u32,
    #[serde(rename = "kamarTidur", default, deserialize_with = "lenient::count")]
    pub bedrooms: u32,
    #[serde(rename = "kamarMandi", default, deserialize_with = "lenient::count")]
    pub bathrooms: u32,
    #[serde(rename = "lain", default, deserialize_with = "lenient::text")]
    pub notes: String,
    #[serde(default, with = "lenient::code")]
    pub legal: Option<LegalCertificate>,
    #[serde(rename = "hargaJual", default, deserialize_with = "lenient::int")]
    pub price: u64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub fee: String,
    /// Listing agent
    #[serde(default, deserialize_with = "lenient::text")]
    pub listing: String,
    #[serde(rename = "images", default, deserialize_with = "lenient::strings")]
    pub media: Vec<String>,
    #[serde(rename = "judul", default, deserialize_with = "lenient::text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification, assigned by the store
    #[serde(rename = "timestamp", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Property {
    /// First media URL, or the placeholder image
    pub fn cover_image(&self) -> &str {
        self.media
            .first()
            .map(String::as_str)
            .unwrap_or(PLACEHOLDER_IMAGE)
    }

    /// Media to render; never empty
    pub fn display_media(&self) -> Vec<&str> {
        if self.media.is_empty() {
            vec![PLACEHOLDER_IMAGE]
        } else {
            self.media.iter().map(String::as_str).collect()
        }
    }
}

/// Access level of a user record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum Role {
    #[default]
    User,
    Admin,
    Super,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Super => "super",
        }
    }

    /// Admins and super users may open the back-office
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin | Self::Super)
    }

    /// Strict parse, for input that must name a real role
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            "super" => Some(Self::Super),
            _ => None,
        }
    }
}

impl From<Option<String>> for Role {
    fn from(value: Option<String>) -> Self {
        value.as_deref().and_then(Self::parse).unwrap_or_default()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user record in the `users` collection, keyed by the identity provider's subject id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub email: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub display_name: String,
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub disabled: bool,
    #[serde(default, deserialize_with = "lenient::strings")]
    pub favorites: Vec<String>,
}

impl User {
    /// Fresh record for a first sign-in: role `user`, no favorites
    pub fn new(uid: impl Into<String>, email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            uid: uid.into(),
            display_name: default_display_name(&email),
            email,
            photo_url: None,
            role: Role::User,
            disabled: false,
            favorites: Vec::new(),
        }
    }

    pub fn has_favorite(&self, property_id: &str) -> bool {
        self.favorites.iter().any(|id| id == property_id)
    }
}

/// Local part of an email address
pub fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or_default().to_string()
}

/// One admin action, appended to the `logs` collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub action: String,
    pub performed_by: String,
    pub target_user: String,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(
        action: impl Into<String>,
        performed_by: impl Into<String>,
        target_user: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            action: action.into(),
            performed_by: performed_by.into(),
            target_user: target_user.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn property_decodes_store_row_with_string_numbers() {
        let row = json!({
            "id": "p1",
            "kode": 101,
            "wilayah": "BSD",
            "type": "RUMAH",
            "status": "JUAL",
            "tanggal": "01-02-2024",
            "kamarTidur": "3",
            "kamarMandi": "2",
            "luasBangunan": "120",
            "hargaJual": 1500000000u64,
            "fee": 2,
            "legal": "Girik",
            "images": null,
            "hadap": ""
        });

        let property: Property = serde_json::from_value(row).unwrap();
        assert_eq!(property.region, "BSD");
        assert_eq!(property.property_type, Some(PropertyType::House));
        assert_eq!(property.marketing_type, Some(MarketingType::ForSale));
        assert_eq!(property.bedrooms, 3);
        assert_eq!(property.bathrooms, 2);
        assert_eq!(property.building_area, 120);
        assert_eq!(property.fee, "2");
        assert_eq!(property.legal, Some(LegalCertificate::Other("Girik".into())));
        assert_eq!(property.orientation, None);
        assert!(property.media.is_empty());
    }

    #[test]
    fn unknown_enum_codes_decode_as_absent() {
        let property: Property =
            serde_json::from_value(json!({ "id": "p2", "type": "GUDANG", "status": "?" })).unwrap();
        assert_eq!(property.property_type, None);
        assert_eq!(property.marketing_type, None);
    }

    #[test]
    fn empty_media_falls_back_to_placeholder() {
        let property = Property::default();
        assert_eq!(property.cover_image(), PLACEHOLDER_IMAGE);
        assert_eq!(property.display_media(), vec![PLACEHOLDER_IMAGE]);
    }

    #[test]
    fn property_serializes_store_column_names() {
        let property = Property {
            id: "p3".into(),
            region: "SERPONG".into(),
            marketing_type: Some(MarketingType::ForRent),
            legal: Some(LegalCertificate::Shgb),
            ..Default::default()
        };
        let value = serde_json::to_value(&property).unwrap();
        assert_eq!(value["wilayah"], "SERPONG");
        assert_eq!(value["status"], "SEWA");
        assert_eq!(value["legal"], "SHGB");
        assert_eq!(value["type"], serde_json::Value::Null);
        assert!(value.get("created_at").is_none());
    }

    #[test]
    fn new_user_defaults() {
        let user = User::new("u1", "budi@example.com");
        assert_eq!(user.display_name, "budi");
        assert_eq!(user.role, Role::User);
        assert!(!user.disabled);
        assert!(user.favorites.is_empty());
    }

    #[test]
    fn user_decodes_unknown_role_as_user() {
        let user: User = serde_json::from_value(json!({
            "uid": "u2",
            "email": "a@b.c",
            "role": "owner",
            "favorites": ["p1", "p2"]
        }))
        .unwrap();
        assert_eq!(user.role, Role::User);
        assert!(user.has_favorite("p2"));
        assert_eq!(serde_json::to_value(&user).unwrap()["displayName"], "");
    }

    #[test]
    fn role_admin_check() {
        assert!(Role::Admin.is_admin());
        assert!(Role::Super.is_admin());
        assert!(!Role::User.is_admin());
        assert_eq!(Role::parse("SUPER"), Some(Role::Super));
        assert_eq!(Role::parse("root"), None);
    }
}
