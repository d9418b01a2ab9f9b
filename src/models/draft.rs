use super::{LegalCertificate, MarketingType, Orientation, Property, PropertyType, WireCode};
use thiserror::Error;

pub const MAX_DESCRIPTION_CHARS: usize = 1020;

/// Select value meaning "other, specify below"
pub const LEGAL_OTHER: &str = "LAIN_LAIN";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("description is {len} characters, limit is {max}")]
    DescriptionTooLong { len: usize, max: usize },

    #[error("legal certificate marked as other but no kind was given")]
    MissingLegalDetail,
}

/// Property fields as entered in the back-office form
#[derive(Debug, Clone, Default)]
pub struct PropertyDraft {
    pub code: u64,
    pub region: String,
    pub property_type: Option<PropertyType>,
    pub marketing_type: Option<MarketingType>,
    pub cluster: String,
    pub orientation: Option<Orientation>,
    pub land_area: u64,
    pub building_area: u64,
    pub floors: u32,
    pub bedrooms: u32,
    pub bathrooms: u32,
    pub notes: String,
    /// Select value: `SHM`, `HGB`, `SHGB`, [`LEGAL_OTHER`] or empty
    pub legal: String,
    /// Free text used when `legal` is [`LEGAL_OTHER`]
    pub legal_custom: String,
    pub price: u64,
    pub fee: String,
    pub listing: String,
    pub media: Vec<String>,
    pub title: String,
    pub description: String,
}

impl PropertyDraft {
    /// Prefill the form from an existing record
    pub fn from_property(property: &Property) -> Self {
        let (legal, legal_custom) = match &property.legal {
            Some(LegalCertificate::Other(text)) => (LEGAL_OTHER.to_string(), text.clone()),
            Some(other) => (other.code().to_string(), String::new()),
            None => (String::new(), String::new()),
        };

        Self {
            code: property.code,
            region: property.region.clone(),
            property_type: property.property_type,
            marketing_type: property.marketing_type,
            cluster: property.cluster.clone(),
            orientation: property.orientation,
            land_area: property.land_area,
            building_area: property.building_area,
            floors: property.floors,
            bedrooms: property.bedrooms,
            bathrooms: property.bathrooms,
            notes: property.notes.clone(),
            legal,
            legal_custom,
            price: property.price,
            fee: property.fee.clone(),
            listing: property.listing.clone(),
            media: property.media.clone(),
            title: property.title.clone(),
            description: property.description.clone(),
        }
    }

    /// Check the draft and normalize it into a record ready to save.
    ///
    /// The returned property has no id and no timestamps; the gateway
    /// fills those in.
    pub fn validate(self) -> Result<Property, ValidationError> {
        let region = self.region.trim().to_uppercase();
        if region.is_empty() {
            return Err(ValidationError::MissingField("region"));
        }

        let len = self.description.chars().count();
        if len > MAX_DESCRIPTION_CHARS {
            return Err(ValidationError::DescriptionTooLong {
                len,
                max: MAX_DESCRIPTION_CHARS,
            });
        }

        let legal = if self.legal == LEGAL_OTHER {
            let custom = self.legal_custom.trim();
            if custom.is_empty() {
                return Err(ValidationError::MissingLegalDetail);
            }
            Some(LegalCertificate::Other(custom.to_string()))
        } else {
            LegalCertificate::from_code(&self.legal)
        };

        Ok(Property {
            id: String::new(),
            code: self.code,
            region,
            property_type: self.property_type,
            marketing_type: self.marketing_type,
            listing_date: String::new(),
            cluster: self.cluster.trim().to_uppercase(),
            orientation: self.orientation,
            land_area: self.land_area,
            building_area: self.building_area,
            floors: self.floors,
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            notes: self.notes,
            legal,
            price: self.price,
            fee: self.fee,
            listing: self.listing,
            media: self.media,
            title: self.title,
            description: self.description,
            created_at: None,
            updated_at: None,
        })
    }
}
