//! Bulk listing import from the office spreadsheet export (CSV with a
//! header row). Each non-blank row becomes one new listing.

use crate::gateway::{GatewayError, ListingGateway};
use crate::models::{LegalCertificate, MarketingType, Orientation, Property, PropertyType, WireCode};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Spreadsheet column names
pub mod columns {
    pub const CODE: &str = "KODE";
    pub const REGION: &str = "WILAYAH";
    pub const PROPERTY_TYPE: &str = "TYPE";
    pub const MARKETING_TYPE: &str = "STATUS";
    pub const LISTING_DATE: &str = "TANGGAL LISTING";
    pub const FLOORS: &str = "Lantai";
    pub const CLUSTER: &str = "CLUSTER";
    pub const ORIENTATION: &str = "HADAP";
    pub const BEDROOMS: &str = "KT";
    pub const LAND_AREA: &str = "LT";
    pub const BUILDING_AREA: &str = "LB";
    pub const NOTES: &str = "Lain-Lain";
    pub const LEGAL: &str = "LEGAL";
    pub const PRICE: &str = "H. JUAL";
    pub const FEE: &str = "FEE";
    pub const LISTING: &str = "LISTING";
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV file has no listings")]
    Empty,

    /// Rows before `row` were written; nothing after it was attempted
    #[error("row {row} failed after {imported} imported: {source}")]
    Store {
        row: usize,
        imported: usize,
        #[source]
        source: GatewayError,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Non-blank rows read from the file
    pub rows: usize,
    /// Ids of the created listings, in row order
    pub created: Vec<String>,
}

/// One data row keyed by header
struct Row<'a> {
    headers: &'a HashMap<String, usize>,
    record: StringRecord,
}

impl Row<'_> {
    fn text(&self, column: &str) -> String {
        self.headers
            .get(column)
            .and_then(|&i| self.record.get(i))
            .unwrap_or_default()
            .to_string()
    }

    fn number(&self, column: &str) -> Option<f64> {
        let text = self.text(column);
        let text = text.trim();
        if text.is_empty() {
            return Some(0.0);
        }
        text.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    /// Whole non-negative number; blank or unparsable is 0
    fn int(&self, column: &str) -> u64 {
        self.number(column)
            .filter(|n| *n > 0.0)
            .map_or(0, |n| n as u64)
    }

    fn into_property(self) -> Property {
        let floors = self
            .number(columns::FLOORS)
            .filter(|n| *n > 0.0)
            .map_or(1, |n| n as u32);
        let price = self.text(columns::PRICE).trim().replace(',', "");

        Property {
            code: self.int(columns::CODE),
            region: self.text(columns::REGION),
            property_type: PropertyType::from_code(&self.text(columns::PROPERTY_TYPE)),
            marketing_type: MarketingType::from_code(&self.text(columns::MARKETING_TYPE)),
            listing_date: self.text(columns::LISTING_DATE),
            floors,
            cluster: self.text(columns::CLUSTER),
            orientation: Orientation::from_code(&self.text(columns::ORIENTATION)),
            bedrooms: self.int(columns::BEDROOMS) as u32,
            land_area: self.int(columns::LAND_AREA),
            building_area: self.int(columns::BUILDING_AREA),
            notes: self.text(columns::NOTES),
            legal: LegalCertificate::from_code(&self.text(columns::LEGAL)),
            price: price
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite() && *n > 0.0)
                .map_or(0, |n| n as u64),
            fee: self.text(columns::FEE).trim().to_string(),
            listing: self.text(columns::LISTING),
            ..Default::default()
        }
    }
}

/// Listings in the CSV, blank rows skipped. A file with no data rows is
/// an error.
pub fn parse_listings(input: &[u8]) -> Result<Vec<Property>, ImportError> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::Headers)
        .from_reader(input);

    let headers: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect();

    let mut listings = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        listings.push(
            Row {
                headers: &headers,
                record,
            }
            .into_property(),
        );
    }

    if listings.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(listings)
}

/// Create one listing per row, in file order, stopping at the first
/// store failure
pub async fn import_csv(gateway: &dyn ListingGateway, path: &Path) -> Result<ImportReport, ImportError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let listings = parse_listings(&bytes)?;
    info!("📥 Importing {} listings from {}", listings.len(), path.display());

    let mut report = ImportReport {
        rows: listings.len(),
        created: Vec::with_capacity(listings.len()),
    };
    for (i, listing) in listings.iter().enumerate() {
        let id = gateway
            .create_property(listing)
            .await
            .map_err(|source| ImportError::Store {
                row: i + 1,
                imported: report.created.len(),
                source,
            })?;
        debug!("Row {}/{} created {}", i + 1, report.rows, id);
        report.created.push(id);
    }

    info!("✅ Imported {} listings via {}", report.created.len(), gateway.backend_name());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;

    const SHEET: &str = "\
NO,KODE,WILAYAH,TYPE,STATUS,TANGGAL LISTING,Lantai,CLUSTER,HADAP,KT,LT,LB,Lain-Lain,LEGAL,H. JUAL,FEE,LISTING
1,101,BSD,RUMAH,JUAL,02-01-2024,2,Foresta,UTARA,3,120,90,\"carport, taman\",SHM,\"1,250,000,000\",2%,Rina
,,,,,,,,,,,,,,,,
2,abc,ALAM SUTERA,RUKO,SEWA,05-01-2024,,,,,,,,AJB, 85000000 ,,Budi
";

    #[test]
    fn rows_map_onto_listings() {
        let listings = parse_listings(SHEET.as_bytes()).unwrap();
        assert_eq!(listings.len(), 2);

        let house = &listings[0];
        assert_eq!(house.code, 101);
        assert_eq!(house.region, "BSD");
        assert_eq!(house.property_type, Some(PropertyType::House));
        assert_eq!(house.marketing_type, Some(MarketingType::ForSale));
        assert_eq!(house.listing_date, "02-01-2024");
        assert_eq!(house.floors, 2);
        assert_eq!(house.orientation, Some(Orientation::North));
        assert_eq!(house.bedrooms, 3);
        assert_eq!((house.land_area, house.building_area), (120, 90));
        assert_eq!(house.notes, "carport, taman");
        assert_eq!(house.legal, Some(LegalCertificate::Shm));
        assert_eq!(house.price, 1_250_000_000);
        assert_eq!(house.fee, "2%");
        assert_eq!(house.listing, "Rina");
        assert!(house.title.is_empty());
    }

    #[test]
    fn blanks_take_defaults() {
        let listings = parse_listings(SHEET.as_bytes()).unwrap();
        let shop = &listings[1];
        assert_eq!(shop.code, 0);
        assert_eq!(shop.floors, 1);
        assert_eq!(shop.bedrooms, 0);
        assert_eq!(shop.orientation, None);
        assert_eq!(shop.legal, Some(LegalCertificate::Other("AJB".into())));
        assert_eq!(shop.price, 85_000_000);
        assert_eq!(shop.marketing_type, Some(MarketingType::ForRent));
    }

    #[test]
    fn header_only_is_empty() {
        let header = "KODE,WILAYAH,H. JUAL\n,,\n";
        assert!(matches!(parse_listings(header.as_bytes()), Err(ImportError::Empty)));
        assert!(matches!(parse_listings(b""), Err(ImportError::Empty)));
    }

    #[test]
    fn unparsable_price_is_zero() {
        let sheet = "WILAYAH,H. JUAL\nBSD,nego\n";
        let listings = parse_listings(sheet.as_bytes()).unwrap();
        assert_eq!(listings[0].price, 0);
    }

    #[tokio::test]
    async fn import_creates_each_row() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("listings.csv");
        std::fs::write(&path, SHEET).unwrap();
        let gateway = MemoryGateway::new();

        let report = import_csv(&gateway, &path).await.unwrap();
        assert_eq!(report.rows, 2);
        assert_eq!(report.created.len(), 2);

        let stored = gateway.list_all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().any(|p| p.region == "ALAM SUTERA" && p.listing_date == "05-01-2024"));
        assert!(stored.iter().all(|p| p.created_at.is_some()));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let gateway = MemoryGateway::new();
        let err = import_csv(&gateway, Path::new("/nonexistent/listings.csv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::Io { .. }));
    }
}
