use crate::models::{Property, WireCode};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

pub const HEADER: [&str; 20] = [
    "ID",
    "Kode",
    "Wilayah",
    "Tipe",
    "Status",
    "Cluster",
    "Hadap",
    "Luas Tanah",
    "Luas Bangunan",
    "Lantai",
    "Kamar Tidur",
    "Kamar Mandi",
    "Lain",
    "Legal",
    "Harga Jual",
    "Fee",
    "Listing",
    "Images",
    "Tanggal",
    "Timestamp",
];

const MEDIA_SEPARATOR: &str = " | ";

/// Quote a field containing a quote, comma or line break; inner quotes doubled
pub fn escape_field(value: &str) -> String {
    if value.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn code_of<T: WireCode>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.code().to_string()).unwrap_or_default()
}

fn row(property: &Property) -> Vec<String> {
    vec![
        property.id.clone(),
        property.code.to_string(),
        property.region.clone(),
        code_of(&property.property_type),
        code_of(&property.marketing_type),
        property.cluster.clone(),
        code_of(&property.orientation),
        property.land_area.to_string(),
        property.building_area.to_string(),
        property.floors.to_string(),
        property.bedrooms.to_string(),
        property.bathrooms.to_string(),
        property.notes.clone(),
        code_of(&property.legal),
        property.price.to_string(),
        property.fee.clone(),
        property.listing.clone(),
        property.media.join(MEDIA_SEPARATOR),
        property.listing_date.clone(),
        property
            .updated_at
            .map(|t| t.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
            .unwrap_or_default(),
    ]
}

/// CSV of the selected records, in the order they appear in `properties`
pub fn properties_csv(properties: &[Property], selected: &[String]) -> String {
    let mut lines = vec![HEADER.join(",")];
    lines.extend(
        properties
            .iter()
            .filter(|p| selected.contains(&p.id))
            .map(|p| {
                row(p)
                    .iter()
                    .map(|field| escape_field(field))
                    .collect::<Vec<_>>()
                    .join(",")
            }),
    );
    lines.join("\n")
}

/// Requested ids that match none of `properties`
pub fn missing_ids<'a>(properties: &[Property], selected: &'a [String]) -> Vec<&'a str> {
    selected
        .iter()
        .filter(|id| !properties.iter().any(|p| &p.id == *id))
        .map(String::as_str)
        .collect()
}

pub async fn write_csv(path: &Path, properties: &[Property], selected: &[String]) -> Result<usize> {
    let csv = properties_csv(properties, selected);
    let rows = properties
        .iter()
        .filter(|p| selected.contains(&p.id))
        .count();
    tokio::fs::write(path, csv)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("💾 Exported {} properties to {}", rows, path.display());
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketingType, PropertyType};
    use chrono::{TimeZone, Utc};

    fn sample(id: &str) -> Property {
        Property {
            id: id.into(),
            code: 17,
            region: "BSD".into(),
            property_type: Some(PropertyType::House),
            marketing_type: Some(MarketingType::ForSale),
            price: 1_500_000_000,
            media: vec!["https://cdn/a.jpg".into(), "https://cdn/b.jpg".into()],
            listing_date: "01-02-2024".into(),
            updated_at: Some(Utc.with_ymd_and_hms(2024, 2, 1, 3, 4, 5).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn escape_only_when_needed() {
        assert_eq!(escape_field("plain"), "plain");
        assert_eq!(escape_field("Jl. Mawar, No. 5"), "\"Jl. Mawar, No. 5\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn only_selected_rows_in_listing_order() {
        let properties = vec![sample("a"), sample("b"), sample("c")];
        let csv = properties_csv(&properties, &["c".to_string(), "a".to_string()]);
        let lines: Vec<&str> = csv.split('\n').collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID,Kode,Wilayah,Tipe,Status,"));
        assert!(lines[1].starts_with("a,17,BSD,RUMAH,JUAL,"));
        assert!(lines[2].starts_with("c,"));
        assert!(lines[1].contains(",https://cdn/a.jpg | https://cdn/b.jpg,01-02-2024,"));
        assert!(lines[1].ends_with(",2024-02-01T03:04:05.000Z"));
    }

    #[test]
    fn notes_with_comma_and_quote_survive() {
        let mut property = sample("a");
        property.notes = "carport 2, \"hook\"".into();
        let csv = properties_csv(&[property], &["a".to_string()]);
        assert!(csv.contains(",\"carport 2, \"\"hook\"\"\","));
    }

    #[test]
    fn ids_outside_the_listing_are_reported() {
        let properties = vec![sample("a"), sample("b")];
        let selected = vec!["b".to_string(), "gone".to_string(), "x".to_string()];
        assert_eq!(missing_ids(&properties, &selected), vec!["gone", "x"]);
        assert!(missing_ids(&properties, &["a".to_string()]).is_empty());
    }

    #[tokio::test]
    async fn writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("selected_properties.csv");
        let rows = write_csv(&path, &[sample("a")], &["a".to_string()])
            .await
            .unwrap();
        assert_eq!(rows, 1);
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("ID,"));
    }
}
