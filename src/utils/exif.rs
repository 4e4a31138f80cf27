use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};

/// Extract EXIF date taken from image
pub fn extract_date_taken(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let mut bufreader = BufReader::new(&file);
    let exif = exif::Reader::new().read_from_container(&mut bufreader).ok()?;

    // DateTimeOriginal is when the shutter fired; DateTime is the last edit
    [exif::Tag::DateTimeOriginal, exif::Tag::DateTime]
        .into_iter()
        .filter_map(|tag| exif.get_field(tag, exif::In::PRIMARY))
        .find_map(|field| match field.value {
            exif::Value::Ascii(ref values) => values.first().and_then(|raw| parse_exif_datetime(raw)),
            _ => None,
        })
}

fn parse_exif_datetime(raw: &[u8]) -> Option<DateTime<Utc>> {
    // EXIF format: "YYYY:MM:DD HH:MM:SS"
    let parsed = exif::DateTime::from_ascii(raw).ok()?;
    NaiveDate::from_ymd_opt(parsed.year.into(), parsed.month.into(), parsed.day.into())?
        .and_hms_opt(parsed.hour.into(), parsed.minute.into(), parsed.second.into())
        .map(|naive| naive.and_utc())
}

/// Read image dimensions from the file header without decoding pixels.
pub fn get_image_dimensions(path: &Path) -> Option<(u32, u32)> {
    image::image_dimensions(path).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parses_exif_timestamps() {
        let parsed = parse_exif_datetime(b"2021:07:14 18:30:05").unwrap();
        assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2021, 7, 14));
        assert_eq!((parsed.hour(), parsed.minute(), parsed.second()), (18, 30, 5));
        assert!(parse_exif_datetime(b"not a date").is_none());
    }

    #[test]
    fn files_without_exif_have_no_date() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("plain.png");
        image::RgbImage::new(3, 2).save(&path).unwrap();

        assert_eq!(extract_date_taken(&path), None);
        assert_eq!(get_image_dimensions(&path), Some((3, 2)));
    }
}
