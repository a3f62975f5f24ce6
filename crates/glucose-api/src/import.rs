//! Turns a glucose monitor export into stored readings.
//!
//! An export starts with three lines that carry no readings: a metadata line, a blank line and
//! the column header. A header in a known language locates every expected column by its title,
//! so a reordered export still lands in the right fields, while a missing column fails the
//! import. Any other header is skipped and the columns are read in export order.
//! Every following line is one reading.

use glucose_db::models::{DeviceKey, ImportRow, ImportSummary, ReadingValues};
use jiff::civil::DateTime;
use std::string::FromUtf8Error;

const HEADER_LINES: usize = 3;
const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M";

#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("file name {0:?} does not start with a customer id")]
    InvalidFileName(String),
    #[error("content is not valid utf8: {0}")]
    Decode(#[from] FromUtf8Error),
    #[error("expected 3 header lines, found {0}")]
    MissingHeader(usize),
    #[error("column header has no {0:?} column")]
    MissingColumn(&'static str),
    #[error("line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid device timestamp {value:?}: {source}")]
    Timestamp {
        line: usize,
        value: String,
        source: jiff::Error,
    },
    #[error("line {line}: invalid record type {value:?}")]
    RecordType { line: usize, value: String },
    #[error("storing readings: {0}")]
    Store(#[from] glucose_db::Error),
}

impl ImportError {
    /// Whether the error stems from the upload request itself rather than its content or storage.
    pub fn is_validation(&self) -> bool {
        matches!(self, ImportError::InvalidFileName(_))
    }
}

/// Imports one export file for the customer named by the file name.
#[tracing::instrument(skip(store, content), fields(bytes = content.len()))]
pub async fn run(
    store: &glucose_db::Store,
    file_name: &str,
    content: Vec<u8>,
) -> Result<ImportSummary, ImportError> {
    let user_id = customer_id(file_name)?;
    let rows = parse(&String::from_utf8(content)?)?;
    tracing::debug!(user_id, rows = rows.len(), "parsed export");
    let summary = store.import_readings(user_id, rows).await?;
    tracing::info!(
        user_id,
        readings = summary.readings_created,
        devices = summary.devices,
        customer_created = summary.customer_created,
        "imported export"
    );
    Ok(summary)
}

/// The customer id is the file name up to its first period.
pub fn customer_id(file_name: &str) -> Result<&str, ImportError> {
    match file_name.split('.').next() {
        Some(user_id) if !user_id.trim().is_empty() => Ok(user_id),
        _ => Err(ImportError::InvalidFileName(file_name.to_owned())),
    }
}

pub fn parse(content: &str) -> Result<Vec<ImportRow>, ImportError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content.lines();
    let mut header = None;
    for found in 0..HEADER_LINES {
        header = Some(lines.next().ok_or(ImportError::MissingHeader(found))?);
    }
    let layout = Layout::from_header(header.unwrap_or_default())?;
    lines
        .enumerate()
        .map(|(index, line)| (index + HEADER_LINES + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| layout.row(number, line))
        .collect()
}

/// Strict digits only - anything else, signs and decimal points included, is absent.
pub fn integer(value: &str) -> Option<i32> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Column {
    DeviceName,
    SerialNumber,
    DeviceTimestamp,
    RecordType,
    GlucoseHistory,
    GlucoseScan,
    NonNumericRapidActingInsulin,
    RapidActingInsulin,
    NonNumericFoodData,
    CarbohydratesGrams,
    CarbohydratesPortions,
    NonNumericDepotInsulin,
    DepotInsulin,
    Notes,
    GlucoseTestStrips,
    Ketone,
    MealInsulin,
    CorrectiveInsulin,
    InsulinChangeByUser,
}

/// Export order of the columns.
const COLUMNS: [Column; 19] = [
    Column::DeviceName,
    Column::SerialNumber,
    Column::DeviceTimestamp,
    Column::RecordType,
    Column::GlucoseHistory,
    Column::GlucoseScan,
    Column::NonNumericRapidActingInsulin,
    Column::RapidActingInsulin,
    Column::NonNumericFoodData,
    Column::CarbohydratesGrams,
    Column::CarbohydratesPortions,
    Column::NonNumericDepotInsulin,
    Column::DepotInsulin,
    Column::Notes,
    Column::GlucoseTestStrips,
    Column::Ketone,
    Column::MealInsulin,
    Column::CorrectiveInsulin,
    Column::InsulinChangeByUser,
];

impl Column {
    /// Titles as written by the German LibreLink export and the English LibreView export,
    /// without the glucose unit suffix.
    fn titles(self) -> &'static [&'static str] {
        use Column::*;
        match self {
            DeviceName => &["Gerät", "Device"],
            SerialNumber => &["Seriennummer", "Serial Number"],
            DeviceTimestamp => &["Gerätezeitstempel", "Device Timestamp"],
            RecordType => &["Aufzeichnungstyp", "Record Type"],
            GlucoseHistory => &["Glukosewert-Verlauf", "Historic Glucose"],
            GlucoseScan => &["Glukose-Scan", "Scan Glucose"],
            NonNumericRapidActingInsulin => &[
                "Nicht numerisches schnellwirkendes Insulin",
                "Non-numeric Rapid-Acting Insulin",
            ],
            RapidActingInsulin => &[
                "Schnellwirkendes Insulin (Einheiten)",
                "Rapid-Acting Insulin (units)",
            ],
            NonNumericFoodData => &["Nicht numerische Nahrungsdaten", "Non-numeric Food"],
            CarbohydratesGrams => &["Kohlenhydrate (Gramm)", "Carbohydrates (grams)"],
            CarbohydratesPortions => &["Kohlenhydrate (Portionen)", "Carbohydrates (servings)"],
            NonNumericDepotInsulin => &[
                "Nicht numerisches Depotinsulin",
                "Non-numeric Long-Acting Insulin",
            ],
            DepotInsulin => &["Depotinsulin (Einheiten)", "Long-Acting Insulin (units)"],
            Notes => &["Notizen", "Notes"],
            GlucoseTestStrips => &["Glukose-Teststreifen", "Strip Glucose"],
            Ketone => &["Keton", "Ketone"],
            MealInsulin => &["Mahlzeiteninsulin (Einheiten)", "Meal Insulin (units)"],
            CorrectiveInsulin => &["Korrekturinsulin (Einheiten)", "Correction Insulin (units)"],
            InsulinChangeByUser => &[
                "Insulin-Änderung durch Anwender (Einheiten)",
                "User Change Insulin (units)",
            ],
        }
    }

    fn matches(self, title: &str) -> bool {
        let title = title.trim().trim_matches('"');
        let title = ["mg/dL", "mmol/L"]
            .iter()
            .find_map(|unit| title.strip_suffix(unit))
            .map(str::trim_end)
            .unwrap_or(title);
        self.titles().iter().any(|known| known.eq_ignore_ascii_case(title))
    }
}

/// Position of every column in the export, plus the number of fields each line must have.
#[derive(Debug)]
struct Layout {
    positions: [usize; COLUMNS.len()],
    width: usize,
}

impl Layout {
    /// Locates columns by title. A header naming none of the known columns (another export
    /// language, for one) is taken to be in export order.
    fn from_header(header: &str) -> Result<Self, ImportError> {
        let titles = header.split(',').collect::<Vec<_>>();
        let recognized = titles
            .iter()
            .any(|title| COLUMNS.iter().any(|column| column.matches(title)));
        if !recognized {
            return Ok(Self::export_order());
        }
        let mut positions = [0; COLUMNS.len()];
        for (slot, column) in positions.iter_mut().zip(COLUMNS) {
            *slot = titles
                .iter()
                .position(|title| column.matches(title))
                .ok_or(ImportError::MissingColumn(column.titles()[0]))?;
        }
        Ok(Self {
            positions,
            width: titles.len(),
        })
    }

    fn export_order() -> Self {
        let mut positions = [0; COLUMNS.len()];
        for (index, slot) in positions.iter_mut().enumerate() {
            *slot = index;
        }
        Self {
            positions,
            width: COLUMNS.len(),
        }
    }

    fn row(&self, line: usize, content: &str) -> Result<ImportRow, ImportError> {
        let fields = content.trim_end_matches(['\r', '\n']).split(',').collect::<Vec<_>>();
        if fields.len() != self.width {
            return Err(ImportError::ColumnCount {
                line,
                expected: self.width,
                found: fields.len(),
            });
        }
        let field = |column: Column| fields[self.positions[column as usize]];
        let number = |column: Column| integer(field(column));
        let text = |column: Column| Some(field(column).to_owned());

        let raw_timestamp = field(Column::DeviceTimestamp);
        let device_timestamp = DateTime::strptime(TIMESTAMP_FORMAT, raw_timestamp.trim())
            .map_err(|source| ImportError::Timestamp {
                line,
                value: raw_timestamp.to_owned(),
                source,
            })?;
        let record_type = number(Column::RecordType).ok_or_else(|| ImportError::RecordType {
            line,
            value: field(Column::RecordType).to_owned(),
        })?;

        Ok(ImportRow {
            device: DeviceKey {
                device_name: field(Column::DeviceName).to_owned(),
                serial_number: field(Column::SerialNumber).to_owned(),
            },
            values: ReadingValues {
                device_timestamp,
                record_type,
                glucose_history: number(Column::GlucoseHistory),
                glucose_scan: number(Column::GlucoseScan),
                non_numeric_rapid_acting_insulin: text(Column::NonNumericRapidActingInsulin),
                rapid_acting_insulin: number(Column::RapidActingInsulin),
                non_numeric_food_data: text(Column::NonNumericFoodData),
                carbohydrates_grams: number(Column::CarbohydratesGrams),
                carbohydrates_portions: number(Column::CarbohydratesPortions),
                non_numeric_depot_insulin: text(Column::NonNumericDepotInsulin),
                depot_insulin: number(Column::DepotInsulin),
                notes: text(Column::Notes),
                glucose_test_strips: number(Column::GlucoseTestStrips),
                ketone: number(Column::Ketone),
                meal_insulin: number(Column::MealInsulin),
                corrective_insulin: number(Column::CorrectiveInsulin),
                insulin_change_by_user: number(Column::InsulinChangeByUser),
            },
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jiff::civil::date;

    pub(crate) const GERMAN_HEADER: &str = "Gerät,Seriennummer,Gerätezeitstempel,Aufzeichnungstyp,\
        Glukosewert-Verlauf mg/dL,Glukose-Scan mg/dL,Nicht numerisches schnellwirkendes Insulin,\
        Schnellwirkendes Insulin (Einheiten),Nicht numerische Nahrungsdaten,Kohlenhydrate (Gramm),\
        Kohlenhydrate (Portionen),Nicht numerisches Depotinsulin,Depotinsulin (Einheiten),Notizen,\
        Glukose-Teststreifen mg/dL,Keton mmol/L,Mahlzeiteninsulin (Einheiten),\
        Korrekturinsulin (Einheiten),Insulin-Änderung durch Anwender (Einheiten)";

    pub(crate) const SERIAL: &str = "e09bb0f0-018b-429b-94c7-62bb306a0136";

    /// Export with 14 readings, one of them with every optional column populated.
    pub(crate) fn librelink_export() -> String {
        let rows = [
            "09:40,0,139,,,,,,,,,,,,,,",
            "09:55,0,138,,,,,,,,,,,,,,",
            "10:10,0,140,,,,,,,,,,,,,,",
            "10:25,0,149,,,,,,,,,,,,,,",
            "10:40,0,155,,,,,,,,,,,,,,",
            "10:55,0,153,,,,,,,,,,,,,,",
            "11:10,0,151,,,,,,,,,,,,,,",
            "11:25,0,148,33,55,66,66,66,66,55,66,77,33,66,22,66,",
            "11:40,0,144,,,,100,,,,,,,,,,",
            "11:55,0,145,,,,,,,,,,,,,,",
            "12:10,0,143,,,,,,,,,,,,,,",
            "12:25,0,139,,,,,,,,,,,,,,",
            "12:40,0,136,,,,,,,,,,,,,,",
            "12:55,0,132,,,,,,,,,,,,,,",
        ];
        let mut export = format!(
            "Glukose-Werte,Erstellt am,25-02-2021 09:55 UTC,Erstellt von,ccc\n\n{GERMAN_HEADER}\n"
        );
        for row in rows {
            export.push_str(&format!("FreeStyle LibreLink,{SERIAL},10-02-2021 {row}\n"));
        }
        export
    }

    #[test]
    fn it_coerces_only_plain_digit_strings_to_integers() {
        assert_eq!(integer("42"), Some(42));
        assert_eq!(integer("007"), Some(7));
        assert_eq!(integer(""), None);
        assert_eq!(integer("12.5"), None);
        assert_eq!(integer("-3"), None);
        assert_eq!(integer("+3"), None);
        assert_eq!(integer("abc"), None);
        assert_eq!(integer(" 4"), None);
        assert_eq!(integer("99999999999"), None, "overflow should be absent too");
    }

    #[test]
    fn it_derives_the_customer_id_from_the_file_name() {
        assert_eq!(customer_id("user1.csv").unwrap(), "user1");
        assert_eq!(customer_id("user1.export.csv").unwrap(), "user1");
        assert_eq!(customer_id("user1").unwrap(), "user1");
        assert!(matches!(
            customer_id(".csv"),
            Err(ImportError::InvalidFileName(_))
        ));
        assert!(matches!(customer_id(""), Err(ImportError::InvalidFileName(_))));
    }

    #[test]
    fn it_parses_every_data_line_after_the_three_header_lines() {
        let rows = parse(&librelink_export()).expect("should parse export");
        assert_eq!(rows.len(), 14);
        assert!(rows.iter().all(|r| r.device
            == DeviceKey {
                device_name: "FreeStyle LibreLink".to_owned(),
                serial_number: SERIAL.to_owned(),
            }));
        assert_eq!(rows[0].values.device_timestamp, date(2021, 2, 10).at(9, 40, 0, 0));
        assert_eq!(rows[13].values.device_timestamp, date(2021, 2, 10).at(12, 55, 0, 0));
        assert_eq!(rows[0].values.glucose_history, Some(139));
        assert_eq!(rows[0].values.record_type, 0);
    }

    #[test]
    fn it_maps_a_fully_populated_row_to_every_field() {
        let rows = parse(&librelink_export()).expect("should parse export");
        let values = &rows[7].values;
        assert_eq!(values.glucose_history, Some(148));
        assert_eq!(values.glucose_scan, Some(33));
        assert_eq!(values.non_numeric_rapid_acting_insulin.as_deref(), Some("55"));
        assert_eq!(values.rapid_acting_insulin, Some(66));
        assert_eq!(values.non_numeric_food_data.as_deref(), Some("66"));
        assert_eq!(values.carbohydrates_grams, Some(66));
        assert_eq!(values.carbohydrates_portions, Some(66));
        assert_eq!(values.non_numeric_depot_insulin.as_deref(), Some("55"));
        assert_eq!(values.depot_insulin, Some(66));
        assert_eq!(values.notes.as_deref(), Some("77"));
        assert_eq!(values.glucose_test_strips, Some(33));
        assert_eq!(values.ketone, Some(66));
        assert_eq!(values.meal_insulin, Some(22));
        assert_eq!(values.corrective_insulin, Some(66));
        assert_eq!(values.insulin_change_by_user, None);
    }

    #[test]
    fn it_keeps_blank_annotations_verbatim_and_blank_numbers_absent() {
        let rows = parse(&librelink_export()).expect("should parse export");
        let values = &rows[0].values;
        assert_eq!(values.glucose_scan, None);
        assert_eq!(values.rapid_acting_insulin, None);
        assert_eq!(values.ketone, None);
        assert_eq!(values.non_numeric_rapid_acting_insulin.as_deref(), Some(""));
        assert_eq!(values.non_numeric_food_data.as_deref(), Some(""));
        assert_eq!(values.notes.as_deref(), Some(""));
        assert_eq!(rows[8].values.non_numeric_food_data.as_deref(), Some("100"));
    }

    #[test]
    fn it_accepts_crlf_line_endings_and_a_byte_order_mark() {
        let export = format!("\u{feff}{}", librelink_export().replace('\n', "\r\n"));
        let rows = parse(&export).expect("should parse export");
        assert_eq!(rows.len(), 14);
        assert_eq!(rows[13].values.insulin_change_by_user, None);
        assert_eq!(rows[13].values.corrective_insulin, None);
    }

    #[test]
    fn it_accepts_an_export_without_data_lines() {
        let export = format!("meta\n\n{GERMAN_HEADER}");
        assert!(parse(&export).expect("should parse export").is_empty());
    }

    #[test]
    fn it_rejects_an_export_with_fewer_than_three_lines() {
        assert!(matches!(parse(""), Err(ImportError::MissingHeader(0))));
        assert!(matches!(parse("meta\n\n"), Err(ImportError::MissingHeader(2))));
    }

    #[test]
    fn it_rejects_a_header_missing_a_column() {
        let header = GERMAN_HEADER.replace("Keton mmol/L", "Something else");
        let export = format!("meta\n\n{header}\n");
        assert!(matches!(
            parse(&export),
            Err(ImportError::MissingColumn("Keton"))
        ));
    }

    #[test]
    fn it_reads_columns_in_export_order_below_an_unknown_header() {
        let export = format!(
            "meta\n\nanything,at,all\nFreeStyle LibreLink,{SERIAL},10-02-2021 09:40,0,139,,,,,,,,,,,,,,\n\
            FreeStyle LibreLink,{SERIAL},10-02-2021 09:55,1,,58,,,,,,,,,,,,,\n"
        );
        let rows = parse(&export).expect("should parse export");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].device.serial_number, SERIAL);
        assert_eq!(rows[0].values.device_timestamp, date(2021, 2, 10).at(9, 40, 0, 0));
        assert_eq!(rows[0].values.glucose_history, Some(139));
        assert_eq!(rows[1].values.record_type, 1);
        assert_eq!(rows[1].values.glucose_scan, Some(58));
    }

    #[test]
    fn it_reads_a_french_export_in_export_order() {
        let header = "Appareil,Numéro de série,Horodatage de l'appareil,Type d'enregistrement,\
            Historique de la glycémie mg/dL,Numérisation de la glycémie mg/dL";
        let export = librelink_export().replace(GERMAN_HEADER, header);
        let rows = parse(&export).expect("should parse export");
        assert_eq!(rows.len(), 14);
        assert_eq!(rows[7].values.glucose_scan, Some(33));
    }

    #[test]
    fn it_rejects_a_line_with_the_wrong_number_of_columns_below_an_unknown_header() {
        let export = format!("meta\n\nanything\nFreeStyle LibreLink,{SERIAL},10-02-2021 09:40,0\n");
        assert!(matches!(
            parse(&export),
            Err(ImportError::ColumnCount {
                line: 4,
                expected: 19,
                found: 4
            })
        ));
    }

    #[test]
    fn it_rejects_a_line_with_the_wrong_number_of_columns() {
        let export = format!(
            "meta\n\n{GERMAN_HEADER}\nFreeStyle LibreLink,{SERIAL},10-02-2021 09:40,0,139\n"
        );
        assert!(matches!(
            parse(&export),
            Err(ImportError::ColumnCount {
                line: 4,
                expected: 19,
                found: 5
            })
        ));
    }

    #[test]
    fn it_rejects_an_unparseable_timestamp_or_record_type() {
        let export = format!(
            "meta\n\n{GERMAN_HEADER}\nFreeStyle LibreLink,{SERIAL},2021-02-10 09:40,0,139,,,,,,,,,,,,,,\n"
        );
        assert!(matches!(
            parse(&export),
            Err(ImportError::Timestamp { line: 4, .. })
        ));
        let export = format!(
            "meta\n\n{GERMAN_HEADER}\nFreeStyle LibreLink,{SERIAL},10-02-2021 09:40,x,139,,,,,,,,,,,,,,\n"
        );
        assert!(matches!(
            parse(&export),
            Err(ImportError::RecordType { line: 4, .. })
        ));
    }

    #[test]
    fn it_locates_columns_by_title_in_an_english_reordered_export() {
        let header = "Serial Number,Device,Device Timestamp,Record Type,Historic Glucose mmol/L,\
            Scan Glucose mmol/L,Non-numeric Rapid-Acting Insulin,Rapid-Acting Insulin (units),\
            Non-numeric Food,Carbohydrates (grams),Carbohydrates (servings),\
            Non-numeric Long-Acting Insulin,Long-Acting Insulin (units),Notes,\
            Strip Glucose mmol/L,Ketone mmol/L,Meal Insulin (units),Correction Insulin (units),\
            User Change Insulin (units)";
        let export = format!(
            "meta\n\n{header}\nABC-1,FreeStyle Libre 2,01-03-2024 07:05,1,,7.5,,4,,,,,,,,,,,\n"
        );
        let rows = parse(&export).expect("should parse export");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device.serial_number, "ABC-1");
        assert_eq!(rows[0].device.device_name, "FreeStyle Libre 2");
        assert_eq!(rows[0].values.record_type, 1);
        assert_eq!(rows[0].values.glucose_history, None);
        assert_eq!(rows[0].values.glucose_scan, None, "decimals are not representable");
        assert_eq!(rows[0].values.rapid_acting_insulin, Some(4));
    }

    #[test]
    fn it_skips_blank_lines_between_readings() {
        let export = librelink_export().replacen("\nFreeStyle", "\n\nFreeStyle", 2);
        assert_eq!(parse(&export).expect("should parse export").len(), 14);
    }

    #[test]
    fn it_reports_invalid_utf8_as_decode_error() {
        let err = String::from_utf8(vec![0xff, 0xfe, 0x00]).map_err(ImportError::from);
        assert!(matches!(err, Err(ImportError::Decode(_))));
    }
}
