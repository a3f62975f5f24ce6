use diesel::prelude::*;

#[derive(Identifiable, Queryable, Selectable, Clone, Debug, PartialEq, Eq)]
#[diesel(table_name = crate::schema::glucose::customer)]
#[diesel(primary_key(user_id))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Customer {
    pub user_id: String,
    pub is_active: bool,
}

#[derive(Identifiable, Queryable, Selectable, Insertable, Clone, Debug, PartialEq, Eq)]
#[diesel(table_name = crate::schema::glucose::device)]
#[diesel(primary_key(serial_number))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Device {
    pub serial_number: String,
    pub device_name: String,
}

#[derive(Identifiable, Queryable, Selectable, Associations, Clone, Debug)]
#[diesel(table_name = crate::schema::glucose::glucose_reading)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(belongs_to(Customer, foreign_key = user_id))]
#[diesel(belongs_to(Device, foreign_key = device_serial_number))]
pub struct GlucoseReading {
    pub id: i32,
    pub user_id: String,
    pub device_serial_number: Option<String>,
    pub device_timestamp: jiff_diesel::DateTime,
    pub record_type: i32,
    pub glucose_history: Option<i32>,
    pub glucose_scan: Option<i32>,
    pub non_numeric_rapid_acting_insulin: Option<String>,
    pub rapid_acting_insulin: Option<i32>,
    pub non_numeric_food_data: Option<String>,
    pub carbohydrates_grams: Option<i32>,
    pub carbohydrates_portions: Option<i32>,
    pub non_numeric_depot_insulin: Option<String>,
    pub depot_insulin: Option<i32>,
    pub notes: Option<String>,
    pub glucose_test_strips: Option<i32>,
    pub ketone: Option<i32>,
    pub meal_insulin: Option<i32>,
    pub corrective_insulin: Option<i32>,
    pub insulin_change_by_user: Option<i32>,
}

impl GlucoseReading {
    /// The naive device timestamp as a civil datetime.
    pub fn timestamp(&self) -> jiff::civil::DateTime {
        self.device_timestamp.to_jiff()
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::glucose::glucose_reading)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewGlucoseReading {
    pub user_id: String,
    pub device_serial_number: Option<String>,
    pub device_timestamp: jiff_diesel::DateTime,
    pub record_type: i32,
    pub glucose_history: Option<i32>,
    pub glucose_scan: Option<i32>,
    pub non_numeric_rapid_acting_insulin: Option<String>,
    pub rapid_acting_insulin: Option<i32>,
    pub non_numeric_food_data: Option<String>,
    pub carbohydrates_grams: Option<i32>,
    pub carbohydrates_portions: Option<i32>,
    pub non_numeric_depot_insulin: Option<String>,
    pub depot_insulin: Option<i32>,
    pub notes: Option<String>,
    pub glucose_test_strips: Option<i32>,
    pub ketone: Option<i32>,
    pub meal_insulin: Option<i32>,
    pub corrective_insulin: Option<i32>,
    pub insulin_change_by_user: Option<i32>,
}

impl NewGlucoseReading {
    pub(crate) fn new(
        user_id: String,
        device_serial_number: Option<String>,
        values: ReadingValues,
    ) -> Self {
        let ReadingValues {
            device_timestamp,
            record_type,
            glucose_history,
            glucose_scan,
            non_numeric_rapid_acting_insulin,
            rapid_acting_insulin,
            non_numeric_food_data,
            carbohydrates_grams,
            carbohydrates_portions,
            non_numeric_depot_insulin,
            depot_insulin,
            notes,
            glucose_test_strips,
            ketone,
            meal_insulin,
            corrective_insulin,
            insulin_change_by_user,
        } = values;
        Self {
            user_id,
            device_serial_number,
            device_timestamp: device_timestamp.into(),
            record_type,
            glucose_history,
            glucose_scan,
            non_numeric_rapid_acting_insulin,
            rapid_acting_insulin,
            non_numeric_food_data,
            carbohydrates_grams,
            carbohydrates_portions,
            non_numeric_depot_insulin,
            depot_insulin,
            notes,
            glucose_test_strips,
            ketone,
            meal_insulin,
            corrective_insulin,
            insulin_change_by_user,
        }
    }
}

/// The measured part of a reading - everything except who owns it and which device produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadingValues {
    pub device_timestamp: jiff::civil::DateTime,
    pub record_type: i32,
    pub glucose_history: Option<i32>,
    pub glucose_scan: Option<i32>,
    pub non_numeric_rapid_acting_insulin: Option<String>,
    pub rapid_acting_insulin: Option<i32>,
    pub non_numeric_food_data: Option<String>,
    pub carbohydrates_grams: Option<i32>,
    pub carbohydrates_portions: Option<i32>,
    pub non_numeric_depot_insulin: Option<String>,
    pub depot_insulin: Option<i32>,
    pub notes: Option<String>,
    pub glucose_test_strips: Option<i32>,
    pub ketone: Option<i32>,
    pub meal_insulin: Option<i32>,
    pub corrective_insulin: Option<i32>,
    pub insulin_change_by_user: Option<i32>,
}

/// Natural key of a device as it appears in an export row. Orders by serial number first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKey {
    pub serial_number: String,
    pub device_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportRow {
    pub device: DeviceKey,
    pub values: ReadingValues,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportSummary {
    pub customer_created: bool,
    pub devices: usize,
    pub readings_created: usize,
}

/// A reading together with the device it references, if that device still exists.
#[derive(Clone, Debug)]
pub struct ReadingRecord {
    pub reading: GlucoseReading,
    pub device: Option<Device>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadingOrder {
    #[default]
    Id,
    TimestampAscending,
    TimestampDescending,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadingFilter {
    pub user_id: Option<String>,
    pub start: Option<jiff::civil::DateTime>,
    pub stop: Option<jiff::civil::DateTime>,
    pub order: ReadingOrder,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}
