use crate::responses::{internal_error, not_found, FieldErrors};
use axum::{
    extract::{rejection::PathRejection, Path, Query, State},
    http::{header::HOST, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use glucose_db::models::{Page, ReadingFilter, ReadingOrder, ReadingRecord};
use jiff::{
    civil::{Date, DateTime, Time},
    tz::TimeZone,
    Timestamp,
};

#[derive(Debug, Default, serde::Deserialize)]
pub struct LevelsQuery {
    user_id: Option<String>,
    start_timestamp: Option<String>,
    stop_timestamp: Option<String>,
    ordering: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct Level {
    id: i32,
    user: LevelUser,
    device: Option<LevelDevice>,
    #[serde(serialize_with = "as_utc")]
    device_timestamp: DateTime,
    record_type: i32,
    glucose_history: Option<i32>,
    glucose_scan: Option<i32>,
    non_numeric_rapid_acting_insulin: Option<String>,
    rapid_acting_insulin: Option<i32>,
    non_numeric_food_data: Option<String>,
    carbohydrates_grams: Option<i32>,
    carbohydrates_portions: Option<i32>,
    non_numeric_depot_insulin: Option<String>,
    depot_insulin: Option<i32>,
    notes: Option<String>,
    glucose_test_strips: Option<i32>,
    ketone: Option<i32>,
    meal_insulin: Option<i32>,
    corrective_insulin: Option<i32>,
    insulin_change_by_user: Option<i32>,
}

#[derive(Debug, serde::Serialize)]
pub struct LevelUser {
    user_id: String,
}

#[derive(Debug, serde::Serialize)]
pub struct LevelDevice {
    serial_number: String,
    device_name: String,
}

impl From<ReadingRecord> for Level {
    fn from(ReadingRecord { reading, device }: ReadingRecord) -> Self {
        Self {
            id: reading.id,
            device_timestamp: reading.timestamp(),
            user: LevelUser {
                user_id: reading.user_id,
            },
            device: device.map(|device| LevelDevice {
                serial_number: device.serial_number,
                device_name: device.device_name,
            }),
            record_type: reading.record_type,
            glucose_history: reading.glucose_history,
            glucose_scan: reading.glucose_scan,
            non_numeric_rapid_acting_insulin: reading.non_numeric_rapid_acting_insulin,
            rapid_acting_insulin: reading.rapid_acting_insulin,
            non_numeric_food_data: reading.non_numeric_food_data,
            carbohydrates_grams: reading.carbohydrates_grams,
            carbohydrates_portions: reading.carbohydrates_portions,
            non_numeric_depot_insulin: reading.non_numeric_depot_insulin,
            depot_insulin: reading.depot_insulin,
            notes: reading.notes,
            glucose_test_strips: reading.glucose_test_strips,
            ketone: reading.ketone,
            meal_insulin: reading.meal_insulin,
            corrective_insulin: reading.corrective_insulin,
            insulin_change_by_user: reading.insulin_change_by_user,
        }
    }
}

/// Device timestamps carry no zone - they are rendered as if they were UTC.
fn as_utc<S: serde::Serializer>(datetime: &DateTime, serializer: S) -> Result<S::Ok, S::Error> {
    let timestamp = datetime
        .to_zoned(TimeZone::UTC)
        .map_err(serde::ser::Error::custom)?
        .timestamp();
    serializer.collect_str(&timestamp)
}

/// Paged form of the list, returned once a client asks for `limit` or `offset`.
#[derive(Debug, serde::Serialize)]
pub struct PaginatedLevels {
    count: i64,
    next: Option<String>,
    previous: Option<String>,
    results: Vec<Level>,
}

pub async fn list(
    State(app_state): State<crate::AppState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<LevelsQuery>,
) -> Response {
    let paginated = query.is_paginated();
    let (filter, page) = match query.into_filter(app_state.pagination) {
        Ok(parsed) => parsed,
        Err(errors) => return errors.into_response(),
    };
    let levels = match app_state.store.list_readings(&filter, page).await {
        Ok(records) => records.into_iter().map(Level::from).collect::<Vec<_>>(),
        Err(err) => return internal_error(&err),
    };
    if !paginated {
        return (StatusCode::OK, Json(levels)).into_response();
    }
    let count = match app_state.store.count_readings(&filter).await {
        Ok(count) => count,
        Err(err) => return internal_error(&err),
    };
    let links = PageLinks::new(&uri, &headers);
    let next = (page.offset + page.limit < count)
        .then(|| links.to(page.limit, page.offset + page.limit));
    let previous =
        (page.offset > 0).then(|| links.to(page.limit, (page.offset - page.limit).max(0)));
    (
        StatusCode::OK,
        Json(PaginatedLevels {
            count,
            next,
            previous,
            results: levels,
        }),
    )
        .into_response()
}

/// Builds absolute page URLs from the request, keeping every parameter except the page ones.
struct PageLinks {
    base: String,
    params: Vec<String>,
}

impl PageLinks {
    fn new(uri: &Uri, headers: &HeaderMap) -> Self {
        let base = match headers.get(HOST).and_then(|host| host.to_str().ok()) {
            Some(host) => format!("http://{host}{}", uri.path()),
            None => uri.path().to_owned(),
        };
        let params = uri
            .query()
            .unwrap_or_default()
            .split('&')
            .filter(|param| !param.is_empty())
            .filter(|param| {
                let key = param.split('=').next().unwrap_or_default();
                key != "limit" && key != "offset"
            })
            .map(str::to_owned)
            .collect();
        Self { base, params }
    }

    fn to(&self, limit: i64, offset: i64) -> String {
        let mut params = self.params.clone();
        params.push(format!("limit={limit}"));
        if offset > 0 {
            params.push(format!("offset={offset}"));
        }
        format!("{}?{}", self.base, params.join("&"))
    }
}

pub async fn retrieve(
    State(app_state): State<crate::AppState>,
    reading_id: Result<Path<i32>, PathRejection>,
) -> Response {
    let Ok(Path(reading_id)) = reading_id else {
        return not_found();
    };
    match app_state.store.load_reading(reading_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(Level::from(record))).into_response(),
        Ok(None) => not_found(),
        Err(err) => internal_error(&err),
    }
}

impl LevelsQuery {
    fn is_paginated(&self) -> bool {
        [&self.limit, &self.offset]
            .into_iter()
            .any(|value| value.as_deref().is_some_and(|value| !value.trim().is_empty()))
    }

    fn into_filter(
        self,
        pagination: crate::config::PaginationConfig,
    ) -> Result<(ReadingFilter, Page), FieldErrors> {
        let mut errors = FieldErrors::default();
        let mut bound = |field: &'static str, value: Option<String>| {
            let value = present(value)?;
            let parsed = parse_timestamp(&value);
            if parsed.is_none() {
                errors.add(field, "Enter a valid date/time.");
            }
            parsed
        };
        let start = bound("start_timestamp", self.start_timestamp);
        let stop = bound("stop_timestamp", self.stop_timestamp);
        if !errors.is_empty() {
            return Err(errors);
        }
        let order = match present(self.ordering).as_deref() {
            Some("device_timestamp") => ReadingOrder::TimestampAscending,
            Some("-device_timestamp") => ReadingOrder::TimestampDescending,
            _ => ReadingOrder::Id,
        };
        let limit = present(self.limit)
            .and_then(|limit| limit.parse::<u32>().ok())
            .filter(|limit| *limit > 0)
            .unwrap_or(pagination.default_limit)
            .min(pagination.max_limit);
        let offset = present(self.offset)
            .and_then(|offset| offset.parse::<u32>().ok())
            .unwrap_or(0);
        Ok((
            ReadingFilter {
                user_id: present(self.user_id),
                start,
                stop,
                order,
            },
            Page {
                limit: limit.into(),
                offset: offset.into(),
            },
        ))
    }
}

/// Empty query parameters impose no constraint.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Accepts an instant with offset (converted to UTC), a civil datetime with `T` or space
/// separator, or a bare date meaning midnight.
pub fn parse_timestamp(value: &str) -> Option<DateTime> {
    let value = value.trim();
    let value = match value.as_bytes().get(10) {
        Some(b' ') => format!("{}T{}", &value[..10], &value[11..]),
        _ => value.to_owned(),
    };
    value
        .parse::<Timestamp>()
        .map(|timestamp| timestamp.to_zoned(TimeZone::UTC).datetime())
        .or_else(|_| value.parse::<DateTime>())
        .or_else(|_| value.parse::<Date>().map(|date| date.to_datetime(Time::midnight())))
        .ok()
}
