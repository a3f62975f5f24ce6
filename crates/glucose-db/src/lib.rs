use diesel::prelude::*;
use diesel_async::{
    pooled_connection::{
        mobc::{Builder, Pool},
        AsyncDieselConnectionManager,
    },
    scoped_futures::ScopedFutureExt,
    AsyncConnection, AsyncPgConnection, RunQueryDsl,
};
use std::{
    collections::{BTreeSet, HashMap},
    time::Duration,
};

pub mod models;
mod schema;

/// Rows per INSERT statement - keeps a bulk import well below PostgreSQL's bind parameter limit.
const INSERT_CHUNK_SIZE: usize = 1000;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("getting connection from pool: {0}")]
    GetConnectionPool(#[from] mobc::Error<diesel_async::pooled_connection::PoolError>),
    #[error("result failure: {0}")]
    Result(#[from] diesel::result::Error),
    #[error("device {serial_number} is registered as {existing:?}, not {requested:?}")]
    DeviceNameConflict {
        serial_number: String,
        existing: String,
        requested: String,
    },
    #[error("Not Found")]
    NotFound,
}

#[derive(Clone, Debug)]
pub struct Store {
    pool: Pool<AsyncPgConnection>,
}

#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub db_url: String,
    max_open: u64,
    max_idle: u64,
    #[serde(with = "humantime_serde", default)]
    max_lifetime: Option<Duration>,
    #[serde(with = "humantime_serde", default)]
    max_idle_lifetime: Option<Duration>,
    #[serde(with = "humantime_serde")]
    timeout_for_get: Duration,
}

impl Config {
    /// Pool settings suitable for tests and tools that just need a working connection.
    pub fn with_db_url(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            max_open: 4,
            max_idle: 2,
            max_lifetime: None,
            max_idle_lifetime: None,
            timeout_for_get: Duration::from_secs(5),
        }
    }
}

/// Builds the store - connections are only opened once the first operation needs one.
pub fn create(config: &Config) -> Store {
    Store {
        pool: create_pool(config),
    }
}

fn create_pool(config: &Config) -> mobc::Pool<AsyncDieselConnectionManager<AsyncPgConnection>> {
    let builder = Builder::new()
        .max_open(config.max_open)
        .max_idle(config.max_idle)
        .max_lifetime(
            config
                .max_lifetime
                .map(|v| v.max(Duration::from_secs(3600))),
        )
        .max_idle_lifetime(
            config
                .max_idle_lifetime
                .map(|v| v.max(Duration::from_secs(900))),
        )
        .get_timeout(Some(config.timeout_for_get.max(Duration::from_secs(5))));
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.db_url);
    builder.build(manager)
}

impl Store {
    async fn connection(
        &self,
    ) -> Result<mobc::Connection<AsyncDieselConnectionManager<AsyncPgConnection>>, Error> {
        self.pool.get().await.map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_or_create_customer(
        &self,
        user_id: &str,
    ) -> Result<(models::Customer, bool), Error> {
        let mut conn = self.connection().await?;
        get_or_create_customer(&mut conn, user_id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_or_create_device(
        &self,
        device_name: &str,
        serial_number: &str,
    ) -> Result<(models::Device, bool), Error> {
        let mut conn = self.connection().await?;
        get_or_create_device(&mut conn, device_name, serial_number).await
    }

    /// Creates a single reading, resolving its customer and device the same way an import does.
    #[tracing::instrument(skip(self, values))]
    pub async fn create_reading(
        &self,
        user_id: &str,
        device: Option<&models::DeviceKey>,
        values: models::ReadingValues,
    ) -> Result<models::GlucoseReading, Error> {
        self.connection()
            .await?
            .transaction(|conn| {
                use schema::glucose::glucose_reading;
                async move {
                    get_or_create_customer(conn, user_id).await?;
                    let device_serial_number = match device {
                        Some(key) => Some(
                            get_or_create_device(conn, &key.device_name, &key.serial_number)
                                .await?
                                .0
                                .serial_number,
                        ),
                        None => None,
                    };
                    let new_reading = models::NewGlucoseReading::new(
                        user_id.to_owned(),
                        device_serial_number,
                        values,
                    );
                    diesel::insert_into(glucose_reading::table)
                        .values(new_reading)
                        .returning(models::GlucoseReading::as_returning())
                        .get_result(conn)
                        .await
                        .map_err(Error::from)
                }
                .scope_boxed()
            })
            .await
    }

    /// Persists a whole parsed export for one customer in a single transaction.
    ///
    /// The customer and every distinct device are resolved with get-or-create first, then all
    /// readings are bulk inserted. Nothing is persisted if any step fails.
    #[tracing::instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn import_readings(
        &self,
        user_id: &str,
        rows: Vec<models::ImportRow>,
    ) -> Result<models::ImportSummary, Error> {
        self.connection()
            .await?
            .transaction(|conn| {
                use schema::glucose::glucose_reading;
                async move {
                    let (_, customer_created) = get_or_create_customer(conn, user_id).await?;
                    // Devices are resolved in key order so concurrent imports lock them in the
                    // same sequence.
                    let keys = rows
                        .iter()
                        .map(|row| &row.device)
                        .collect::<BTreeSet<_>>();
                    let mut devices = HashMap::with_capacity(keys.len());
                    for key in keys {
                        let (resolved, _) =
                            get_or_create_device(conn, &key.device_name, &key.serial_number)
                                .await?;
                        devices.insert(key.clone(), resolved.serial_number);
                    }
                    let new_readings = rows
                        .into_iter()
                        .map(|models::ImportRow { device, values }| {
                            models::NewGlucoseReading::new(
                                user_id.to_owned(),
                                devices.get(&device).cloned(),
                                values,
                            )
                        })
                        .collect::<Vec<_>>();
                    let mut readings_created = 0;
                    for chunk in new_readings.chunks(INSERT_CHUNK_SIZE) {
                        readings_created += diesel::insert_into(glucose_reading::table)
                            .values(chunk)
                            .execute(conn)
                            .await?;
                    }
                    Ok::<_, Error>(models::ImportSummary {
                        customer_created,
                        devices: devices.len(),
                        readings_created,
                    })
                }
                .scope_boxed()
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_readings(
        &self,
        filter: &models::ReadingFilter,
        page: models::Page,
    ) -> Result<Vec<models::ReadingRecord>, Error> {
        use schema::glucose::{device, glucose_reading};
        let mut conn = self.connection().await?;
        let mut query = glucose_reading::table
            .left_join(device::table)
            .select((
                models::GlucoseReading::as_select(),
                Option::<models::Device>::as_select(),
            ))
            .into_boxed();
        if let Some(user_id) = &filter.user_id {
            query = query.filter(glucose_reading::user_id.eq(user_id.clone()));
        }
        if let Some(start) = filter.start {
            query = query.filter(
                glucose_reading::device_timestamp.ge(jiff_diesel::DateTime::from(start)),
            );
        }
        if let Some(stop) = filter.stop {
            query = query
                .filter(glucose_reading::device_timestamp.le(jiff_diesel::DateTime::from(stop)));
        }
        query = match filter.order {
            models::ReadingOrder::Id => query.order(glucose_reading::id.asc()),
            models::ReadingOrder::TimestampAscending => query.order((
                glucose_reading::device_timestamp.asc(),
                glucose_reading::id.asc(),
            )),
            models::ReadingOrder::TimestampDescending => query.order((
                glucose_reading::device_timestamp.desc(),
                glucose_reading::id.asc(),
            )),
        };
        let records = query
            .limit(page.limit)
            .offset(page.offset)
            .load::<(models::GlucoseReading, Option<models::Device>)>(&mut conn)
            .await?;
        Ok(records
            .into_iter()
            .map(|(reading, device)| models::ReadingRecord { reading, device })
            .collect())
    }

    /// Number of readings `list_readings` can page through for this filter.
    #[tracing::instrument(skip(self))]
    pub async fn count_readings(&self, filter: &models::ReadingFilter) -> Result<i64, Error> {
        use schema::glucose::glucose_reading;
        let mut conn = self.connection().await?;
        let mut query = glucose_reading::table.count().into_boxed();
        if let Some(user_id) = &filter.user_id {
            query = query.filter(glucose_reading::user_id.eq(user_id.clone()));
        }
        if let Some(start) = filter.start {
            query = query.filter(
                glucose_reading::device_timestamp.ge(jiff_diesel::DateTime::from(start)),
            );
        }
        if let Some(stop) = filter.stop {
            query = query
                .filter(glucose_reading::device_timestamp.le(jiff_diesel::DateTime::from(stop)));
        }
        query
            .get_result::<i64>(&mut conn)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn load_reading(&self, reading_id: i32) -> Result<Option<models::ReadingRecord>, Error> {
        use schema::glucose::{device, glucose_reading};
        let mut conn = self.connection().await?;
        match glucose_reading::table
            .left_join(device::table)
            .filter(glucose_reading::id.eq(reading_id))
            .select((
                models::GlucoseReading::as_select(),
                Option::<models::Device>::as_select(),
            ))
            .first::<(models::GlucoseReading, Option<models::Device>)>(&mut conn)
            .await
        {
            Ok((reading, device)) => Ok(Some(models::ReadingRecord { reading, device })),
            Err(diesel::result::Error::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_customers(&self) -> Result<Vec<models::Customer>, Error> {
        use schema::glucose::customer::dsl::*;
        let mut conn = self.connection().await?;
        customer
            .order(user_id.asc())
            .select(models::Customer::as_select())
            .load(&mut conn)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_devices(&self) -> Result<Vec<models::Device>, Error> {
        use schema::glucose::device::dsl::*;
        let mut conn = self.connection().await?;
        device
            .order(serial_number.asc())
            .select(models::Device::as_select())
            .load(&mut conn)
            .await
            .map_err(Into::into)
    }

    /// Deletes the customer - the database cascades the delete to all of its readings.
    #[tracing::instrument(skip(self))]
    pub async fn delete_customer(&self, customer_user_id: &str) -> Result<(), Error> {
        use schema::glucose::customer::dsl::*;
        let mut conn = self.connection().await?;
        match diesel::delete(customer.filter(user_id.eq(customer_user_id)))
            .execute(&mut conn)
            .await
        {
            Ok(0) => Err(Error::NotFound),
            Ok(_) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the device - readings that referenced it keep existing with no device.
    #[tracing::instrument(skip(self))]
    pub async fn delete_device(&self, device_serial_number: &str) -> Result<(), Error> {
        use schema::glucose::device::dsl::*;
        let mut conn = self.connection().await?;
        match diesel::delete(device.filter(serial_number.eq(device_serial_number)))
            .execute(&mut conn)
            .await
        {
            Ok(0) => Err(Error::NotFound),
            Ok(_) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

async fn get_or_create_customer<C>(
    conn: &mut C,
    customer_user_id: &str,
) -> Result<(models::Customer, bool), Error>
where
    C: AsyncConnection<Backend = diesel::pg::Pg> + Send + 'static,
{
    use schema::glucose::customer::dsl::*;
    let inserted = diesel::insert_into(customer)
        .values(user_id.eq(customer_user_id))
        .on_conflict(user_id)
        .do_nothing()
        .execute(conn)
        .await?;
    let existing = customer
        .filter(user_id.eq(customer_user_id))
        .select(models::Customer::as_select())
        .first(conn)
        .await?;
    Ok((existing, inserted > 0))
}

async fn get_or_create_device<C>(
    conn: &mut C,
    name: &str,
    serial: &str,
) -> Result<(models::Device, bool), Error>
where
    C: AsyncConnection<Backend = diesel::pg::Pg> + Send + 'static,
{
    use schema::glucose::device::dsl::*;
    let inserted = diesel::insert_into(device)
        .values(models::Device {
            serial_number: serial.to_owned(),
            device_name: name.to_owned(),
        })
        .on_conflict(serial_number)
        .do_nothing()
        .execute(conn)
        .await?;
    let existing = device
        .filter(serial_number.eq(serial))
        .select(models::Device::as_select())
        .first(conn)
        .await?;
    if existing.device_name != name {
        return Err(Error::DeviceNameConflict {
            serial_number: existing.serial_number,
            existing: existing.device_name,
            requested: name.to_owned(),
        });
    }
    Ok((existing, inserted > 0))
}
