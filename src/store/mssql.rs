use std::time::Duration;

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{CatalogStore, StoreError};
use crate::catalog::{Fleet, ImageSlot, Listing, ListingKey, StoredImage};
use crate::config::{SqlAuth, SqlConfig};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SQL Server error numbers for unique constraint and unique index violations.
const UNIQUE_VIOLATIONS: [u32; 2] = [2627, 2601];

type Connection = Client<Compat<TcpStream>>;

/// SQL Server catalog. Opens one TDS connection per operation.
pub struct MssqlStore {
    config: tiberius::Config,
}

impl MssqlStore {
    pub fn new(sql: &SqlConfig) -> Self {
        let mut config = tiberius::Config::new();
        config.host(&sql.server);
        config.port(sql.port);
        config.database(&sql.database);
        config.application_name("carupload");
        config.encryption(EncryptionLevel::Required);
        if sql.trust_cert {
            config.trust_cert();
        }
        match &sql.auth {
            SqlAuth::Password => {
                config.authentication(AuthMethod::sql_server(&sql.user, &sql.password));
            }
            SqlAuth::AadToken(token) => {
                config.authentication(AuthMethod::aad_token(token));
            }
        }
        Self { config }
    }

    #[tracing::instrument(skip(self), err)]
    async fn connect(&self) -> Result<Connection, StoreError> {
        tokio::time::timeout(CONNECT_TIMEOUT, connect_with(self.config.clone()))
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

async fn open(config: tiberius::Config) -> Result<Connection, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    Client::connect(config, tcp.compat_write()).await
}

async fn connect_with(config: tiberius::Config) -> Result<Connection, StoreError> {
    match open(config.clone()).await {
        Ok(client) => Ok(client),
        // Azure SQL gateways redirect to the node hosting the database
        Err(tiberius::error::Error::Routing { host, port }) => {
            tracing::debug!(%host, port, "following sql server redirect");
            let mut routed = config;
            routed.host(&host);
            routed.port(port);
            Ok(open(routed).await?)
        }
        Err(e) => Err(e.into()),
    }
}

fn map_write_error(err: tiberius::error::Error) -> StoreError {
    if let tiberius::error::Error::Server(token) = &err
        && UNIQUE_VIOLATIONS.contains(&token.code())
    {
        return StoreError::Conflict;
    }
    StoreError::Database(err)
}

fn create_table_sql(fleet: Fleet) -> String {
    let table = fleet.table();
    let [first, second] = fleet.powertrain_columns();
    format!(
        "IF NOT EXISTS (SELECT * FROM sysobjects WHERE name='{table}' AND xtype='U')
        BEGIN
            CREATE TABLE {table} (
                {id} INT PRIMARY KEY IDENTITY(1,1),
                {name} NVARCHAR(255) NOT NULL,
                segment_id INT NOT NULL,
                segment_name NVARCHAR(255) NOT NULL,
                model_type NVARCHAR(255) NOT NULL,
                year INT,
                {first} NVARCHAR(255),
                {second} NVARCHAR(255),
                price DECIMAL(10, 2),
                image_data NVARCHAR(MAX),
                front_view NVARCHAR(MAX),
                back_view NVARCHAR(MAX),
                left_side_view NVARCHAR(MAX),
                right_side_view NVARCHAR(MAX),
                CONSTRAINT uq_{table}_segment_model UNIQUE (segment_id, segment_name, model_type)
            );
        END;",
        id = fleet.id_column(),
        name = fleet.name_column(),
    )
}

fn insert_sql(fleet: Fleet) -> String {
    let [first, second] = fleet.powertrain_columns();
    format!(
        "INSERT INTO {table} ({name}, segment_id, segment_name, model_type, year, {first}, {second}, price,
                              image_data, front_view, back_view, left_side_view, right_side_view)
         OUTPUT INSERTED.{id}
         VALUES (@P1, @P2, @P3, @P4, @P5, @P6, @P7, @P8, @P9, @P10, @P11, @P12, @P13)",
        table = fleet.table(),
        name = fleet.name_column(),
        id = fleet.id_column(),
    )
}

#[async_trait]
impl CatalogStore for MssqlStore {
    #[tracing::instrument(skip(self), err)]
    async fn ensure_schema(&self, fleet: Fleet) -> Result<(), StoreError> {
        let mut conn = self.connect().await?;
        conn.simple_query(create_table_sql(fleet))
            .await?
            .into_results()
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), err)]
    async fn exists(&self, fleet: Fleet, key: &ListingKey) -> Result<bool, StoreError> {
        let mut conn = self.connect().await?;
        let sql = format!(
            "SELECT 1 FROM {} WHERE segment_id = @P1 AND segment_name = @P2 AND model_type = @P3",
            fleet.table()
        );
        let row = conn
            .query(
                sql,
                &[
                    &key.segment_id,
                    &key.segment_name.as_str(),
                    &key.model_type.as_str(),
                ],
            )
            .await?
            .into_row()
            .await?;
        Ok(row.is_some())
    }

    #[tracing::instrument(skip(self, listing), fields(model_type = %listing.model_type), err)]
    async fn insert(&self, fleet: Fleet, listing: &Listing) -> Result<i32, StoreError> {
        let mut conn = self.connect().await?;
        let image = |slot: ImageSlot| listing.images.get(&slot).map(String::as_str);
        let row = conn
            .query(
                insert_sql(fleet),
                &[
                    &listing.name.as_str(),
                    &listing.segment_id,
                    &listing.segment_name.as_str(),
                    &listing.model_type.as_str(),
                    &listing.year,
                    &listing.powertrain[0].as_str(),
                    &listing.powertrain[1].as_str(),
                    &listing.price,
                    &image(ImageSlot::ImageData),
                    &image(ImageSlot::FrontView),
                    &image(ImageSlot::BackView),
                    &image(ImageSlot::LeftSideView),
                    &image(ImageSlot::RightSideView),
                ],
            )
            .await
            .map_err(map_write_error)?
            .into_row()
            .await
            .map_err(map_write_error)?;

        let id = row
            .and_then(|r| r.try_get::<i32, _>(0).ok().flatten())
            .unwrap_or_default();
        tracing::info!(%fleet, id, "listing inserted");
        Ok(id)
    }

    #[tracing::instrument(skip(self), err)]
    async fn image_urls(
        &self,
        fleet: Fleet,
        segment_id: i32,
        model_type: &str,
        slot: ImageSlot,
    ) -> Result<Vec<StoredImage>, StoreError> {
        let mut conn = self.connect().await?;
        let sql = format!(
            "SELECT {id}, segment_id, segment_name, model_type, {column}
             FROM {table}
             WHERE model_type = @P1 AND segment_id = @P2",
            id = fleet.id_column(),
            column = slot.column(),
            table = fleet.table(),
        );
        let rows = conn
            .query(sql, &[&model_type, &segment_id])
            .await?
            .into_first_result()
            .await?;

        let mut images = Vec::with_capacity(rows.len());
        for row in &rows {
            images.push(StoredImage {
                id: row.try_get::<i32, _>(0)?.unwrap_or_default(),
                segment_id: row.try_get::<i32, _>(1)?.unwrap_or_default(),
                segment_name: row.try_get::<&str, _>(2)?.unwrap_or_default().to_owned(),
                model_type: row.try_get::<&str, _>(3)?.unwrap_or_default().to_owned(),
                image_url: row.try_get::<&str, _>(4)?.map(str::to_owned),
            });
        }

        if images.is_empty() {
            tracing::warn!(%fleet, segment_id, model_type, "no listings matched");
        }
        Ok(images)
    }

    #[tracing::instrument(skip(self, url), err)]
    async fn update_image(
        &self,
        fleet: Fleet,
        segment_id: i32,
        model_type: &str,
        slot: ImageSlot,
        url: &str,
    ) -> Result<u64, StoreError> {
        let mut conn = self.connect().await?;
        let sql = format!(
            "UPDATE {} SET {} = @P1 WHERE segment_id = @P2 AND model_type = @P3",
            fleet.table(),
            slot.column(),
        );
        let result = conn
            .execute(sql, &[&url, &segment_id, &model_type])
            .await
            .map_err(map_write_error)?;
        Ok(result.total())
    }
}
