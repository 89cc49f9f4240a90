//! MySQL-backed writer for particle/stats/meta rows.
//!
//! Table names are configuration, not user input, so they're interpolated directly into the
//! query text; every value column is still bound as a parameter.

use crate::error::DatabaseError;
use crate::saver::ParticleWriter;
use crate::stats::StatsWriter;
use icemet_model::{DateTime, MetaRow, ParticleRow, StatsRow};
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySqlPool, Row};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct DatabaseParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub table_particles: String,
    pub table_stats: String,
    pub table_meta: String,
}

impl DatabaseParams {
    fn url(&self) -> String {
        format!("mysql://{}:{}@{}:{}/{}", self.user, self.password, self.host, self.port, self.database)
    }
}

/// Process-wide database handle, shared (behind a mutex) by the Saver and Stats stage threads.
///
/// Every public method takes the mutex, probes the pool with `SELECT 1`, reconnects once on
/// probe failure, and surfaces [`DatabaseError::Fatal`] if the reconnect also fails. Queries
/// themselves run on `runtime` via `Handle::block_on`, so the calling stage thread stays a plain
/// blocking OS thread. Cheaply [`Clone`]able: every clone shares the same pool behind the mutex,
/// which is the point — Saver and Stats each hold their own handle onto one real connection pool.
#[derive(Clone)]
pub struct Database {
    params: DatabaseParams,
    pool: Arc<Mutex<Option<MySqlPool>>>,
    runtime: tokio::runtime::Handle,
}

impl Database {
    pub fn new(params: DatabaseParams, runtime: tokio::runtime::Handle) -> Self {
        Self { params, pool: Arc::new(Mutex::new(None)), runtime }
    }

    async fn connect(params: &DatabaseParams) -> Result<MySqlPool, sqlx::Error> {
        MySqlPoolOptions::new().max_connections(4).connect(&params.url()).await
    }

    async fn probe(pool: &MySqlPool) -> bool {
        sqlx::query("SELECT 1").execute(pool).await.is_ok()
    }

    /// Returns a live pool, reconnecting once if necessary.
    fn live_pool(&self) -> Result<MySqlPool, DatabaseError> {
        let mut slot = self.pool.lock().expect("database mutex poisoned");
        let alive = match slot.as_ref() {
            Some(pool) => self.runtime.block_on(Self::probe(pool)),
            None => false,
        };
        if !alive {
            tracing::warn!("database connection not alive, reconnecting");
            match self.runtime.block_on(Self::connect(&self.params)) {
                Ok(pool) => *slot = Some(pool),
                Err(err) => return Err(DatabaseError::Fatal(err.to_string())),
            }
        }
        Ok(slot.as_ref().expect("pool populated above").clone())
    }

    pub fn write_particle(&self, row: &ParticleRow) -> Result<(), DatabaseError> {
        let pool = self.live_pool()?;
        let sql = format!(
            "INSERT INTO {} \
             (DateTime, Sensor, Frame, Particle, X, Y, Z, EquivDiam, EquivDiamCorr, \
              Circularity, DynRange, EffPxSz, SubX, SubY, SubW, SubH) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.params.table_particles
        );
        let result = self.runtime.block_on(
            sqlx::query(&sql)
                .bind(to_chrono_naive(row.dt))
                .bind(row.sensor)
                .bind(row.frame)
                .bind(row.particle)
                .bind(row.x)
                .bind(row.y)
                .bind(row.z)
                .bind(row.equiv_diam)
                .bind(row.equiv_diam_corr)
                .bind(row.circularity)
                .bind(row.dyn_range)
                .bind(row.eff_px_sz)
                .bind(row.sub.x)
                .bind(row.sub.y)
                .bind(row.sub.width)
                .bind(row.sub.height)
                .execute(&pool),
        );
        result.map(|_| ()).map_err(|e| DatabaseError::Statement(e.to_string()))
    }

    pub fn write_stats(&self, row: &StatsRow) -> Result<(), DatabaseError> {
        let pool = self.live_pool()?;
        let sql = format!(
            "INSERT INTO {} (DateTime, LWC, MVD, Conc, Frames, Particles, Temp, Wind) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.params.table_stats
        );
        let result = self.runtime.block_on(
            sqlx::query(&sql)
                .bind(to_chrono_naive(row.dt))
                .bind(row.lwc)
                .bind(row.mvd)
                .bind(row.conc)
                .bind(row.frames)
                .bind(row.particles)
                .bind(row.temp)
                .bind(row.wind)
                .execute(&pool),
        );
        result.map(|_| ()).map_err(|e| DatabaseError::Statement(e.to_string()))
    }

    pub fn write_meta(&self, row: &MetaRow) -> Result<(), DatabaseError> {
        let pool = self.live_pool()?;
        let sql = format!(
            "INSERT INTO {} (DateTime, ParticlesTable, StatsTable, Version, Config) \
             VALUES (?, ?, ?, ?, ?)",
            self.params.table_meta
        );
        let result = self.runtime.block_on(
            sqlx::query(&sql)
                .bind(to_chrono_naive(row.dt))
                .bind(&row.particles_table)
                .bind(&row.stats_table)
                .bind(&row.version)
                .bind(&row.config)
                .execute(&pool),
        );
        result.map(|_| ()).map_err(|e| DatabaseError::Statement(e.to_string()))
    }

    /// Reads every particle row for a closed, inclusive `[from, to]` time window, ordered by
    /// `DateTime`.
    pub fn read_particles(&self, from: DateTime, to: DateTime) -> Result<Vec<ParticleRow>, DatabaseError> {
        let pool = self.live_pool()?;
        let sql = format!(
            "SELECT ID, DateTime, Sensor, Frame, Particle, X, Y, Z, EquivDiam, EquivDiamCorr, \
             Circularity, DynRange, EffPxSz, SubX, SubY, SubW, SubH FROM {} \
             WHERE DateTime BETWEEN ? AND ? ORDER BY DateTime",
            self.params.table_particles
        );
        let rows = self
            .runtime
            .block_on(sqlx::query(&sql).bind(to_chrono_naive(from)).bind(to_chrono_naive(to)).fetch_all(&pool))
            .map_err(|e| DatabaseError::Statement(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| ParticleRow {
                id: r.get::<Option<u64>, _>("ID"),
                dt: from_chrono_naive(r.get("DateTime")),
                sensor: r.get("Sensor"),
                frame: r.get("Frame"),
                particle: r.get("Particle"),
                x: r.get("X"),
                y: r.get("Y"),
                z: r.get("Z"),
                equiv_diam: r.get("EquivDiam"),
                equiv_diam_corr: r.get("EquivDiamCorr"),
                circularity: r.get("Circularity"),
                dyn_range: r.get("DynRange"),
                eff_px_sz: r.get("EffPxSz"),
                sub: icemet_model::Rect::new(r.get("SubX"), r.get("SubY"), r.get("SubW"), r.get("SubH")),
            })
            .collect())
    }
}

fn to_chrono_naive(dt: DateTime) -> chrono::NaiveDateTime {
    match dt.to_chrono() {
        Some(c) => c.naive_utc(),
        None => {
            tracing::warn!(?dt, "invalid calendar date, using UNIX epoch");
            chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .expect("1970-01-01 00:00:00 is always a valid date")
        }
    }
}

fn from_chrono_naive(naive: chrono::NaiveDateTime) -> DateTime {
    DateTime::from_chrono(chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(naive, chrono::Utc))
}

impl ParticleWriter for Database {
    fn write_particle(&mut self, row: &ParticleRow) -> crate::Result<()> {
        Ok(Database::write_particle(self, row)?)
    }
}

impl StatsWriter for Database {
    fn write_stats(&mut self, row: &StatsRow) -> crate::Result<()> {
        Ok(Database::write_stats(self, row)?)
    }
}
