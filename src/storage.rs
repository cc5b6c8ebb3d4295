use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::plants::GrowthRecord;
use crate::sensors::{SensorSample, TIMESTAMP_FORMAT};

/// A time-lapse image that reached disk.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CaptureRecord {
    #[serde(with = "crate::sensors::timestamp")]
    pub timestamp: NaiveDateTime,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

pub trait TelemetryStore: Send {
    /// Cheap round-trip used by the health check.
    fn ping(&mut self) -> Result<()>;

    fn record_sensor_sample(&mut self, sample: &SensorSample) -> Result<()>;

    /// Most recent samples, newest first.
    fn recent_sensor_samples(&mut self, limit: usize) -> Result<Vec<SensorSample>>;

    fn growth_records(&mut self) -> Result<Vec<GrowthRecord>>;

    fn record_capture(&mut self, capture: &CaptureRecord) -> Result<()>;

    fn captures(&mut self) -> Result<Vec<CaptureRecord>>;
}

/// Store shared between request threads and the time-lapse worker.
pub type SharedStore = Arc<Mutex<dyn TelemetryStore>>;

pub fn shared<S: TelemetryStore + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

const SAMPLE_PLANTS: [&str; 2] = ["Tomato", "Basil"];

/// (plant index into SAMPLE_PLANTS, rate, height, days after planting)
const SAMPLE_GROWTH: [(usize, f64, f64, i64); 3] =
    [(0, 0.5, 10.0, 10), (0, 0.6, 12.0, 20), (1, 0.3, 8.0, 15)];

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

pub struct SqliteTelemetryStore {
    conn: Connection,
}

impl SqliteTelemetryStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn =
            Connection::open(db_path).with_context(|| format!("open database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        store.seed_sample_data()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        store.seed_sample_data()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS sensor_data (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL,
              analog_value INTEGER NOT NULL,
              color_red INTEGER NOT NULL,
              color_green INTEGER NOT NULL,
              color_blue INTEGER NOT NULL,
              temperature REAL NOT NULL,
              humidity REAL NOT NULL,
              light_intensity REAL NOT NULL,
              soil_moisture REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plants (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS growth_rate (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              plant_id INTEGER NOT NULL REFERENCES plants(id),
              rate REAL NOT NULL,
              height REAL NOT NULL,
              time_after_planting INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS time_lapse_images (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              timestamp TEXT NOT NULL,
              path TEXT NOT NULL,
              width INTEGER NOT NULL,
              height INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sensor_timestamp ON sensor_data(timestamp);
            "#,
        )?;
        Ok(())
    }

    fn seed_sample_data(&mut self) -> Result<()> {
        let plants: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM plants", [], |row| row.get(0))?;
        if plants > 0 {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        let mut ids = Vec::with_capacity(SAMPLE_PLANTS.len());
        for name in SAMPLE_PLANTS {
            tx.execute("INSERT INTO plants(name) VALUES (?1)", params![name])?;
            ids.push(tx.last_insert_rowid());
        }
        for (plant, rate, height, days) in SAMPLE_GROWTH {
            tx.execute(
                r#"
                INSERT INTO growth_rate(plant_id, rate, height, time_after_planting)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![ids[plant], rate, height, days],
            )?;
        }
        tx.commit()?;
        log::info!("storage: seeded sample plants and growth data");
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| anyhow!("corrupt timestamp '{}': {}", raw, e))
}

impl TelemetryStore for SqliteTelemetryStore {
    fn ping(&mut self) -> Result<()> {
        self.conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn record_sensor_sample(&mut self, sample: &SensorSample) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO sensor_data(timestamp, analog_value, color_red, color_green, color_blue,
                                    temperature, humidity, light_intensity, soil_moisture)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                sample.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                sample.analog_value,
                sample.color_red,
                sample.color_green,
                sample.color_blue,
                sample.temperature,
                sample.humidity,
                sample.light_intensity,
                sample.soil_moisture
            ],
        )?;
        Ok(())
    }

    fn recent_sensor_samples(&mut self, limit: usize) -> Result<Vec<SensorSample>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, analog_value, color_red, color_green, color_blue,
                   temperature, humidity, light_intensity, soil_moisture
            FROM sensor_data ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let timestamp: String = row.get(0)?;
            out.push(SensorSample {
                timestamp: parse_timestamp(&timestamp)?,
                analog_value: row.get(1)?,
                color_red: row.get(2)?,
                color_green: row.get(3)?,
                color_blue: row.get(4)?,
                temperature: row.get(5)?,
                humidity: row.get(6)?,
                light_intensity: row.get(7)?,
                soil_moisture: row.get(8)?,
            });
        }
        Ok(out)
    }

    fn growth_records(&mut self) -> Result<Vec<GrowthRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT p.name, gr.rate, gr.height, gr.time_after_planting
            FROM growth_rate gr JOIN plants p ON gr.plant_id = p.id
            ORDER BY gr.id ASC
            "#,
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(GrowthRecord {
                plant_name: row.get(0)?,
                rate: row.get(1)?,
                height: row.get(2)?,
                time_after_planting: row.get(3)?,
            });
        }
        Ok(out)
    }

    fn record_capture(&mut self, capture: &CaptureRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO time_lapse_images(timestamp, path, width, height) VALUES (?1, ?2, ?3, ?4)",
            params![
                capture.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                capture.path.to_string_lossy(),
                capture.width,
                capture.height
            ],
        )?;
        Ok(())
    }

    fn captures(&mut self) -> Result<Vec<CaptureRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT timestamp, path, width, height FROM time_lapse_images ORDER BY id ASC")?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let timestamp: String = row.get(0)?;
            let path: String = row.get(1)?;
            out.push(CaptureRecord {
                timestamp: parse_timestamp(&timestamp)?,
                path: PathBuf::from(path),
                width: row.get(2)?,
                height: row.get(3)?,
            });
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct InMemoryTelemetryStore {
    samples: Vec<SensorSample>,
    growth: Vec<GrowthRecord>,
    captures: Vec<CaptureRecord>,
    offline: bool,
}

impl Default for InMemoryTelemetryStore {
    fn default() -> Self {
        let growth = SAMPLE_GROWTH
            .iter()
            .map(|&(plant, rate, height, days)| GrowthRecord {
                plant_name: SAMPLE_PLANTS[plant].to_string(),
                rate,
                height,
                time_after_planting: days,
            })
            .collect();
        Self {
            samples: Vec::new(),
            growth,
            captures: Vec::new(),
            offline: false,
        }
    }
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails, for exercising degraded paths.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<()> {
        if self.offline {
            return Err(anyhow!("store offline"));
        }
        Ok(())
    }
}

impl TelemetryStore for InMemoryTelemetryStore {
    fn ping(&mut self) -> Result<()> {
        self.check()
    }

    fn record_sensor_sample(&mut self, sample: &SensorSample) -> Result<()> {
        self.check()?;
        self.samples.push(sample.clone());
        Ok(())
    }

    fn recent_sensor_samples(&mut self, limit: usize) -> Result<Vec<SensorSample>> {
        self.check()?;
        Ok(self.samples.iter().rev().take(limit).cloned().collect())
    }

    fn growth_records(&mut self) -> Result<Vec<GrowthRecord>> {
        self.check()?;
        Ok(self.growth.clone())
    }

    fn record_capture(&mut self, capture: &CaptureRecord) -> Result<()> {
        self.check()?;
        self.captures.push(capture.clone());
        Ok(())
    }

    fn captures(&mut self) -> Result<Vec<CaptureRecord>> {
        self.check()?;
        Ok(self.captures.clone())
    }
}
