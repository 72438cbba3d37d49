//! Case recording to SQLite and reading cases back.
//!
//! A recorder database holds two tables: `metadata` (one row per variable)
//! and `cases` (one row per recorded case, values as JSON maps keyed by
//! absolute name).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::component::Io;
use crate::error::{CouplerError, Result};
use crate::names;
use crate::units;

/// What `Problem::record` captures.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOptions {
    pub record_inputs: bool,
    pub record_outputs: bool,
    /// Glob patterns on promoted names; a variable must match one.
    pub includes: Vec<String>,
    /// Glob patterns on promoted names; a match excludes the variable.
    pub excludes: Vec<String>,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            record_inputs: true,
            record_outputs: true,
            includes: vec!["*".to_string()],
            excludes: Vec::new(),
        }
    }
}

impl RecordingOptions {
    pub fn wants(&self, prom: &str, io: Io) -> bool {
        let io_ok = match io {
            Io::Input => self.record_inputs,
            Io::Output => self.record_outputs,
        };
        io_ok
            && self.includes.iter().any(|p| names::glob_match(p, prom))
            && !self.excludes.iter().any(|p| names::glob_match(p, prom))
    }
}

/// Per-variable metadata stored once per database.
#[derive(Debug, Clone, PartialEq)]
pub struct VarRecordMeta {
    pub abs: String,
    pub prom: String,
    pub io: Io,
    pub units: Option<String>,
    pub size: usize,
}

/// Values captured for one case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaseData {
    pub name: String,
    pub inputs: BTreeMap<String, Vec<f64>>,
    pub outputs: BTreeMap<String, Vec<f64>>,
}

/// Sink for recorded cases. Only rank 0 receives calls.
pub trait CaseRecorder {
    /// Called once from `final_setup`. `outputs_dir` anchors relative paths.
    fn startup(&mut self, outputs_dir: &Path, meta: &[VarRecordMeta]) -> Result<()>;

    fn record(&mut self, case: &CaseData) -> Result<()>;

    fn shutdown(&mut self) -> Result<()>;
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS metadata (abs_name TEXT PRIMARY KEY, \
                      prom_name TEXT NOT NULL, io TEXT NOT NULL, units TEXT, size INTEGER NOT \
                      NULL);CREATE TABLE IF NOT EXISTS cases (id INTEGER PRIMARY KEY \
                      AUTOINCREMENT, name TEXT NOT NULL, timestamp REAL NOT NULL, inputs TEXT \
                      NOT NULL, outputs TEXT NOT NULL);";

/// Records cases into a SQLite file.
pub struct SqliteRecorder {
    filename: PathBuf,
    path: Option<PathBuf>,
    conn: Option<Connection>,
}

impl SqliteRecorder {
    /// A relative `filename` is placed in the problem's outputs directory.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            path: None,
            conn: None,
        }
    }

    /// Resolved database path, known after startup.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl CaseRecorder for SqliteRecorder {
    fn startup(&mut self, outputs_dir: &Path, meta: &[VarRecordMeta]) -> Result<()> {
        let path = if self.filename.is_absolute() {
            self.filename.clone()
        } else {
            outputs_dir.join(&self.filename)
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let mut conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        let tx = conn.transaction()?;
        for m in meta {
            tx.execute(
                "INSERT OR REPLACE INTO metadata (abs_name, prom_name, io, units, size) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    m.abs.as_str(),
                    m.prom.as_str(),
                    m.io.to_string(),
                    m.units.as_deref(),
                    i64::try_from(m.size).unwrap_or(i64::MAX),
                ],
            )?;
        }
        tx.commit()?;

        tracing::info!(path = %path.display(), variables = meta.len(), "recorder started");
        self.path = Some(path);
        self.conn = Some(conn);
        Ok(())
    }

    fn record(&mut self, case: &CaseData) -> Result<()> {
        let conn = self.conn.as_ref().ok_or_else(|| {
            CouplerError::Record(format!(
                "Recorder '{}' has not been started.",
                self.filename.display()
            ))
        })?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        conn.execute(
            "INSERT INTO cases (name, timestamp, inputs, outputs) VALUES (?1, ?2, ?3, ?4)",
            params![
                case.name.as_str(),
                timestamp,
                serde_json::to_string(&case.inputs)?,
                serde_json::to_string(&case.outputs)?,
            ],
        )?;
        tracing::debug!(case = %case.name, "case recorded");
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| CouplerError::Sqlite(e))?;
        }
        Ok(())
    }
}

fn parse_io(s: &str) -> Result<Io> {
    match s {
        "input" => Ok(Io::Input),
        "output" => Ok(Io::Output),
        other => Err(CouplerError::Record(format!("Unknown io kind '{}'.", other))),
    }
}

/// Read access to a recorder database.
pub struct CaseReader {
    conn: Connection,
    meta: Arc<HashMap<String, VarRecordMeta>>,
}

impl CaseReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let mut meta = HashMap::new();
        {
            let mut stmt =
                conn.prepare("SELECT abs_name, prom_name, io, units, size FROM metadata")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            for row in rows {
                let (abs, prom, io, units, size) = row?;
                meta.insert(
                    abs.clone(),
                    VarRecordMeta {
                        abs,
                        prom,
                        io: parse_io(&io)?,
                        units,
                        size: usize::try_from(size).unwrap_or(0),
                    },
                );
            }
        }
        Ok(Self {
            conn,
            meta: Arc::new(meta),
        })
    }

    /// Case names in recording order.
    pub fn list_cases(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT name FROM cases ORDER BY id")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    /// The latest case recorded under `name`.
    pub fn get_case(&self, name: &str) -> Result<Case> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT inputs, outputs FROM cases WHERE name = ?1 ORDER BY id DESC LIMIT 1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (inputs, outputs) = row.ok_or_else(|| {
            CouplerError::NotFound(format!("Case '{}' not found.", name))
        })?;
        Ok(Case {
            name: name.to_string(),
            inputs: serde_json::from_str(&inputs)?,
            outputs: serde_json::from_str(&outputs)?,
            meta: self.meta.clone(),
        })
    }

    pub fn metadata(&self, abs: &str) -> Option<&VarRecordMeta> {
        self.meta.get(abs)
    }
}

/// One recorded case.
#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub inputs: BTreeMap<String, Vec<f64>>,
    pub outputs: BTreeMap<String, Vec<f64>>,
    meta: Arc<HashMap<String, VarRecordMeta>>,
}

impl Case {
    /// Absolute name for `name`: absolute first, then promoted (outputs win).
    fn resolve(&self, name: &str) -> Option<(&VarRecordMeta, &Vec<f64>)> {
        if let Some(m) = self.meta.get(name) {
            let vals = match m.io {
                Io::Input => self.inputs.get(name),
                Io::Output => self.outputs.get(name),
            };
            if let Some(v) = vals {
                return Some((m, v));
            }
        }
        self.by_prom(&self.outputs, name)
            .or_else(|| self.by_prom(&self.inputs, name))
    }

    fn by_prom<'a>(
        &'a self,
        map: &'a BTreeMap<String, Vec<f64>>,
        prom: &str,
    ) -> Option<(&'a VarRecordMeta, &'a Vec<f64>)> {
        map.iter()
            .filter_map(|(abs, v)| self.meta.get(abs).map(|m| (m, v)))
            .find(|(m, _)| m.prom == prom)
    }

    pub fn get_val(&self, name: &str) -> Result<Vec<f64>> {
        self.resolve(name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                CouplerError::NotFound(format!(
                    "Variable '{}' not found in case '{}'.",
                    name, self.name
                ))
            })
    }

    /// Values converted to `units`.
    pub fn get_val_units(&self, name: &str, units: &str) -> Result<Vec<f64>> {
        let (meta, vals) = self.resolve(name).ok_or_else(|| {
            CouplerError::NotFound(format!(
                "Variable '{}' not found in case '{}'.",
                name, self.name
            ))
        })?;
        let mut out = vals.clone();
        units::convert_values(&mut out, meta.units.as_deref(), Some(units))?;
        Ok(out)
    }

    pub fn units(&self, name: &str) -> Option<&str> {
        self.resolve(name).and_then(|(m, _)| m.units.as_deref())
    }
}
