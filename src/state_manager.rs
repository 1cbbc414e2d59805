// State Manager for Live Trading
// SQLite persistence of the held position and the closed-trade audit trail,
// so a restarted trader resumes where it stopped.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::{Position, Symbol};

// =============================================================================
// Data Models
// =============================================================================

/// Position held by the live trader (at most one)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldPosition {
    pub symbol: Symbol,
    pub quantity: f64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    /// Quote amount spent on entry, fee included
    pub cost: f64,
    pub order_id: Option<String>,
}

impl HeldPosition {
    pub fn from_position(symbol: Symbol, position: &Position, order_id: Option<String>) -> Self {
        Self {
            symbol,
            quantity: position.size,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            cost: position.cost,
            order_id,
        }
    }

    /// Account-model view used to price the exit
    pub fn position(&self) -> Position {
        Position {
            entry_price: self.entry_price,
            entry_time: self.entry_time,
            size: self.quantity,
            cost: self.cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Option<i64>,
    pub symbol: Symbol,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub profit_amount: f64,
    pub profit_pct: f64,
    pub simulated: bool,
}

fn parse_time(value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

// =============================================================================
// State Manager Implementation
// =============================================================================

pub struct SqliteStateManager {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateManager {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let manager = Self::from_connection(conn)?;
        info!("SQLite state manager initialized: {}", db_path.display());
        Ok(manager)
    }

    /// Throwaway database, used by dry runs without a state file and by tests
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let manager = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        manager.create_tables()?;
        Ok(manager)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("State database lock poisoned"))
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.lock()?;

        // Single-row table: id is pinned to 1
        conn.execute(
            "CREATE TABLE IF NOT EXISTS position (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                symbol TEXT NOT NULL,
                quantity REAL NOT NULL,
                entry_price REAL NOT NULL,
                entry_time TEXT NOT NULL,
                cost REAL NOT NULL,
                order_id TEXT,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                quantity REAL NOT NULL,
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL,
                profit_amount REAL NOT NULL,
                profit_pct REAL NOT NULL,
                simulated INTEGER NOT NULL DEFAULT 1,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    pub fn save_position(&self, pos: &HeldPosition) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO position
             (id, symbol, quantity, entry_price, entry_time, cost, order_id, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, CURRENT_TIMESTAMP)",
            params![
                pos.symbol.as_str(),
                pos.quantity,
                pos.entry_price,
                pos.entry_time.to_rfc3339(),
                pos.cost,
                pos.order_id,
            ],
        )?;

        debug!(
            "Position saved: {} qty={:.6} @ {:.8}",
            pos.symbol, pos.quantity, pos.entry_price
        );
        Ok(())
    }

    pub fn load_position(&self) -> Result<Option<HeldPosition>> {
        let conn = self.lock()?;
        let pos = conn
            .query_row(
                "SELECT symbol, quantity, entry_price, entry_time, cost, order_id
                 FROM position WHERE id = 1",
                [],
                |row| {
                    Ok(HeldPosition {
                        symbol: Symbol::new(row.get::<_, String>(0)?),
                        quantity: row.get(1)?,
                        entry_price: row.get(2)?,
                        entry_time: parse_time(&row.get::<_, String>(3)?)?,
                        cost: row.get(4)?,
                        order_id: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(pos)
    }

    pub fn clear_position(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM position", [])?;
        debug!("Position cleared");
        Ok(())
    }

    pub fn record_trade(&self, trade: &TradeRecord) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO trades
             (symbol, quantity, entry_price, exit_price, entry_time, exit_time,
              profit_amount, profit_pct, simulated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                trade.symbol.as_str(),
                trade.quantity,
                trade.entry_price,
                trade.exit_price,
                trade.entry_time.to_rfc3339(),
                trade.exit_time.to_rfc3339(),
                trade.profit_amount,
                trade.profit_pct,
                trade.simulated,
            ],
        )?;

        let result = if trade.profit_amount > 0.0 { "WIN" } else { "LOSS" };
        info!(
            "Trade recorded: {} {:.6} @ {:.8} -> {:.8} | Net: {:.2} ({:+.2}%) | {}",
            trade.symbol,
            trade.quantity,
            trade.entry_price,
            trade.exit_price,
            trade.profit_amount,
            trade.profit_pct,
            result
        );

        Ok(conn.last_insert_rowid())
    }

    pub fn load_trades(&self) -> Result<Vec<TradeRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, symbol, quantity, entry_price, exit_price, entry_time, exit_time,
                    profit_amount, profit_pct, simulated
             FROM trades ORDER BY id",
        )?;

        let trades = stmt
            .query_map([], |row| {
                Ok(TradeRecord {
                    id: row.get(0)?,
                    symbol: Symbol::new(row.get::<_, String>(1)?),
                    quantity: row.get(2)?,
                    entry_price: row.get(3)?,
                    exit_price: row.get(4)?,
                    entry_time: parse_time(&row.get::<_, String>(5)?)?,
                    exit_time: parse_time(&row.get::<_, String>(6)?)?,
                    profit_amount: row.get(7)?,
                    profit_pct: row.get(8)?,
                    simulated: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(trades)
    }

    /// Write the current state as pretty JSON
    pub fn export_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let state = serde_json::json!({
            "exported_at": Utc::now().to_rfc3339(),
            "position": self.load_position()?,
            "trades": self.load_trades()?,
        });

        std::fs::write(path.as_ref(), serde_json::to_string_pretty(&state)?)?;
        debug!("State exported to: {}", path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn position() -> HeldPosition {
        HeldPosition {
            symbol: Symbol::new("XRPUSDT"),
            quantity: 150.0,
            entry_price: 0.66,
            entry_time: Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap(),
            cost: 99.0,
            order_id: Some("42".to_string()),
        }
    }

    #[test]
    fn test_position_round_trip() {
        let state = SqliteStateManager::in_memory().unwrap();
        assert!(state.load_position().unwrap().is_none());

        state.save_position(&position()).unwrap();
        assert_eq!(state.load_position().unwrap(), Some(position()));

        // only one position is ever stored
        let mut other = position();
        other.symbol = Symbol::new("ADAUSDT");
        state.save_position(&other).unwrap();
        assert_eq!(state.load_position().unwrap().unwrap().symbol.as_str(), "ADAUSDT");

        state.clear_position().unwrap();
        assert!(state.load_position().unwrap().is_none());
    }

    #[test]
    fn test_trades_are_appended() {
        let state = SqliteStateManager::in_memory().unwrap();
        let pos = position();
        let record = TradeRecord {
            id: None,
            symbol: pos.symbol.clone(),
            quantity: pos.quantity,
            entry_price: pos.entry_price,
            exit_price: 0.70,
            entry_time: pos.entry_time,
            exit_time: pos.entry_time + Duration::minutes(30),
            profit_amount: 5.8,
            profit_pct: 5.86,
            simulated: true,
        };

        let first = state.record_trade(&record).unwrap();
        let second = state.record_trade(&record).unwrap();
        assert!(second > first);

        let trades = state.load_trades().unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].id, Some(first));
        assert_eq!(trades[0].exit_time, record.exit_time);
        assert!(trades[1].simulated);
    }

    #[test]
    fn test_file_database_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("signal_bot_state_{}", std::process::id()));
        let db = dir.join("state.db");

        SqliteStateManager::new(&db)
            .unwrap()
            .save_position(&position())
            .unwrap();
        let reopened = SqliteStateManager::new(&db).unwrap();
        assert_eq!(reopened.load_position().unwrap(), Some(position()));

        let json = dir.join("state.json");
        reopened.export_json(&json).unwrap();
        assert!(std::fs::read_to_string(&json).unwrap().contains("XRPUSDT"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
