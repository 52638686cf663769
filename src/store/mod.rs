//! スレッド対応表ストア
//!
//! チャット側のスレッド ID (外部 ID) とアシスタント側の会話スレッド ID (内部 ID) の
//! 対応を `rusqlite` で SQLite ファイルに保存します。
//!
//! # 特色
//! - `bundled` フィーチャで SQLite を同梱
//! - 外部 ID を PRIMARY KEY にして一意性を保証 (一度結びついた内部 ID は付け替えない)
//! - 書き込みはトランザクション単位なので、書き込み途中でプロセスが落ちてもファイルは壊れない
//! - 接続は `Mutex` で保護し、並行するターンからの読み書きを直列化
//! - `last_activity_ms` で最終利用時刻を保持
//!
//! # 代表的な使い方
//! ```no_run
//! use assistant_bridge::store::ThreadStore;
//!
//! # fn demo() -> Result<(), assistant_bridge::error::StoreError> {
//! let store = ThreadStore::open_or_create("storage/threads.sqlite")?;
//! if store.lookup("slack:1700000000.000100")?.is_none() {
//!     store.create("slack:1700000000.000100", "thread_abc")?;
//! }
//! # Ok(()) }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;

/// 外部スレッドと内部スレッドの対応 1 件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMapping {
    pub external_thread_id: String,
    pub internal_thread_id: String,
    pub last_activity_ms: i64,
}

/// ストアのハンドル。内部で `rusqlite::Connection` を保持します。
pub struct ThreadStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for ThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStore").field("path", &self.path).finish()
    }
}

impl ThreadStore {
    /// DB を開き、存在しなければ新規作成 (親ディレクトリも作る)。
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let p = path.as_ref().to_path_buf();
        if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&p)?;
        let store = Self { conn: Mutex::new(conn), path: p };
        store.check_integrity()?;
        store.ensure_schema()?;
        info!(target: "store", path = ?store.path, "thread_store_opened");
        Ok(store)
    }

    /// メモリ上 (永続化なし) のストアを作成 (主にテスト用途)
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn), path: PathBuf::from(":memory:") };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // 他スレッドが panic しても接続自体は使える
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_integrity(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        let verdict: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(|e| {
                let corrupt = matches!(
                    &e,
                    rusqlite::Error::SqliteFailure(err, _)
                        if matches!(err.code, rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::DatabaseCorrupt)
                );
                if corrupt { StoreError::Corrupt(e.to_string()) } else { StoreError::Database(e) }
            })?;
        if verdict != "ok" {
            warn!(target: "store", path = ?self.path, %verdict, "thread_store_integrity_failed");
            return Err(StoreError::Corrupt(verdict));
        }
        Ok(())
    }

    /// スキーマを作成 (存在しない場合のみ)
    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS thread_mappings (
                external_thread_id TEXT PRIMARY KEY,
                internal_thread_id TEXT NOT NULL,
                last_activity_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_thread_mappings_activity ON thread_mappings(last_activity_ms DESC);
            "#,
        )?;
        Ok(())
    }

    /// 現在時刻 (ms since epoch)
    fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }

    /// 外部 ID に対応する内部 ID を引く
    pub fn lookup(&self, external_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(external_id)?.map(|m| m.internal_thread_id))
    }

    /// 対応レコードを丸ごと取得
    pub fn get(&self, external_id: &str) -> Result<Option<ThreadMapping>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT external_thread_id, internal_thread_id, last_activity_ms FROM thread_mappings WHERE external_thread_id = ?1",
        )?;
        let mapping = stmt
            .query_row(params![external_id], |row| {
                Ok(ThreadMapping {
                    external_thread_id: row.get(0)?,
                    internal_thread_id: row.get(1)?,
                    last_activity_ms: row.get(2)?,
                })
            })
            .optional()?;
        match mapping {
            Some(m) if m.internal_thread_id.trim().is_empty() => {
                Err(StoreError::Corrupt(format!("empty internal thread id for '{external_id}'")))
            }
            other => Ok(other),
        }
    }

    /// 新しい対応を現在時刻で記録する。既に存在する外部 ID はエラー (付け替え禁止)。
    /// 呼び出し側は先に `lookup` すること。
    pub fn create(&self, external_id: &str, internal_id: &str) -> Result<ThreadMapping, StoreError> {
        let mapping = ThreadMapping {
            external_thread_id: external_id.to_string(),
            internal_thread_id: internal_id.to_string(),
            last_activity_ms: Self::now_ms(),
        };
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO thread_mappings(external_thread_id, internal_thread_id, last_activity_ms) VALUES (?1, ?2, ?3)",
            params![mapping.external_thread_id, mapping.internal_thread_id, mapping.last_activity_ms],
        )?;
        tx.commit()?;
        debug!(target: "store", external_id, internal_id, "thread_mapping_created");
        Ok(mapping)
    }

    /// 最終利用時刻を更新。戻り値: 該当レコードがあったか
    pub fn touch(&self, external_id: &str) -> Result<bool, StoreError> {
        let affected = self.conn().execute(
            "UPDATE thread_mappings SET last_activity_ms = ?2 WHERE external_thread_id = ?1",
            params![external_id, Self::now_ms()],
        )?;
        Ok(affected > 0)
    }

    /// 全件を最終利用時刻の新しい順で取得
    pub fn list(&self) -> Result<Vec<ThreadMapping>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT external_thread_id, internal_thread_id, last_activity_ms FROM thread_mappings ORDER BY last_activity_ms DESC, external_thread_id ASC",
        )?;
        let iter = stmt.query_map([], |row| {
            Ok(ThreadMapping {
                external_thread_id: row.get(0)?,
                internal_thread_id: row.get(1)?,
                last_activity_ms: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for r in iter {
            out.push(r?);
        }
        Ok(out)
    }

    /// DB ファイルのパス
    pub fn db_file_path(&self) -> &Path {
        &self.path
    }
}
