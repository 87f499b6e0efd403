//! In-memory engine.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::json;

use super::Engine;
use crate::protocol::{
    CloseArgs, CloseResult, ConfigGetResult, ExecOptions, ExportResult, Fault, OpenArgs,
    OpenResult, Request, Response, ReturnValue,
};

/// Mimetype reported by `export`.
pub const MIME_TYPE: &str = "application/x-sqlite3";

const ERROR_CLASS: &str = "Error";
const DEFAULT_VFS: &str = "memdb";
const PERSISTENT_VFS: &str = "opfs";
const VFS_LIST: [&str; 2] = [DEFAULT_VFS, PERSISTENT_VFS];

struct OpenDb {
    db_id: String,
    filename: String,
    vfs: String,
}

impl OpenDb {
    fn persistent(&self) -> bool {
        self.vfs == PERSISTENT_VFS
    }
}

/// In-memory engine implementation.
///
/// Does not evaluate SQL: `exec` appends each statement to the database
/// bytes, which is what `export` returns. Databases on the `opfs` VFS
/// survive `close` unless unlinked; `memdb` databases do not.
/// Useful for development and tests.
#[derive(Default)]
pub struct MemoryEngine {
    files: HashMap<String, Vec<u8>>,
    current: Option<OpenDb>,
    next_id: u64,
}

impl MemoryEngine {
    /// Create an engine with no stored databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with a persisted database already present.
    #[must_use]
    pub fn with_file(mut self, filename: impl Into<String>, contents: Vec<u8>) -> Self {
        self.files.insert(filename.into(), contents);
        self
    }

    fn open(&mut self, args: OpenArgs) -> Result<OpenResult, Fault> {
        if let Some(db) = &self.current {
            return Err(Fault::new(
                "open",
                ERROR_CLASS,
                format!("Database already open: {}", db.filename),
            ));
        }

        let (filename, uri_vfs) = parse_filename(&args.filename);
        if filename.is_empty() {
            return Err(Fault::new("open", ERROR_CLASS, "Missing filename"));
        }

        let vfs = args
            .vfs
            .or(uri_vfs)
            .unwrap_or_else(|| DEFAULT_VFS.to_owned());
        if !VFS_LIST.contains(&vfs.as_str()) {
            return Err(Fault::new("open", ERROR_CLASS, format!("Unknown VFS: {vfs}")));
        }

        self.next_id += 1;
        let db = OpenDb {
            db_id: format!("db-{}", self.next_id),
            filename,
            vfs,
        };
        self.files.entry(db.filename.clone()).or_default();

        let result = OpenResult {
            filename: db.filename.clone(),
            db_id: db.db_id.clone(),
            persistent: db.persistent(),
            vfs: db.vfs.clone(),
        };
        self.current = Some(db);
        Ok(result)
    }

    fn close(&mut self, args: CloseArgs) -> CloseResult {
        let Some(db) = self.current.take() else {
            return CloseResult { filename: None };
        };

        if args.unlink || !db.persistent() {
            self.files.remove(&db.filename);
        }
        CloseResult {
            filename: Some(db.filename),
        }
    }

    fn config() -> ConfigGetResult {
        ConfigGetResult {
            version: json!({
                "libVersion": env!("CARGO_PKG_VERSION"),
                "engine": "memory",
            }),
            big_int_enabled: true,
            vfs_list: VFS_LIST.iter().map(|vfs| (*vfs).to_owned()).collect(),
        }
    }

    fn export(&self) -> Result<ExportResult, Fault> {
        let db = self.current.as_ref().ok_or_else(|| no_open_db("export"))?;
        Ok(ExportResult {
            byte_array: self.files.get(&db.filename).cloned().unwrap_or_default(),
            filename: db.filename.clone(),
            mimetype: MIME_TYPE.to_owned(),
        })
    }

    fn exec(&mut self, mut options: ExecOptions) -> Result<ExecOptions, Fault> {
        let db = self.current.as_ref().ok_or_else(|| no_open_db("exec"))?;

        let sql = options.sql.trim();
        if sql.is_empty() {
            return Err(Fault::new("exec", ERROR_CLASS, "Empty SQL statement"));
        }

        let file = self.files.entry(db.filename.clone()).or_default();
        file.extend_from_slice(sql.as_bytes());
        file.push(b'\n');

        if options.count_changes == Some(true) {
            options.change_count = Some(0);
        }
        if options.result_rows.is_some() || options.return_value == Some(ReturnValue::ResultRows) {
            options.result_rows = Some(Vec::new());
            options.column_names.get_or_insert_with(Vec::new);
        }
        Ok(options)
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn handle(&mut self, request: Request) -> Result<Response, Fault> {
        match request {
            Request::Open(args) => self.open(args).map(Response::Open),
            Request::Close(args) => Ok(Response::Close(self.close(args))),
            Request::ConfigGet(_) => Ok(Response::ConfigGet(Self::config())),
            Request::Export(_) => self.export().map(Response::Export),
            Request::Exec(args) => self.exec(args.into_options()).map(Response::Exec),
        }
    }
}

fn no_open_db(operation: &str) -> Fault {
    Fault::new(operation, ERROR_CLASS, "No open database")
}

/// Split `file:name?vfs=x` into the name and the VFS query parameter.
fn parse_filename(filename: &str) -> (String, Option<String>) {
    let rest = filename.strip_prefix("file:").unwrap_or(filename);
    match rest.split_once('?') {
        Some((name, query)) => {
            let vfs = query
                .split('&')
                .find_map(|pair| pair.strip_prefix("vfs="))
                .map(str::to_owned);
            (name.to_owned(), vfs)
        }
        None => (rest.to_owned(), None),
    }
}
