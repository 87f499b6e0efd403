//! Wire protocol between the gateway and the worker.
//!
//! Requests serialize as `{ "type": <kind>, "args": {..} }` and responses as
//! `{ "type": <kind>, "result": {..} }`. Engine faults carry their own shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Arguments for `open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenArgs {
    /// Database name or `file:` URI.
    pub filename: String,
    /// VFS override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vfs: Option<String>,
}

/// Arguments for `close`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseArgs {
    /// Also delete the persisted database.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unlink: bool,
}

/// Empty argument object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoArgs {}

/// Row shape for result rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowMode {
    Array,
    Object,
}

/// What `exec` should report back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReturnValue {
    This,
    ResultRows,
    SaveSql,
}

/// Structured `exec` request. The engine echoes it back with results filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecOptions {
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_mode: Option<RowMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_value: Option<ReturnValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_rows: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_changes: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_count: Option<u64>,
}

impl ExecOptions {
    /// Options for a single SQL string.
    #[must_use]
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// Bind parameters (array or named object).
    #[must_use]
    pub fn with_bind(mut self, bind: Value) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Collect result rows in the given shape.
    #[must_use]
    pub fn with_rows(mut self, row_mode: RowMode) -> Self {
        self.row_mode = Some(row_mode);
        self.result_rows = Some(Vec::new());
        self.column_names = Some(Vec::new());
        self
    }

    /// Request a change count.
    #[must_use]
    pub fn counting_changes(mut self) -> Self {
        self.count_changes = Some(true);
        self
    }
}

/// Argument for `exec`: raw SQL or structured options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecArgs {
    Sql(String),
    Options(ExecOptions),
}

impl ExecArgs {
    /// Normalize to structured options.
    #[must_use]
    pub fn into_options(self) -> ExecOptions {
        match self {
            Self::Sql(sql) => ExecOptions::new(sql),
            Self::Options(options) => options,
        }
    }
}

impl From<&str> for ExecArgs {
    fn from(sql: &str) -> Self {
        Self::Sql(sql.to_owned())
    }
}

impl From<String> for ExecArgs {
    fn from(sql: String) -> Self {
        Self::Sql(sql)
    }
}

impl From<ExecOptions> for ExecArgs {
    fn from(options: ExecOptions) -> Self {
        Self::Options(options)
    }
}

/// Request sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "args", rename_all = "kebab-case")]
pub enum Request {
    Open(OpenArgs),
    Close(CloseArgs),
    ConfigGet(NoArgs),
    Export(NoArgs),
    Exec(ExecArgs),
}

impl Request {
    /// Operation name on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Close(_) => "close",
            Self::ConfigGet(_) => "config-get",
            Self::Export(_) => "export",
            Self::Exec(_) => "exec",
        }
    }
}

/// Descriptor of a newly opened database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResult {
    pub filename: String,
    /// Opaque session identifier.
    pub db_id: String,
    pub persistent: bool,
    pub vfs: String,
}

/// Result of `close`; `filename` is `None` when nothing was open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseResult {
    #[serde(default)]
    pub filename: Option<String>,
}

/// Engine configuration and capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigGetResult {
    /// Engine-defined version metadata.
    pub version: Value,
    pub big_int_enabled: bool,
    pub vfs_list: Vec<String>,
}

/// Binary snapshot of the open database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub byte_array: Vec<u8>,
    pub filename: String,
    pub mimetype: String,
}

/// Response from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "kebab-case")]
pub enum Response {
    Open(OpenResult),
    Close(CloseResult),
    ConfigGet(ConfigGetResult),
    Export(ExportResult),
    Exec(ExecOptions),
}

impl Response {
    /// Operation name on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Close(_) => "close",
            Self::ConfigGet(_) => "config-get",
            Self::Export(_) => "export",
            Self::Exec(_) => "exec",
        }
    }
}

/// Fault reported by the engine for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{operation} failed: {message}")]
pub struct Fault {
    pub operation: String,
    pub message: String,
    pub error_class: String,
}

impl Fault {
    /// Create a fault.
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        error_class: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            error_class: error_class.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_serialization() {
        let msg = Request::Open(OpenArgs {
            filename: "file:test.db?vfs=opfs".into(),
            vfs: None,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({ "type": "open", "args": { "filename": "file:test.db?vfs=opfs" } })
        );

        let parsed: Request = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_config_get_sends_empty_args() {
        let json = serde_json::to_value(Request::ConfigGet(NoArgs {})).unwrap();
        assert_eq!(json, json!({ "type": "config-get", "args": {} }));
    }

    #[test]
    fn test_close_omits_false_unlink() {
        let json = serde_json::to_value(Request::Close(CloseArgs::default())).unwrap();
        assert_eq!(json, json!({ "type": "close", "args": {} }));

        let json = serde_json::to_value(Request::Close(CloseArgs { unlink: true })).unwrap();
        assert_eq!(json["args"]["unlink"], true);
    }

    #[test]
    fn test_exec_args_accept_string_or_options() {
        let raw: Request =
            serde_json::from_value(json!({ "type": "exec", "args": "SELECT 1" })).unwrap();
        assert_eq!(raw, Request::Exec(ExecArgs::Sql("SELECT 1".into())));

        let structured: Request = serde_json::from_value(json!({
            "type": "exec",
            "args": { "sql": "SELECT ?", "bind": [1], "rowMode": "object", "returnValue": "resultRows" }
        }))
        .unwrap();
        let Request::Exec(ExecArgs::Options(options)) = structured else {
            panic!("Wrong message type");
        };
        assert_eq!(options.bind, Some(json!([1])));
        assert_eq!(options.row_mode, Some(RowMode::Object));
        assert_eq!(options.return_value, Some(ReturnValue::ResultRows));
    }

    #[test]
    fn test_response_uses_result_field() {
        let msg = Response::Open(OpenResult {
            filename: "test.db".into(),
            db_id: "db-1".into(),
            persistent: false,
            vfs: "memdb".into(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "open");
        assert_eq!(json["result"]["dbId"], "db-1");
        assert_eq!(msg.kind(), "open");
    }

    #[test]
    fn test_fault_shape() {
        let fault = Fault::new("export", "Error", "no open database");
        assert_eq!(fault.to_string(), "export failed: no open database");

        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(json["errorClass"], "Error");
    }
}
