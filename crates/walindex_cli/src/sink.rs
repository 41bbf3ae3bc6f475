//! Sink printing every change as a JSON line.

use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, Write};
use walindex_engine::{CdcError, CdcResult, Entity, SinkAdapter};

#[derive(Serialize)]
struct Line<'a> {
    action: &'static str,
    #[serde(flatten)]
    entity: &'a Entity,
}

/// Writes `{"action": ..., "entity_type": ..., "key": ..., "fields": ...}` lines.
pub struct JsonLinesSink<W: Write + Send> {
    entity_type: String,
    out: Mutex<W>,
}

impl JsonLinesSink<io::Stdout> {
    /// Creates a sink writing to stdout.
    pub fn stdout(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// Creates a sink writing to `out`.
    pub fn new(entity_type: impl Into<String>, out: W) -> Self {
        Self {
            entity_type: entity_type.into(),
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn emit(&self, action: &'static str, entity: &Entity) -> CdcResult<()> {
        let line = serde_json::to_string(&Line { action, entity }).map_err(|e| self.error(e))?;
        let mut out = self.out.lock();
        writeln!(out, "{line}").map_err(|e| self.error(e))?;
        out.flush().map_err(|e| self.error(e))
    }

    fn error(&self, e: impl std::fmt::Display) -> CdcError {
        CdcError::Sink {
            entity_type: self.entity_type.clone(),
            message: e.to_string(),
        }
    }
}

impl<W: Write + Send> SinkAdapter for JsonLinesSink<W> {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn create(&self, entity: &Entity) -> CdcResult<()> {
        self.emit("create", entity)
    }

    fn update(&self, entity: &Entity) -> CdcResult<()> {
        self.emit("update", entity)
    }

    fn delete(&self, entity: &Entity) -> CdcResult<()> {
        self.emit("delete", entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn writes_one_line_per_call() {
        let sink = JsonLinesSink::new("Product", Vec::new());
        let mut fields = serde_json::Map::new();
        fields.insert("id".into(), json!(1));
        fields.insert("name".into(), json!("prod1"));
        let entity = Entity {
            entity_type: "Product".into(),
            table: "product".into(),
            key: vec!["1".into()],
            fields,
        };

        sink.create(&entity).unwrap();
        sink.delete(&entity).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["action"], "create");
        assert_eq!(lines[0]["entity_type"], "Product");
        assert_eq!(lines[0]["key"], json!(["1"]));
        assert_eq!(lines[0]["fields"]["name"], "prod1");
        assert_eq!(lines[1]["action"], "delete");
    }
}
