//! provides logging helpers

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Context;
use anyhow::Result;
use influxdb_line_protocol::LineProtocolBuilder;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;

const METRICS_TARGET_PREFIX: &str = "metrics.";

/// Writes `metrics.*` events in InfluxDB line protocol.
///
/// Fields named `tag_<key>` become tags. The measurement is the target
/// without its `metrics.` prefix.
struct InfluxDBFormatter;

#[derive(Debug, Clone, PartialEq)]
enum FieldValue {
    String(String),
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
}

#[derive(Default)]
struct FieldVisitor<'a> {
    tags: BTreeMap<&'a str, String>,
    fields: BTreeMap<&'a str, FieldValue>,
}

impl FieldVisitor<'_> {
    fn insert(&mut self, field: &Field, value: FieldValue) {
        self.fields.insert(field.name(), value);
    }
}

impl Visit for FieldVisitor<'_> {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, FieldValue::Integer(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, FieldValue::UnsignedInteger(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, FieldValue::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, FieldValue::Boolean(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name().strip_prefix("tag_") {
            Some(tag) => {
                self.tags.insert(tag, value.to_string());
            }
            None => self.insert(field, FieldValue::String(value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        match field.name().strip_prefix("tag_") {
            Some(tag) => {
                self.tags.insert(tag, format!("{value:?}"));
            }
            None => self.insert(field, FieldValue::String(format!("{value:?}"))),
        }
    }
}

/// Encodes one line. Returns `None` when there is nothing to write.
fn encode_line(
    measurement: &str,
    tags: &BTreeMap<&str, String>,
    fields: &BTreeMap<&str, FieldValue>,
    timestamp: i64,
) -> Option<Vec<u8>> {
    let mut entries = fields.iter();
    let (first_key, first_value) = entries.next()?;
    if measurement.is_empty() {
        return None;
    }

    let mut builder = LineProtocolBuilder::new().measurement(measurement);
    for (key, value) in tags {
        builder = builder.tag(key, value);
    }

    let mut builder = match first_value {
        FieldValue::String(s) => builder.field(first_key, s.as_str()),
        FieldValue::Integer(i) => builder.field(first_key, *i),
        FieldValue::UnsignedInteger(u) => builder.field(first_key, *u),
        FieldValue::Float(f) => builder.field(first_key, *f),
        FieldValue::Boolean(b) => builder.field(first_key, *b),
    };
    for (key, value) in entries {
        builder = match value {
            FieldValue::String(s) => builder.field(key, s.as_str()),
            FieldValue::Integer(i) => builder.field(key, *i),
            FieldValue::UnsignedInteger(u) => builder.field(key, *u),
            FieldValue::Float(f) => builder.field(key, *f),
            FieldValue::Boolean(b) => builder.field(key, *b),
        };
    }

    Some(builder.timestamp(timestamp).close_line().build())
}

impl<S, N> FormatEvent<S, N> for InfluxDBFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        visitor.fields.remove("message");

        let target = event.metadata().target();
        let measurement = target.strip_prefix(METRICS_TARGET_PREFIX).unwrap_or(target);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default();

        match encode_line(measurement, &visitor.tags, &visitor.fields, timestamp) {
            Some(line) => writer.write_str(&String::from_utf8_lossy(&line)),
            None => Ok(()),
        }
    }
}

fn is_metrics_target(target: &str) -> bool {
    target.starts_with(METRICS_TARGET_PREFIX)
}

/// Initiates the global tracing subscriber.
///
/// Diagnostics go to stderr. When `metrics_file` is set, `metrics.*` events
/// are additionally written to a daily rotated file next to it; the returned
/// guard must be held until exit to flush that file.
pub(crate) fn init(metrics_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let fmt_layer = utils::logging::get_fmt_layer().with_filter(
        utils::logging::default_env_filter()
            .and(filter::filter_fn(|metadata| !is_metrics_target(metadata.target()))),
    );

    let Some(metrics_file) = metrics_file else {
        registry().with(fmt_layer).try_init()?;
        return Ok(None);
    };

    let directory = metrics_file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let prefix = metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid metrics file path: {}", metrics_file.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(3)
        .build(directory)
        .context("failed to create rolling file appender")?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let metrics_layer = layer()
        .event_format(InfluxDBFormatter)
        .fmt_fields(tracing_subscriber::fmt::format::DefaultFields::new())
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(|metadata| {
            is_metrics_target(metadata.target())
        }));

    registry().with(fmt_layer).with(metrics_layer).try_init()?;
    Ok(Some(file_guard))
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(emit: impl FnOnce()) -> String {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let subscriber = registry().with(
            layer()
                .event_format(InfluxDBFormatter)
                .with_writer(move || writer.clone())
                .with_ansi(false),
        );
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn events_are_written_as_line_protocol() {
        let line = capture(|| {
            tracing::info!(
                target: "metrics.topology",
                tag_node = "gpu node-1",
                cores_free = 62u64,
                offset = -3i64,
                ratio = 0.5,
                mode = "observed",
            );
        });

        let (body, timestamp) = line.trim_end().rsplit_once(' ').unwrap();
        assert_eq!(
            body,
            r#"topology,node=gpu\ node-1 cores_free=62u,mode="observed",offset=-3i,ratio=0.5"#
        );
        assert!(timestamp.parse::<i64>().is_ok());
    }

    #[test]
    fn special_characters_are_escaped() {
        let line = capture(|| {
            tracing::info!(
                target: "metrics.disk usage",
                tag_node = "node a,b",
                label = "say \"hi\"",
            );
        });

        assert!(line.starts_with(r"disk\ usage,node=node\ a\,b "), "{line}");
        assert!(line.contains(r#"label="say \"hi\"""#), "{line}");
    }

    #[test]
    fn events_without_fields_are_dropped() {
        let line = capture(|| {
            tracing::info!(target: "metrics.topology", tag_node = "n");
        });

        assert_eq!(line, "");
    }

    #[test]
    fn encoded_line_carries_timestamp() {
        let tags = BTreeMap::from([("node", "n1".to_string())]);
        let fields = BTreeMap::from([("gpus_free", FieldValue::UnsignedInteger(2))]);

        let line = encode_line("topology", &tags, &fields, 1_700_000_000_000_000_000).unwrap();

        assert_eq!(
            String::from_utf8(line).unwrap(),
            "topology,node=n1 gpus_free=2u 1700000000000000000\n"
        );
        assert_eq!(encode_line("topology", &tags, &BTreeMap::new(), 0), None);
    }

    #[test]
    fn metrics_targets_are_recognized() {
        assert!(is_metrics_target("metrics.topology"));
        assert!(!is_metrics_target("flextopo_agent::app"));
    }
}
