//! Probes registered by [`crate::registry::ExtensionRegistry::with_builtins`].
//!
//! The templates target the host's instrumentation dialect: `clock::`, `thread::` and the
//! record types are supplied by the host's probe runtime, and `_GenericProbe_collector` is
//! the collector handle every composed snippet opens with.

use crate::{probe::ProbeDescriptor, Result};

/// Name of the wrapper probe that brackets all probe code.
pub const GENERIC_PROBE: &str = "GenericProbe";
/// Name of the probe that carries the trace expansion hook.
pub const INCREMENTAL_PROBE: &str = "IncrementalInstrumentationProbe";
/// Name of the millisecond response-time probe.
pub const RESPONSE_TIME_PROBE: &str = "ResponseTimeProbe";
/// Name of the nanosecond response-time probe.
pub const NANO_RESPONSE_TIME_PROBE: &str = "NanoResponseTimeProbe";
/// Name of the query-capturing probe.
pub const SQL_QUERY_PROBE: &str = "SqlQueryProbe";

const GENERIC: &str = r#"
probe GenericProbe
var _GenericProbe_startTime: long
var _GenericProbe_callId: long
var _GenericProbe_collector: Collector
before
    _GenericProbe_collector = self.collector();
    _GenericProbe_callId = self.next_call_id();
    _GenericProbe_startTime = clock::millis();
end
"#;

const INCREMENTAL: &str = r#"
probe IncrementalInstrumentationProbe
incremental
    self.expand(__methodSignature, __scopeId);
end
"#;

const RESPONSE_TIME: &str = r#"
probe ResponseTimeProbe
var _ResponseTimeProbe_record: ResponseTimeRecord
after
    _ResponseTimeProbe_record = ResponseTimeRecord::new(_GenericProbe_startTime, _GenericProbe_callId);
    _ResponseTimeProbe_record.set_operation(__methodSignature);
    _ResponseTimeProbe_record.set_response_time(clock::millis() - _GenericProbe_startTime);
    _GenericProbe_collector.new_record(_ResponseTimeProbe_record);
end
"#;

const NANO_RESPONSE_TIME: &str = r#"
probe NanoResponseTimeProbe
var _NanoResponseTimeProbe_startNanos: long
var _NanoResponseTimeProbe_record: NanoResponseTimeRecord
before
    _NanoResponseTimeProbe_startNanos = clock::nanos();
end
after
    _NanoResponseTimeProbe_record = NanoResponseTimeRecord::new(_GenericProbe_startTime, _GenericProbe_callId);
    _NanoResponseTimeProbe_record.set_operation(__methodSignature);
    _NanoResponseTimeProbe_record.set_duration(clock::nanos() - _NanoResponseTimeProbe_startNanos);
    _GenericProbe_collector.new_record(_NanoResponseTimeProbe_record);
end
"#;

const SQL_QUERY: &str = r#"
probe SqlQueryProbe
var _SqlQueryProbe_query: String
var _SqlQueryProbe_record: SqlQueryRecord
before requires "execute", "prepare", "addBatch"
    _SqlQueryProbe_query = self.query_text(__parameter[0]);
end
before
    _SqlQueryProbe_query = "";
end
after
    _SqlQueryProbe_record = SqlQueryRecord::new(_GenericProbe_startTime, _GenericProbe_callId);
    _SqlQueryProbe_record.set_query(_SqlQueryProbe_query);
    _SqlQueryProbe_record.set_operation(__methodSignature);
    _GenericProbe_collector.new_record(_SqlQueryProbe_record);
end
"#;

/// Parses the built-in probe templates.
///
/// # Errors
///
/// Returns [`crate::Error::Configuration`] if a template is malformed.
pub fn builtin_probes() -> Result<Vec<ProbeDescriptor>> {
    [
        GENERIC,
        INCREMENTAL,
        RESPONSE_TIME,
        NANO_RESPONSE_TIME,
        SQL_QUERY,
    ]
    .iter()
    .map(|template| ProbeDescriptor::parse(template))
    .collect()
}
