//! Shared fixtures for unit tests.

use crate::host::{InMemoryHost, MemberModifiers, UnitBuilder, UnitId, UnitRc};

/// Builder for `com.app.Service`.
///
/// - `process(int)` calls `audit()` and returns
/// - `process(int,int)` delegates to `process(int)`
/// - `audit()` is private
/// - `<init>(int)` initialises the instance
pub fn service() -> UnitBuilder {
    UnitBuilder::new("com.app.Service")
        .constructor(&["int"], |b| b.source("self.limit = arg0"))
        .method("process", &["int"], |b| {
            b.source("validate(arg0)")
                .call("com.app.Service", "audit()")
                .returns()
        })
        .method("process", &["int", "int"], |b| {
            b.call("com.app.Service", "process(int)").returns()
        })
        .method("audit", &[], |b| b.source("log(arg0)"))
        .modifiers(MemberModifiers::PRIVATE)
}

/// Loads [`service`] into `host`.
pub fn load_service(host: &InMemoryHost) -> UnitRc {
    host.load(service())
}

/// Builds [`service`] under the given id without a host.
pub fn service_unit(id: u32) -> UnitRc {
    let (unit, _) = service().build(UnitId(id));
    UnitRc::new(unit)
}
