//! Integration tests for include/exclude restrictions and sampling granularity.

use livescope::prelude::*;
use std::sync::Arc;

fn setup() -> Result<(Arc<InMemoryHost>, Engine)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let host = Arc::new(InMemoryHost::new());
    host.load(
        UnitBuilder::new("com.app.api.Orders")
            .method("list", &[], |b| b.source("query()"))
            .method("sync", &[], |b| b.source("lock()"))
            .modifiers(MemberModifiers::PUBLIC | MemberModifiers::SYNCHRONIZED)
            .method("cache", &[], |b| b.source("fill()"))
            .modifiers(MemberModifiers::PRIVATE),
    );
    host.load(UnitBuilder::new("com.app.internal.Pool").method("take", &[], |b| b.source("pop()")));
    host.load(UnitBuilder::new("org.vendor.Client").method("call", &[], |b| b.source("send()")));

    let engine = Engine::attach(host.clone(), EngineConfig::default())?;
    Ok((host, engine))
}

fn instrument_all(engine: &Engine, global: RestrictionSet) -> Result<Vec<String>> {
    engine.instrument(
        &InstrumentationDescriptionBuilder::new()
            .method_pattern(&["*"], &["ResponseTimeProbe"])
            .global_restriction(global)
            .build()?,
    )?;
    Ok(engine
        .current_state()?
        .into_iter()
        .map(|entry| entry.signature)
        .collect())
}

#[test]
fn test_name_precedence() {
    let restriction = RestrictionSet::new()
        .include("com.app")
        .exclude("com.app.internal");

    assert!(restriction.is_excluded("com.app.internal.X"));
    assert!(!restriction.is_excluded("com.app.api.Y"));
    assert!(restriction.is_excluded("org.vendor.Client"));

    // a more specific include reopens an excluded package
    let reopened = restriction.clone().include("com.app.internal.Pool");
    assert!(!reopened.is_excluded("com.app.internal.Pool"));
    assert!(reopened.is_excluded("com.app.internal.Queue"));

    // equally specific entries resolve to exclude
    let tied = RestrictionSet::new().include("com.app").exclude("com.app");
    assert!(tied.is_excluded("com.app.api.Orders"));
}

#[test]
fn test_global_restriction_filters_units() -> Result<()> {
    let (_host, engine) = setup()?;
    let signatures = instrument_all(
        &engine,
        RestrictionSet::new()
            .include("com.app")
            .exclude("com.app.internal"),
    )?;

    assert!(signatures.iter().all(|s| s.starts_with("com.app.api.")));
    assert_eq!(signatures.len(), 3);
    Ok(())
}

#[test]
fn test_modifier_restrictions() -> Result<()> {
    let (_host, engine) = setup()?;
    let signatures = instrument_all(
        &engine,
        RestrictionSet::new()
            .include("com.app.api")
            .exclude_modifiers(MemberModifiers::PRIVATE),
    )?;
    assert_eq!(
        signatures,
        vec!["com.app.api.Orders.list()", "com.app.api.Orders.sync()"]
    );

    let (_host, engine) = setup()?;
    let signatures = instrument_all(
        &engine,
        RestrictionSet::new()
            .include("com.app.api")
            .include_modifiers(MemberModifiers::SYNCHRONIZED),
    )?;
    assert_eq!(signatures, vec!["com.app.api.Orders.sync()"]);
    Ok(())
}

#[test]
fn test_local_restriction_narrows_one_scope() -> Result<()> {
    let (_host, engine) = setup()?;
    engine.instrument(
        &InstrumentationDescriptionBuilder::new()
            .method_pattern(&["com.app.*"], &["ResponseTimeProbe"])
            .local_restriction(RestrictionSet::new().exclude("com.app.api"))
            .method_pattern(&["com.app.api.Orders.list()"], &["NanoResponseTimeProbe"])
            .build()?,
    )?;

    let state = engine.current_state()?;
    assert!(state.contains(&InstrumentationEntry {
        signature: "com.app.internal.Pool.take()".to_string(),
        probe_type: "ResponseTimeProbe".to_string(),
    }));
    assert!(state.contains(&InstrumentationEntry {
        signature: "com.app.api.Orders.list()".to_string(),
        probe_type: "NanoResponseTimeProbe".to_string(),
    }));
    assert!(!state.contains(&InstrumentationEntry {
        signature: "com.app.api.Orders.list()".to_string(),
        probe_type: "ResponseTimeProbe".to_string(),
    }));
    Ok(())
}

#[test]
fn test_granularity_guards_probe_code() -> Result<()> {
    let (host, engine) = setup()?;
    engine.instrument(
        &InstrumentationDescriptionBuilder::new()
            .method_pattern(&["org.vendor.Client.call()"], &["ResponseTimeProbe"])
            .local_restriction(RestrictionSet::new().with_granularity(0.1))
            .build()?,
    )?;

    let trace = host.invoke("org.vendor.Client.call()", &NoExpansion)?;
    assert_eq!(trace.count("if (_GenericProbe_threadId % 1000 < 100) {"), 2);
    let guard = trace.position("_GenericProbe_threadId % 1000").unwrap();
    let body = trace.position("send()").unwrap();
    assert!(guard < body);
    Ok(())
}

#[test]
fn test_invalid_granularity_is_rejected() -> Result<()> {
    let (host, engine) = setup()?;
    let description = InstrumentationDescriptionBuilder::new()
        .method_pattern(&["com.app.*"], &["ResponseTimeProbe"])
        .global_restriction(RestrictionSet::new().with_granularity(1.5))
        .build();

    let result = description.and_then(|d| engine.instrument(&d));
    assert!(matches!(result, Err(Error::Configuration { .. })));
    assert_eq!(host.redefinition_count(), 0);
    Ok(())
}
