use std::sync::Arc;

use junction::core::{BoxError, Interruptible};
use junction::prelude::*;
use parking_lot::Mutex;
use serde_json::json;

#[derive(Debug, Clone, Default, ExtensionPoint)]
#[extension_point(name = "user.saving")]
struct UserSaving {
    email: String,
    #[extension_point(interruptible)]
    state: InterruptibleState,
}

#[derive(Debug, Clone, Default, ExtensionPoint)]
struct PriceQuoted(i64);

#[derive(Debug, Default, ExtensionPoint)]
#[extension_point(name = "order.cancelling", crate = "junction::core")]
struct OrderCancelling(u64, #[extension_point(interruptible)] InterruptibleState);

fn trail() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn recorder(
    id: &'static str,
    log: &Arc<Mutex<Vec<&'static str>>>,
    verdict: bool,
) -> impl Handler<Point = UserSaving> + use<> {
    let log = Arc::clone(log);
    handler_fn(id, move |_: &mut UserSaving| {
        log.lock().push(id);
        verdict
    })
}

#[test]
fn derived_points_carry_names_and_state() {
    assert_eq!(UserSaving::point_name(), "user.saving");
    assert_eq!(OrderCancelling::point_name(), "order.cancelling");
    assert!(PriceQuoted::point_name().ends_with("PriceQuoted"));

    let mut point = OrderCancelling::default();
    assert!(point.interruption().is_some());
    assert!(PriceQuoted::default().interruption().is_none());
    point.interruption_mut().unwrap().interrupt(HandlerId::new("x"));
    assert!(point.is_interrupted());
}

#[test]
fn handlers_run_in_priority_then_registration_order() {
    let registry = Arc::new(PriorityRegistry::new());
    let log = trail();
    registry.register(recorder("low", &log, true), priority::LOW);
    registry.register(recorder("first-normal", &log, true), priority::NORMAL);
    registry.register(recorder("critical", &log, true), priority::CRITICAL);
    registry.register(recorder("second-normal", &log, true), priority::NORMAL);

    let dispatcher = Dispatcher::new(registry);
    dispatcher.dispatch(UserSaving::default()).unwrap();

    assert_eq!(
        *log.lock(),
        vec!["critical", "first-normal", "second-normal", "low"]
    );
}

#[test]
fn veto_stops_the_chain_and_names_the_handler() {
    let registry = Arc::new(PriorityRegistry::new());
    let log = trail();
    registry.register(recorder("a", &log, true), 10);
    registry.register(recorder("b", &log, false), 20);
    registry.register(recorder("c", &log, true), 30);

    let dispatcher = Dispatcher::new(registry);
    let mut point = UserSaving::default();
    let completed = dispatcher.dispatch_interruptible(&mut point).unwrap();

    assert!(!completed);
    assert_eq!(*log.lock(), vec!["a", "b"]);
    assert!(point.is_interrupted());
    assert_eq!(point.interrupted_by().map(HandlerId::as_str), Some("b"));

    // A fresh dispatch of the same value starts uninterrupted.
    log.lock().clear();
    dispatcher.mute("b");
    assert!(dispatcher.dispatch_interruptible(&mut point).unwrap());
    assert!(!point.is_interrupted());
    assert_eq!(*log.lock(), vec!["a", "c"]);
}

#[test]
fn graceful_mode_collects_failures() {
    let registry = Arc::new(PriorityRegistry::new());
    registry.register(
        handler_fn("ok", |_: &mut PriceQuoted| 1_i64),
        priority::HIGH,
    );
    registry.register(
        handler_fn("broken", |_: &mut PriceQuoted| {
            Err::<i64, BoxError>("tax service down".into())
        }),
        priority::NORMAL,
    );
    registry.register(
        handler_fn("after", |_: &mut PriceQuoted| 2_i64),
        priority::LOW,
    );
    let dispatcher = Dispatcher::new(registry);

    let err = dispatcher.dispatch(PriceQuoted(10)).unwrap_err();
    assert_eq!(err.handler().map(HandlerId::as_str), Some("broken"));

    let result = dispatcher
        .call()
        .graceful(true)
        .dispatch_with_results(&mut PriceQuoted(10))
        .unwrap();
    assert_eq!(result.results(), vec![json!(1), json!(2)]);
    assert_eq!(
        result.error("broken").unwrap().to_string(),
        "tax service down"
    );
}

#[test]
fn aggregation_strategies() {
    let registry = Arc::new(PriorityRegistry::new());
    registry.register(handler_fn("none", |_: &mut PriceQuoted| Option::<i64>::None), 10);
    registry.register(handler_fn("base", |p: &mut PriceQuoted| p.0), 20);
    registry.register(handler_fn("fee", |_: &mut PriceQuoted| 5_i64), 30);
    let dispatcher = Dispatcher::new(registry);

    let first = dispatcher
        .dispatch_aggregate(&mut PriceQuoted(100), &First)
        .unwrap();
    assert_eq!(first, json!(100));

    let total = dispatcher
        .dispatch_aggregate(&mut PriceQuoted(100), &Reduce::sum())
        .unwrap();
    assert_eq!(total, json!(105));

    let merged = dispatcher
        .dispatch_aggregate(&mut PriceQuoted(100), &Merge::new())
        .unwrap();
    assert_eq!(merged, json!([100, 5]));
}

#[test]
fn silence_and_scoped_mute_restore_state() {
    let registry = Arc::new(PriorityRegistry::new());
    let log = trail();
    registry.register(recorder("audit", &log, true), priority::NORMAL);
    let dispatcher = Dispatcher::new(registry);

    dispatcher.silence(|d| {
        d.dispatch(UserSaving::default()).unwrap();
    });
    dispatcher.muted(["audit"], |d| {
        d.dispatch(UserSaving::default()).unwrap();
    });
    assert!(log.lock().is_empty());
    assert!(!dispatcher.is_silenced());
    assert!(!dispatcher.is_muted("audit"));

    dispatcher.dispatch(UserSaving::default()).unwrap();
    assert_eq!(*log.lock(), vec!["audit"]);
}

#[test]
fn pipeline_transforms_in_order() {
    let out = Pipeline::send("x".to_string())
        .pipe(|s: String, next| next.run(s + "-a"))
        .pipe(|s: String, next| next.run(s + "-b"))
        .then_return()
        .unwrap();
    assert_eq!(out, "x-a-b");
}
